pub mod bencoding;
pub mod client;
pub mod codec;
pub mod core;
pub mod crypto;
pub mod message;
pub mod peer;
pub mod scheduler;
pub mod storage;
pub mod torrent;
pub mod tracker;
