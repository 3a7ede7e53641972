mod block;
mod error;
mod handshake;
#[allow(clippy::module_inception)]
mod message;

pub use block::*;
pub use error::*;
pub use handshake::*;
pub use message::*;
