mod connection;
mod error;
#[cfg(test)]
pub(crate) mod seeder;
mod state;

pub use connection::{Connection, Swarm};
pub use error::PeerError;
pub use state::{ConnectionState, Flags};
