mod decoder;
mod encoder;
mod error;
pub mod value;

pub use decoder::Parser;
pub use error::{ParseError, SchemaError};
pub use value::Value;
