pub mod connection;
pub mod error;
pub mod reader;

#[cfg(test)]
pub mod test_support;

pub use connection::{Connection, Record};
pub use error::BagError;
pub use reader::BagReader;
