pub mod connection;
pub mod writer;
