pub mod engine;
pub mod episodes;
pub mod error;
pub mod ticker;
