pub mod episode;
pub mod session;
