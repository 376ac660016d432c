mod repository;
mod schema;

pub use repository::{Repository, ResetReport};
