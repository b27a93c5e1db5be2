pub mod models;
pub mod pool;
pub mod repository;

#[cfg(test)]
pub mod memory;

pub use models::*;
pub use pool::DbPool;
pub use repository::{PgRepository, Store};
