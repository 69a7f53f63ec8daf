pub mod buffer;
pub mod catalog;
pub mod common;
pub mod concurrency;
pub mod database;
pub mod error;
pub mod storage;
pub mod tuple;

pub use database::{Database, DatabaseConfig};
pub use error::DbError;
