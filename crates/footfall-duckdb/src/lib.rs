pub mod backend;
pub mod queries;
pub mod schema;
mod store_impl;

pub use backend::DuckDbStore;

/// Re-export the `duckdb` crate so tests can inspect stored rows without an
/// extra dependency.
pub use duckdb;
