//! Persistent book records.

mod models;
mod schema;
mod store;

pub use models::{Book, InsertResult};
pub use store::{LibraryStore, SqliteLibraryStore};
