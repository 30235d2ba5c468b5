//! Data layer module
//!
//! Local caching of synchronized entities:
//! - Entity records and their storage schemas
//! - In-memory and SQLite-backed stores
//! - The designated mutation context every store writes through

mod context;
mod database;
mod models;
mod store;

pub use context::MutationContext;
pub use database::{CacheDatabase, SqliteStore};
pub use models::*;
pub use store::{LocalStore, MemoryStore, RecordIndex, UpsertEffect, WriteGuard};
