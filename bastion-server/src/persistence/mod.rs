// Bastion Persistence Layer
//
// Durable storage for group affiliations, ping history and settings behind a
// single `Store` interface, with PostgreSQL and SQLite adapters, a
// write-behind queue and graceful degradation when no database is reachable.

mod error;
mod manager;
mod memory;
mod models;
mod postgres;
mod sqlite;
mod store;

pub use error::{PersistenceError, PersistenceResult};
pub use manager::{PersistenceManager, StorageConfig, WriteOperation};
pub use memory::MemoryStore;
pub use models::{GroupAffiliation, GroupUpdate, PingRecord};
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;
pub use store::Store;
