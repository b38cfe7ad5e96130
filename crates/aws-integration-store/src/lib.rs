//! Local durable key-value storage: SQLite for real units, in-memory for
//! tests and ephemeral hosts.
//!
//! Each unit owns its store; nothing here is shared over the relation.

pub mod memory;
pub mod schema;
pub mod sqlite;

pub use memory::MemoryKv;
pub use sqlite::SqliteKv;

use aws_integration_core::Result;

/// String key-value storage that outlives a single evaluation cycle.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite `key`.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Returns whether it existed.
    fn unset(&self, key: &str) -> Result<bool>;

    /// All keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}
