// Storage interface shared by the Postgres and SQLite adapters

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::PersistenceResult;
use super::models::{GroupAffiliation, GroupUpdate, PingRecord};

/// Durable store for group affiliations, ping history and settings.
///
/// Call sites depend only on this trait; `PersistenceManager` decides which
/// backend sits behind it. Group CRUD is for administrative tooling; the
/// coordinator's hot path only lists groups, appends and queries pings and
/// reads settings.
#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend name for logs ("postgres", "sqlite", "memory")
    fn backend(&self) -> &'static str;

    async fn list_groups(&self) -> PersistenceResult<Vec<GroupAffiliation>>;

    /// Fails with `GroupExists` when the name is taken
    async fn create_group(&self, group: &GroupAffiliation) -> PersistenceResult<()>;

    /// Fails with `GroupNotFound` when no row matches
    async fn update_group(&self, name: &str, update: &GroupUpdate) -> PersistenceResult<()>;

    /// Fails with `GroupNotFound` when no row matches
    async fn delete_group(&self, name: &str) -> PersistenceResult<()>;

    async fn append_ping(&self, record: &PingRecord) -> PersistenceResult<()>;

    /// Pings for `group_name` strictly after `since`, newest first
    async fn query_pings(
        &self,
        group_name: &str,
        since: DateTime<Utc>,
    ) -> PersistenceResult<Vec<PingRecord>>;

    async fn get_setting(&self, key: &str) -> PersistenceResult<Option<String>>;

    /// Insert or overwrite
    async fn set_setting(&self, key: &str, value: &str) -> PersistenceResult<()>;
}
