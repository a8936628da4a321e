// Persistence Manager with backend selection and write-behind queue

use super::{
    error::{PersistenceError, PersistenceResult},
    models::{GroupAffiliation, PingRecord},
    postgres::PostgresStore,
    sqlite::SqliteStore,
    store::Store,
};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

/// Where the durable store lives
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Primary PostgreSQL URL
    pub database_url: Option<String>,
    /// SQLite file used when Postgres is not configured or unreachable
    pub sqlite_path: Option<PathBuf>,
}

/// Write operations queued for background processing
#[derive(Debug)]
pub enum WriteOperation {
    AppendPing(PingRecord),
    SetSetting { key: String, value: String },
    /// Acknowledged once everything queued before it has been written
    Flush(oneshot::Sender<()>),
}

/// Owns the selected store and the write-behind queue in front of it.
///
/// Writes are fire-and-forget for callers: they are queued and applied by a
/// background task that logs failures instead of returning them. Reads go
/// straight to the store.
pub struct PersistenceManager {
    store: Option<Arc<dyn Store>>,
    write_queue_tx: UnboundedSender<WriteOperation>,
}

impl PersistenceManager {
    /// Connect to Postgres, falling back to SQLite, falling back to no
    /// persistence at all.
    pub async fn connect(config: &StorageConfig) -> Self {
        let mut store: Option<Arc<dyn Store>> = None;

        if let Some(url) = &config.database_url {
            match PostgresStore::connect(url).await {
                Ok(pg) => store = Some(Arc::new(pg)),
                Err(e) => {
                    warn!("Store: Failed to connect to PostgreSQL: {}", e);
                    warn!("Store: Falling back to SQLite");
                }
            }
        }

        if store.is_none() {
            if let Some(path) = &config.sqlite_path {
                match SqliteStore::open(path).await {
                    Ok(sqlite) => store = Some(Arc::new(sqlite)),
                    Err(e) => warn!("Store: Failed to open SQLite at {}: {}", path.display(), e),
                }
            }
        }

        match store {
            Some(store) => Self::with_store(store),
            None => {
                if config.database_url.is_some() || config.sqlite_path.is_some() {
                    error!("Store: No durable store reachable, running without persistence");
                } else {
                    info!("Store: No database configured, persistence disabled");
                }
                Self::disabled()
            }
        }
    }

    /// Use an already-opened store. Must be called inside a tokio runtime.
    pub fn with_store(store: Arc<dyn Store>) -> Self {
        let (write_queue_tx, write_queue_rx) = mpsc::unbounded_channel();
        info!("Store: Using {} backend", store.backend());

        let writer = store.clone();
        tokio::spawn(async move {
            Self::process_write_queue(writer, write_queue_rx).await;
        });

        Self {
            store: Some(store),
            write_queue_tx,
        }
    }

    /// No backing store: writes are dropped, reads report unavailability
    pub fn disabled() -> Self {
        let (write_queue_tx, _write_queue_rx) = mpsc::unbounded_channel();
        Self {
            store: None,
            write_queue_tx,
        }
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    pub fn backend(&self) -> Option<&'static str> {
        self.store.as_ref().map(|s| s.backend())
    }

    /// Direct access for administrative tooling
    pub fn store(&self) -> PersistenceResult<&Arc<dyn Store>> {
        self.store
            .as_ref()
            .ok_or_else(|| PersistenceError::DatabaseUnavailable("No store".to_string()))
    }

    /// Queue a write operation (write-behind)
    pub fn queue_write(&self, operation: WriteOperation) -> PersistenceResult<()> {
        if !self.is_available() {
            // Nothing to write to; the in-memory caller proceeds regardless
            return Ok(());
        }

        self.write_queue_tx
            .send(operation)
            .map_err(|e| PersistenceError::QueryFailed(format!("Failed to queue write: {}", e)))
    }

    /// Append a ping record (queued async write)
    pub fn append_ping(&self, record: PingRecord) -> PersistenceResult<()> {
        self.queue_write(WriteOperation::AppendPing(record))
    }

    /// Store a setting (queued async write)
    pub fn set_setting(&self, key: &str, value: &str) -> PersistenceResult<()> {
        self.queue_write(WriteOperation::SetSetting {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Wait until every write queued so far has been applied (or failed)
    pub async fn flush(&self) {
        if !self.is_available() {
            return;
        }
        let (tx, rx) = oneshot::channel();
        if self.queue_write(WriteOperation::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn list_groups(&self) -> PersistenceResult<Vec<GroupAffiliation>> {
        self.store()?.list_groups().await
    }

    pub async fn query_pings(
        &self,
        group_name: &str,
        since: DateTime<Utc>,
    ) -> PersistenceResult<Vec<PingRecord>> {
        self.store()?.query_pings(group_name, since).await
    }

    /// Read a setting, returning `default` when absent or unreadable
    pub async fn setting_or(&self, key: &str, default: &str) -> String {
        let store = match self.store() {
            Ok(store) => store,
            Err(_) => return default.to_string(),
        };
        match store.get_setting(key).await {
            Ok(Some(value)) => value,
            Ok(None) => default.to_string(),
            Err(e) => {
                warn!("Store: Failed to read setting {}: {}", key, e);
                default.to_string()
            }
        }
    }

    /// Process write queue (background task)
    async fn process_write_queue(store: Arc<dyn Store>, mut rx: UnboundedReceiver<WriteOperation>) {
        info!("Store: Write queue processor started");

        while let Some(operation) = rx.recv().await {
            if let Err(e) = Self::execute_write_operation(store.as_ref(), operation).await {
                // Keep draining; the in-memory view already has the data
                error!("Store: Write operation failed: {}", e);
            }
        }

        warn!("Store: Write queue processor stopped");
    }

    async fn execute_write_operation(
        store: &dyn Store,
        operation: WriteOperation,
    ) -> PersistenceResult<()> {
        match operation {
            WriteOperation::AppendPing(record) => store.append_ping(&record).await,
            WriteOperation::SetSetting { key, value } => store.set_setting(&key, &value).await,
            WriteOperation::Flush(ack) => {
                let _ = ack.send(());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use bastion_utils::MemberId;

    #[tokio::test]
    async fn test_manager_without_db_gracefully_degrades() {
        let manager = PersistenceManager::connect(&StorageConfig::default()).await;
        assert!(!manager.is_available());

        let record = PingRecord::new("Alpha", MemberId::new("42"), Utc::now());
        assert!(manager.append_ping(record).is_ok());
        assert!(matches!(
            manager.list_groups().await,
            Err(PersistenceError::DatabaseUnavailable(_))
        ));
        assert_eq!(manager.setting_or("missing", "fallback").await, "fallback");
        manager.flush().await;
    }

    #[tokio::test]
    async fn test_unreachable_postgres_falls_back_to_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            database_url: Some("postgres://nobody@127.0.0.1:1/none".to_string()),
            sqlite_path: Some(dir.path().join("fallback.db")),
        };
        let manager = PersistenceManager::connect(&config).await;
        assert_eq!(manager.backend(), Some("sqlite"));
    }

    #[tokio::test]
    async fn test_writes_are_applied_behind_the_caller() {
        let store = Arc::new(MemoryStore::new());
        let manager = PersistenceManager::with_store(store.clone());

        for _ in 0..3 {
            let record = PingRecord::new("Alpha", MemberId::new("42"), Utc::now());
            manager.append_ping(record).unwrap();
        }
        manager.set_setting("PANEL_CHANNEL_ID", "9").unwrap();
        manager.flush().await;

        assert_eq!(store.append_count(), 3);
        assert_eq!(manager.setting_or("PANEL_CHANNEL_ID", "1").await, "9");
    }

    #[tokio::test]
    async fn test_failed_writes_do_not_stop_the_queue() {
        let store = Arc::new(MemoryStore::new());
        let manager = PersistenceManager::with_store(store.clone());

        store.set_unavailable(true);
        manager
            .append_ping(PingRecord::new("Alpha", MemberId::new("1"), Utc::now()))
            .unwrap();
        manager.flush().await;
        assert_eq!(store.append_count(), 0);

        store.set_unavailable(false);
        manager
            .append_ping(PingRecord::new("Alpha", MemberId::new("2"), Utc::now()))
            .unwrap();
        manager.flush().await;
        assert_eq!(store.append_count(), 1);
    }
}
