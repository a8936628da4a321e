// SQLite store adapter
//
// Timestamps are stored as unix milliseconds so range queries compare integers.

use async_trait::async_trait;
use bastion_utils::{MemberId, RoleId};
use chrono::{DateTime, TimeZone, Utc};
use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::error::{PersistenceError, PersistenceResult};
use super::models::{GroupAffiliation, GroupUpdate, PingRecord};
use super::store::Store;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) a database file and apply migrations
    pub async fn open(path: &Path) -> PersistenceResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(|e| PersistenceError::ConnectionFailed(e.to_string()))?;
        info!("Store: SQLite database opened at {}", path.display());
        Self::migrated(pool).await
    }

    /// Private in-memory database (single connection so every query sees it)
    pub async fn in_memory() -> PersistenceResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| PersistenceError::ConnectionFailed(e.to_string()))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| PersistenceError::ConnectionFailed(e.to_string()))?;
        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> PersistenceResult<Self> {
        sqlx::migrate!("./migrations/sqlite").run(&pool).await?;
        Ok(Self { pool })
    }

    fn group_from_row(row: &SqliteRow) -> PersistenceResult<GroupAffiliation> {
        Ok(GroupAffiliation {
            name: row.try_get("group_name")?,
            icon_ref: row.try_get("icon_ref")?,
            membership_role_ref: RoleId::new(row.try_get::<String, _>("role_ref")?),
        })
    }

    fn ping_from_row(row: &SqliteRow) -> PersistenceResult<PingRecord> {
        let millis: i64 = row.try_get("occurred_at")?;
        let occurred_at = Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
            PersistenceError::SerializationError(format!("invalid timestamp: {}", millis))
        })?;
        Ok(PingRecord {
            group_name: row.try_get("group_name")?,
            initiator_id: MemberId::new(row.try_get::<String, _>("initiator_id")?),
            occurred_at,
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn list_groups(&self) -> PersistenceResult<Vec<GroupAffiliation>> {
        let rows = sqlx::query("SELECT group_name, icon_ref, role_ref FROM groups ORDER BY group_name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::group_from_row).collect()
    }

    async fn create_group(&self, group: &GroupAffiliation) -> PersistenceResult<()> {
        sqlx::query("INSERT INTO groups (group_name, icon_ref, role_ref) VALUES (?, ?, ?)")
            .bind(&group.name)
            .bind(&group.icon_ref)
            .bind(group.membership_role_ref.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    PersistenceError::GroupExists(group.name.clone())
                }
                other => other.into(),
            })?;
        Ok(())
    }

    async fn update_group(&self, name: &str, update: &GroupUpdate) -> PersistenceResult<()> {
        let result = sqlx::query(
            "UPDATE groups SET icon_ref = COALESCE(?, icon_ref), role_ref = COALESCE(?, role_ref)
             WHERE group_name = ?",
        )
        .bind(update.icon_ref.as_deref())
        .bind(update.membership_role_ref.as_ref().map(RoleId::as_str))
        .bind(name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::GroupNotFound(name.to_string()));
        }
        Ok(())
    }

    async fn delete_group(&self, name: &str) -> PersistenceResult<()> {
        let result = sqlx::query("DELETE FROM groups WHERE group_name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::GroupNotFound(name.to_string()));
        }
        Ok(())
    }

    async fn append_ping(&self, record: &PingRecord) -> PersistenceResult<()> {
        sqlx::query("INSERT INTO ping_history (group_name, initiator_id, occurred_at) VALUES (?, ?, ?)")
            .bind(&record.group_name)
            .bind(record.initiator_id.as_str())
            .bind(record.occurred_at.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query_pings(
        &self,
        group_name: &str,
        since: DateTime<Utc>,
    ) -> PersistenceResult<Vec<PingRecord>> {
        let rows = sqlx::query(
            "SELECT group_name, initiator_id, occurred_at FROM ping_history
             WHERE group_name = ? AND occurred_at > ?
             ORDER BY occurred_at DESC",
        )
        .bind(group_name)
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::ping_from_row).collect()
    }

    async fn get_setting(&self, key: &str) -> PersistenceResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_setting(&self, key: &str, value: &str) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_group_crud() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .create_group(&GroupAffiliation::new("Alpha", ":alpha:", "100"))
            .await
            .unwrap();

        let dup = store
            .create_group(&GroupAffiliation::new("Alpha", ":other:", "101"))
            .await;
        assert!(matches!(dup, Err(PersistenceError::GroupExists(_))));

        store
            .update_group(
                "Alpha",
                &GroupUpdate {
                    icon_ref: Some(":a:".to_string()),
                    membership_role_ref: None,
                },
            )
            .await
            .unwrap();
        let groups = store.list_groups().await.unwrap();
        assert_eq!(groups, vec![GroupAffiliation::new("Alpha", ":a:", "100")]);

        store.delete_group("Alpha").await.unwrap();
        assert!(matches!(
            store.delete_group("Alpha").await,
            Err(PersistenceError::GroupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_query_pings_respects_since_and_order() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        for hours in [1, 30, 200] {
            let record = PingRecord::new(
                "Alpha",
                MemberId::new("42"),
                now - ChronoDuration::hours(hours),
            );
            store.append_ping(&record).await.unwrap();
        }
        store
            .append_ping(&PingRecord::new("Beta", MemberId::new("7"), now))
            .await
            .unwrap();

        let pings = store
            .query_pings("Alpha", now - ChronoDuration::days(7))
            .await
            .unwrap();
        assert_eq!(pings.len(), 2);
        assert!(pings[0].occurred_at > pings[1].occurred_at);
        assert_eq!(
            pings[0].occurred_at.timestamp_millis(),
            (now - ChronoDuration::hours(1)).timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_settings_upsert() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.get_setting("ALERT_CHANNEL_ID").await.unwrap(), None);

        store.set_setting("ALERT_CHANNEL_ID", "1").await.unwrap();
        store.set_setting("ALERT_CHANNEL_ID", "2").await.unwrap();
        assert_eq!(
            store.get_setting("ALERT_CHANNEL_ID").await.unwrap(),
            Some("2".to_string())
        );
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bastion.db");
        let store = SqliteStore::open(&path).await.unwrap();
        store.set_setting("k", "v").await.unwrap();
        assert!(path.exists());
        assert_eq!(store.backend(), "sqlite");
    }
}
