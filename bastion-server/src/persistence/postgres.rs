// PostgreSQL store adapter

use async_trait::async_trait;
use bastion_utils::{MemberId, RoleId};
use chrono::{DateTime, Utc};
use log::info;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;

use super::error::{PersistenceError, PersistenceResult};
use super::models::{GroupAffiliation, GroupUpdate, PingRecord};
use super::store::Store;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and apply migrations
    pub async fn connect(url: &str) -> PersistenceResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(|e| PersistenceError::ConnectionFailed(e.to_string()))?;
        info!("Store: PostgreSQL connection pool established");

        sqlx::migrate!("./migrations/postgres").run(&pool).await?;
        info!("Store: PostgreSQL migrations applied");

        Ok(Self { pool })
    }

    fn group_from_row(row: &PgRow) -> PersistenceResult<GroupAffiliation> {
        Ok(GroupAffiliation {
            name: row.try_get("group_name")?,
            icon_ref: row.try_get("icon_ref")?,
            membership_role_ref: RoleId::new(row.try_get::<String, _>("role_ref")?),
        })
    }

    fn ping_from_row(row: &PgRow) -> PersistenceResult<PingRecord> {
        Ok(PingRecord {
            group_name: row.try_get("group_name")?,
            initiator_id: MemberId::new(row.try_get::<String, _>("initiator_id")?),
            occurred_at: row.try_get("occurred_at")?,
        })
    }
}

#[async_trait]
impl Store for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn list_groups(&self) -> PersistenceResult<Vec<GroupAffiliation>> {
        let rows = sqlx::query("SELECT group_name, icon_ref, role_ref FROM groups ORDER BY group_name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::group_from_row).collect()
    }

    async fn create_group(&self, group: &GroupAffiliation) -> PersistenceResult<()> {
        sqlx::query("INSERT INTO groups (group_name, icon_ref, role_ref) VALUES ($1, $2, $3)")
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
            "UPDATE groups SET icon_ref = COALESCE($1, icon_ref), role_ref = COALESCE($2, role_ref)
             WHERE group_name = $3",
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
        let result = sqlx::query("DELETE FROM groups WHERE group_name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::GroupNotFound(name.to_string()));
        }
        Ok(())
    }

    async fn append_ping(&self, record: &PingRecord) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO ping_history (group_name, initiator_id, occurred_at) VALUES ($1, $2, $3)",
        )
        .bind(&record.group_name)
        .bind(record.initiator_id.as_str())
        .bind(record.occurred_at)
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
             WHERE group_name = $1 AND occurred_at > $2
             ORDER BY occurred_at DESC",
        )
        .bind(group_name)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::ping_from_row).collect()
    }

    async fn get_setting(&self, key: &str) -> PersistenceResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_setting(&self, key: &str, value: &str) -> PersistenceResult<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
