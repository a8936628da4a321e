// In-memory store for tests and dry runs.
//
// Behaves like the SQL adapters, plus a switch that makes every call fail as
// if the database were unreachable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::error::{PersistenceError, PersistenceResult};
use super::models::{GroupAffiliation, GroupUpdate, PingRecord};
use super::store::Store;

#[derive(Default)]
pub struct MemoryStore {
    groups: Mutex<BTreeMap<String, GroupAffiliation>>,
    pings: Mutex<Vec<PingRecord>>,
    settings: Mutex<BTreeMap<String, String>>,
    unavailable: AtomicBool,
    append_count: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_groups(groups: impl IntoIterator<Item = GroupAffiliation>) -> Self {
        let store = Self::new();
        {
            let mut map = store.groups.lock().unwrap_or_else(|e| e.into_inner());
            for group in groups {
                map.insert(group.name.clone(), group);
            }
        }
        store
    }

    /// Make every subsequent call fail with `DatabaseUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Number of successful `append_ping` calls
    pub fn append_count(&self) -> usize {
        self.append_count.load(Ordering::Relaxed)
    }

    /// Snapshot of every stored ping, in insertion order
    pub fn pings(&self) -> Vec<PingRecord> {
        self.pings.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn check(&self) -> PersistenceResult<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(PersistenceError::DatabaseUnavailable(
                "memory store switched off".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn list_groups(&self) -> PersistenceResult<Vec<GroupAffiliation>> {
        self.check()?;
        let groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        Ok(groups.values().cloned().collect())
    }

    async fn create_group(&self, group: &GroupAffiliation) -> PersistenceResult<()> {
        self.check()?;
        let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        if groups.contains_key(&group.name) {
            return Err(PersistenceError::GroupExists(group.name.clone()));
        }
        groups.insert(group.name.clone(), group.clone());
        Ok(())
    }

    async fn update_group(&self, name: &str, update: &GroupUpdate) -> PersistenceResult<()> {
        self.check()?;
        let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        let group = groups
            .get_mut(name)
            .ok_or_else(|| PersistenceError::GroupNotFound(name.to_string()))?;
        if let Some(icon) = &update.icon_ref {
            group.icon_ref = icon.clone();
        }
        if let Some(role) = &update.membership_role_ref {
            group.membership_role_ref = role.clone();
        }
        Ok(())
    }

    async fn delete_group(&self, name: &str) -> PersistenceResult<()> {
        self.check()?;
        self.groups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| PersistenceError::GroupNotFound(name.to_string()))
    }

    async fn append_ping(&self, record: &PingRecord) -> PersistenceResult<()> {
        self.check()?;
        self.pings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        self.append_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn query_pings(
        &self,
        group_name: &str,
        since: DateTime<Utc>,
    ) -> PersistenceResult<Vec<PingRecord>> {
        self.check()?;
        let pings = self.pings.lock().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<PingRecord> = pings
            .iter()
            .filter(|p| p.group_name == group_name && p.occurred_at > since)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        Ok(matching)
    }

    async fn get_setting(&self, key: &str) -> PersistenceResult<Option<String>> {
        self.check()?;
        Ok(self
            .settings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> PersistenceResult<()> {
        self.check()?;
        self.settings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
