//! Ping history per group.
//!
//! Every ping is written twice: into a bounded in-memory window that serves
//! the panel's statistics, and through the write-behind queue into the
//! durable store, which answers longer history queries.

use bastion_utils::MemberId;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{info, warn};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::persistence::{PersistenceManager, PersistenceResult, PingRecord};

/// Entries older than this are dropped from memory
pub const RETENTION_DAYS: i64 = 7;
/// Newest entries kept in memory per group
pub const MAX_ENTRIES_PER_GROUP: usize = 100;
/// Days listed in a history breakdown
const HISTORY_DAYS_LISTED: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingStats {
    pub count_24h: u32,
    pub count_7d: u32,
    pub unique_24h: u32,
    pub unique_7d: u32,
}

/// Durable history of one group over a number of days
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingHistory {
    pub group_name: String,
    pub days: u32,
    pub total: u32,
    pub unique_initiators: u32,
    /// Newest day first, at most five days
    pub per_day: Vec<(NaiveDate, u32)>,
    /// Served from the in-memory window because the store was unreachable
    pub from_cache: bool,
}

pub struct PingLedger {
    persistence: Arc<PersistenceManager>,
    /// Oldest first, sorted by `occurred_at`
    entries: Mutex<HashMap<String, VecDeque<PingRecord>>>,
}

impl PingLedger {
    pub fn new(persistence: Arc<PersistenceManager>) -> Self {
        Self {
            persistence,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a ping in memory and queue its durable copy.
    ///
    /// Never fails: a durable write that cannot be queued is logged.
    pub fn record(&self, group_name: &str, initiator: &MemberId, now: DateTime<Utc>) {
        let record = PingRecord::new(group_name, initiator.clone(), now);
        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let buffer = entries.entry(group_name.to_string()).or_default();
            insert_sorted(buffer, record.clone());
            trim(buffer, now);
        }

        if let Err(e) = self.persistence.append_ping(record) {
            warn!("Ledger: Failed to queue ping for {}: {}", group_name, e);
        }
    }

    pub fn stats(&self, group_name: &str, now: DateTime<Utc>) -> PingStats {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let buffer = match entries.get(group_name) {
            Some(buffer) => buffer,
            None => return PingStats::default(),
        };

        let day_ago = now - Duration::hours(24);
        let week_ago = now - Duration::days(RETENTION_DAYS);
        let mut stats = PingStats::default();
        let mut initiators_24h = HashSet::new();
        let mut initiators_7d = HashSet::new();

        for entry in buffer.iter().filter(|e| e.occurred_at <= now) {
            if entry.occurred_at > week_ago {
                stats.count_7d += 1;
                initiators_7d.insert(&entry.initiator_id);
            }
            if entry.occurred_at > day_ago {
                stats.count_24h += 1;
                initiators_24h.insert(&entry.initiator_id);
            }
        }
        stats.unique_24h = initiators_24h.len() as u32;
        stats.unique_7d = initiators_7d.len() as u32;
        stats
    }

    /// In-memory entries currently held for a group
    pub fn buffered(&self, group_name: &str) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(group_name)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Load the trailing week of pings from the store for each group.
    pub async fn hydrate(&self, groups: &[String], now: DateTime<Utc>) {
        if !self.persistence.is_available() {
            return;
        }

        let since = now - Duration::days(RETENTION_DAYS);
        let mut loaded = 0;
        for group in groups {
            match self.persistence.query_pings(group, since).await {
                Ok(records) => {
                    loaded += records.len();
                    let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
                    let buffer = entries.entry(group.clone()).or_default();
                    for record in records {
                        if !buffer.contains(&record) {
                            insert_sorted(buffer, record);
                        }
                    }
                    trim(buffer, now);
                }
                Err(e) => warn!("Ledger: Failed to hydrate {}: {}", group, e),
            }
        }
        info!("Ledger: Hydrated {} pings for {} groups", loaded, groups.len());
    }

    /// History over `days` from the durable store, or from memory when the
    /// store cannot answer.
    pub async fn history(
        &self,
        group_name: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> PersistenceResult<PingHistory> {
        let since = now - Duration::days(i64::from(days));
        let (records, from_cache) = match self.persistence.query_pings(group_name, since).await {
            Ok(records) => (records, false),
            Err(e) if e.is_unavailable() => {
                warn!("Ledger: Store unavailable, history from memory: {}", e);
                (self.cached_since(group_name, since), true)
            }
            Err(e) => return Err(e),
        };

        let initiators: HashSet<&MemberId> = records.iter().map(|r| &r.initiator_id).collect();
        let mut per_day: BTreeMap<NaiveDate, u32> = BTreeMap::new();
        for record in &records {
            *per_day.entry(record.occurred_at.date_naive()).or_default() += 1;
        }

        Ok(PingHistory {
            group_name: group_name.to_string(),
            days,
            total: records.len() as u32,
            unique_initiators: initiators.len() as u32,
            per_day: per_day
                .into_iter()
                .rev()
                .take(HISTORY_DAYS_LISTED)
                .collect(),
            from_cache,
        })
    }

    fn cached_since(&self, group_name: &str, since: DateTime<Utc>) -> Vec<PingRecord> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(group_name)
            .map(|buffer| {
                buffer
                    .iter()
                    .filter(|r| r.occurred_at > since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn insert_sorted(buffer: &mut VecDeque<PingRecord>, record: PingRecord) {
    let at = buffer.partition_point(|r| r.occurred_at <= record.occurred_at);
    buffer.insert(at, record);
}

/// Drop entries outside the retention window, then cap the count.
fn trim(buffer: &mut VecDeque<PingRecord>, now: DateTime<Utc>) {
    let cutoff = now - Duration::days(RETENTION_DAYS);
    while buffer.front().map_or(false, |r| r.occurred_at <= cutoff) {
        buffer.pop_front();
    }
    while buffer.len() > MAX_ENTRIES_PER_GROUP {
        buffer.pop_front();
    }
}
