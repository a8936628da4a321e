//! Group affiliations known to the coordinator.
//!
//! The registry owns an immutable snapshot that is swapped wholesale on
//! `reload()`. Readers hold an `Arc` to whichever snapshot was current when
//! they asked, so a reload never shows up half-applied.

use bastion_utils::RoleId;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::persistence::{GroupAffiliation, PersistenceManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    Store,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    groups: BTreeMap<String, GroupAffiliation>,
    source: SnapshotSource,
}

impl RegistrySnapshot {
    fn new(groups: impl IntoIterator<Item = GroupAffiliation>, source: SnapshotSource) -> Self {
        Self {
            groups: groups.into_iter().map(|g| (g.name.clone(), g)).collect(),
            source,
        }
    }

    pub fn get(&self, name: &str) -> Option<&GroupAffiliation> {
        self.groups.get(name)
    }

    /// Groups in name order
    pub fn groups(&self) -> impl Iterator<Item = &GroupAffiliation> {
        self.groups.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    pub fn find_by_role(&self, role: &RoleId) -> Option<&GroupAffiliation> {
        self.groups
            .values()
            .find(|g| &g.membership_role_ref == role)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn source(&self) -> SnapshotSource {
        self.source
    }
}

pub struct GroupRegistry {
    persistence: Arc<PersistenceManager>,
    fallback: Vec<GroupAffiliation>,
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl GroupRegistry {
    /// Starts out serving `fallback` until the first `reload()`.
    pub fn new(persistence: Arc<PersistenceManager>, fallback: Vec<GroupAffiliation>) -> Self {
        let initial = Arc::new(RegistrySnapshot::new(
            fallback.clone(),
            SnapshotSource::Fallback,
        ));
        Self {
            persistence,
            fallback,
            current: RwLock::new(initial),
        }
    }

    /// Re-read the affiliations from the store and publish them.
    ///
    /// An empty table publishes the fallback list. An unreachable store
    /// keeps the last snapshot read from it, or the fallback list if there
    /// never was one.
    pub async fn reload(&self) -> Arc<RegistrySnapshot> {
        let snapshot = match self.persistence.list_groups().await {
            Ok(groups) if !groups.is_empty() => {
                RegistrySnapshot::new(groups, SnapshotSource::Store)
            }
            Ok(_) => {
                info!(
                    "Registry: No groups in store, using {} fallback groups",
                    self.fallback.len()
                );
                RegistrySnapshot::new(self.fallback.clone(), SnapshotSource::Fallback)
            }
            Err(e) => {
                let current = self.snapshot();
                if current.source() == SnapshotSource::Store {
                    warn!(
                        "Registry: Failed to reload groups, keeping {} known groups: {}",
                        current.len(),
                        e
                    );
                } else {
                    debug!("Registry: Store unreachable, serving fallback groups: {}", e);
                }
                return current;
            }
        };

        let snapshot = Arc::new(snapshot);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = snapshot.clone();
        snapshot
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<GroupAffiliation> {
        self.snapshot().get(name).cloned()
    }
}
