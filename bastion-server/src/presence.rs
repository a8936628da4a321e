//! Online member counts per group, sampled from the directory.

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::platform::{Directory, PlatformError, PlatformResult};
use crate::registry::GroupRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSnapshot {
    pub counts: BTreeMap<String, u32>,
    pub captured_at: DateTime<Utc>,
}

impl PresenceSnapshot {
    pub fn empty(captured_at: DateTime<Utc>) -> Self {
        Self {
            counts: BTreeMap::new(),
            captured_at,
        }
    }

    /// Zero for groups the snapshot does not know
    pub fn online(&self, group: &str) -> u32 {
        self.counts.get(group).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }
}

pub struct PresenceSampler {
    directory: Arc<dyn Directory>,
    registry: Arc<GroupRegistry>,
    clock: Arc<dyn Clock>,
    min_interval: Duration,
    /// Last successful sample; the lock also serializes refreshes
    cached: Mutex<Option<PresenceSnapshot>>,
}

impl PresenceSampler {
    pub fn new(
        directory: Arc<dyn Directory>,
        registry: Arc<GroupRegistry>,
        clock: Arc<dyn Clock>,
        min_interval: std::time::Duration,
    ) -> Self {
        Self {
            directory,
            registry,
            clock,
            min_interval: crate::clock::span(min_interval),
            cached: Mutex::new(None),
        }
    }

    /// Current counts, resampled when `force` is set or the cached sample
    /// is older than the minimum interval.
    ///
    /// A failed sample leaves the cache untouched and returns it. The only
    /// error surfaced is a forced refresh failing before anything was ever
    /// sampled.
    pub async fn refresh(&self, force: bool) -> PlatformResult<PresenceSnapshot> {
        let mut cached = self.cached.lock().await;
        let now = self.clock.now();

        if !force {
            if let Some(snapshot) = cached.as_ref() {
                if now - snapshot.captured_at < self.min_interval {
                    return Ok(snapshot.clone());
                }
            }
        }

        match self.sample(now).await {
            Ok(snapshot) => {
                debug!(
                    "Presence: sampled {} groups, {} online",
                    snapshot.counts.len(),
                    snapshot.total()
                );
                *cached = Some(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) => {
                warn!("Presence: directory sample failed, keeping last snapshot: {}", e);
                match cached.as_ref() {
                    Some(previous) => Ok(previous.clone()),
                    None if force => Err(e),
                    None => Ok(PresenceSnapshot::empty(now)),
                }
            }
        }
    }

    /// Last successful sample without touching the directory
    pub async fn current(&self) -> Option<PresenceSnapshot> {
        self.cached.lock().await.clone()
    }

    async fn sample(&self, now: DateTime<Utc>) -> PlatformResult<PresenceSnapshot> {
        let registry = self.registry.snapshot();
        let mut counts = BTreeMap::new();

        for group in registry.groups() {
            let role = &group.membership_role_ref;
            let online = match self.directory.get_role(role).await {
                Ok(_) => match self.directory.get_role_members(role).await {
                    Ok(members) => members.iter().filter(|m| m.is_available()).count() as u32,
                    Err(PlatformError::NotFound(_)) => 0,
                    Err(e) => return Err(e),
                },
                Err(PlatformError::NotFound(_)) => {
                    debug!("Presence: role {} of {} is gone, counting 0", role, group.name);
                    0
                }
                Err(e) => return Err(e),
            };
            counts.insert(group.name.clone(), online);
        }

        Ok(PresenceSnapshot {
            counts,
            captured_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::persistence::{GroupAffiliation, PersistenceManager};
    use crate::platform::{MemoryPlatform, RoleMember};
    use bastion_utils::{MemberStatus, RoleId};

    struct Fixture {
        platform: Arc<MemoryPlatform>,
        clock: Arc<ManualClock>,
        sampler: PresenceSampler,
    }

    fn fixture() -> Fixture {
        let platform = Arc::new(MemoryPlatform::new());
        platform.set_role(
            &RoleId::new("r-alpha"),
            "Alpha",
            vec![
                RoleMember::new("1", false, MemberStatus::Online),
                RoleMember::new("2", false, MemberStatus::Idle),
                RoleMember::new("3", false, MemberStatus::Offline),
                RoleMember::new("4", true, MemberStatus::Online),
            ],
        );
        platform.set_role(
            &RoleId::new("r-bravo"),
            "Bravo",
            vec![RoleMember::new("5", false, MemberStatus::DoNotDisturb)],
        );

        let registry = Arc::new(GroupRegistry::new(
            Arc::new(PersistenceManager::disabled()),
            vec![
                GroupAffiliation::new("Alpha", "a", "r-alpha"),
                GroupAffiliation::new("Bravo", "b", "r-bravo"),
            ],
        ));
        let clock = Arc::new(ManualClock::default());
        let sampler = PresenceSampler::new(
            platform.clone(),
            registry,
            clock.clone(),
            std::time::Duration::from_secs(600),
        );
        Fixture {
            platform,
            clock,
            sampler,
        }
    }

    #[tokio::test]
    async fn test_counts_exclude_bots_and_offline() {
        let f = fixture();
        let snapshot = f.sampler.refresh(true).await.unwrap();
        assert_eq!(snapshot.online("Alpha"), 2);
        assert_eq!(snapshot.online("Bravo"), 1);
        assert_eq!(snapshot.total(), 3);
    }

    #[tokio::test]
    async fn test_min_interval_returns_cached_snapshot() {
        let f = fixture();
        let first = f.sampler.refresh(true).await.unwrap();

        f.platform.set_role(&RoleId::new("r-bravo"), "Bravo", Vec::new());
        f.clock.advance(Duration::seconds(60));
        assert_eq!(f.sampler.refresh(false).await.unwrap(), first);

        assert_eq!(f.sampler.refresh(true).await.unwrap().online("Bravo"), 0);

        f.platform.set_role(
            &RoleId::new("r-bravo"),
            "Bravo",
            vec![RoleMember::new("5", false, MemberStatus::Online)],
        );
        f.clock.advance(Duration::seconds(601));
        assert_eq!(f.sampler.refresh(false).await.unwrap().online("Bravo"), 1);
    }

    #[tokio::test]
    async fn test_deleted_role_counts_as_zero() {
        let f = fixture();
        f.sampler.refresh(true).await.unwrap();

        f.platform.remove_role(&RoleId::new("r-alpha"));
        let snapshot = f.sampler.refresh(true).await.unwrap();
        assert_eq!(snapshot.online("Alpha"), 0);
        assert_eq!(snapshot.counts.get("Alpha"), Some(&0));
        assert_eq!(snapshot.online("Bravo"), 1);
    }

    #[tokio::test]
    async fn test_unreachable_directory_keeps_previous_snapshot() {
        let f = fixture();
        let first = f.sampler.refresh(true).await.unwrap();

        f.platform.set_directory_available(false);
        f.clock.advance(Duration::seconds(700));
        assert_eq!(f.sampler.refresh(false).await.unwrap(), first);
        assert_eq!(f.sampler.refresh(true).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_forced_bootstrap_failure_is_raised() {
        let f = fixture();
        f.platform.set_directory_available(false);

        assert!(matches!(
            f.sampler.refresh(true).await,
            Err(PlatformError::Unavailable(_))
        ));
        let unforced = f.sampler.refresh(false).await.unwrap();
        assert_eq!(unforced.total(), 0);
        assert!(f.sampler.current().await.is_none());
    }
}
