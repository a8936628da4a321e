// Live incidents by id
//
// Each incident sits behind its own async lock: actions on one incident
// are serialized (which makes resolution first-wins) while different
// incidents proceed independently.

use bastion_utils::IncidentId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

use super::AlertIncident;

pub type SharedIncident = Arc<Mutex<AlertIncident>>;

#[derive(Default)]
pub struct IncidentBoard {
    incidents: StdMutex<HashMap<IncidentId, SharedIncident>>,
}

impl IncidentBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, incident: AlertIncident) -> SharedIncident {
        let id = incident.id;
        let shared = Arc::new(Mutex::new(incident));
        self.incidents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, shared.clone());
        shared
    }

    pub fn get(&self, id: &IncidentId) -> Option<SharedIncident> {
        self.incidents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Returns whether the incident was present
    pub fn remove(&self, id: &IncidentId) -> bool {
        self.incidents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some()
    }

    pub fn contains(&self, id: &IncidentId) -> bool {
        self.incidents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.incidents.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget incidents opened before `cutoff`, resolved or not. Incidents
    /// busy with an action are left for the next sweep.
    pub fn prune_opened_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut incidents = self.incidents.lock().unwrap_or_else(|e| e.into_inner());
        let before = incidents.len();
        incidents.retain(|_, shared| match shared.try_lock() {
            Ok(incident) => incident.opened_at >= cutoff,
            Err(_) => true,
        });
        before - incidents.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::GroupAffiliation;
    use bastion_utils::{MemberId, Outcome};
    use chrono::Duration;

    fn incident(opened_at: DateTime<Utc>) -> AlertIncident {
        AlertIncident::new(
            &GroupAffiliation::new("Alpha", "🏰", "r-alpha"),
            MemberId::new("42"),
            "alert".to_string(),
            opened_at,
        )
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let board = IncidentBoard::new();
        let shared = board.insert(incident(Utc::now()));
        let id = shared.lock().await.id;

        assert!(board.contains(&id));
        assert!(Arc::ptr_eq(&board.get(&id).unwrap(), &shared));
        assert!(board.remove(&id));
        assert!(!board.remove(&id));
        assert!(board.get(&id).is_none());
        assert!(board.is_empty());
    }

    #[tokio::test]
    async fn test_prune_drops_old_incidents_open_or_resolved() {
        let board = IncidentBoard::new();
        let now = Utc::now();
        let old = now - Duration::days(2);

        let open_old = board.insert(incident(old));
        let resolved_old = board.insert(incident(old));
        let open_new = board.insert(incident(now));
        resolved_old
            .lock()
            .await
            .resolve(Outcome::Won, MemberId::new("1"))
            .unwrap();

        assert_eq!(board.prune_opened_before(now - Duration::days(1)), 2);
        assert!(!board.contains(&open_old.lock().await.id));
        assert!(!board.contains(&resolved_old.lock().await.id));
        assert!(board.contains(&open_new.lock().await.id));
    }

    #[tokio::test]
    async fn test_prune_skips_incident_in_use() {
        let board = IncidentBoard::new();
        let now = Utc::now();
        let busy = board.insert(incident(now - Duration::days(2)));

        let guard = busy.lock().await;
        assert_eq!(board.prune_opened_before(now), 0);
        let id = guard.id;
        drop(guard);

        assert_eq!(board.prune_opened_before(now), 1);
        assert!(!board.contains(&id));
    }
}
