// Members waiting to post an evidence image
//
// A member who asked to attach evidence has their next posted attachment
// routed here instead of being ignored. One waiter per member; asking
// again supersedes the earlier wait.

use bastion_utils::MemberId;
use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

use super::{IncidentError, IncidentResult};

struct Waiter {
    generation: u64,
    tx: oneshot::Sender<String>,
}

#[derive(Default)]
pub struct EvidenceWaiters {
    waiting: Mutex<HashMap<MemberId, Waiter>>,
    generation: Mutex<u64>,
}

impl EvidenceWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for `member` to post an attachment.
    pub async fn wait_for(&self, member: &MemberId, timeout: Duration) -> IncidentResult<String> {
        let (tx, rx) = oneshot::channel();
        let generation = {
            let mut counter = self.generation.lock().unwrap_or_else(|e| e.into_inner());
            *counter += 1;
            *counter
        };
        self.waiting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(member.clone(), Waiter { generation, tx });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(url)) => Ok(url),
            // Superseded by a newer wait from the same member
            Ok(Err(_)) => Err(IncidentError::EvidenceTimeout),
            Err(_) => {
                let mut waiting = self.waiting.lock().unwrap_or_else(|e| e.into_inner());
                if waiting.get(member).map(|w| w.generation) == Some(generation) {
                    waiting.remove(member);
                }
                debug!("Incident: evidence wait for {} timed out", member);
                Err(IncidentError::EvidenceTimeout)
            }
        }
    }

    /// Hand an attachment to the member's waiter. `false` when nobody waits.
    pub fn deliver(&self, member: &MemberId, url: &str) -> bool {
        let waiter = self
            .waiting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(member);
        match waiter {
            Some(waiter) => waiter.tx.send(url.to_string()).is_ok(),
            None => false,
        }
    }

    /// End every pending wait as timed out; returns how many there were
    pub fn cancel_all(&self) -> usize {
        let mut waiting = self.waiting.lock().unwrap_or_else(|e| e.into_inner());
        let count = waiting.len();
        waiting.clear();
        count
    }

    #[cfg(test)]
    pub fn is_waiting(&self, member: &MemberId) -> bool {
        self.waiting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_delivered_attachment_reaches_waiter() {
        let waiters = Arc::new(EvidenceWaiters::new());
        let member = MemberId::new("7");

        let task = {
            let waiters = waiters.clone();
            let member = member.clone();
            tokio::spawn(async move { waiters.wait_for(&member, Duration::from_secs(60)).await })
        };
        tokio::task::yield_now().await;
        assert!(waiters.is_waiting(&member));

        assert!(!waiters.deliver(&MemberId::new("8"), "https://x/a.png"));
        assert!(waiters.deliver(&member, "https://x/a.png"));
        assert_eq!(task.await.unwrap(), Ok("https://x/a.png".to_string()));
        assert!(!waiters.is_waiting(&member));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let waiters = EvidenceWaiters::new();
        let member = MemberId::new("7");

        let result = waiters.wait_for(&member, Duration::from_secs(60)).await;
        assert_eq!(result, Err(IncidentError::EvidenceTimeout));
        assert!(!waiters.is_waiting(&member));
        assert!(!waiters.deliver(&member, "https://x/late.png"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_wait_supersedes_first() {
        let waiters = Arc::new(EvidenceWaiters::new());
        let member = MemberId::new("7");

        let first = {
            let waiters = waiters.clone();
            let member = member.clone();
            tokio::spawn(async move { waiters.wait_for(&member, Duration::from_secs(60)).await })
        };
        tokio::task::yield_now().await;
        let second = {
            let waiters = waiters.clone();
            let member = member.clone();
            tokio::spawn(async move { waiters.wait_for(&member, Duration::from_secs(60)).await })
        };
        tokio::task::yield_now().await;

        assert_eq!(first.await.unwrap(), Err(IncidentError::EvidenceTimeout));
        assert!(waiters.deliver(&member, "https://x/b.jpg"));
        assert_eq!(second.await.unwrap(), Ok("https://x/b.jpg".to_string()));
    }
}
