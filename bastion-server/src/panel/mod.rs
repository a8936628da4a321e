//! The single live status panel.
//!
//! `PanelCoordinator` owns the reference to the panel message and is the
//! only code that writes to it. `render()` holds the panel state lock from
//! discovery to the final edit, so two renders of the panel can never be in
//! flight together no matter how many tasks call it.
//!
//! ```text
//! NoPanel ─▶ Discovering ─▶ Rendering ─▶ Idle ─▶ Rendering ─▶ ...
//!                 ▲              │
//!                 └─ Recovering ◀┘  (edit reported "not found")
//! ```

pub mod render;
mod scheduler;

pub use render::{GroupRow, PANEL_MARKER};
pub use scheduler::{EventDebouncer, PanelHandle, PanelScheduler, RequestStatus, SupervisorExit};

use bastion_utils::{ChannelId, MessageRef};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::ledger::PingLedger;
use crate::platform::{MessageContent, PlatformError, PlatformResult, Transport};
use crate::presence::{PresenceSampler, PresenceSnapshot};
use crate::registry::{GroupRegistry, RegistrySnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelPhase {
    NoPanel,
    Discovering,
    Rendering,
    Idle,
    Recovering,
}

/// How a successful render reached the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// A fresh panel was sent and pinned
    Created,
    /// A panel left over in the channel was adopted
    Reused,
    /// The known panel was edited in place
    Updated,
}

#[derive(Debug, Default)]
struct PanelState {
    message_ref: Option<MessageRef>,
    last_rendered_at: Option<DateTime<Utc>>,
}

pub struct PanelCoordinator {
    transport: Arc<dyn Transport>,
    registry: Arc<GroupRegistry>,
    presence: Arc<PresenceSampler>,
    ledger: Arc<PingLedger>,
    clock: Arc<dyn Clock>,
    channel: ChannelId,
    scan_limit: usize,
    max_groups: usize,
    state: Mutex<PanelState>,
    phase: StdMutex<PanelPhase>,
}

impl PanelCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<GroupRegistry>,
        presence: Arc<PresenceSampler>,
        ledger: Arc<PingLedger>,
        clock: Arc<dyn Clock>,
        channel: ChannelId,
        scan_limit: usize,
        max_groups: usize,
    ) -> Self {
        Self {
            transport,
            registry,
            presence,
            ledger,
            clock,
            channel,
            scan_limit,
            max_groups,
            state: Mutex::new(PanelState::default()),
            phase: StdMutex::new(PanelPhase::NoPanel),
        }
    }

    pub fn phase(&self) -> PanelPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: PanelPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    /// Waits for any render in flight
    pub async fn message_ref(&self) -> Option<MessageRef> {
        self.state.lock().await.message_ref.clone()
    }

    pub async fn last_rendered_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_rendered_at
    }

    /// Render the panel from current data and push it to the channel.
    ///
    /// Group affiliations are reloaded first, so groups added or removed in
    /// the store show up on the next render.
    /// `force_presence` bypasses the sampler's minimum interval. Rate
    /// limiting and transport outages are returned for the caller to back
    /// off on; a vanished panel is recovered within this call.
    pub async fn render(&self, force_presence: bool) -> PlatformResult<RenderOutcome> {
        let mut state = self.state.lock().await;

        let groups = self.registry.reload().await;
        let snapshot = self.presence_snapshot(force_presence).await;
        let content = self.build(&groups, &snapshot);

        let result = self.publish(&mut state, &content).await;
        match &result {
            Ok(outcome) => {
                state.last_rendered_at = Some(self.clock.now());
                debug!("Panel: render {:?}", outcome);
            }
            Err(e) => warn!("Panel: render failed: {}", e),
        }
        self.set_phase(if state.message_ref.is_some() {
            PanelPhase::Idle
        } else {
            PanelPhase::NoPanel
        });
        result
    }

    async fn presence_snapshot(&self, force: bool) -> PresenceSnapshot {
        match self.presence.refresh(force).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Panel: no presence data yet, rendering zeros: {}", e);
                PresenceSnapshot::empty(self.clock.now())
            }
        }
    }

    fn build(&self, groups: &RegistrySnapshot, snapshot: &PresenceSnapshot) -> MessageContent {
        let now = self.clock.now();
        let rows = groups
            .groups()
            .map(|group| GroupRow {
                name: group.name.clone(),
                icon: group.icon_ref.clone(),
                online: snapshot.online(&group.name),
                pings_24h: self.ledger.stats(&group.name, now).count_24h,
            })
            .collect();
        render::panel_content(rows, snapshot.total(), now, self.max_groups)
    }

    async fn publish(
        &self,
        state: &mut PanelState,
        content: &MessageContent,
    ) -> PlatformResult<RenderOutcome> {
        let mut stale = None;

        if let Some(message) = state.message_ref.clone() {
            self.set_phase(PanelPhase::Rendering);
            match self.transport.edit_message(&message, content).await {
                Ok(()) => return Ok(RenderOutcome::Updated),
                Err(PlatformError::NotFound(_)) => {
                    warn!("Panel: message {} is gone, rediscovering", message);
                    state.message_ref = None;
                    self.set_phase(PanelPhase::Recovering);
                    stale = Some(message);
                }
                Err(e) => return Err(e),
            }
        }

        self.set_phase(PanelPhase::Discovering);
        if let Some(found) = self.discover(stale.as_ref()).await? {
            self.set_phase(PanelPhase::Rendering);
            match self.transport.edit_message(&found, content).await {
                Ok(()) => {
                    info!("Panel: reusing existing panel {}", found);
                    state.message_ref = Some(found);
                    return Ok(RenderOutcome::Reused);
                }
                Err(PlatformError::NotFound(_)) => {
                    debug!("Panel: candidate {} vanished, creating a new panel", found);
                }
                Err(e) => return Err(e),
            }
        }

        self.set_phase(PanelPhase::Rendering);
        let message = self.transport.send_message(&self.channel, content).await?;
        info!("Panel: created panel {}", message);
        if let Err(e) = self.transport.pin_message(&message).await {
            warn!("Panel: failed to pin {}: {}", message, e);
        }
        state.message_ref = Some(message);
        Ok(RenderOutcome::Created)
    }

    /// Our own most recent panel in the channel, pinned ones first.
    async fn discover(&self, ignore: Option<&MessageRef>) -> PlatformResult<Option<MessageRef>> {
        let history = self
            .transport
            .scan_history(&self.channel, self.scan_limit)
            .await?;

        let mut candidates = history.into_iter().filter(|m| {
            m.authored_by_self
                && render::is_panel(&m.content)
                && Some(&m.message_ref) != ignore
        });
        let first = candidates.next();
        let pinned = first
            .iter()
            .cloned()
            .chain(candidates)
            .find(|m| m.pinned);

        Ok(pinned.or(first).map(|m| m.message_ref))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::persistence::{GroupAffiliation, PersistenceManager};
    use crate::platform::{MemoryPlatform, RoleMember};
    use bastion_utils::{MemberId, MemberStatus, RoleId};
    use std::time::Duration;

    pub(crate) struct Fixture {
        pub platform: Arc<MemoryPlatform>,
        pub clock: Arc<ManualClock>,
        pub registry: Arc<GroupRegistry>,
        pub ledger: Arc<PingLedger>,
        pub presence: Arc<PresenceSampler>,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self::with_persistence(Arc::new(PersistenceManager::disabled()))
        }

        pub fn with_persistence(persistence: Arc<PersistenceManager>) -> Self {
            let platform = Arc::new(MemoryPlatform::new());
            platform.set_role(
                &RoleId::new("r-alpha"),
                "Alpha",
                vec![RoleMember::new("1", false, MemberStatus::Online)],
            );
            platform.set_role(&RoleId::new("r-bravo"), "Bravo", Vec::new());

            let registry = Arc::new(GroupRegistry::new(
                persistence.clone(),
                vec![
                    GroupAffiliation::new("Alpha", "🏰", "r-alpha"),
                    GroupAffiliation::new("Bravo", "⚓", "r-bravo"),
                ],
            ));
            let clock = Arc::new(ManualClock::default());
            let ledger = Arc::new(PingLedger::new(persistence));
            let presence = Arc::new(PresenceSampler::new(
                platform.clone(),
                registry.clone(),
                clock.clone(),
                Duration::from_secs(600),
            ));
            Self {
                platform,
                clock,
                registry,
                ledger,
                presence,
            }
        }

        pub fn coordinator(&self) -> PanelCoordinator {
            PanelCoordinator::new(
                self.platform.clone(),
                self.registry.clone(),
                self.presence.clone(),
                self.ledger.clone(),
                self.clock.clone(),
                ChannelId::new("panel"),
                20,
                10,
            )
        }
    }

    fn channel() -> ChannelId {
        ChannelId::new("panel")
    }

    #[tokio::test]
    async fn test_first_render_creates_and_pins_one_panel() {
        let f = Fixture::new();
        let panel = f.coordinator();
        assert_eq!(panel.phase(), PanelPhase::NoPanel);

        assert_eq!(panel.render(true).await.unwrap(), RenderOutcome::Created);
        assert_eq!(f.platform.send_count(), 1);

        let message = panel.message_ref().await.unwrap();
        assert!(f.platform.is_pinned(&message));
        assert_eq!(panel.phase(), PanelPhase::Idle);
        assert!(panel.last_rendered_at().await.is_some());

        assert_eq!(panel.render(false).await.unwrap(), RenderOutcome::Updated);
        assert_eq!(f.platform.send_count(), 1);
        assert_eq!(f.platform.channel_len(&channel()), 1);
    }

    #[tokio::test]
    async fn test_restart_reuses_panel_left_in_channel() {
        let f = Fixture::new();
        f.coordinator().render(true).await.unwrap();
        f.platform.seed_message(
            &channel(),
            MessageContent {
                title: "chatter".to_string(),
                ..Default::default()
            },
            false,
        );

        // Fresh coordinator, as after a process restart
        let panel = f.coordinator();
        assert_eq!(panel.render(true).await.unwrap(), RenderOutcome::Reused);
        assert_eq!(f.platform.send_count(), 1);
        assert_eq!(f.platform.channel_len(&channel()), 2);
    }

    #[tokio::test]
    async fn test_foreign_or_unmarked_messages_are_not_adopted() {
        let f = Fixture::new();
        let marked = MessageContent {
            footer: Some(PANEL_MARKER.to_string()),
            ..Default::default()
        };
        f.platform.seed_message(&channel(), marked, false);
        f.platform
            .seed_message(&channel(), MessageContent::default(), true);

        let panel = f.coordinator();
        assert_eq!(panel.render(true).await.unwrap(), RenderOutcome::Created);
    }

    #[tokio::test]
    async fn test_deleted_panel_is_recreated_in_same_render() {
        let f = Fixture::new();
        let panel = f.coordinator();
        panel.render(true).await.unwrap();
        let stale = panel.message_ref().await.unwrap();

        f.platform.delete_message(&stale);
        assert_eq!(panel.render(false).await.unwrap(), RenderOutcome::Created);

        let fresh = panel.message_ref().await.unwrap();
        assert_ne!(fresh, stale);
        assert_eq!(f.platform.send_count(), 2);
        assert_eq!(panel.phase(), PanelPhase::Idle);
    }

    #[tokio::test]
    async fn test_stale_reference_is_skipped_during_rediscovery() {
        let f = Fixture::new();
        let panel = f.coordinator();
        panel.render(true).await.unwrap();
        let original = panel.message_ref().await.unwrap();

        // The edit fails as not found while the message is still listed
        f.platform.fail_next_edit(PlatformError::NotFound("stale".to_string()));
        assert_eq!(panel.render(false).await.unwrap(), RenderOutcome::Created);
        assert_ne!(panel.message_ref().await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_rate_limit_is_returned_and_ref_kept() {
        let f = Fixture::new();
        let panel = f.coordinator();
        panel.render(true).await.unwrap();
        let message = panel.message_ref().await;

        f.platform.fail_next_edit(PlatformError::RateLimited {
            retry_after: Duration::from_secs(3),
        });
        assert!(matches!(
            panel.render(false).await,
            Err(PlatformError::RateLimited { .. })
        ));
        assert_eq!(panel.message_ref().await, message);
    }

    #[tokio::test]
    async fn test_content_reflects_presence_and_pings() {
        let f = Fixture::new();
        let now = f.clock.now();
        f.ledger.record("Bravo", &MemberId::new("9"), now);
        f.ledger.record("Bravo", &MemberId::new("8"), now);

        let panel = f.coordinator();
        panel.render(true).await.unwrap();
        let content = f
            .platform
            .message(&panel.message_ref().await.unwrap())
            .unwrap();

        assert_eq!(content.fields[0].name, "🏰 Alpha");
        assert_eq!(content.fields[0].value, "1 online · 0 pings (24h)");
        assert_eq!(content.fields[1].value, "0 online · 2 pings (24h)");
        assert!(content.description.contains("**1** defenders online"));
    }

    #[tokio::test]
    async fn test_concurrent_renders_never_overlap() {
        let f = Fixture::new();
        f.platform.set_write_delay(Duration::from_millis(20));
        let panel = Arc::new(f.coordinator());

        let mut tasks = Vec::new();
        for i in 0..8 {
            let panel = panel.clone();
            tasks.push(tokio::spawn(async move { panel.render(i == 0).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(f.platform.max_writes_in_flight(), 1);
        assert_eq!(f.platform.send_count(), 1);
        assert_eq!(f.platform.edit_count(), 7);
    }
}
