use bastion_utils::templates::alert_line;
use bastion_utils::{IncidentId, InteractionRef, MemberId, MemberStatus, Outcome, RoleId};
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

use super::AlertError;
use crate::clock::{span, Clock};
use crate::config::CoordinatorConfig;
use crate::cooldown::{Acquire, CooldownGate};
use crate::incident::{
    AlertIncident, EvidenceWaiters, IncidentBoard, IncidentError, IncidentResult,
    SharedIncident,
};
use crate::integrations::{GatewayEvent, IncidentAction};
use crate::ledger::{PingHistory, PingLedger};
use crate::panel::{EventDebouncer, PanelHandle, RequestStatus};
use crate::platform::{MessageContent, PlatformError, Transport};
use crate::registry::GroupRegistry;

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    registry: Arc<GroupRegistry>,
    ledger: Arc<PingLedger>,
    panel: PanelHandle,
    clock: Arc<dyn Clock>,
    cooldown: CooldownGate,
    board: IncidentBoard,
    evidence: EvidenceWaiters,
    membership_debounce: EventDebouncer,
    presence_debounce: EventDebouncer,
    tasks: TaskTracker,
    config: CoordinatorConfig,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<GroupRegistry>,
        ledger: Arc<PingLedger>,
        panel: PanelHandle,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            ledger,
            panel,
            clock,
            cooldown: CooldownGate::new(config.cooldown),
            board: IncidentBoard::new(),
            evidence: EvidenceWaiters::new(),
            membership_debounce: EventDebouncer::new(config.event_debounce),
            presence_debounce: EventDebouncer::new(config.event_debounce),
            tasks: TaskTracker::new(),
            config,
        }
    }

    pub fn incident(&self, id: &IncidentId) -> Option<SharedIncident> {
        self.board.get(id)
    }

    pub fn open_incidents(&self) -> usize {
        self.board.len()
    }

    /// Ping a group: cooldown check, ledger entry, incident message, then
    /// a panel render.
    ///
    /// The ping is recorded even if the incident message cannot be sent.
    pub async fn fire_notification(
        &self,
        group_name: &str,
        initiator: &MemberId,
    ) -> Result<IncidentId, AlertError> {
        let group = self
            .registry
            .get(group_name)
            .ok_or_else(|| AlertError::UnknownGroup(group_name.to_string()))?;
        let now = self.clock.now();

        if let Acquire::Wait(remaining) = self.cooldown.try_acquire(&group.name, now) {
            debug!("Dispatch: {} cooling down for {:?}", group.name, remaining);
            return Err(AlertError::CooldownActive {
                group: group.name,
                remaining,
            });
        }

        self.ledger.record(&group.name, initiator, now);
        self.request_render(false);

        let line = alert_line(
            &mut rand::thread_rng(),
            &group.membership_role_ref.mention(),
        );
        let mut incident = AlertIncident::new(&group, initiator.clone(), line, now);
        let message = self
            .transport
            .send_message(&self.config.alert_channel, &incident.render())
            .await
            .map_err(|e| {
                warn!("Dispatch: failed to post alert for {}: {}", group.name, e);
                AlertError::from(e)
            })?;
        incident.message_ref = Some(message);

        let id = incident.id;
        self.board.insert(incident);
        if let Some(cutoff) = now.checked_sub_signed(span(self.config.incident_lifetime)) {
            let pruned = self.board.prune_opened_before(cutoff);
            if pruned > 0 {
                debug!("Dispatch: forgot {} expired incidents", pruned);
            }
        }
        info!("Dispatch: {} pinged {} (incident {})", initiator, group.name, id);
        Ok(id)
    }

    pub async fn resolve(
        &self,
        id: IncidentId,
        outcome: Outcome,
        by: &MemberId,
    ) -> Result<(), AlertError> {
        self.update(id, |incident| incident.resolve(outcome, by.clone()))
            .await?;
        info!("Dispatch: incident {} resolved as {} by {}", id, outcome, by);
        Ok(())
    }

    pub async fn add_note(
        &self,
        id: IncidentId,
        author: &MemberId,
        text: &str,
    ) -> Result<(), AlertError> {
        self.update(id, |incident| incident.add_note(author.clone(), text))
            .await
    }

    pub async fn attach_evidence(&self, id: IncidentId, url: &str) -> Result<(), AlertError> {
        self.update(id, |incident| incident.attach_evidence(url))
            .await
    }

    /// Call a second defense: mark the incident and mention the reserve role.
    pub async fn escalate(&self, id: IncidentId, by: &MemberId) -> Result<(), AlertError> {
        let role = self
            .config
            .escalation_role
            .clone()
            .ok_or(AlertError::EscalationUnavailable)?;

        let group = {
            let shared = self.board.get(&id).ok_or(AlertError::UnknownIncident(id))?;
            let mut incident = shared.lock().await;
            incident.escalate(by.clone(), role.clone())?;
            self.sync(&mut *incident).await?;
            incident.origin_group.clone()
        };

        let mention = MessageContent {
            text: Some(format!(
                "⚔️ {} second defense needed for {}!",
                role.mention(),
                group
            )),
            ..Default::default()
        };
        if let Err(e) = self
            .transport
            .send_message(&self.config.alert_channel, &mention)
            .await
        {
            warn!("Dispatch: failed to post escalation for {}: {}", id, e);
        }
        info!("Dispatch: incident {} escalated by {}", id, by);
        Ok(())
    }

    /// Wait for `member` to post an image, then attach it.
    pub async fn request_evidence(
        &self,
        id: IncidentId,
        member: &MemberId,
    ) -> Result<(), AlertError> {
        {
            let shared = self.board.get(&id).ok_or(AlertError::UnknownIncident(id))?;
            let incident = shared.lock().await;
            if let Some(outcome) = incident.resolution().outcome() {
                return Err(IncidentError::AlreadyResolved { outcome }.into());
            }
        }

        let url = self
            .evidence
            .wait_for(member, self.config.evidence_timeout)
            .await?;
        self.attach_evidence(id, &url).await
    }

    /// `true` when the attachment completed a pending evidence request
    pub fn on_attachment_posted(&self, member: &MemberId, url: &str) -> bool {
        self.evidence.deliver(member, url)
    }

    /// Request a render when a registered group's role was granted or
    /// revoked. Returns whether a render was requested.
    pub fn on_membership_changed(
        &self,
        member: &MemberId,
        old_roles: &[RoleId],
        new_roles: &[RoleId],
    ) -> bool {
        let old: BTreeSet<&RoleId> = old_roles.iter().collect();
        let new: BTreeSet<&RoleId> = new_roles.iter().collect();
        let registry = self.registry.snapshot();
        let relevant = old
            .symmetric_difference(&new)
            .any(|role| registry.find_by_role(role).is_some());
        if !relevant {
            return false;
        }
        if !self.membership_debounce.ready() {
            debug!("Dispatch: membership change of {} debounced", member);
            return false;
        }
        self.request_render(true);
        true
    }

    /// Request a render when a member went online or offline.
    pub fn on_presence_changed(
        &self,
        member: &MemberId,
        old_status: MemberStatus,
        new_status: MemberStatus,
    ) -> bool {
        if old_status.is_online() == new_status.is_online() {
            return false;
        }
        if !self.presence_debounce.ready() {
            debug!("Dispatch: presence change of {} debounced", member);
            return false;
        }
        self.request_render(true);
        true
    }

    /// Text answer to a history query; no group summarises every group.
    pub async fn history_reply(
        &self,
        group: Option<&str>,
        days: u32,
    ) -> Result<String, AlertError> {
        let now = self.clock.now();
        let days = days.max(1);

        if let Some(name) = group {
            let group = self
                .registry
                .get(name)
                .ok_or_else(|| AlertError::UnknownGroup(name.to_string()))?;
            let history = self.history(&group.name, days, now).await?;
            let mut reply = format!(
                "📊 {} {}, last {} days: {}",
                group.icon_ref,
                group.name,
                days,
                summary(&history)
            );
            for (day, count) in &history.per_day {
                reply.push_str(&format!("\n• {}: {}", day, count));
            }
            if history.from_cache {
                reply.push_str("\n(recent pings only, the history store is unreachable)");
            }
            return Ok(reply);
        }

        let registry = self.registry.snapshot();
        if registry.is_empty() {
            return Ok("📊 No groups registered.".to_string());
        }
        let mut reply = format!("📊 Pings over the last {} days", days);
        let mut from_cache = false;
        for group in registry.groups() {
            let history = self.history(&group.name, days, now).await?;
            from_cache |= history.from_cache;
            reply.push_str(&format!(
                "\n• {} {}: {}",
                group.icon_ref,
                group.name,
                summary(&history)
            ));
        }
        if from_cache {
            reply.push_str("\n(recent pings only, the history store is unreachable)");
        }
        Ok(reply)
    }

    /// Handle `event` on its own task. `drain()` waits for it.
    pub fn dispatch(self: &Arc<Self>, event: GatewayEvent) {
        let this = self.clone();
        self.tasks.spawn(async move { this.handle_event(event).await });
    }

    /// Wait for every handler still running. Pending evidence requests are
    /// ended as timed out rather than waited out.
    pub async fn drain(&self) {
        self.tasks.close();
        let cancelled = self.evidence.cancel_all();
        if cancelled > 0 {
            debug!("Dispatch: ended {} evidence requests", cancelled);
        }
        self.tasks.wait().await;
    }

    /// Route one gateway event, answering interactions with the outcome.
    pub async fn handle_event(self: &Arc<Self>, event: GatewayEvent) {
        match event {
            GatewayEvent::MemberUpdated {
                member_id,
                old_roles,
                new_roles,
            } => {
                self.on_membership_changed(&member_id, &old_roles, &new_roles);
            }
            GatewayEvent::PresenceUpdated {
                member_id,
                old_status,
                new_status,
            } => {
                self.on_presence_changed(&member_id, old_status, new_status);
            }
            GatewayEvent::PingRequested {
                interaction,
                member_id,
                group,
            } => {
                let reply = match self.fire_notification(&group, &member_id).await {
                    Ok(_) => format!("🔔 {} has been alerted.", group),
                    Err(e) => e.user_message(),
                };
                self.reply(&interaction, &reply).await;
            }
            GatewayEvent::IncidentAction {
                interaction,
                member_id,
                incident_id,
                action,
            } => {
                self.handle_action(interaction, member_id, incident_id, action)
                    .await;
            }
            GatewayEvent::AttachmentPosted { member_id, url } => {
                if !self.on_attachment_posted(&member_id, &url) {
                    debug!("Dispatch: attachment from {} not awaited", member_id);
                }
            }
            GatewayEvent::StatsRequested {
                interaction,
                group,
                days,
            } => {
                let reply = match self.history_reply(group.as_deref(), days).await {
                    Ok(text) => text,
                    Err(e) => e.user_message(),
                };
                self.reply(&interaction, &reply).await;
            }
            GatewayEvent::Heartbeat { .. } | GatewayEvent::Unknown => {}
        }
    }

    async fn handle_action(
        self: &Arc<Self>,
        interaction: InteractionRef,
        member: MemberId,
        id: IncidentId,
        action: IncidentAction,
    ) {
        let result = match action {
            IncidentAction::AddNote { text } => self
                .add_note(id, &member, &text)
                .await
                .map(|()| "📝 Note added.".to_string()),
            IncidentAction::Resolve { outcome } => self
                .resolve(id, outcome, &member)
                .await
                .map(|()| format!("{} Marked as {}.", outcome.icon(), outcome)),
            IncidentAction::Escalate => self
                .escalate(id, &member)
                .await
                .map(|()| "⚔️ Second defense called.".to_string()),
            IncidentAction::RequestEvidence => {
                let timeout = self.config.evidence_timeout.as_secs();
                self.reply(
                    &interaction,
                    &format!(
                        "📷 Post your screenshot in this channel within {} seconds.",
                        timeout
                    ),
                )
                .await;
                let this = self.clone();
                self.tasks.spawn(async move {
                    let reply = match this.request_evidence(id, &member).await {
                        Ok(()) => "📷 Evidence attached.".to_string(),
                        Err(e) => e.user_message(),
                    };
                    this.reply(&interaction, &reply).await;
                });
                return;
            }
        };
        let reply = result.unwrap_or_else(|e| e.user_message());
        self.reply(&interaction, &reply).await;
    }

    /// Apply a mutation under the incident's lock and push the new
    /// rendering. The incident is forgotten once its message is gone.
    async fn update<F>(&self, id: IncidentId, mutate: F) -> Result<(), AlertError>
    where
        F: FnOnce(&mut AlertIncident) -> IncidentResult<()>,
    {
        let shared = self.board.get(&id).ok_or(AlertError::UnknownIncident(id))?;
        let mut incident = shared.lock().await;
        mutate(&mut *incident)?;
        self.sync(&mut *incident).await
    }

    async fn sync(&self, incident: &mut AlertIncident) -> Result<(), AlertError> {
        let message = match incident.message_ref.clone() {
            Some(message) => message,
            None => return Ok(()),
        };
        match self
            .transport
            .edit_message(&message, &incident.render())
            .await
        {
            Ok(()) => Ok(()),
            Err(PlatformError::NotFound(detail)) => {
                info!(
                    "Dispatch: incident {} message is gone, dropping it",
                    incident.id
                );
                self.board.remove(&incident.id);
                Err(PlatformError::NotFound(detail).into())
            }
            // The change stands; the next successful edit shows it
            Err(e) => {
                warn!("Dispatch: failed to update incident {}: {}", incident.id, e);
                Ok(())
            }
        }
    }

    async fn history(
        &self,
        group: &str,
        days: u32,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<PingHistory, AlertError> {
        self.ledger
            .history(group, days, now)
            .await
            .map_err(|e| AlertError::HistoryUnavailable(e.to_string()))
    }

    fn request_render(&self, force_presence: bool) {
        if self.panel.request(force_presence) == RequestStatus::Closed {
            warn!("Dispatch: panel scheduler is gone, render request dropped");
        }
    }

    async fn reply(&self, interaction: &InteractionRef, text: &str) {
        if let Err(e) = self.transport.respond(interaction, text).await {
            warn!("Dispatch: failed to answer {}: {}", interaction, e);
        }
    }
}

fn summary(history: &PingHistory) -> String {
    let noun = if history.unique_initiators == 1 {
        "member"
    } else {
        "members"
    };
    format!(
        "{} pings from {} {}",
        history.total, history.unique_initiators, noun
    )
}
