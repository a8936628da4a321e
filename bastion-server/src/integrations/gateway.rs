// Gateway events streamed by `bastion-bridge subscribe`
//
// One JSON object per line, tagged by "type". Unknown types deserialize to
// `GatewayEvent::Unknown` so a newer bridge can talk to an older
// coordinator.

use bastion_utils::{IncidentId, InteractionRef, MemberId, MemberStatus, Outcome, RoleId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, Receiver};

use super::adapter::IntegrationAdapter;
use super::error::IntegrationResult;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A member's role set changed
    MemberUpdated {
        member_id: MemberId,
        #[serde(default)]
        old_roles: Vec<RoleId>,
        #[serde(default)]
        new_roles: Vec<RoleId>,
    },

    PresenceUpdated {
        member_id: MemberId,
        old_status: MemberStatus,
        new_status: MemberStatus,
    },

    /// Someone pressed a group's ping button on the panel
    PingRequested {
        interaction: InteractionRef,
        member_id: MemberId,
        group: String,
    },

    /// A control on an incident message was used
    IncidentAction {
        interaction: InteractionRef,
        member_id: MemberId,
        incident_id: IncidentId,
        action: IncidentAction,
    },

    /// A member posted an image in the alert channel
    AttachmentPosted { member_id: MemberId, url: String },

    /// The history command; no group means every group
    StatsRequested {
        interaction: InteractionRef,
        #[serde(default)]
        group: Option<String>,
        #[serde(default = "default_history_days")]
        days: u32,
    },

    Heartbeat {
        #[serde(default)]
        timestamp: Option<String>,
    },

    #[serde(other)]
    Unknown,
}

fn default_history_days() -> u32 {
    7
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IncidentAction {
    AddNote { text: String },
    Resolve { outcome: Outcome },
    RequestEvidence,
    Escalate,
}

#[derive(Debug)]
pub enum ParsedEvent {
    Event(GatewayEvent),
    ParseError { raw: String, error: String },
}

pub fn parse_event(line: &str) -> ParsedEvent {
    match serde_json::from_str::<GatewayEvent>(line) {
        Ok(event) => ParsedEvent::Event(event),
        Err(e) => ParsedEvent::ParseError {
            raw: line.to_string(),
            error: e.to_string(),
        },
    }
}

/// Start the bridge's event stream and parse it into typed events.
///
/// Malformed lines are logged and skipped; the stream ends when the bridge
/// gives up or the receiver is dropped.
pub async fn subscribe_events<A>(
    adapter: &A,
    capacity: usize,
) -> IntegrationResult<Receiver<GatewayEvent>>
where
    A: IntegrationAdapter + ?Sized,
{
    let mut raw_rx = adapter.subscribe(&["subscribe", "--format", "json"]).await?;
    let (event_tx, event_rx) = mpsc::channel(capacity);

    tokio::spawn(async move {
        while let Some(line) = raw_rx.recv().await {
            if line.trim().is_empty() {
                continue;
            }
            match parse_event(&line) {
                ParsedEvent::Event(GatewayEvent::Heartbeat { .. }) => {
                    log::trace!("Gateway: heartbeat");
                }
                ParsedEvent::Event(event) => {
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                }
                ParsedEvent::ParseError { raw, error } => {
                    log::warn!("Gateway: failed to parse event: {} - raw: {}", error, raw);
                }
            }
        }
        log::info!("Gateway: event stream ended");
    });

    Ok(event_rx)
}
