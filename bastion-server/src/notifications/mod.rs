// Ping fan-out and incident actions
//
// `Dispatcher` is the entry point the surrounding application talks to:
// pings, incident actions, membership/presence churn and history queries
// all come in here and leave as transport calls plus panel render requests.

mod dispatcher;

pub use dispatcher::Dispatcher;

use bastion_utils::IncidentId;
use std::time::Duration;
use thiserror::Error;

use crate::incident::IncidentError;
use crate::platform::PlatformError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlertError {
    #[error("Unknown group: {0}")]
    UnknownGroup(String),
    #[error("Unknown incident: {0}")]
    UnknownIncident(IncidentId),
    #[error("{group} is cooling down for {remaining:?}")]
    CooldownActive { group: String, remaining: Duration },
    #[error("No escalation role configured")]
    EscalationUnavailable,
    #[error("Ping history unavailable: {0}")]
    HistoryUnavailable(String),
    #[error(transparent)]
    Incident(#[from] IncidentError),
    #[error("Chat platform error: {0}")]
    Platform(#[from] PlatformError),
}

impl AlertError {
    /// Action refused because of the target's state rather than a failure
    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            AlertError::UnknownGroup(_)
                | AlertError::UnknownIncident(_)
                | AlertError::Incident(IncidentError::AlreadyResolved { .. })
        )
    }

    /// Reply shown to the member whose action failed
    pub fn user_message(&self) -> String {
        match self {
            AlertError::UnknownGroup(group) => format!("❓ There is no group called {}.", group),
            AlertError::UnknownIncident(_) => "❓ This alert is no longer active.".to_string(),
            AlertError::CooldownActive { group, remaining } => format!(
                "⏳ {} was alerted moments ago, try again in {}s.",
                group,
                ceil_secs(*remaining)
            ),
            AlertError::EscalationUnavailable => {
                "⚠ No reserve role is configured for second defenses.".to_string()
            }
            AlertError::HistoryUnavailable(_) => {
                "⚠ Ping history is unavailable right now.".to_string()
            }
            AlertError::Incident(IncidentError::AlreadyResolved { outcome }) => format!(
                "{} This alert was already resolved as {}.",
                outcome.icon(),
                outcome
            ),
            AlertError::Incident(e) => format!("⚠ {}.", e),
            AlertError::Platform(PlatformError::NotFound(_)) => {
                "❓ The alert message was deleted.".to_string()
            }
            AlertError::Platform(PlatformError::RateLimited { .. }) => {
                "⏳ The chat platform is throttling us, try again shortly.".to_string()
            }
            AlertError::Platform(PlatformError::Unavailable(_)) => {
                "⚠ The chat platform is unreachable right now.".to_string()
            }
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    (d.as_secs() + u64::from(d.subsec_nanos() > 0)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_utils::Outcome;

    #[test]
    fn test_invalid_state_classification() {
        assert!(AlertError::UnknownGroup("Zulu".into()).is_invalid_state());
        assert!(AlertError::from(IncidentError::AlreadyResolved {
            outcome: Outcome::Won
        })
        .is_invalid_state());
        assert!(!AlertError::from(IncidentError::EmptyNote).is_invalid_state());
        assert!(!AlertError::EscalationUnavailable.is_invalid_state());
    }

    #[test]
    fn test_user_messages() {
        let cooling = AlertError::CooldownActive {
            group: "Alpha".into(),
            remaining: Duration::from_millis(11_200),
        };
        assert_eq!(
            cooling.user_message(),
            "⏳ Alpha was alerted moments ago, try again in 12s."
        );

        let resolved = AlertError::from(IncidentError::AlreadyResolved {
            outcome: Outcome::Lost,
        });
        assert_eq!(
            resolved.user_message(),
            "✗ This alert was already resolved as lost."
        );

        let too_long = AlertError::from(IncidentError::NoteTooLong { len: 120, max: 100 });
        assert!(too_long.user_message().contains("120"));
    }
}
