// Incident outcome and member presence styles

use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal result of a defense alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Defense held (green accent, ✓ icon)
    Won,
    /// Defense fell (red accent, ✗ icon)
    Lost,
}

impl Outcome {
    /// RGB accent colour for the incident message once resolved
    pub fn color(&self) -> u32 {
        match self {
            Outcome::Won => 0x2e_cc_71,
            Outcome::Lost => 0xe7_4c_3c,
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Outcome::Won => "✓",
            Outcome::Lost => "✗",
        }
    }

    /// Parse from a control id or command argument
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "won" | "win" => Some(Outcome::Won),
            "lost" | "loss" => Some(Outcome::Lost),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Won => write!(f, "won"),
            Outcome::Lost => write!(f, "lost"),
        }
    }
}

/// Lifecycle position of an incident. Only `Open` accepts mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    #[default]
    Open,
    Won,
    Lost,
}

impl Resolution {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Resolution::Open)
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Resolution::Open => None,
            Resolution::Won => Some(Outcome::Won),
            Resolution::Lost => Some(Outcome::Lost),
        }
    }
}

impl From<Outcome> for Resolution {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Won => Resolution::Won,
            Outcome::Lost => Resolution::Lost,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Open => write!(f, "open"),
            Resolution::Won => write!(f, "won"),
            Resolution::Lost => write!(f, "lost"),
        }
    }
}

/// Presence status as reported by the directory.
///
/// Unrecognised statuses (e.g. "invisible") read as offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum MemberStatus {
    Online,
    Idle,
    DoNotDisturb,
    Offline,
}

impl From<String> for MemberStatus {
    fn from(status: String) -> Self {
        match status.to_lowercase().as_str() {
            "online" => MemberStatus::Online,
            "idle" => MemberStatus::Idle,
            "dnd" | "do_not_disturb" => MemberStatus::DoNotDisturb,
            _ => MemberStatus::Offline,
        }
    }
}

impl MemberStatus {
    /// Anything but offline counts as available for a defense
    pub fn is_online(&self) -> bool {
        !matches!(self, MemberStatus::Offline)
    }
}
