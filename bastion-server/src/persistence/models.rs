// Durable record models

use bastion_utils::{MemberId, RoleId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named group, its display icon and the role its members hold.
///
/// Rows of the `groups` table; also the shape of the fallback groups file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAffiliation {
    pub name: String,
    pub icon_ref: String,
    pub membership_role_ref: RoleId,
}

impl GroupAffiliation {
    pub fn new(name: impl Into<String>, icon_ref: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            icon_ref: icon_ref.into(),
            membership_role_ref: RoleId::new(role),
        }
    }
}

/// Partial update applied by administrative tooling
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupUpdate {
    pub icon_ref: Option<String>,
    pub membership_role_ref: Option<RoleId>,
}

impl GroupUpdate {
    pub fn is_empty(&self) -> bool {
        self.icon_ref.is_none() && self.membership_role_ref.is_none()
    }
}

/// One notification fired for a group. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRecord {
    pub group_name: String,
    pub initiator_id: MemberId,
    pub occurred_at: DateTime<Utc>,
}

impl PingRecord {
    pub fn new(group_name: impl Into<String>, initiator_id: MemberId, occurred_at: DateTime<Utc>) -> Self {
        Self {
            group_name: group_name.into(),
            initiator_id,
            occurred_at,
        }
    }
}
