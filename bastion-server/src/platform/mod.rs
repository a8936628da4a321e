// Platform interfaces
//
// The coordinator talks to the chat platform through two narrow traits:
// `Transport` (send/edit/scan/pin messages, answer interactions) and
// `Directory` (roles and their members' presence). The bridge integration
// implements both against the real platform; `MemoryPlatform` implements
// both in-process for tests.

mod content;
mod memory;

pub use content::{ChannelMessage, Control, ControlStyle, Field, MessageContent};
pub use memory::MemoryPlatform;

use async_trait::async_trait;
use bastion_utils::{ChannelId, InteractionRef, MemberId, MemberStatus, MessageRef, RoleId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy shared by every platform call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// The referenced message, role or channel no longer exists
    #[error("not found: {0}")]
    NotFound(String),
    /// The platform throttled the call
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    /// The platform or directory could not be reached
    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// A role as seen by the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleHandle {
    pub id: RoleId,
    pub name: String,
}

/// One holder of a role, with their current presence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMember {
    pub member_id: MemberId,
    #[serde(default)]
    pub is_bot: bool,
    pub status: MemberStatus,
}

impl RoleMember {
    pub fn new(member_id: impl Into<String>, is_bot: bool, status: MemberStatus) -> Self {
        Self {
            member_id: MemberId::new(member_id),
            is_bot,
            status,
        }
    }

    /// Counted in the panel: a human who is not offline
    pub fn is_available(&self) -> bool {
        !self.is_bot && self.status.is_online()
    }
}

/// Message primitives of the chat platform
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(
        &self,
        channel: &ChannelId,
        content: &MessageContent,
    ) -> PlatformResult<MessageRef>;

    /// `NotFound` when the message was deleted, `RateLimited` when throttled
    async fn edit_message(&self, message: &MessageRef, content: &MessageContent)
        -> PlatformResult<()>;

    /// Most recent messages of a channel, newest first
    async fn scan_history(
        &self,
        channel: &ChannelId,
        limit: usize,
    ) -> PlatformResult<Vec<ChannelMessage>>;

    async fn pin_message(&self, message: &MessageRef) -> PlatformResult<()>;

    /// Private reply to the member behind an interaction
    async fn respond(&self, interaction: &InteractionRef, text: &str) -> PlatformResult<()>;
}

/// Membership and presence source
#[async_trait]
pub trait Directory: Send + Sync {
    /// `NotFound` when the role was deleted
    async fn get_role(&self, role: &RoleId) -> PlatformResult<RoleHandle>;

    async fn get_role_members(&self, role: &RoleId) -> PlatformResult<Vec<RoleMember>>;
}
