//! Shared vocabulary for the Bastion workspace.
//!
//! Nothing in here performs I/O: identifiers, member status, incident
//! outcome styles and the alert template catalogue.

pub mod ids;
pub mod outcome;
pub mod templates;

pub use ids::{ChannelId, IncidentId, InteractionRef, MemberId, MessageRef, RoleId};
pub use outcome::{MemberStatus, Outcome, Resolution};
