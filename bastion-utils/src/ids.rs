// Opaque identifiers handed out by the chat platform.
//
// The platform's ids are snowflakes, but the coordinator never does arithmetic
// on them, so they are carried as strings end to end.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

opaque_id!(
    /// A community member (user account)
    MemberId
);
opaque_id!(
    /// A membership role granted to the members of a group
    RoleId
);
opaque_id!(
    /// A text channel
    ChannelId
);
opaque_id!(
    /// A pending user interaction (button press, command) awaiting a reply
    InteractionRef
);

impl MemberId {
    /// Platform mention markup for this member
    pub fn mention(&self) -> String {
        format!("<@{}>", self.0)
    }
}

impl RoleId {
    /// Platform mention markup for this role
    pub fn mention(&self) -> String {
        format!("<@&{}>", self.0)
    }
}

/// Handle to a message the transport has sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel: ChannelId,
    pub message: String,
}

impl MessageRef {
    pub fn new(channel: ChannelId, message: impl Into<String>) -> Self {
        Self {
            channel,
            message: message.into(),
        }
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel, self.message)
    }
}

/// Process-local identity of an alert incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(pub Uuid);

impl IncidentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IncidentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mentions() {
        assert_eq!(MemberId::new("42").mention(), "<@42>");
        assert_eq!(RoleId::new("7").mention(), "<@&7>");
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&ChannelId::new("123")).unwrap();
        assert_eq!(json, r#""123""#);

        let msg = MessageRef::new(ChannelId::new("1"), "2");
        assert_eq!(msg.to_string(), "1/2");
    }
}
