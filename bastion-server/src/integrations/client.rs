// Transport and directory over the bridge CLI.
//
// Every request is one bridge invocation that prints a JSON envelope:
//
//   {"ok": true, ...reply fields}
//   {"ok": false, "error": "not_found" | "rate_limited" | "unavailable",
//    "retry_after_ms": 1500, "detail": "..."}

use async_trait::async_trait;
use bastion_utils::{ChannelId, InteractionRef, MessageRef, RoleId};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use super::adapter::IntegrationAdapter;
use crate::platform::{
    ChannelMessage, Directory, MessageContent, PlatformError, PlatformResult, RoleHandle,
    RoleMember, Transport,
};

/// Used when a throttled reply carries no hint
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    retry_after_ms: Option<u64>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(flatten)]
    data: Map<String, Value>,
}

#[derive(Deserialize)]
struct Ack {}

#[derive(Deserialize)]
struct Sent {
    message_id: String,
}

#[derive(Deserialize)]
struct History {
    #[serde(default)]
    messages: Vec<ChannelMessage>,
}

#[derive(Deserialize)]
struct Role {
    role: RoleHandle,
}

#[derive(Deserialize)]
struct Members {
    #[serde(default)]
    members: Vec<RoleMember>,
}

pub struct BridgeClient<A: ?Sized> {
    adapter: Arc<A>,
}

impl<A: IntegrationAdapter + ?Sized> BridgeClient<A> {
    pub fn new(adapter: Arc<A>) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    async fn request<T: DeserializeOwned>(&self, args: &[&str]) -> PlatformResult<T> {
        let output = self.adapter.call(args).await.map_err(|e| {
            PlatformError::Unavailable(format!("{}: {}", self.adapter.name(), e))
        })?;
        let envelope = decode_envelope(&output)?;
        serde_json::from_value(Value::Object(envelope.data)).map_err(|e| {
            let request = args.first().copied().unwrap_or("bridge");
            PlatformError::Unavailable(format!("malformed {} reply: {}", request, e))
        })
    }
}

fn decode_envelope(output: &str) -> PlatformResult<Envelope> {
    let envelope: Envelope = serde_json::from_str(output.trim())
        .map_err(|e| PlatformError::Unavailable(format!("malformed bridge reply: {}", e)))?;
    if envelope.ok {
        return Ok(envelope);
    }

    let detail = envelope
        .detail
        .unwrap_or_else(|| "no detail".to_string());
    Err(match envelope.error.as_deref() {
        Some("not_found") => PlatformError::NotFound(detail),
        Some("rate_limited") => PlatformError::RateLimited {
            retry_after: envelope
                .retry_after_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RETRY_AFTER),
        },
        Some(other) if other != "unavailable" => {
            PlatformError::Unavailable(format!("{}: {}", other, detail))
        }
        _ => PlatformError::Unavailable(detail),
    })
}

fn encode(content: &MessageContent) -> PlatformResult<String> {
    serde_json::to_string(content)
        .map_err(|e| PlatformError::Unavailable(format!("unencodable content: {}", e)))
}

#[async_trait]
impl<A: IntegrationAdapter + ?Sized> Transport for BridgeClient<A> {
    async fn send_message(
        &self,
        channel: &ChannelId,
        content: &MessageContent,
    ) -> PlatformResult<MessageRef> {
        let body = encode(content)?;
        let sent: Sent = self
            .request(&["send", "--channel", channel.as_str(), "--content", &body])
            .await?;
        Ok(MessageRef::new(channel.clone(), sent.message_id))
    }

    async fn edit_message(
        &self,
        message: &MessageRef,
        content: &MessageContent,
    ) -> PlatformResult<()> {
        let body = encode(content)?;
        let _: Ack = self
            .request(&[
                "edit",
                "--channel",
                message.channel.as_str(),
                "--message",
                &message.message,
                "--content",
                &body,
            ])
            .await?;
        Ok(())
    }

    async fn scan_history(
        &self,
        channel: &ChannelId,
        limit: usize,
    ) -> PlatformResult<Vec<ChannelMessage>> {
        let limit = limit.to_string();
        let history: History = self
            .request(&["history", "--channel", channel.as_str(), "--limit", &limit])
            .await?;
        Ok(history.messages)
    }

    async fn pin_message(&self, message: &MessageRef) -> PlatformResult<()> {
        let _: Ack = self
            .request(&[
                "pin",
                "--channel",
                message.channel.as_str(),
                "--message",
                &message.message,
            ])
            .await?;
        Ok(())
    }

    async fn respond(&self, interaction: &InteractionRef, text: &str) -> PlatformResult<()> {
        let _: Ack = self
            .request(&[
                "respond",
                "--interaction",
                interaction.as_str(),
                "--text",
                text,
            ])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<A: IntegrationAdapter + ?Sized> Directory for BridgeClient<A> {
    async fn get_role(&self, role: &RoleId) -> PlatformResult<RoleHandle> {
        let reply: Role = self.request(&["role", "--role", role.as_str()]).await?;
        Ok(reply.role)
    }

    async fn get_role_members(&self, role: &RoleId) -> PlatformResult<Vec<RoleMember>> {
        let reply: Members = self
            .request(&["role-members", "--role", role.as_str()])
            .await?;
        Ok(reply.members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::{IntegrationError, MockAdapter};
    use bastion_utils::MemberStatus;

    fn client() -> (Arc<MockAdapter>, BridgeClient<MockAdapter>) {
        let mock = Arc::new(MockAdapter::new("bridge"));
        (mock.clone(), BridgeClient::new(mock))
    }

    #[tokio::test]
    async fn test_send_returns_message_ref() {
        let (mock, client) = client();
        mock.push_call_response(Ok(r#"{"ok": true, "message_id": "900"}"#.to_string()));

        let content = MessageContent {
            title: "Panel".to_string(),
            ..Default::default()
        };
        let msg = client
            .send_message(&ChannelId::new("10"), &content)
            .await
            .unwrap();

        assert_eq!(msg, MessageRef::new(ChannelId::new("10"), "900"));
        let args = mock.last_call_args();
        assert_eq!(&args[..3], &["send", "--channel", "10"]);
        let sent: MessageContent = serde_json::from_str(&args[4]).unwrap();
        assert_eq!(sent.title, "Panel");
    }

    #[tokio::test]
    async fn test_error_envelopes_map_to_platform_errors() {
        let (mock, client) = client();
        let msg = MessageRef::new(ChannelId::new("10"), "1");

        mock.push_call_response(Ok(
            r#"{"ok": false, "error": "not_found", "detail": "Unknown Message"}"#.to_string(),
        ));
        assert_eq!(
            client.edit_message(&msg, &MessageContent::default()).await,
            Err(PlatformError::NotFound("Unknown Message".to_string()))
        );

        mock.push_call_response(Ok(
            r#"{"ok": false, "error": "rate_limited", "retry_after_ms": 2500}"#.to_string(),
        ));
        assert_eq!(
            client.edit_message(&msg, &MessageContent::default()).await,
            Err(PlatformError::RateLimited {
                retry_after: Duration::from_millis(2500)
            })
        );

        mock.push_call_response(Ok(r#"{"ok": false, "error": "rate_limited"}"#.to_string()));
        assert_eq!(
            client.pin_message(&msg).await,
            Err(PlatformError::RateLimited {
                retry_after: DEFAULT_RETRY_AFTER
            })
        );

        mock.push_call_response(Ok(
            r#"{"ok": false, "error": "unavailable", "detail": "gateway down"}"#.to_string(),
        ));
        assert_eq!(
            client.pin_message(&msg).await,
            Err(PlatformError::Unavailable("gateway down".to_string()))
        );
    }

    #[tokio::test]
    async fn test_process_failures_are_unavailable() {
        let (mock, client) = client();
        mock.push_call_response(Err(IntegrationError::CliNotFound("bastion-bridge".into())));
        assert!(matches!(
            client.get_role(&RoleId::new("1")).await,
            Err(PlatformError::Unavailable(_))
        ));

        mock.push_call_response(Ok("<html>".to_string()));
        assert!(matches!(
            client.get_role(&RoleId::new("1")).await,
            Err(PlatformError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_history_and_members_decode() {
        let (mock, client) = client();
        mock.push_call_response(Ok(r#"{
            "ok": true,
            "messages": [{
                "message_ref": {"channel": "10", "message": "77"},
                "authored_by_self": true,
                "content": {"title": "Defense status", "footer": "bastion-panel"}
            }]
        }"#
        .to_string()));
        let history = client.scan_history(&ChannelId::new("10"), 20).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].authored_by_self);
        assert!(!history[0].pinned);
        assert_eq!(mock.last_call_args()[4], "20");

        mock.push_call_response(Ok(r#"{
            "ok": true,
            "members": [
                {"member_id": "1", "status": "online"},
                {"member_id": "2", "is_bot": true, "status": "idle"}
            ]
        }"#
        .to_string()));
        let members = client.get_role_members(&RoleId::new("5")).await.unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].status, MemberStatus::Online);
        assert!(members[1].is_bot);
    }
}
