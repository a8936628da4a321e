// In-process platform for tests: channels, pins, roles and interaction
// replies kept in memory, with switches to inject the failures the real
// platform produces.

use async_trait::async_trait;
use bastion_utils::{ChannelId, InteractionRef, MessageRef, RoleId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{
    ChannelMessage, Directory, MessageContent, PlatformError, PlatformResult, RoleHandle,
    RoleMember, Transport,
};

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    authored_by_self: bool,
    pinned: bool,
    content: MessageContent,
}

#[derive(Default)]
struct State {
    channels: HashMap<ChannelId, Vec<StoredMessage>>,
    roles: HashMap<RoleId, (RoleHandle, Vec<RoleMember>)>,
    responses: Vec<(InteractionRef, String)>,
    edit_failures: VecDeque<PlatformError>,
    send_failures: VecDeque<PlatformError>,
    edit_delay: Option<Duration>,
    next_id: u64,
}

#[derive(Default)]
pub struct MemoryPlatform {
    state: Mutex<State>,
    directory_down: AtomicBool,
    sends: AtomicUsize,
    edits: AtomicUsize,
    pins: AtomicUsize,
    scans: AtomicUsize,
    writes_in_flight: AtomicUsize,
    max_writes_in_flight: AtomicUsize,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Place a message in a channel as if it had been posted earlier
    pub fn seed_message(
        &self,
        channel: &ChannelId,
        content: MessageContent,
        authored_by_self: bool,
    ) -> MessageRef {
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id.to_string();
        state
            .channels
            .entry(channel.clone())
            .or_default()
            .push(StoredMessage {
                id: id.clone(),
                authored_by_self,
                pinned: false,
                content,
            });
        MessageRef::new(channel.clone(), id)
    }

    /// Remove a message, as a moderator purging the channel would
    pub fn delete_message(&self, message: &MessageRef) -> bool {
        let mut state = self.state();
        match state.channels.get_mut(&message.channel) {
            Some(messages) => {
                let before = messages.len();
                messages.retain(|m| m.id != message.message);
                messages.len() != before
            }
            None => false,
        }
    }

    /// Current content of a message, if it still exists
    pub fn message(&self, message: &MessageRef) -> Option<MessageContent> {
        self.state()
            .channels
            .get(&message.channel)
            .and_then(|msgs| msgs.iter().find(|m| m.id == message.message))
            .map(|m| m.content.clone())
    }

    pub fn is_pinned(&self, message: &MessageRef) -> bool {
        self.state()
            .channels
            .get(&message.channel)
            .and_then(|msgs| msgs.iter().find(|m| m.id == message.message))
            .map(|m| m.pinned)
            .unwrap_or(false)
    }

    pub fn channel_len(&self, channel: &ChannelId) -> usize {
        self.state().channels.get(channel).map(Vec::len).unwrap_or(0)
    }

    /// Fail the next edit with `error` instead of applying it
    pub fn fail_next_edit(&self, error: PlatformError) {
        self.state().edit_failures.push_back(error);
    }

    pub fn fail_next_send(&self, error: PlatformError) {
        self.state().send_failures.push_back(error);
    }

    /// Hold every send/edit for `delay` so overlapping writes become visible
    pub fn set_write_delay(&self, delay: Duration) {
        self.state().edit_delay = Some(delay);
    }

    pub fn set_role(&self, role: &RoleId, name: &str, members: Vec<RoleMember>) {
        let handle = RoleHandle {
            id: role.clone(),
            name: name.to_string(),
        };
        self.state().roles.insert(role.clone(), (handle, members));
    }

    pub fn remove_role(&self, role: &RoleId) {
        self.state().roles.remove(role);
    }

    pub fn set_directory_available(&self, available: bool) {
        self.directory_down.store(!available, Ordering::SeqCst);
    }

    pub fn responses(&self) -> Vec<(InteractionRef, String)> {
        self.state().responses.clone()
    }

    pub fn last_response(&self) -> Option<String> {
        self.state().responses.last().map(|(_, text)| text.clone())
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn edit_count(&self) -> usize {
        self.edits.load(Ordering::SeqCst)
    }

    pub fn pin_count(&self) -> usize {
        self.pins.load(Ordering::SeqCst)
    }

    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// Highest number of sends/edits observed running at the same time
    pub fn max_writes_in_flight(&self) -> usize {
        self.max_writes_in_flight.load(Ordering::SeqCst)
    }

    async fn enter_write(&self) -> WriteGuard<'_> {
        let current = self.writes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_writes_in_flight.fetch_max(current, Ordering::SeqCst);
        let delay = self.state().edit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        WriteGuard(&self.writes_in_flight)
    }

    fn check_directory(&self) -> PlatformResult<()> {
        if self.directory_down.load(Ordering::SeqCst) {
            Err(PlatformError::Unavailable("directory offline".to_string()))
        } else {
            Ok(())
        }
    }
}

struct WriteGuard<'a>(&'a AtomicUsize);

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryPlatform {
    async fn send_message(
        &self,
        channel: &ChannelId,
        content: &MessageContent,
    ) -> PlatformResult<MessageRef> {
        let _guard = self.enter_write().await;
        if let Some(error) = self.state().send_failures.pop_front() {
            return Err(error);
        }
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(self.seed_message(channel, content.clone(), true))
    }

    async fn edit_message(
        &self,
        message: &MessageRef,
        content: &MessageContent,
    ) -> PlatformResult<()> {
        let _guard = self.enter_write().await;
        let mut state = self.state();
        if let Some(error) = state.edit_failures.pop_front() {
            return Err(error);
        }
        let stored = state
            .channels
            .get_mut(&message.channel)
            .and_then(|msgs| msgs.iter_mut().find(|m| m.id == message.message))
            .ok_or_else(|| PlatformError::NotFound(format!("message {}", message)))?;
        stored.content = content.clone();
        self.edits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn scan_history(
        &self,
        channel: &ChannelId,
        limit: usize,
    ) -> PlatformResult<Vec<ChannelMessage>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        let messages = match state.channels.get(channel) {
            Some(messages) => messages,
            None => return Ok(Vec::new()),
        };
        Ok(messages
            .iter()
            .rev()
            .take(limit)
            .map(|m| ChannelMessage {
                message_ref: MessageRef::new(channel.clone(), m.id.clone()),
                authored_by_self: m.authored_by_self,
                pinned: m.pinned,
                content: m.content.clone(),
            })
            .collect())
    }

    async fn pin_message(&self, message: &MessageRef) -> PlatformResult<()> {
        let mut state = self.state();
        let stored = state
            .channels
            .get_mut(&message.channel)
            .and_then(|msgs| msgs.iter_mut().find(|m| m.id == message.message))
            .ok_or_else(|| PlatformError::NotFound(format!("message {}", message)))?;
        stored.pinned = true;
        self.pins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn respond(&self, interaction: &InteractionRef, text: &str) -> PlatformResult<()> {
        self.state()
            .responses
            .push((interaction.clone(), text.to_string()));
        Ok(())
    }
}

#[async_trait]
impl Directory for MemoryPlatform {
    async fn get_role(&self, role: &RoleId) -> PlatformResult<RoleHandle> {
        self.check_directory()?;
        self.state()
            .roles
            .get(role)
            .map(|(handle, _)| handle.clone())
            .ok_or_else(|| PlatformError::NotFound(format!("role {}", role)))
    }

    async fn get_role_members(&self, role: &RoleId) -> PlatformResult<Vec<RoleMember>> {
        self.check_directory()?;
        self.state()
            .roles
            .get(role)
            .map(|(_, members)| members.clone())
            .ok_or_else(|| PlatformError::NotFound(format!("role {}", role)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_utils::MemberStatus;

    #[tokio::test]
    async fn test_history_is_newest_first_and_limited() {
        let platform = MemoryPlatform::new();
        let channel = ChannelId::new("panel");
        for i in 0..5 {
            let content = MessageContent {
                title: format!("m{}", i),
                ..Default::default()
            };
            platform.seed_message(&channel, content, i % 2 == 0);
        }

        let history = platform.scan_history(&channel, 3).await.unwrap();
        let titles: Vec<_> = history.iter().map(|m| m.content.title.as_str()).collect();
        assert_eq!(titles, vec!["m4", "m3", "m2"]);
        assert!(history[0].authored_by_self);
        assert!(!history[1].authored_by_self);
    }

    #[tokio::test]
    async fn test_edit_of_deleted_message_is_not_found() {
        let platform = MemoryPlatform::new();
        let channel = ChannelId::new("panel");
        let msg = platform
            .send_message(&channel, &MessageContent::default())
            .await
            .unwrap();
        assert!(platform.delete_message(&msg));

        let result = platform.edit_message(&msg, &MessageContent::default()).await;
        assert!(matches!(result, Err(PlatformError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_injected_edit_failure_is_consumed_once() {
        let platform = MemoryPlatform::new();
        let channel = ChannelId::new("panel");
        let msg = platform
            .send_message(&channel, &MessageContent::default())
            .await
            .unwrap();
        platform.fail_next_edit(PlatformError::RateLimited {
            retry_after: Duration::from_secs(2),
        });

        assert!(platform
            .edit_message(&msg, &MessageContent::default())
            .await
            .is_err());
        assert!(platform
            .edit_message(&msg, &MessageContent::default())
            .await
            .is_ok());
        assert_eq!(platform.edit_count(), 1);
    }

    #[tokio::test]
    async fn test_directory_switch() {
        let platform = MemoryPlatform::new();
        let role = RoleId::new("r1");
        platform.set_role(
            &role,
            "Alpha",
            vec![RoleMember::new("1", false, MemberStatus::Online)],
        );
        assert_eq!(platform.get_role_members(&role).await.unwrap().len(), 1);

        platform.set_directory_available(false);
        assert!(matches!(
            platform.get_role_members(&role).await,
            Err(PlatformError::Unavailable(_))
        ));
    }
}
