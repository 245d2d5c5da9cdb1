//! Per-request messaging channel
//!
//! Messages of a request are ordered by the store's server timestamp. A
//! [`ChannelBinding`] holds at most one live subscription and releases it
//! before binding another request.

use common::{Direction, DocumentStore, Fields, Query, SharedStore, StoreError, server_timestamp};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::collections::messages;
use crate::models::{Feed, Message, SenderRole, decode_valid};

/// Errors of the messaging channel
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Message text cannot be empty")]
    EmptyMessage,

    #[error("No active chat")]
    NoActiveChat,

    #[error("Chat of request {0} is closed")]
    ChatClosed(String),

    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Only the sender can delete a message")]
    NotSender,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Live message log of one request
pub type MessageFeed = Feed<Message>;

/// Access to the message logs of requests
#[derive(Clone)]
pub struct MessagingChannel {
    store: SharedStore,
}

impl MessagingChannel {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Messages of a request, oldest first
    pub fn log_query(request_id: &str) -> Query {
        Query::new(messages(request_id)).order_by("timestamp", Direction::Asc)
    }

    pub async fn subscribe(&self, request_id: &str) -> ChannelResult<MessageFeed> {
        let subscription = self.store.subscribe(Self::log_query(request_id)).await?;
        Ok(Feed::new(subscription))
    }

    pub async fn history(&self, request_id: &str) -> ChannelResult<Vec<Message>> {
        let docs = self.store.query(&Self::log_query(request_id)).await?;
        Ok(decode_valid(&docs))
    }

    /// Post a message; blank text is rejected without touching the store
    pub async fn append(
        &self,
        request_id: &str,
        text: &str,
        sender_id: &str,
        sender_role: SenderRole,
    ) -> ChannelResult<Message> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChannelError::EmptyMessage);
        }
        if request_id.is_empty() {
            return Err(ChannelError::NoActiveChat);
        }

        let mut data = Fields::new();
        data.insert("text".into(), json!(text));
        data.insert("senderId".into(), json!(sender_id));
        data.insert("senderRole".into(), json!(sender_role));
        data.insert("timestamp".into(), server_timestamp());
        data.insert("requestId".into(), json!(request_id));

        let doc = self.store.create(&messages(request_id), data).await?;
        debug!("Message {} posted on request {}", doc.id, request_id);
        Ok(doc.decode()?)
    }

    /// Delete one of the viewer's own messages
    pub async fn remove(
        &self,
        request_id: &str,
        message_id: &str,
        viewer_id: &str,
    ) -> ChannelResult<()> {
        let doc = self
            .store
            .get(&messages(request_id), message_id)
            .await?
            .ok_or_else(|| ChannelError::NotFound(message_id.to_string()))?;
        if doc.get_str("senderId") != Some(viewer_id) {
            return Err(ChannelError::NotSender);
        }

        self.store.delete(&messages(request_id), message_id).await?;
        info!("Message {} deleted from request {}", message_id, request_id);
        Ok(())
    }
}

/// The single chat a viewer is looking at
pub struct ChannelBinding {
    channel: MessagingChannel,
    request_id: Option<String>,
    feed: Option<MessageFeed>,
    messages: Vec<Message>,
}

impl ChannelBinding {
    pub fn new(channel: MessagingChannel) -> Self {
        Self {
            channel,
            request_id: None,
            feed: None,
            messages: Vec::new(),
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn is_bound(&self) -> bool {
        self.feed.is_some()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Bind to a request's chat, releasing the previous one first
    ///
    /// Returns once the current log has been loaded.
    pub async fn bind(&mut self, request_id: &str) -> ChannelResult<()> {
        if self.is_bound() && self.request_id.as_deref() == Some(request_id) {
            return Ok(());
        }
        self.release();

        let mut feed = self.channel.subscribe(request_id).await?;
        self.messages = match feed.next().await {
            Some(snapshot) => snapshot?,
            None => return Err(StoreError::Unavailable("message feed closed".to_string()).into()),
        };
        self.request_id = Some(request_id.to_string());
        self.feed = Some(feed);
        Ok(())
    }

    /// Drop the live subscription and the loaded log
    pub fn release(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.cancel();
        }
        if let Some(request_id) = self.request_id.take() {
            debug!("Released chat of request {}", request_id);
        }
        self.messages.clear();
    }

    /// Wait for the bound log to change; never resolves while unbound
    pub async fn changed(&mut self) -> ChannelResult<()> {
        let Some(feed) = self.feed.as_mut() else {
            return std::future::pending().await;
        };
        match feed.next().await {
            Some(Ok(messages)) => {
                self.messages = messages;
                Ok(())
            }
            Some(Err(e)) if e.is_permission_denied() => {
                self.release();
                Err(e.into())
            }
            Some(Err(e)) => Err(e.into()),
            None => {
                self.feed = None;
                Err(StoreError::Unavailable("message feed closed".to_string()).into())
            }
        }
    }

    /// Post to the bound chat
    pub async fn send(
        &self,
        text: &str,
        sender_id: &str,
        sender_role: SenderRole,
    ) -> ChannelResult<Message> {
        if text.trim().is_empty() {
            return Err(ChannelError::EmptyMessage);
        }
        let request_id = self.request_id.as_deref().ok_or(ChannelError::NoActiveChat)?;
        self.channel.append(request_id, text, sender_id, sender_role).await
    }

    /// Delete one of the viewer's messages from the bound chat
    pub async fn delete(&self, message_id: &str, viewer_id: &str) -> ChannelResult<()> {
        let request_id = self.request_id.as_deref().ok_or(ChannelError::NoActiveChat)?;
        self.channel.remove(request_id, message_id, viewer_id).await
    }
}

impl Drop for ChannelBinding {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use common::memory::Clock;
    use common::MemoryStore;
    use tokio::time::timeout;

    use super::*;

    /// Clock that runs backwards
    struct Rewinding(std::sync::Mutex<i64>);

    impl Clock for Rewinding {
        fn now_micros(&self) -> i64 {
            let mut now = self.0.lock().expect("clock lock");
            *now -= 1_000_000;
            *now
        }
    }

    fn channel(store: &MemoryStore) -> MessagingChannel {
        MessagingChannel::new(Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn blank_messages_are_not_written() -> ChannelResult<()> {
        let store = MemoryStore::new();
        let channel = channel(&store);

        for text in ["", "   ", "\n\t"] {
            let err = channel.append("r1", text, "alice", SenderRole::User).await.unwrap_err();
            assert!(matches!(err, ChannelError::EmptyMessage));
        }
        assert_eq!(store.document_count(&messages("r1")).await, 0);

        let posted = channel.append("r1", "  hello  ", "alice", SenderRole::User).await?;
        assert_eq!(posted.text, "hello");
        assert_eq!(posted.request_id, "r1");
        Ok(())
    }

    #[tokio::test]
    async fn order_follows_server_stamps_not_client_clocks() -> ChannelResult<()> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("valid date");
        let clock = Rewinding(std::sync::Mutex::new(start.timestamp_micros()));
        let store = MemoryStore::with_clock(Arc::new(clock));
        let channel = channel(&store);

        for text in ["first", "second", "third"] {
            channel.append("r1", text, "alice", SenderRole::User).await?;
        }

        let log = channel.history("r1").await?;
        let texts: Vec<&str> = log.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["first", "second", "third"]);
        assert!(log.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        Ok(())
    }

    #[tokio::test]
    async fn only_the_sender_removes_a_message() -> ChannelResult<()> {
        let store = MemoryStore::new();
        let channel = channel(&store);
        let posted = channel.append("r1", "hi", "alice", SenderRole::User).await?;

        let err = channel.remove("r1", &posted.id, "eve").await.unwrap_err();
        assert!(matches!(err, ChannelError::NotSender));
        channel.remove("r1", &posted.id, "alice").await?;

        let err = channel.remove("r1", &posted.id, "alice").await.unwrap_err();
        assert!(matches!(err, ChannelError::NotFound(_)));
        Ok(())
    }

    #[tokio::test]
    async fn sending_without_a_bound_chat_fails() {
        let binding = ChannelBinding::new(channel(&MemoryStore::new()));
        let err = binding.send("hello", "alice", SenderRole::User).await.unwrap_err();
        assert!(matches!(err, ChannelError::NoActiveChat));
    }

    #[tokio::test]
    async fn rebinding_tears_down_the_previous_chat() -> ChannelResult<()> {
        let store = MemoryStore::new();
        let channel = channel(&store);
        let mut binding = ChannelBinding::new(channel.clone());

        channel.append("a", "old", "alice", SenderRole::User).await?;
        binding.bind("a").await?;
        assert_eq!(binding.messages().len(), 1);

        binding.bind("b").await?;
        assert_eq!(binding.request_id(), Some("b"));
        assert!(binding.messages().is_empty());

        channel.append("a", "late", "alice", SenderRole::User).await?;
        assert!(
            timeout(Duration::from_millis(100), binding.changed()).await.is_err(),
            "no update from the released chat"
        );
        assert!(binding.messages().is_empty());

        channel.append("b", "fresh", "eve", SenderRole::Expert).await?;
        timeout(Duration::from_secs(1), binding.changed())
            .await
            .expect("update from the bound chat")?;
        assert_eq!(binding.messages().len(), 1);
        assert_eq!(binding.messages()[0].text, "fresh");
        Ok(())
    }

    #[tokio::test]
    async fn released_binding_waits_forever() {
        let mut binding = ChannelBinding::new(channel(&MemoryStore::new()));
        binding.bind("a").await.expect("bind");
        binding.release();
        assert!(!binding.is_bound());
        assert!(timeout(Duration::from_millis(50), binding.changed()).await.is_err());
    }
}
