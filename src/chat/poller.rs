//! Client-side conversation poller.
//!
//! One [`ChatSession`] drives at most one conversation. Opening a peer
//! resets the watermark, loads the full history and then polls for
//! newer messages on a fixed interval. The next fetch is only scheduled
//! after the previous one finished, so fetches never overlap. Failed
//! cycles back off exponentially up to a ceiling.
//!
//! Sends are optimistic: the text shows up as a pending entry at once
//! and is swapped for the authoritative row when a poll returns it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{fetch_messages, send_message, ChatError, MessageStore, SentMessage, Watermark};
use crate::config::ChatConfig;
use crate::context::RequestContext;
use crate::db::ChatMessage;

/// Where a session reads and writes messages.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Conversation with `peer_id`; everything when `since` is None.
    async fn fetch(
        &self,
        peer_id: i64,
        since: Option<&Watermark>,
    ) -> Result<Vec<ChatMessage>, ChatError>;

    async fn send(
        &self,
        peer_id: i64,
        text: &str,
        correlation_id: &str,
    ) -> Result<SentMessage, ChatError>;
}

/// Reads straight from a [`MessageStore`] as the given user.
pub struct StoreMessageSource<S: ?Sized> {
    store: Arc<S>,
    ctx: RequestContext,
}

impl<S: MessageStore + ?Sized> StoreMessageSource<S> {
    pub fn new(store: Arc<S>, ctx: RequestContext) -> Self {
        Self { store, ctx }
    }
}

#[async_trait]
impl<S: MessageStore + ?Sized> MessageSource for StoreMessageSource<S> {
    async fn fetch(
        &self,
        peer_id: i64,
        since: Option<&Watermark>,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        fetch_messages(
            self.store.as_ref(),
            &self.ctx,
            peer_id,
            since.map(|w| w.timestamp.as_str()),
            since.map(|w| w.id),
        )
        .await
    }

    async fn send(
        &self,
        peer_id: i64,
        text: &str,
        _correlation_id: &str,
    ) -> Result<SentMessage, ChatError> {
        send_message(self.store.as_ref(), &self.ctx, peer_id, text).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    pub max_backoff: Duration,
}

impl PollOptions {
    /// Delay before the next fetch: the interval, doubled per consecutive
    /// failure, never above `max_backoff`.
    pub fn delay_after(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.interval;
        }
        let factor = 1u32 << failures.min(16);
        self.interval.saturating_mul(factor).min(self.max_backoff.max(self.interval))
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(3000),
            max_backoff: Duration::from_millis(30_000),
        }
    }
}

impl From<&ChatConfig> for PollOptions {
    fn from(config: &ChatConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Loading,
    Polling,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEntry {
    /// Authoritative row from the server
    Confirmed(ChatMessage),
    /// Shown locally; `server_id` is set once the send was acknowledged
    Pending {
        correlation_id: String,
        text: String,
        sent_at: DateTime<Utc>,
        server_id: Option<i64>,
    },
    Failed {
        correlation_id: String,
        text: String,
        error: String,
    },
}

#[derive(Debug, Clone)]
pub enum ChatEvent {
    Loaded {
        peer_id: i64,
        messages: Vec<ChatMessage>,
    },
    Received {
        peer_id: i64,
        messages: Vec<ChatMessage>,
    },
    Confirmed {
        correlation_id: String,
        id: i64,
    },
    SendFailed {
        correlation_id: String,
        error: String,
    },
    PollFailed {
        peer_id: i64,
        error: String,
        retry_in: Duration,
    },
}

/// State of the open conversation.
#[derive(Debug)]
struct Conversation {
    peer_id: i64,
    state: PollerState,
    entries: Vec<ChatEntry>,
    seen: HashSet<i64>,
    /// Acknowledged sends waiting for their row, by server id
    awaiting: HashMap<i64, String>,
    watermark: Option<Watermark>,
}

impl Conversation {
    fn new(peer_id: i64) -> Self {
        Self {
            peer_id,
            state: PollerState::Loading,
            entries: Vec::new(),
            seen: HashSet::new(),
            awaiting: HashMap::new(),
            watermark: None,
        }
    }

    /// Merge a fetched batch; returns the messages not seen before.
    fn apply(&mut self, batch: Vec<ChatMessage>) -> Vec<ChatMessage> {
        self.watermark = Watermark::advance(self.watermark.take(), &batch);

        let mut fresh = Vec::new();
        for message in batch {
            if !self.seen.insert(message.id) {
                continue;
            }
            match self.awaiting.remove(&message.id) {
                Some(correlation_id) => {
                    if let Some(slot) = self.pending_slot(&correlation_id) {
                        self.entries[slot] = ChatEntry::Confirmed(message.clone());
                    } else {
                        self.entries.push(ChatEntry::Confirmed(message.clone()));
                    }
                }
                None => self.entries.push(ChatEntry::Confirmed(message.clone())),
            }
            fresh.push(message);
        }
        fresh
    }

    fn push_pending(&mut self, correlation_id: &str, text: &str, sent_at: DateTime<Utc>) {
        self.entries.push(ChatEntry::Pending {
            correlation_id: correlation_id.to_string(),
            text: text.to_string(),
            sent_at,
            server_id: None,
        });
    }

    /// The send was stored as `sent.id`.
    fn confirm(&mut self, correlation_id: &str, sent: &SentMessage) {
        let Some(slot) = self.pending_slot(correlation_id) else {
            return;
        };
        if self.seen.contains(&sent.id) {
            // A poll already delivered the row
            self.entries.remove(slot);
        } else {
            if let ChatEntry::Pending { server_id, .. } = &mut self.entries[slot] {
                *server_id = Some(sent.id);
            }
            self.awaiting.insert(sent.id, correlation_id.to_string());
        }
    }

    fn fail(&mut self, correlation_id: &str, error: String) {
        if let Some(slot) = self.pending_slot(correlation_id) {
            if let ChatEntry::Pending { text, .. } = &self.entries[slot] {
                self.entries[slot] = ChatEntry::Failed {
                    correlation_id: correlation_id.to_string(),
                    text: text.clone(),
                    error,
                };
            }
        }
    }

    fn pending_slot(&self, correlation_id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| {
            matches!(entry, ChatEntry::Pending { correlation_id: c, .. } if c == correlation_id)
        })
    }
}

type Shared = Arc<Mutex<Option<Conversation>>>;

/// One chat view: at most one open conversation and one polling task.
pub struct ChatSession {
    source: Arc<dyn MessageSource>,
    options: PollOptions,
    conversation: Shared,
    events: mpsc::UnboundedSender<ChatEvent>,
    task: Option<JoinHandle<()>>,
}

impl ChatSession {
    pub fn new(
        source: Arc<dyn MessageSource>,
        options: PollOptions,
    ) -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let session = Self {
            source,
            options,
            conversation: Arc::new(Mutex::new(None)),
            events,
            task: None,
        };
        (session, receiver)
    }

    /// Switch to `peer_id`, cancelling any previous polling task.
    pub fn open(&mut self, peer_id: i64) {
        self.stop_task();
        *self.conversation.lock() = Some(Conversation::new(peer_id));
        debug!(peer_id, "Opening conversation");

        self.task = Some(tokio::spawn(poll_loop(
            self.source.clone(),
            self.conversation.clone(),
            self.events.clone(),
            self.options,
            peer_id,
        )));
    }

    pub fn close(&mut self) {
        self.stop_task();
        *self.conversation.lock() = None;
    }

    fn stop_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn state(&self) -> PollerState {
        self.conversation
            .lock()
            .as_ref()
            .map_or(PollerState::Idle, |c| c.state)
    }

    pub fn peer_id(&self) -> Option<i64> {
        self.conversation.lock().as_ref().map(|c| c.peer_id)
    }

    pub fn entries(&self) -> Vec<ChatEntry> {
        self.conversation
            .lock()
            .as_ref()
            .map(|c| c.entries.clone())
            .unwrap_or_default()
    }

    pub fn watermark(&self) -> Option<Watermark> {
        self.conversation
            .lock()
            .as_ref()
            .and_then(|c| c.watermark.clone())
    }

    /// Show `text` right away and submit it. Returns the correlation id
    /// of the local entry with the server acknowledgement.
    pub async fn send(&self, text: &str) -> Result<(String, SentMessage), ChatError> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let peer_id = {
            let mut guard = self.conversation.lock();
            let conversation = guard.as_mut().ok_or(ChatError::NoConversation)?;
            conversation.push_pending(&correlation_id, text, Utc::now());
            conversation.peer_id
        };

        match self.source.send(peer_id, text, &correlation_id).await {
            Ok(sent) => {
                with_peer(&self.conversation, peer_id, |c| c.confirm(&correlation_id, &sent));
                let _ = self.events.send(ChatEvent::Confirmed {
                    correlation_id: correlation_id.clone(),
                    id: sent.id,
                });
                Ok((correlation_id, sent))
            }
            Err(err) => {
                let message = err.to_string();
                with_peer(&self.conversation, peer_id, |c| c.fail(&correlation_id, message.clone()));
                let _ = self.events.send(ChatEvent::SendFailed {
                    correlation_id,
                    error: message,
                });
                Err(err)
            }
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.stop_task();
    }
}

/// Run `f` if the conversation is still the one with `peer_id`.
fn with_peer<T>(shared: &Shared, peer_id: i64, f: impl FnOnce(&mut Conversation) -> T) -> Option<T> {
    let mut guard = shared.lock();
    guard.as_mut().filter(|c| c.peer_id == peer_id).map(f)
}

async fn poll_loop(
    source: Arc<dyn MessageSource>,
    conversation: Shared,
    events: mpsc::UnboundedSender<ChatEvent>,
    options: PollOptions,
    peer_id: i64,
) {
    let mut failures = 0u32;
    loop {
        let Some((since, loading)) = with_peer(&conversation, peer_id, |c| {
            (c.watermark.clone(), c.state == PollerState::Loading)
        }) else {
            return;
        };

        let delay = match source.fetch(peer_id, since.as_ref()).await {
            Ok(batch) => {
                failures = 0;
                let fresh = with_peer(&conversation, peer_id, |c| {
                    c.state = PollerState::Polling;
                    c.apply(batch)
                });
                let Some(fresh) = fresh else {
                    return;
                };
                if loading {
                    let _ = events.send(ChatEvent::Loaded {
                        peer_id,
                        messages: fresh,
                    });
                } else if !fresh.is_empty() {
                    let _ = events.send(ChatEvent::Received {
                        peer_id,
                        messages: fresh,
                    });
                }
                options.interval
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                let retry_in = options.delay_after(failures);
                warn!(peer_id, failures, error = %err, "Could not load messages");
                let _ = events.send(ChatEvent::PollFailed {
                    peer_id,
                    error: err.to_string(),
                    retry_in,
                });
                retry_in
            }
        };

        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
    use tokio::time::Instant;

    const ME: i64 = 1;

    fn message(id: i64, sender_id: i64, receiver_id: i64, text: &str) -> ChatMessage {
        ChatMessage {
            id,
            sender_id,
            receiver_id,
            message_text: text.to_string(),
            created_at: format!("2025-06-10T09:00:{:02}.000000Z", id),
            is_read: false,
        }
    }

    #[derive(Default)]
    struct FakeSource {
        rows: Mutex<Vec<ChatMessage>>,
        fail_next: AtomicU32,
        next_id: AtomicI64,
        fetches: Mutex<Vec<(i64, Option<Watermark>, Instant)>>,
    }

    impl FakeSource {
        fn with(rows: Vec<ChatMessage>) -> Arc<Self> {
            let next = rows.iter().map(|m| m.id).max().unwrap_or(0) + 1;
            let source = Self::default();
            *source.rows.lock() = rows;
            source.next_id.store(next, Ordering::SeqCst);
            Arc::new(source)
        }

        fn deliver(&self, sender_id: i64, receiver_id: i64, text: &str) -> i64 {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.rows.lock().push(message(id, sender_id, receiver_id, text));
            id
        }

        fn fetch_log(&self) -> Vec<(i64, Option<Watermark>, Instant)> {
            self.fetches.lock().clone()
        }
    }

    #[async_trait]
    impl MessageSource for FakeSource {
        async fn fetch(
            &self,
            peer_id: i64,
            since: Option<&Watermark>,
        ) -> Result<Vec<ChatMessage>, ChatError> {
            self.fetches.lock().push((peer_id, since.cloned(), Instant::now()));
            if self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ChatError::Api {
                    status: 503,
                    message: "store unavailable".into(),
                });
            }
            let rows = self.rows.lock();
            Ok(rows
                .iter()
                .filter(|m| {
                    (m.sender_id == peer_id && m.receiver_id == ME)
                        || (m.sender_id == ME && m.receiver_id == peer_id)
                })
                .filter(|m| since.map_or(true, |w| Watermark::of(m) > *w))
                .cloned()
                .collect())
        }

        async fn send(
            &self,
            peer_id: i64,
            text: &str,
            _correlation_id: &str,
        ) -> Result<SentMessage, ChatError> {
            let id = self.deliver(ME, peer_id, text);
            Ok(SentMessage {
                id,
                timestamp: message(id, ME, peer_id, text).created_at,
            })
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<ChatEvent>) -> ChatEvent {
        events.recv().await.expect("event channel closed")
    }

    #[test]
    fn test_backoff_is_capped() {
        let options = PollOptions::default();
        assert_eq!(options.delay_after(0), Duration::from_secs(3));
        assert_eq!(options.delay_after(1), Duration::from_secs(6));
        assert_eq!(options.delay_after(2), Duration::from_secs(12));
        assert_eq!(options.delay_after(3), Duration::from_secs(24));
        assert_eq!(options.delay_after(4), Duration::from_secs(30));
        assert_eq!(options.delay_after(40), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_loads_history_then_polls() {
        let source = FakeSource::with(vec![message(1, 2, ME, "hello"), message(2, 3, ME, "other")]);
        let (mut session, mut events) = ChatSession::new(source.clone(), PollOptions::default());
        assert_eq!(session.state(), PollerState::Idle);

        session.open(2);
        match next_event(&mut events).await {
            ChatEvent::Loaded { peer_id, messages } => {
                assert_eq!(peer_id, 2);
                assert_eq!(messages.len(), 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(session.state(), PollerState::Polling);
        assert_eq!(session.watermark().unwrap().id, 1);

        let id = source.deliver(2, ME, "are you free on the 15th?");
        match next_event(&mut events).await {
            ChatEvent::Received { messages, .. } => assert_eq!(messages[0].id, id),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(session.entries().len(), 2);
        assert_eq!(session.watermark().unwrap().id, id);

        let log = source.fetch_log();
        assert!(log[0].1.is_none());
        assert_eq!(log[1].1.as_ref().unwrap().id, 1);
        assert_eq!(log[1].2 - log[0].2, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_back_off_and_recover() {
        let source = FakeSource::with(vec![message(1, 2, ME, "hello")]);
        source.fail_next.store(3, Ordering::SeqCst);
        let (mut session, mut events) = ChatSession::new(source.clone(), PollOptions::default());

        session.open(2);
        for expected in [6, 12, 24] {
            match next_event(&mut events).await {
                ChatEvent::PollFailed { retry_in, .. } => {
                    assert_eq!(retry_in, Duration::from_secs(expected))
                }
                other => panic!("unexpected event: {other:?}"),
            }
            assert_eq!(session.state(), PollerState::Loading);
        }
        assert!(matches!(next_event(&mut events).await, ChatEvent::Loaded { .. }));
        assert_eq!(session.state(), PollerState::Polling);

        let times: Vec<_> = source.fetch_log().iter().map(|f| f.2).collect();
        assert_eq!(times[1] - times[0], Duration::from_secs(6));
        assert_eq!(times[2] - times[1], Duration::from_secs(12));
        assert_eq!(times[3] - times[2], Duration::from_secs(24));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_cancels_previous_poller() {
        let source = FakeSource::with(vec![message(1, 2, ME, "a"), message(2, 3, ME, "b")]);
        let (mut session, mut events) = ChatSession::new(source.clone(), PollOptions::default());

        session.open(2);
        assert!(matches!(next_event(&mut events).await, ChatEvent::Loaded { peer_id: 2, .. }));
        session.open(3);
        assert!(matches!(next_event(&mut events).await, ChatEvent::Loaded { peer_id: 3, .. }));
        let switched_at = Instant::now();

        tokio::time::sleep(Duration::from_secs(10)).await;
        let after: Vec<_> = source
            .fetch_log()
            .into_iter()
            .filter(|f| f.2 >= switched_at)
            .collect();
        assert!(!after.is_empty());
        assert!(after.iter().all(|f| f.0 == 3));
        assert_eq!(session.entries().len(), 1);

        session.close();
        assert_eq!(session.state(), PollerState::Idle);
        let closed_at = source.fetch_log().len();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.fetch_log().len(), closed_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimistic_send_reconciled_by_poll() {
        let source = FakeSource::with(vec![]);
        let (mut session, mut events) = ChatSession::new(source.clone(), PollOptions::default());
        session.open(2);
        assert!(matches!(next_event(&mut events).await, ChatEvent::Loaded { .. }));

        let (correlation_id, sent) = session.send("is the hall free?").await.unwrap();
        match &session.entries()[..] {
            [ChatEntry::Pending { correlation_id: c, server_id, .. }] => {
                assert_eq!(c, &correlation_id);
                assert_eq!(*server_id, Some(sent.id));
            }
            other => panic!("unexpected entries: {other:?}"),
        }
        assert!(matches!(next_event(&mut events).await, ChatEvent::Confirmed { .. }));

        match next_event(&mut events).await {
            ChatEvent::Received { messages, .. } => assert_eq!(messages[0].id, sent.id),
            other => panic!("unexpected event: {other:?}"),
        }
        match &session.entries()[..] {
            [ChatEntry::Confirmed(row)] => assert_eq!(row.id, sent.id),
            other => panic!("unexpected entries: {other:?}"),
        }
    }

    #[test]
    fn test_row_before_ack_drops_placeholder() {
        let mut conversation = Conversation::new(2);
        conversation.push_pending("c1", "hi", Utc::now());
        conversation.apply(vec![message(5, ME, 2, "hi")]);
        assert_eq!(conversation.entries.len(), 2);

        conversation.confirm(
            "c1",
            &SentMessage {
                id: 5,
                timestamp: message(5, ME, 2, "hi").created_at,
            },
        );
        assert_eq!(conversation.entries.len(), 1);
        assert!(matches!(&conversation.entries[0], ChatEntry::Confirmed(m) if m.id == 5));
    }

    #[test]
    fn test_failed_send_kept_as_failed_entry() {
        let mut conversation = Conversation::new(2);
        conversation.push_pending("c1", "hi", Utc::now());
        conversation.fail("c1", "offline".into());
        assert!(matches!(
            &conversation.entries[0],
            ChatEntry::Failed { text, .. } if text == "hi"
        ));
    }

    #[tokio::test]
    async fn test_send_without_conversation() {
        let (session, _events) = ChatSession::new(FakeSource::with(vec![]), PollOptions::default());
        assert!(matches!(session.send("hi").await, Err(ChatError::NoConversation)));
    }
}
