//! InMemoryChannelProvider - 開発・テスト用の channel
//!
//! # 学習ポイント
//! - 本物のブローカーの代わりに、操作を Journal に記録するだけの channel
//! - 接続断（drop_connection）と接続失敗（fail_next_connects）を外から注入できる
//! - 再接続は with_channel の中で透過的に行う（Dispatcher は何も知らない）
//!
//! 再接続ロジックはここでは最小限のスタンドインです。

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use ulid::Ulid;

use crate::ports::ChannelProvider;

/// Default number of connection attempts per acquisition.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;

/// Identifies one simulated broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Ulid);

impl ConnectionId {
    fn new() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One protocol operation issued through a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChannelOp {
    DeclareQueue {
        queue: String,
    },
    Publish {
        exchange: String,
        routing_key: String,
        body: Vec<u8>,
    },
    PurgeQueue {
        queue: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub connection: ConnectionId,
    pub op: ChannelOp,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel unavailable after {attempts} connection attempts")]
    Unavailable { attempts: u32 },

    #[error("queue not declared: {0}")]
    UnknownQueue(String),

    #[error("broker rejected operation: {0}")]
    Rejected(String),
}

#[derive(Default)]
struct JournalState {
    entries: Vec<JournalEntry>,
    queues: HashMap<String, u64>,
    connects: u64,
    pending_connect_failures: u32,
    drop_requested: bool,
    releases: u32,
}

/// Shared record of everything the simulated broker saw.
///
/// Cloneable handle: tests and the CLI keep one while the provider is owned
/// by the dispatcher loop.
#[derive(Clone, Default)]
pub struct Journal {
    state: Arc<Mutex<JournalState>>,
}

impl Journal {
    fn lock(&self) -> MutexGuard<'_, JournalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.lock().entries.clone()
    }

    pub fn ops(&self) -> Vec<ChannelOp> {
        self.lock().entries.iter().map(|e| e.op.clone()).collect()
    }

    /// Number of connections opened so far.
    pub fn connects(&self) -> u64 {
        self.lock().connects
    }

    pub fn reconnects(&self) -> u64 {
        self.connects().saturating_sub(1)
    }

    pub fn queue_depth(&self, queue: &str) -> Option<u64> {
        self.lock().queues.get(queue).copied()
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().pending_connect_failures += n;
    }

    /// Drop the current connection; the next command reconnects.
    pub fn drop_connection(&self) {
        self.lock().drop_requested = true;
    }

    /// How many times a provider sharing this journal was released.
    pub fn releases(&self) -> u32 {
        self.lock().releases
    }

    fn record(&self, connection: ConnectionId, op: ChannelOp) {
        self.lock().entries.push(JournalEntry {
            connection,
            op,
            at: Utc::now(),
        });
    }

    fn consume_connect_failure(&self) -> bool {
        let mut state = self.lock();
        if state.pending_connect_failures == 0 {
            return false;
        }
        state.pending_connect_failures -= 1;
        true
    }

    fn take_drop_request(&self) -> bool {
        std::mem::take(&mut self.lock().drop_requested)
    }
}

/// A simulated channel bound to one connection.
pub struct InMemoryChannel {
    connection: ConnectionId,
    journal: Journal,
    next_publish_seq: u64,
}

impl InMemoryChannel {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    /// Declare a queue (idempotent). Returns its current depth.
    pub fn declare_queue(&mut self, queue: &str) -> Result<u64, ChannelError> {
        if queue.is_empty() {
            return Err(ChannelError::Rejected("queue name must not be empty".to_string()));
        }
        let depth = *self.journal.lock().queues.entry(queue.to_string()).or_insert(0);
        self.journal.record(
            self.connection,
            ChannelOp::DeclareQueue {
                queue: queue.to_string(),
            },
        );
        Ok(depth)
    }

    /// Publish a message. Returns the channel's publish sequence number.
    ///
    /// The default exchange (`""`) routes to the queue named by
    /// `routing_key`, which must have been declared.
    pub fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        body: impl Into<Vec<u8>>,
    ) -> Result<u64, ChannelError> {
        if exchange.is_empty() {
            let mut state = self.journal.lock();
            let depth = state
                .queues
                .get_mut(routing_key)
                .ok_or_else(|| ChannelError::UnknownQueue(routing_key.to_string()))?;
            *depth += 1;
        }
        self.journal.record(
            self.connection,
            ChannelOp::Publish {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                body: body.into(),
            },
        );
        self.next_publish_seq += 1;
        Ok(self.next_publish_seq)
    }

    /// Empty a queue. Returns how many messages were removed.
    pub fn purge_queue(&mut self, queue: &str) -> Result<u64, ChannelError> {
        let purged = {
            let mut state = self.journal.lock();
            let depth = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| ChannelError::UnknownQueue(queue.to_string()))?;
            std::mem::take(depth)
        };
        self.journal.record(
            self.connection,
            ChannelOp::PurgeQueue {
                queue: queue.to_string(),
            },
        );
        Ok(purged)
    }
}

/// Channel provider backed by [`InMemoryChannel`].
///
/// Reconnects transparently when the connection was dropped, retrying up to
/// `max_connect_attempts` times before reporting
/// [`ChannelError::Unavailable`].
pub struct InMemoryChannelProvider {
    journal: Journal,
    channel: Option<InMemoryChannel>,
    max_connect_attempts: u32,
}

impl InMemoryChannelProvider {
    pub fn new() -> Self {
        Self::with_journal(Journal::default())
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            channel: None,
            max_connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
        }
    }

    pub fn max_connect_attempts(mut self, attempts: u32) -> Self {
        self.max_connect_attempts = attempts.max(1);
        self
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    fn connect(&self) -> Result<InMemoryChannel, ChannelError> {
        for attempt in 1..=self.max_connect_attempts {
            if self.journal.consume_connect_failure() {
                warn!(attempt, "connection attempt failed");
                continue;
            }
            let connection = ConnectionId::new();
            self.journal.lock().connects += 1;
            info!(%connection, attempt, "channel opened");
            return Ok(InMemoryChannel {
                connection,
                journal: self.journal.clone(),
                next_publish_seq: 0,
            });
        }
        Err(ChannelError::Unavailable {
            attempts: self.max_connect_attempts,
        })
    }
}

impl Default for InMemoryChannelProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelProvider for InMemoryChannelProvider {
    type Channel = InMemoryChannel;
    type Error = ChannelError;

    fn with_channel<T, F>(&mut self, action: F) -> Result<T, ChannelError>
    where
        F: FnOnce(&mut InMemoryChannel) -> Result<T, ChannelError>,
    {
        if self.journal.take_drop_request()
            && let Some(lost) = self.channel.take()
        {
            warn!(connection = %lost.connection, "connection lost; reconnecting");
        }

        let channel = match self.channel.take() {
            Some(channel) => channel,
            None => self.connect()?,
        };
        action(self.channel.insert(channel))
    }
}

impl Drop for InMemoryChannelProvider {
    fn drop(&mut self) {
        self.journal.lock().releases += 1;
        if let Some(channel) = self.channel.take() {
            info!(connection = %channel.connection, "channel released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::DispatcherBuilder;
    use crate::domain::DispatchError;

    #[test]
    fn with_channel_connects_once_and_reuses() {
        let mut provider = InMemoryChannelProvider::new();
        let journal = provider.journal();

        let first = provider.with_channel(|ch| Ok(ch.connection_id())).unwrap();
        let second = provider.with_channel(|ch| Ok(ch.connection_id())).unwrap();

        assert_eq!(first, second);
        assert_eq!(journal.connects(), 1);
        assert_eq!(journal.reconnects(), 0);
    }

    #[test]
    fn dropped_connection_is_reestablished() {
        let mut provider = InMemoryChannelProvider::new();
        let journal = provider.journal();

        let first = provider.with_channel(|ch| Ok(ch.connection_id())).unwrap();
        journal.drop_connection();
        let second = provider.with_channel(|ch| Ok(ch.connection_id())).unwrap();

        assert_ne!(first, second);
        assert_eq!(journal.reconnects(), 1);
    }

    #[test]
    fn transient_connect_failures_are_retried() {
        let mut provider = InMemoryChannelProvider::new().max_connect_attempts(3);
        let journal = provider.journal();
        journal.fail_next_connects(2);

        assert!(provider.with_channel(|ch| ch.declare_queue("jobs")).is_ok());
        assert_eq!(journal.connects(), 1);
    }

    #[test]
    fn exhausted_connect_attempts_report_unavailable() {
        let mut provider = InMemoryChannelProvider::new().max_connect_attempts(2);
        provider.journal().fail_next_connects(2);

        let err = provider.with_channel(|_| Ok(())).unwrap_err();
        assert_eq!(err, ChannelError::Unavailable { attempts: 2 });
    }

    #[test]
    fn publish_to_undeclared_queue_fails() {
        let mut provider = InMemoryChannelProvider::new();
        let err = provider
            .with_channel(|ch| ch.publish("", "missing", "hello"))
            .unwrap_err();
        assert_eq!(err, ChannelError::UnknownQueue("missing".to_string()));
    }

    #[test]
    fn publish_and_purge_track_queue_depth() {
        let mut provider = InMemoryChannelProvider::new();
        let journal = provider.journal();

        provider
            .with_channel(|ch| {
                ch.declare_queue("jobs")?;
                ch.publish("", "jobs", "a")?;
                ch.publish("", "jobs", "b")
            })
            .unwrap();
        assert_eq!(journal.queue_depth("jobs"), Some(2));

        let purged = provider.with_channel(|ch| ch.purge_queue("jobs")).unwrap();
        assert_eq!(purged, 2);
        assert_eq!(journal.queue_depth("jobs"), Some(0));
        assert_eq!(journal.entries().len(), 4);
    }

    #[test]
    fn drop_records_a_single_release() {
        let provider = InMemoryChannelProvider::new();
        let journal = provider.journal();
        drop(provider);
        assert_eq!(journal.releases(), 1);
    }

    #[test]
    fn dispatcher_serializes_publishes_across_reconnects() {
        let provider = InMemoryChannelProvider::new();
        let journal = provider.journal();
        let dispatcher = DispatcherBuilder::new(provider).name("inmem").build().unwrap();

        dispatcher.invoke(|ch| ch.declare_queue("events")).unwrap();
        for i in 0..10 {
            if i == 5 {
                journal.drop_connection();
            }
            dispatcher
                .invoke(move |ch| ch.publish("", "events", format!("event-{i}")))
                .unwrap();
        }

        let err = dispatcher
            .invoke(|ch| ch.publish("", "nowhere", "lost"))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Failed(ChannelError::UnknownQueue(_))));

        dispatcher.shutdown();
        drop(dispatcher);

        let bodies: Vec<Vec<u8>> = journal
            .ops()
            .into_iter()
            .filter_map(|op| match op {
                ChannelOp::Publish { body, .. } => Some(body),
                _ => None,
            })
            .collect();
        let expected: Vec<Vec<u8>> = (0..10).map(|i| format!("event-{i}").into_bytes()).collect();
        assert_eq!(bodies, expected);
        assert_eq!(journal.queue_depth("events"), Some(10));
        assert_eq!(journal.reconnects(), 1);
        assert_eq!(journal.releases(), 1);
    }
}
