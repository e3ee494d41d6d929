//! Subscription configuration and consumer-facing types.

use crate::bookmark::Bookmark;
use crate::error::{Result, TailError};
use crate::record::EventRecord;
use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Where a new subscription starts.
///
/// Resuming from a bookmark and picking an explicit start are the same
/// field, so they cannot both be requested.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPosition {
    /// Only records appended after the subscription opened.
    #[default]
    FutureEvents,
    /// Every retained record, then live records.
    OldestRecord,
    /// The record after the bookmarked one.
    AfterBookmark(Bookmark),
}

/// Configuration for a subscription.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Channel to tail.
    /// Default: "Application"
    pub channel: String,

    /// Filter expression.
    /// Default: "*"
    pub query: String,

    pub start: StartPosition,

    /// Max buffered tail events before the subscription is dropped.
    /// Default: 1000
    pub buffer_size: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            channel: "Application".to_string(),
            query: "*".to_string(),
            start: StartPosition::FutureEvents,
            buffer_size: 1000,
        }
    }
}

impl SubscriptionConfig {
    /// Tail `channel` with the default query and start.
    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_start(mut self, start: StartPosition) -> Self {
        self.start = start;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel.trim().is_empty() {
            return Err(TailError::InvalidConfig("channel must not be empty".into()));
        }
        if self.query.trim().is_empty() {
            return Err(TailError::InvalidConfig("query must not be empty".into()));
        }
        if self.buffer_size == 0 {
            return Err(TailError::InvalidConfig("buffer_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Settings shared by every subscription of one manager.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Publisher metadata handles kept open. 0 opens one per record.
    /// Default: 64
    pub publisher_cache_size: usize,

    /// Resolve message and display texts.
    /// Default: true
    pub render_messages: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            publisher_cache_size: 64,
            render_messages: true,
        }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// How a subscription's start position was honored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeOutcome {
    /// No bookmark was given.
    Fresh,
    /// Delivery starts right after the bookmarked record.
    Resumed,
    /// The bookmarked position was evicted; delivery starts at the oldest
    /// retained record.
    Clamped,
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// The consumer dropped its [`Tail`].
    Disconnected,
    /// The native layer reported cancellation.
    Cancelled,
    /// Unrecoverable failure; re-create from the last bookmark.
    Failed(String),
}

/// Events delivered to a [`Tail`].
#[derive(Debug)]
pub enum TailEvent {
    /// An assembled record, stamped with the bookmark after it.
    Record(Box<EventRecord>),
    /// One record could not be decoded or rendered. The subscription
    /// continues and the bookmark is not advanced.
    RecordFailed { error: TailError },
    /// Informational condition, e.g. a clamped resume.
    Notice(TailError),
    /// The native layer reported an error; the subscription stays open.
    Error(TailError),
    /// Unrecoverable failure. A `Dropped` event follows.
    Failed(TailError),
    /// Subscription was dropped and delivers nothing more.
    Dropped { reason: DropReason },
}

type KillHook = Box<dyn FnOnce() + Send>;

/// State shared between a [`Tail`] and the sink feeding it.
#[derive(Default)]
pub(crate) struct TailState {
    dead: AtomicBool,
    drop_reason: Mutex<Option<DropReason>>,
    last_bookmark: Mutex<Option<Bookmark>>,
    on_kill: Mutex<Option<KillHook>>,
}

impl TailState {
    pub fn new(start: Option<Bookmark>) -> Self {
        Self {
            last_bookmark: Mutex::new(start),
            ..Default::default()
        }
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    /// Mark dead and run the kill hook. Returns false if it already was.
    pub fn kill(&self, reason: DropReason) -> bool {
        if self.dead.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.drop_reason.lock() = Some(reason);
        let hook = self.on_kill.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        true
    }

    /// Run `hook` once the state dies, or right away if it already has.
    pub fn set_on_kill(&self, hook: KillHook) {
        let mut slot = self.on_kill.lock();
        if self.is_dead() {
            drop(slot);
            hook();
        } else {
            *slot = Some(hook);
        }
    }

    /// Swap the last delivered position, returning the previous one.
    pub fn replace_bookmark(&self, bookmark: Option<Bookmark>) -> Option<Bookmark> {
        std::mem::replace(&mut *self.last_bookmark.lock(), bookmark)
    }
}

impl fmt::Debug for TailState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TailState")
            .field("dead", &self.is_dead())
            .field("drop_reason", &*self.drop_reason.lock())
            .field("last_bookmark", &*self.last_bookmark.lock())
            .finish()
    }
}

/// Consumer end of a subscription created by
/// [`SubscriptionManager::subscribe`](super::SubscriptionManager::subscribe).
pub struct Tail {
    pub id: SubscriptionId,
    channel: String,
    resume: ResumeOutcome,
    receiver: Receiver<TailEvent>,
    state: Arc<TailState>,
}

impl Tail {
    pub(crate) fn new(
        id: SubscriptionId,
        channel: String,
        resume: ResumeOutcome,
        receiver: Receiver<TailEvent>,
        state: Arc<TailState>,
    ) -> Self {
        Self {
            id,
            channel,
            resume,
            receiver,
            state,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn resume(&self) -> ResumeOutcome {
        self.resume
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<TailEvent, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<TailEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<TailEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// True once the subscription stopped delivering and must be
    /// re-created.
    pub fn is_dead(&self) -> bool {
        self.state.is_dead()
    }

    pub fn drop_reason(&self) -> Option<DropReason> {
        self.state.drop_reason.lock().clone()
    }

    /// Position after the last record delivered, or the start bookmark if
    /// nothing was delivered yet. Persist this to resume later.
    pub fn last_bookmark(&self) -> Option<Bookmark> {
        self.state.last_bookmark.lock().clone()
    }
}

/// Dropping the consumer end stops the native subscription. The manager
/// releases it on its next call.
impl Drop for Tail {
    fn drop(&mut self) {
        self.state.kill(DropReason::Disconnected);
    }
}
