//! Subscription manager: opens, tracks and tears down native subscriptions.

use super::bridge::{self, EventSink};
use super::sink::TailSink;
use super::types::{
    EngineConfig, ResumeOutcome, StartPosition, SubscriptionConfig, SubscriptionId, Tail,
    TailState,
};
use crate::bookmark::BookmarkTracker;
use crate::client::{EventLogClient, HandleKind, OwnedHandle};
use crate::error::{Result, TailError};
use crate::native::{NativeError, QueryDirection, SinkContextId, SubscribeStart};
use crate::query::EventQuery;
use crate::record::{EventRecord, EventRecordAssembler};
use crate::types::StatusCode;
use crate::variant::RenderContext;
use crossbeam_channel::bounded;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Handles fetched per round trip by [`SubscriptionManager::read_records`].
const READ_BATCH: usize = 64;

/// Internal subscription state.
struct ActiveSubscription {
    context: SinkContextId,
    channel: String,
    resume: ResumeOutcome,
    handle: Mutex<Option<OwnedHandle>>,
    cancelled: AtomicBool,
    sink: Arc<dyn EventSink>,
    /// Present for subscriptions feeding a [`Tail`].
    state: Option<Arc<TailState>>,
}

impl ActiveSubscription {
    /// Request cancellation once and tell the sink. Later calls are no-ops.
    fn cancel(&self, client: &EventLogClient) -> Result<()> {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        bridge::registry().mark_cancelled(self.context);
        let cancelled = match self.handle.lock().as_ref() {
            Some(handle) => client
                .api()
                .cancel(handle.raw())
                .map_err(|e| TailError::native(e, format!("cancel subscription on '{}'", self.channel))),
            None => Ok(()),
        };
        bridge::guarded(self.context, || self.sink.on_error(TailError::Cancelled));
        cancelled
    }

    /// The consumer is gone or the sink gave up.
    fn is_dead(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.is_dead())
    }
}

/// Manages native subscriptions and the sinks they feed.
pub struct SubscriptionManager {
    client: EventLogClient,
    assembler: Arc<EventRecordAssembler>,
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<ActiveSubscription>>>,
}

impl SubscriptionManager {
    pub fn new(client: EventLogClient) -> Result<Self> {
        Self::with_config(client, EngineConfig::default())
    }

    pub fn with_config(client: EventLogClient, config: EngineConfig) -> Result<Self> {
        let context = RenderContext::system(&client)?;
        let assembler = Arc::new(EventRecordAssembler::new(client.clone(), context, &config));
        Ok(Self {
            client,
            assembler,
            subscriptions: RwLock::new(HashMap::new()),
        })
    }

    pub fn client(&self) -> &EventLogClient {
        &self.client
    }

    pub fn assembler(&self) -> &Arc<EventRecordAssembler> {
        &self.assembler
    }

    /// Tail a channel as assembled records.
    ///
    /// Each record is stamped with the bookmark positioned on it. The
    /// bookmark only advances after a record assembled successfully.
    pub fn subscribe(&self, config: SubscriptionConfig) -> Result<Tail> {
        config.validate()?;
        self.reap();
        let start_bookmark = match &config.start {
            StartPosition::AfterBookmark(bookmark) => Some(bookmark),
            _ => None,
        };

        let tracker = BookmarkTracker::create(&self.client, start_bookmark)?;
        let state = Arc::new(TailState::new(start_bookmark.cloned()));
        let (sender, receiver) = bounded(config.buffer_size);
        let sink = TailSink::new(Arc::clone(&self.assembler), tracker, sender, Arc::clone(&state));

        let (id, resume) = self.open(&config, Arc::new(sink), Some(Arc::clone(&state)))?;
        Ok(Tail::new(id, config.channel, resume, receiver, state))
    }

    /// Route raw notifications for a channel to `sink`.
    pub fn subscribe_sink(
        &self,
        config: &SubscriptionConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<SubscriptionId> {
        config.validate()?;
        self.reap();
        self.open(config, sink, None).map(|(id, _)| id)
    }

    fn open(
        &self,
        config: &SubscriptionConfig,
        sink: Arc<dyn EventSink>,
        state: Option<Arc<TailState>>,
    ) -> Result<(SubscriptionId, ResumeOutcome)> {
        let channel = config.channel.as_str();
        let registry = bridge::registry();
        let context = registry.register(self.client.clone(), channel.to_string(), Arc::clone(&sink));

        let attempt = |start: SubscribeStart| {
            self.client
                .api()
                .open_subscription(channel, &config.query, start, context, bridge::dispatch)
        };

        let opened = match &config.start {
            StartPosition::FutureEvents => {
                attempt(SubscribeStart::FutureEvents).map(|raw| (raw, ResumeOutcome::Fresh))
            }
            StartPosition::OldestRecord => {
                attempt(SubscribeStart::OldestRecord).map(|raw| (raw, ResumeOutcome::Fresh))
            }
            StartPosition::AfterBookmark(bookmark) => {
                let seed = match BookmarkTracker::create(&self.client, Some(bookmark)) {
                    Ok(seed) => seed,
                    Err(e) => {
                        registry.release(context);
                        return Err(e);
                    }
                };
                let bookmark = seed.handle().raw();
                match attempt(SubscribeStart::AfterBookmark { bookmark, strict: true }) {
                    Err(NativeError::Status(StatusCode::NOT_FOUND)) => {
                        info!(channel, "bookmark position evicted, resuming at oldest retained record");
                        sink.on_error(TailError::TruncatedClamped {
                            channel: channel.to_string(),
                        });
                        attempt(SubscribeStart::AfterBookmark { bookmark, strict: false })
                            .map(|raw| (raw, ResumeOutcome::Clamped))
                    }
                    other => other.map(|raw| (raw, ResumeOutcome::Resumed)),
                }
            }
        };

        let (raw, resume) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                registry.release(context);
                return Err(TailError::native(e, format!("subscribe to '{}'", channel)));
            }
        };

        let id = SubscriptionId(context.0);
        let subscription = Arc::new(ActiveSubscription {
            context,
            channel: channel.to_string(),
            resume,
            handle: Mutex::new(Some(self.client.adopt(raw, HandleKind::Subscription))),
            cancelled: AtomicBool::new(false),
            sink,
            state,
        });
        self.subscriptions.write().insert(id, Arc::clone(&subscription));
        if let Some(state) = &subscription.state {
            state.set_on_kill(stop_on_kill(Arc::downgrade(&subscription), self.client.clone()));
        }
        debug!(channel, query = %config.query, context_id = context.0, ?resume, "subscribed");
        Ok((id, resume))
    }

    /// Close subscriptions whose [`Tail`] died. Their native side was
    /// already cancelled when they died.
    fn reap(&self) {
        let dead: Vec<SubscriptionId> = self
            .subscriptions
            .read()
            .iter()
            .filter(|(_, subscription)| subscription.is_dead())
            .map(|(id, _)| *id)
            .collect();
        for id in dead {
            debug!(subscription = id.0, "reaping dead subscription");
            if let Err(e) = self.close(id) {
                warn!(subscription = id.0, error = %e, "failed to close dead subscription");
            }
        }
    }

    /// Stop new deliveries. An in-flight callback completes normally.
    /// Unknown or already cancelled ids are a no-op.
    pub fn cancel(&self, id: SubscriptionId) -> Result<()> {
        self.reap();
        let subscription = self.subscriptions.read().get(&id).cloned();
        match subscription {
            Some(subscription) => subscription.cancel(&self.client),
            None => Ok(()),
        }
    }

    /// Cancel if needed, release the native subscription and unregister
    /// its sink. Waits for an in-flight callback. Unknown or already closed
    /// ids are a no-op.
    pub fn close(&self, id: SubscriptionId) -> Result<()> {
        let Some(subscription) = self.subscriptions.write().remove(&id) else {
            return Ok(());
        };

        let cancelled = subscription.cancel(&self.client);
        let handle = subscription.handle.lock().take();
        let closed = handle.map_or(Ok(()), OwnedHandle::close);
        bridge::registry().release(subscription.context);
        debug!(channel = %subscription.channel, context_id = subscription.context.0, "subscription closed");
        cancelled.and(closed)
    }

    /// Live subscriptions. Dead ones are released first.
    pub fn subscription_count(&self) -> usize {
        self.reap();
        self.subscriptions.read().len()
    }

    pub fn resume_outcome(&self, id: SubscriptionId) -> Option<ResumeOutcome> {
        self.reap();
        self.subscriptions.read().get(&id).map(|s| s.resume)
    }

    /// One-shot read of up to `limit` records through the same assembly
    /// path as live subscriptions. Per-record failures are returned in
    /// place.
    pub fn read_records(
        &self,
        channel: &str,
        query: &str,
        direction: QueryDirection,
        limit: usize,
    ) -> Result<Vec<Result<EventRecord>>> {
        self.reap();
        let mut results = EventQuery::open(&self.client, channel, query, direction)?;
        let mut records = Vec::new();
        while records.len() < limit {
            let batch_size = (limit - records.len()).min(READ_BATCH);
            let batch = results.next_batch(batch_size, Duration::ZERO)?;
            if batch.is_empty() {
                break;
            }
            records.extend(batch.iter().map(|event| self.assembler.process(event, channel)));
        }
        Ok(records)
    }
}

/// Kill hook for a [`Tail`]: stop native delivery as soon as the consumer
/// side dies.
fn stop_on_kill(
    subscription: Weak<ActiveSubscription>,
    client: EventLogClient,
) -> Box<dyn FnOnce() + Send> {
    Box::new(move || {
        let Some(subscription) = subscription.upgrade() else {
            return;
        };
        if let Err(e) = subscription.cancel(&client) {
            warn!(channel = %subscription.channel, error = %e, "failed to cancel dead subscription");
        }
    })
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        let ids: Vec<SubscriptionId> = self.subscriptions.read().keys().copied().collect();
        for id in ids {
            if let Err(e) = self.close(id) {
                warn!(subscription = id.0, error = %e, "failed to close subscription");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::memory::{MemoryEventLog, SyntheticEvent};
    use crate::subscriptions::{DropReason, TailEvent};

    fn setup() -> (Arc<MemoryEventLog>, SubscriptionManager) {
        let log = Arc::new(MemoryEventLog::new());
        log.create_channel("Application");
        let manager = SubscriptionManager::new(EventLogClient::new(log.clone())).unwrap();
        (log, manager)
    }

    #[test]
    fn test_subscribe_close() {
        let (_log, manager) = setup();
        let tail = manager
            .subscribe(SubscriptionConfig::channel("Application"))
            .unwrap();
        assert_eq!(manager.subscription_count(), 1);
        assert_eq!(tail.resume(), ResumeOutcome::Fresh);

        manager.close(tail.id).unwrap();
        assert_eq!(manager.subscription_count(), 0);
    }

    #[test]
    fn test_unknown_channel_fails_subscribe() {
        let (_log, manager) = setup();
        let result = manager.subscribe(SubscriptionConfig::channel("Missing"));
        assert!(matches!(result, Err(TailError::ResourceNotFound(_))));
        assert_eq!(manager.subscription_count(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (_log, manager) = setup();
        let result = manager.subscribe(SubscriptionConfig::channel("Application").with_buffer_size(0));
        assert!(matches!(result, Err(TailError::InvalidConfig(_))));
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let (log, manager) = setup();
        let tail = manager
            .subscribe(SubscriptionConfig::channel("Application").with_buffer_size(2))
            .unwrap();

        for id in 0..5 {
            log.append("Application", SyntheticEvent::new("p", id)).unwrap();
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !tail.is_dead() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(tail.is_dead());
        assert_eq!(tail.drop_reason(), Some(DropReason::BufferOverflow));

        let mut bookmarks = Vec::new();
        while let Ok(event) = tail.try_recv() {
            if let TailEvent::Record(record) = event {
                bookmarks.push(record.bookmark.clone());
            }
        }
        assert_eq!(bookmarks.len(), 2);
        assert_eq!(tail.last_bookmark(), bookmarks[1]);

        assert_eq!(manager.subscription_count(), 0);
        assert_eq!(log.handle_census().subscriptions, 0);
        assert_eq!(log.invalid_closes(), 0);
    }

    #[test]
    fn test_dropped_tail_is_reaped() {
        let (log, manager) = setup();
        let tail = manager.subscribe(SubscriptionConfig::channel("Application")).unwrap();
        let keep = manager.subscribe(SubscriptionConfig::channel("Application")).unwrap();
        assert_eq!(manager.subscription_count(), 2);

        drop(tail);
        log.append("Application", SyntheticEvent::new("p", 1)).unwrap();

        assert_eq!(manager.subscription_count(), 1);
        assert_eq!(log.handle_census().subscriptions, 1);
        assert!(matches!(
            keep.recv_timeout(Duration::from_secs(5)),
            Ok(TailEvent::Record(_))
        ));
    }

    #[test]
    fn test_cancel_drops_tail() {
        let (log, manager) = setup();
        let tail = manager.subscribe(SubscriptionConfig::channel("Application")).unwrap();

        manager.cancel(tail.id).unwrap();
        assert!(tail.is_dead());
        assert_eq!(tail.drop_reason(), Some(DropReason::Cancelled));
        assert!(matches!(
            tail.try_recv(),
            Ok(TailEvent::Dropped { reason: DropReason::Cancelled })
        ));

        log.append("Application", SyntheticEvent::new("p", 1)).unwrap();
        assert!(tail.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(manager.subscription_count(), 0);
    }

    #[test]
    fn test_drop_closes_everything() {
        let (log, manager) = setup();
        let _a = manager.subscribe(SubscriptionConfig::channel("Application")).unwrap();
        let _b = manager
            .subscribe(SubscriptionConfig::channel("Application").with_start(StartPosition::OldestRecord))
            .unwrap();
        drop(manager);
        assert_eq!(log.handle_census().subscriptions, 0);
    }
}
