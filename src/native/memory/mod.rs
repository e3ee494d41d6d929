//! In-process event log service.
//!
//! [`MemoryEventLog`] implements [`EventLogApi`] over named in-memory
//! channels. It keeps the native contract intact: handles must be closed,
//! render and format calls use the two-phase sizing protocol, and
//! subscription callbacks run on a separate thread per subscription.
//! Test and simulation helpers let callers append records, register
//! publisher metadata, evict old records and inject error notifications.

mod delivery;
mod model;

pub use model::{PublisherMetadata, SyntheticEvent};

use self::delivery::{Notification, SimSubscription};
use self::model::{BookmarkState, QueryFilter, StoredRecord};
use crate::native::{
    EventLogApi, FormatFlags, NativeError, NativeResult, NotifyCallback, QueryDirection,
    RenderContextKind, RenderFlags, RenderSize, SinkContextId, SubscribeStart,
};
use crate::types::{Filetime, RawHandle, StatusCode};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::iter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub(crate) enum HandleObject {
    Subscription(Arc<SimSubscription>),
    Query {
        records: VecDeque<Arc<StoredRecord>>,
        cancelled: bool,
    },
    Event(Arc<StoredRecord>),
    RenderContext(RenderContextKind),
    Publisher(Arc<PublisherMetadata>),
    Bookmark(BookmarkState),
}

struct ChannelLog {
    records: VecDeque<Arc<StoredRecord>>,
    next_record_id: u64,
    max_records: Option<usize>,
    subscriptions: Vec<Arc<SimSubscription>>,
}

impl ChannelLog {
    fn new() -> Self {
        Self {
            records: VecDeque::new(),
            next_record_id: 1,
            max_records: None,
            subscriptions: Vec::new(),
        }
    }

    /// Id of the oldest record still retrievable, or the next id to be
    /// written when the channel is empty.
    fn oldest_available(&self) -> u64 {
        self.records
            .front()
            .map_or(self.next_record_id, |r| r.record_id)
    }

    fn enforce_retention(&mut self) -> usize {
        let Some(max) = self.max_records else {
            return 0;
        };
        let excess = self.records.len().saturating_sub(max);
        self.records.drain(..excess);
        excess
    }
}

#[derive(Default)]
struct State {
    channels: HashMap<String, ChannelLog>,
    denied: HashSet<String>,
    publishers: HashMap<String, Arc<PublisherMetadata>>,
    handles: HashMap<RawHandle, HandleObject>,
}

impl State {
    fn channel(&self, name: &str) -> NativeResult<&ChannelLog> {
        if self.denied.contains(name) {
            return Err(StatusCode::ACCESS_DENIED.into());
        }
        self.channels
            .get(name)
            .ok_or(StatusCode::EVT_CHANNEL_NOT_FOUND.into())
    }

    fn channel_mut(&mut self, name: &str) -> NativeResult<&mut ChannelLog> {
        self.channels
            .get_mut(name)
            .ok_or(StatusCode::EVT_CHANNEL_NOT_FOUND.into())
    }

    fn event(&self, handle: RawHandle) -> NativeResult<Arc<StoredRecord>> {
        match self.handles.get(&handle) {
            Some(HandleObject::Event(record)) => Ok(Arc::clone(record)),
            _ => Err(StatusCode::INVALID_HANDLE.into()),
        }
    }
}

pub(crate) struct Shared {
    state: Mutex<State>,
    next_handle: AtomicU64,
    invalid_closes: AtomicU64,
}

impl Shared {
    fn allocate(&self) -> RawHandle {
        RawHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register(&self, object: HandleObject) -> RawHandle {
        let handle = self.allocate();
        self.state.lock().handles.insert(handle, object);
        handle
    }
}

/// Open native handles by kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandleCensus {
    pub subscriptions: usize,
    pub queries: usize,
    pub events: usize,
    pub render_contexts: usize,
    pub publishers: usize,
    pub bookmarks: usize,
}

impl HandleCensus {
    pub fn total(&self) -> usize {
        self.subscriptions
            + self.queries
            + self.events
            + self.render_contexts
            + self.publishers
            + self.bookmarks
    }
}

/// In-memory event log service.
#[derive(Clone)]
pub struct MemoryEventLog {
    shared: Arc<Shared>,
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                next_handle: AtomicU64::new(0x100),
                invalid_closes: AtomicU64::new(0),
            }),
        }
    }

    /// Create an empty channel. Existing channels are left untouched.
    pub fn create_channel(&self, name: &str) {
        self.shared
            .state
            .lock()
            .channels
            .entry(name.to_string())
            .or_insert_with(ChannelLog::new);
    }

    /// Keep at most `max_records` records, evicting the oldest.
    pub fn set_retention(&self, channel: &str, max_records: Option<usize>) -> NativeResult<usize> {
        let mut state = self.shared.state.lock();
        let log = state.channel_mut(channel)?;
        log.max_records = max_records;
        Ok(log.enforce_retention())
    }

    /// Deny every open on `channel` with `ACCESS_DENIED`.
    pub fn deny_access(&self, channel: &str) {
        self.shared.state.lock().denied.insert(channel.to_string());
    }

    pub fn register_publisher(&self, metadata: PublisherMetadata) {
        self.shared
            .state
            .lock()
            .publishers
            .insert(metadata.name.clone(), Arc::new(metadata));
    }

    /// Append a record and notify matching subscriptions. Returns the
    /// record id.
    pub fn append(&self, channel: &str, event: SyntheticEvent) -> NativeResult<u64> {
        let mut state = self.shared.state.lock();
        let log = state.channel_mut(channel)?;

        let record_id = log.next_record_id;
        log.next_record_id += 1;
        let record = Arc::new(StoredRecord {
            record_id,
            channel: channel.to_string(),
            created: event.time_created.unwrap_or_else(Filetime::now),
            event,
        });
        log.records.push_back(Arc::clone(&record));
        log.enforce_retention();

        for sub in &log.subscriptions {
            if sub.filter.matches(&record) {
                sub.notify(Notification::Deliver(Arc::clone(&record)));
            }
        }
        Ok(record_id)
    }

    /// Queue an error notification on every live subscription of
    /// `channel`. Returns how many were notified.
    pub fn inject_error(&self, channel: &str, code: StatusCode) -> NativeResult<usize> {
        let state = self.shared.state.lock();
        let log = state
            .channels
            .get(channel)
            .ok_or(StatusCode::EVT_CHANNEL_NOT_FOUND)?;
        let mut notified = 0;
        for sub in log.subscriptions.iter().filter(|s| !s.is_cancelled()) {
            sub.notify(Notification::Error(code));
            notified += 1;
        }
        Ok(notified)
    }

    /// Evict every record with an id below `record_id`.
    pub fn truncate_before(&self, channel: &str, record_id: u64) -> NativeResult<usize> {
        let mut state = self.shared.state.lock();
        let log = state.channel_mut(channel)?;
        let keep_from = log
            .records
            .iter()
            .position(|r| r.record_id >= record_id)
            .unwrap_or(log.records.len());
        log.records.drain(..keep_from);
        debug!(channel, record_id, evicted = keep_from, "channel truncated");
        Ok(keep_from)
    }

    /// Evict every record. Record ids keep increasing.
    pub fn clear(&self, channel: &str) -> NativeResult<usize> {
        let mut state = self.shared.state.lock();
        let log = state.channel_mut(channel)?;
        let evicted = log.records.len();
        log.records.clear();
        Ok(evicted)
    }

    pub fn record_count(&self, channel: &str) -> NativeResult<usize> {
        let state = self.shared.state.lock();
        state
            .channels
            .get(channel)
            .map(|log| log.records.len())
            .ok_or(StatusCode::EVT_CHANNEL_NOT_FOUND.into())
    }

    pub fn handle_census(&self) -> HandleCensus {
        let state = self.shared.state.lock();
        let mut census = HandleCensus::default();
        for object in state.handles.values() {
            match object {
                HandleObject::Subscription(_) => census.subscriptions += 1,
                HandleObject::Query { .. } => census.queries += 1,
                HandleObject::Event(_) => census.events += 1,
                HandleObject::RenderContext(_) => census.render_contexts += 1,
                HandleObject::Publisher(_) => census.publishers += 1,
                HandleObject::Bookmark(_) => census.bookmarks += 1,
            }
        }
        census
    }

    /// Number of close calls made on handles that were not open.
    pub fn invalid_closes(&self) -> u64 {
        self.shared.invalid_closes.load(Ordering::Relaxed)
    }

    fn resolve_start(
        state: &State,
        log: &ChannelLog,
        channel: &str,
        start: SubscribeStart,
    ) -> NativeResult<Option<u64>> {
        let (bookmark, strict) = match start {
            SubscribeStart::FutureEvents => return Ok(None),
            SubscribeStart::OldestRecord => return Ok(Some(0)),
            SubscribeStart::AfterBookmark { bookmark, strict } => (bookmark, strict),
        };
        let position = match state.handles.get(&bookmark) {
            Some(HandleObject::Bookmark(position)) => position,
            _ => return Err(StatusCode::INVALID_HANDLE.into()),
        };

        let oldest = log.oldest_available();
        let next = match (&position.channel, position.record_id) {
            (Some(c), Some(id)) if c == channel => Some(id + 1),
            _ => None,
        };
        match next {
            Some(next) if next >= oldest => Ok(Some(next)),
            _ if strict => Err(StatusCode::NOT_FOUND.into()),
            _ => {
                debug!(channel, oldest, "bookmark position evicted, starting at oldest record");
                Ok(Some(oldest))
            }
        }
    }
}

fn write_text(text: &str, buffer: &mut [u8]) -> NativeResult<RenderSize> {
    let bytes: Vec<u8> = text
        .encode_utf16()
        .chain(iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect();
    if buffer.len() < bytes.len() {
        return Err(NativeError::InsufficientBuffer {
            required: bytes.len(),
            property_count: 0,
        });
    }
    buffer[..bytes.len()].copy_from_slice(&bytes);
    Ok(RenderSize {
        buffer_used: bytes.len(),
        property_count: 0,
    })
}

/// Point the first slot's value past the end of the buffer.
fn corrupt_first_slot(buffer: &mut [u8]) {
    if buffer.len() < 8 {
        return;
    }
    let bogus = (buffer.as_ptr() as u64)
        .wrapping_add(buffer.len() as u64)
        .wrapping_add(4096);
    buffer[..8].copy_from_slice(&bogus.to_le_bytes());
}

impl EventLogApi for MemoryEventLog {
    fn open_subscription(
        &self,
        channel: &str,
        query: &str,
        start: SubscribeStart,
        context: SinkContextId,
        callback: NotifyCallback,
    ) -> NativeResult<RawHandle> {
        let filter = QueryFilter::parse(query)?;
        let mut state = self.shared.state.lock();

        let log = state.channel(channel)?;
        let backlog: Vec<_> = match Self::resolve_start(&state, log, channel, start)? {
            None => Vec::new(),
            Some(from) => log
                .records
                .iter()
                .filter(|r| r.record_id >= from && filter.matches(r))
                .cloned()
                .collect(),
        };

        let sub = SimSubscription::start(
            Arc::downgrade(&self.shared),
            channel.to_string(),
            filter,
            context,
            callback,
            backlog,
        );
        let handle = self.shared.allocate();
        state.channel_mut(channel)?.subscriptions.push(Arc::clone(&sub));
        state.handles.insert(handle, HandleObject::Subscription(sub));
        debug!(channel, query, ?start, ?handle, "subscription opened");
        Ok(handle)
    }

    fn open_query(
        &self,
        channel: &str,
        query: &str,
        direction: QueryDirection,
    ) -> NativeResult<RawHandle> {
        let filter = QueryFilter::parse(query)?;
        let mut state = self.shared.state.lock();
        let mut records: VecDeque<_> = state
            .channel(channel)?
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        if direction == QueryDirection::Reverse {
            records.make_contiguous().reverse();
        }
        let handle = self.shared.allocate();
        state.handles.insert(
            handle,
            HandleObject::Query {
                records,
                cancelled: false,
            },
        );
        Ok(handle)
    }

    fn pull_next(
        &self,
        result_set: RawHandle,
        batch_size: usize,
        _timeout: Duration,
    ) -> NativeResult<Vec<RawHandle>> {
        if batch_size == 0 {
            return Err(StatusCode::INVALID_PARAMETER.into());
        }
        let mut state = self.shared.state.lock();
        let batch: Vec<_> = match state.handles.get_mut(&result_set) {
            Some(HandleObject::Query { cancelled: true, .. }) => {
                return Err(StatusCode::CANCELLED.into())
            }
            Some(HandleObject::Query { records, .. }) => {
                let take = batch_size.min(records.len());
                records.drain(..take).collect()
            }
            _ => return Err(StatusCode::INVALID_HANDLE.into()),
        };
        if batch.is_empty() {
            return Err(StatusCode::NO_MORE_ITEMS.into());
        }
        Ok(batch
            .into_iter()
            .map(|record| {
                let handle = self.shared.allocate();
                state.handles.insert(handle, HandleObject::Event(record));
                handle
            })
            .collect())
    }

    fn create_render_context(&self, kind: RenderContextKind) -> NativeResult<RawHandle> {
        Ok(self.shared.register(HandleObject::RenderContext(kind)))
    }

    fn render(
        &self,
        context: Option<RawHandle>,
        fragment: RawHandle,
        flags: RenderFlags,
        buffer: &mut [u8],
    ) -> NativeResult<RenderSize> {
        let state = self.shared.state.lock();
        match flags {
            RenderFlags::EventValues => {
                let context = context.ok_or(StatusCode::INVALID_PARAMETER)?;
                let kind = match state.handles.get(&context) {
                    Some(HandleObject::RenderContext(kind)) => *kind,
                    _ => return Err(StatusCode::INVALID_HANDLE.into()),
                };
                let record = state.event(fragment)?;
                drop(state);

                let values = match kind {
                    RenderContextKind::System => record.system_values(),
                    RenderContextKind::User => record.user_values(),
                };
                let size = values.write(buffer)?;
                if record.event.corrupt_values {
                    corrupt_first_slot(buffer);
                }
                Ok(size)
            }
            RenderFlags::EventXml => {
                let record = state.event(fragment)?;
                drop(state);
                let xml = record
                    .to_xml()
                    .map_err(|_| NativeError::Status(StatusCode::INVALID_DATA))?;
                write_text(&xml, buffer)
            }
            RenderFlags::Bookmark => match state.handles.get(&fragment) {
                Some(HandleObject::Bookmark(position)) => write_text(&position.to_xml(), buffer),
                _ => Err(StatusCode::INVALID_HANDLE.into()),
            },
        }
    }

    fn open_publisher_metadata(&self, provider: &str) -> NativeResult<RawHandle> {
        let metadata = self
            .shared
            .state
            .lock()
            .publishers
            .get(provider)
            .cloned()
            .ok_or(StatusCode::EVT_PUBLISHER_METADATA_NOT_FOUND)?;
        Ok(self.shared.register(HandleObject::Publisher(metadata)))
    }

    fn format_message(
        &self,
        publisher: RawHandle,
        event: RawHandle,
        flags: FormatFlags,
        buffer: &mut [u16],
    ) -> NativeResult<usize> {
        let (metadata, record) = {
            let state = self.shared.state.lock();
            let metadata = match state.handles.get(&publisher) {
                Some(HandleObject::Publisher(metadata)) => Arc::clone(metadata),
                _ => return Err(StatusCode::INVALID_HANDLE.into()),
            };
            (metadata, state.event(event)?)
        };

        let text = metadata.format(&record, flags)?;
        let units: Vec<u16> = text.encode_utf16().chain(iter::once(0)).collect();
        if buffer.len() < units.len() {
            return Err(NativeError::InsufficientBuffer {
                required: units.len(),
                property_count: 0,
            });
        }
        buffer[..units.len()].copy_from_slice(&units);
        Ok(units.len())
    }

    fn create_bookmark(&self, xml: Option<&str>) -> NativeResult<RawHandle> {
        let position = match xml {
            Some(xml) => BookmarkState::parse(xml)?,
            None => BookmarkState::default(),
        };
        Ok(self.shared.register(HandleObject::Bookmark(position)))
    }

    fn update_bookmark(&self, bookmark: RawHandle, event: RawHandle) -> NativeResult<()> {
        let mut state = self.shared.state.lock();
        let record = state.event(event)?;
        match state.handles.get_mut(&bookmark) {
            Some(HandleObject::Bookmark(position)) => {
                position.channel = Some(record.channel.clone());
                position.record_id = Some(record.record_id);
                Ok(())
            }
            _ => Err(StatusCode::INVALID_HANDLE.into()),
        }
    }

    fn cancel(&self, handle: RawHandle) -> NativeResult<()> {
        let mut state = self.shared.state.lock();
        match state.handles.get_mut(&handle) {
            Some(HandleObject::Subscription(sub)) => {
                sub.cancel();
                Ok(())
            }
            Some(HandleObject::Query { cancelled, .. }) => {
                *cancelled = true;
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(StatusCode::INVALID_HANDLE.into()),
        }
    }

    fn close(&self, handle: RawHandle) -> NativeResult<()> {
        let removed = {
            let mut state = self.shared.state.lock();
            let removed = state.handles.remove(&handle);
            if let Some(HandleObject::Subscription(sub)) = &removed {
                if let Some(log) = state.channels.get_mut(&sub.channel) {
                    log.subscriptions.retain(|s| !Arc::ptr_eq(s, sub));
                }
            }
            removed
        };

        match removed {
            None => {
                self.shared.invalid_closes.fetch_add(1, Ordering::Relaxed);
                Err(StatusCode::INVALID_HANDLE.into())
            }
            Some(HandleObject::Subscription(sub)) => {
                sub.shutdown();
                debug!(?handle, channel = %sub.channel, "subscription closed");
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }
}
