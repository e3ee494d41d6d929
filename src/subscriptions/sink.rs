//! The assembling sink behind [`Tail`](super::Tail).

use super::bridge::EventSink;
use super::types::{DropReason, TailEvent, TailState};
use crate::bookmark::BookmarkTracker;
use crate::client::OwnedHandle;
use crate::error::TailError;
use crate::record::EventRecordAssembler;
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Assembles delivered events into records and forwards them over a
/// bounded channel. A full channel drops the subscription.
///
/// Sends and the terminal `Dropped` event are ordered by `order`, so no
/// record follows `Dropped` even when cancellation arrives from another
/// thread.
pub(crate) struct TailSink {
    assembler: Arc<EventRecordAssembler>,
    tracker: Mutex<BookmarkTracker>,
    sender: Sender<TailEvent>,
    state: Arc<TailState>,
    order: Mutex<()>,
}

impl TailSink {
    pub fn new(
        assembler: Arc<EventRecordAssembler>,
        tracker: BookmarkTracker,
        sender: Sender<TailEvent>,
        state: Arc<TailState>,
    ) -> Self {
        Self {
            assembler,
            tracker: Mutex::new(tracker),
            sender,
            state,
            order: Mutex::new(()),
        }
    }

    fn send(&self, event: TailEvent) -> bool {
        let _order = self.order.lock();
        self.send_ordered(event)
    }

    /// Caller holds `order`.
    fn send_ordered(&self, event: TailEvent) -> bool {
        if self.state.is_dead() {
            return false;
        }
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(capacity = ?self.sender.capacity(), "tail buffer full, dropping subscription");
                self.terminate(DropReason::BufferOverflow);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.state.kill(DropReason::Disconnected);
                false
            }
        }
    }

    fn drop_with(&self, reason: DropReason) {
        let _order = self.order.lock();
        self.terminate(reason);
    }

    /// Caller holds `order`.
    fn terminate(&self, reason: DropReason) {
        if self.state.kill(reason.clone()) {
            // Best effort; the buffer may be the reason we are here.
            let _ = self.sender.try_send(TailEvent::Dropped { reason });
        }
    }

    fn fail(&self, error: TailError) {
        let reason = DropReason::Failed(error.to_string());
        let _order = self.order.lock();
        if self.send_ordered(TailEvent::Failed(error)) {
            self.terminate(reason);
        }
    }
}

impl EventSink for TailSink {
    fn on_deliver(&self, event: OwnedHandle, channel: &str) {
        if self.state.is_dead() {
            return;
        }

        let record = match self.assembler.process(&event, channel) {
            Ok(record) => record,
            Err(error) => {
                debug!(channel, error = %error, "record failed");
                self.send(TailEvent::RecordFailed { error });
                return;
            }
        };

        let order = self.order.lock();
        if self.state.is_dead() {
            return;
        }
        let bookmark = match self.tracker.lock().advance(&event) {
            Ok(bookmark) => bookmark,
            Err(error) => {
                drop(order);
                return self.fail(error);
            }
        };
        let previous = self.state.replace_bookmark(Some(bookmark.clone()));
        if !self.send_ordered(TailEvent::Record(Box::new(record.with_bookmark(bookmark)))) {
            self.state.replace_bookmark(previous);
        }
    }

    fn on_error(&self, error: TailError) {
        if self.state.is_dead() {
            return;
        }
        match error {
            TailError::Cancelled => self.drop_with(DropReason::Cancelled),
            error if error.is_informational() => {
                self.send(TailEvent::Notice(error));
            }
            error if error.is_fatal() => self.fail(error),
            error => {
                self.send(TailEvent::Error(error));
            }
        }
    }
}
