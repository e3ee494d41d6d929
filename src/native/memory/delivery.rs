//! Per-subscription delivery threads.

use super::model::{QueryFilter, StoredRecord};
use super::{HandleObject, MemoryEventLog, Shared};
use crate::native::{NotifyAction, NotifyCallback, SinkContextId};
use crate::types::{RawHandle, StatusCode};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::trace;

pub(crate) enum Notification {
    Deliver(Arc<StoredRecord>),
    Error(StatusCode),
}

/// A live subscription. Notifications are queued without bound and handed
/// to the callback one at a time on a dedicated thread.
pub(crate) struct SimSubscription {
    pub channel: String,
    pub filter: QueryFilter,
    context: SinkContextId,
    callback: NotifyCallback,
    sender: Mutex<Option<Sender<Notification>>>,
    cancelled: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimSubscription {
    pub fn start(
        shared: Weak<Shared>,
        channel: String,
        filter: QueryFilter,
        context: SinkContextId,
        callback: NotifyCallback,
        backlog: Vec<Arc<StoredRecord>>,
    ) -> Arc<Self> {
        let (sender, receiver) = unbounded();
        for record in backlog {
            let _ = sender.send(Notification::Deliver(record));
        }

        let sub = Arc::new(Self {
            channel,
            filter,
            context,
            callback,
            sender: Mutex::new(Some(sender)),
            cancelled: AtomicBool::new(false),
            worker: Mutex::new(None),
        });

        let worker_sub = Arc::clone(&sub);
        let worker = thread::Builder::new()
            .name(format!("evtlog-sub-{}", context.0))
            .spawn(move || run(worker_sub, shared, receiver));
        match worker {
            Ok(handle) => *sub.worker.lock() = Some(handle),
            Err(err) => {
                tracing::error!(error = %err, "failed to spawn delivery thread");
                sub.cancel();
            }
        }
        sub
    }

    pub fn notify(&self, notification: Notification) {
        if self.is_cancelled() {
            return;
        }
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(notification);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Stop delivering. Queued notifications are discarded.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.sender.lock().take();
    }

    /// Cancel, then wait for an in-flight callback to return. When called
    /// from the delivery thread itself the wait is skipped.
    pub fn shutdown(&self) {
        self.cancel();
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            return;
        }
        let _ = worker.join();
    }
}

fn run(sub: Arc<SimSubscription>, shared: Weak<Shared>, receiver: Receiver<Notification>) {
    for notification in receiver.iter() {
        if sub.is_cancelled() {
            break;
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let api = MemoryEventLog { shared };
        match notification {
            Notification::Deliver(record) => {
                let handle = api.shared.register(HandleObject::Event(record));
                trace!(?handle, channel = %sub.channel, "delivering event");
                (sub.callback)(&api, NotifyAction::Deliver, sub.context, handle);
            }
            Notification::Error(code) => {
                let status = RawHandle(u64::from(code.0));
                (sub.callback)(&api, NotifyAction::Error, sub.context, status);
            }
        }
    }
}
