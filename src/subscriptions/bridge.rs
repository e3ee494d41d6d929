//! Dispatch from the native callback to registered sinks.
//!
//! The native layer only carries a plain function pointer and an opaque
//! [`SinkContextId`]. [`dispatch`] is that function: it resolves the id in a
//! process-wide table and forwards to the sink. Ids are never reused, and
//! an entry is released only after its subscription was cancelled and
//! closed.

use crate::client::{EventLogClient, HandleKind, OwnedHandle};
use crate::error::TailError;
use crate::native::{EventLogApi, NotifyAction, SinkContextId};
use crate::types::{RawHandle, StatusCode};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{trace, warn};

/// Receiver of one subscription's notifications.
///
/// Native notifications for one subscription never overlap; calls for
/// different subscriptions may run concurrently. Implementations should
/// return promptly since a blocked call stalls that subscription.
///
/// Cancelling or closing a subscription reports
/// [`TailError::Cancelled`] once, from the cancelling thread. That call can
/// overlap a delivery still in flight, and a notification may still arrive
/// shortly after it.
pub trait EventSink: Send + Sync {
    /// A record was delivered. The sink owns `event`; dropping it releases
    /// the native handle.
    fn on_deliver(&self, event: OwnedHandle, channel: &str);

    /// The native layer reported a failure for this subscription.
    fn on_error(&self, error: TailError);
}

struct Registration {
    client: EventLogClient,
    channel: String,
    sink: Arc<dyn EventSink>,
    cancelled: AtomicBool,
}

pub(crate) struct SinkRegistry {
    sinks: RwLock<HashMap<SinkContextId, Arc<Registration>>>,
    next_id: AtomicU64,
}

static REGISTRY: OnceLock<SinkRegistry> = OnceLock::new();

pub(crate) fn registry() -> &'static SinkRegistry {
    REGISTRY.get_or_init(|| SinkRegistry {
        sinks: RwLock::new(HashMap::new()),
        next_id: AtomicU64::new(1),
    })
}

impl SinkRegistry {
    pub fn register(
        &self,
        client: EventLogClient,
        channel: String,
        sink: Arc<dyn EventSink>,
    ) -> SinkContextId {
        let id = SinkContextId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let registration = Arc::new(Registration {
            client,
            channel,
            sink,
            cancelled: AtomicBool::new(false),
        });
        self.sinks.write().insert(id, registration);
        id
    }

    /// Stop forwarding notifications for `id`.
    pub fn mark_cancelled(&self, id: SinkContextId) {
        if let Some(registration) = self.sinks.read().get(&id) {
            registration.cancelled.store(true, Ordering::SeqCst);
        }
    }

    pub fn release(&self, id: SinkContextId) -> bool {
        self.sinks.write().remove(&id).is_some()
    }

    fn lookup(&self, id: SinkContextId) -> Option<Arc<Registration>> {
        self.sinks.read().get(&id).cloned()
    }
}

/// The one callback handed to the native layer.
pub(crate) fn dispatch(
    api: &dyn EventLogApi,
    action: NotifyAction,
    context: SinkContextId,
    payload: RawHandle,
) -> u32 {
    let Some(registration) = registry().lookup(context) else {
        warn!(context_id = context.0, ?action, "notification for unknown subscription");
        if action == NotifyAction::Deliver {
            if let Err(err) = api.close(payload) {
                warn!(
                    context_id = context.0,
                    handle = ?payload,
                    error = %err,
                    "failed to release orphaned event"
                );
            }
        }
        return 0;
    };

    match action {
        NotifyAction::Deliver => {
            let event = registration.client.adopt(payload, HandleKind::Event);
            if registration.cancelled.load(Ordering::SeqCst) {
                trace!(context_id = context.0, "delivery after cancel released");
                return 0;
            }
            trace!(context_id = context.0, channel = %registration.channel, "deliver");
            guarded(context, || {
                registration.sink.on_deliver(event, &registration.channel)
            });
        }
        NotifyAction::Error => {
            if registration.cancelled.load(Ordering::SeqCst) {
                return 0;
            }
            let code = u32::try_from(payload.0).map_or(StatusCode(u32::MAX), StatusCode);
            let error = TailError::from_status(code, registration.channel.clone());
            trace!(context_id = context.0, %code, "error notification");
            guarded(context, || registration.sink.on_error(error));
        }
    }
    0
}

/// A panicking sink must not unwind into the native caller.
pub(crate) fn guarded(context: SinkContextId, call: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(call)) {
        warn!(
            context_id = context.0,
            panic = panic_message(payload.as_ref()),
            "sink panicked"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
