//! Two-phase rendering of event values.

use super::VariantArray;
use crate::client::{EventLogClient, HandleKind, OwnedHandle};
use crate::error::{Result, TailError};
use crate::native::{NativeError, RenderContextKind, RenderFlags};
use crate::types::SystemProperty;
use std::sync::Arc;

/// Immutable description of which fields a values render extracts.
///
/// Created once and shared read-only through an `Arc`; the native context
/// is released when the last decoder referencing it is dropped.
#[derive(Debug)]
pub struct RenderContext {
    handle: OwnedHandle,
    kind: RenderContextKind,
}

impl RenderContext {
    /// Context extracting the system properties in [`SystemProperty`] order.
    pub fn system(client: &EventLogClient) -> Result<Arc<Self>> {
        Self::create(client, RenderContextKind::System)
    }

    /// Context extracting the event's user data fields.
    pub fn user(client: &EventLogClient) -> Result<Arc<Self>> {
        Self::create(client, RenderContextKind::User)
    }

    fn create(client: &EventLogClient, kind: RenderContextKind) -> Result<Arc<Self>> {
        let raw = client
            .api()
            .create_render_context(kind)
            .map_err(|e| TailError::native(e, "create render context"))?;
        Ok(Arc::new(Self {
            handle: client.adopt(raw, HandleKind::RenderContext),
            kind,
        }))
    }

    pub fn kind(&self) -> RenderContextKind {
        self.kind
    }

    /// Number of slots every values render under this context produces,
    /// when it is known ahead of time.
    pub fn schema_len(&self) -> Option<usize> {
        match self.kind {
            RenderContextKind::System => Some(SystemProperty::COUNT),
            RenderContextKind::User => None,
        }
    }
}

/// Result of the sizing call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Probe {
    pub required: usize,
    pub property_count: u32,
}

/// Renders event handles into [`VariantArray`]s.
#[derive(Clone, Debug)]
pub struct VariantDecoder {
    client: EventLogClient,
    context: Arc<RenderContext>,
}

impl VariantDecoder {
    pub fn new(client: EventLogClient, context: Arc<RenderContext>) -> Self {
        Self { client, context }
    }

    pub fn context(&self) -> &Arc<RenderContext> {
        &self.context
    }

    /// Ask the renderer how large the values buffer must be.
    ///
    /// The too-small signal is the expected answer here.
    pub fn probe(&self, event: &OwnedHandle) -> Result<Probe> {
        let outcome = self.client.api().render(
            Some(self.context.handle.raw()),
            event.raw(),
            RenderFlags::EventValues,
            &mut [],
        );
        match outcome {
            Ok(size) => Ok(Probe {
                required: size.buffer_used,
                property_count: size.property_count,
            }),
            Err(NativeError::InsufficientBuffer {
                required,
                property_count,
            }) => Ok(Probe {
                required,
                property_count,
            }),
            Err(err) => Err(TailError::native(err, "probe event values")),
        }
    }

    /// Render into a caller buffer sized from [`probe`](Self::probe).
    pub fn decode_into(&self, event: &OwnedHandle, buffer: &mut [u8]) -> Result<(VariantArray, u32)> {
        let size = self
            .client
            .api()
            .render(
                Some(self.context.handle.raw()),
                event.raw(),
                RenderFlags::EventValues,
                buffer,
            )
            .map_err(|e| TailError::native(e, "render event values"))?;

        let used = size.buffer_used.min(buffer.len());
        let array = VariantArray::decode(&buffer[..used], size.property_count)?;
        Ok((array, size.property_count))
    }

    /// Probe, allocate exactly, render and decode.
    pub fn decode(&self, event: &OwnedHandle) -> Result<VariantArray> {
        let probe = self.probe(event)?;
        let mut buffer = vec![0u8; probe.required];

        let (array, property_count) = match self.decode_into(event, &mut buffer) {
            Err(TailError::TransientBufferTooSmall { required }) => {
                return Err(TailError::DecodeFault(format!(
                    "values render grew from {} to {} bytes after probing",
                    probe.required, required
                )))
            }
            other => other?,
        };

        if property_count != probe.property_count {
            return Err(TailError::DecodeFault(format!(
                "probe reported {} properties, render produced {}",
                probe.property_count, property_count
            )));
        }
        if let Some(expected) = self.context.schema_len() {
            if array.len() < expected {
                return Err(TailError::DecodeFault(format!(
                    "render produced {} properties, context requires {}",
                    array.len(),
                    expected
                )));
            }
        }
        Ok(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::memory::{MemoryEventLog, SyntheticEvent};
    use crate::native::QueryDirection;
    use crate::types::Sid;
    use crate::variant::Variant;
    use std::time::Duration;

    /// Append one event and return a handle to it.
    fn setup(event: SyntheticEvent) -> (Arc<MemoryEventLog>, EventLogClient, OwnedHandle) {
        let log = Arc::new(MemoryEventLog::new());
        log.create_channel("Application");
        log.append("Application", event).unwrap();
        let client = EventLogClient::new(log.clone());

        let raw = client
            .api()
            .open_query("Application", "*", QueryDirection::Forward)
            .unwrap();
        let results = client.adopt(raw, HandleKind::ResultSet);
        let raw = client
            .api()
            .pull_next(results.raw(), 1, Duration::ZERO)
            .unwrap()[0];
        let event = client.adopt(raw, HandleKind::Event);
        (log, client, event)
    }

    #[test]
    fn test_probe_then_decode_system_values() {
        let sid = Sid {
            revision: 1,
            authority: 5,
            sub_authorities: vec![18],
        };
        let (_log, client, event) = setup(
            SyntheticEvent::new("Service Control Manager", 7036)
                .level(4)
                .user(sid.clone()),
        );
        let decoder = VariantDecoder::new(client.clone(), RenderContext::system(&client).unwrap());

        let probe = decoder.probe(&event).unwrap();
        assert_eq!(probe.property_count as usize, SystemProperty::COUNT);
        assert!(probe.required > SystemProperty::COUNT * crate::variant::SLOT_SIZE);

        let values = decoder.decode(&event).unwrap();
        assert_eq!(values.len(), probe.property_count as usize);
        assert_eq!(
            values.string(SystemProperty::ProviderName.ordinal()).unwrap(),
            "Service Control Manager"
        );
        assert_eq!(values.uint(SystemProperty::EventId.ordinal()).unwrap(), 7036);
        assert_eq!(values.uint(SystemProperty::EventRecordId.ordinal()).unwrap(), 1);
        assert_eq!(values.sid(SystemProperty::UserId.ordinal()).unwrap(), &sid);
        assert_eq!(values.system(SystemProperty::ActivityId).unwrap(), &Variant::Null);
    }

    #[test]
    fn test_decode_user_values() {
        let (_log, client, event) =
            setup(SyntheticEvent::new("p", 1).data(["first", "second"]));
        let decoder = VariantDecoder::new(client.clone(), RenderContext::user(&client).unwrap());
        assert_eq!(decoder.context().schema_len(), None);

        let values = decoder.decode(&event).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values.string(1).unwrap(), "second");
    }

    #[test]
    fn test_out_of_bounds_pointer_is_decode_fault() {
        let (_log, client, event) = setup(SyntheticEvent::new("p", 1).with_corrupt_values());
        let decoder = VariantDecoder::new(client.clone(), RenderContext::system(&client).unwrap());

        assert!(matches!(
            decoder.decode(&event),
            Err(TailError::DecodeFault(_))
        ));
    }
}
