//! Explicit client over the native capability surface.
//!
//! One [`EventLogClient`] is built at startup and cloned into every
//! component that needs native access. Handles obtained through it are
//! wrapped in [`OwnedHandle`], which releases them exactly once on drop.

use crate::error::{Result, TailError};
use crate::native::{
    EventLogApi, FormatFlags, NativeError, NativeResult, RenderFlags, RenderSize,
};
use crate::types::RawHandle;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// What an owned handle refers to. Used for diagnostics only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleKind {
    Event,
    Subscription,
    ResultSet,
    RenderContext,
    Publisher,
    Bookmark,
}

/// Shared access to the native event log service.
#[derive(Clone)]
pub struct EventLogClient {
    api: Arc<dyn EventLogApi>,
}

impl EventLogClient {
    pub fn new(api: Arc<dyn EventLogApi>) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &dyn EventLogApi {
        self.api.as_ref()
    }

    /// Take ownership of a raw handle.
    pub fn adopt(&self, raw: RawHandle, kind: HandleKind) -> OwnedHandle {
        OwnedHandle {
            client: self.clone(),
            raw,
            kind,
        }
    }

    /// Render an event as XML text.
    pub fn render_xml(&self, event: &OwnedHandle) -> Result<String> {
        let (buffer, size) = sized_call("render event xml", |buf: &mut [u8]| {
            self.api.render(None, event.raw(), RenderFlags::EventXml, buf)
        })?;
        utf16_bytes_to_string(&buffer[..size.buffer_used.min(buffer.len())])
    }

    /// Render a bookmark handle as XML text.
    pub fn render_bookmark(&self, bookmark: &OwnedHandle) -> Result<String> {
        let (buffer, size): (Vec<u8>, RenderSize) =
            sized_call("render bookmark", |buf: &mut [u8]| {
                self.api.render(None, bookmark.raw(), RenderFlags::Bookmark, buf)
            })?;
        utf16_bytes_to_string(&buffer[..size.buffer_used.min(buffer.len())])
    }

    /// Format one display string for an event.
    ///
    /// Keyword lists arrive as consecutive NUL-terminated strings and are
    /// joined with `", "`.
    pub fn format_message(
        &self,
        publisher: &OwnedHandle,
        event: &OwnedHandle,
        flags: FormatFlags,
    ) -> Result<String> {
        let (buffer, used) = sized_call("format message", |buf: &mut [u16]| {
            self.api
                .format_message(publisher.raw(), event.raw(), flags, buf)
        })?;
        let units = &buffer[..used.min(buffer.len())];
        let parts = units
            .split(|u| *u == 0)
            .filter(|part| !part.is_empty())
            .map(String::from_utf16)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| TailError::DecodeFault("message is not valid UTF-16".into()))?;
        Ok(parts.join(", "))
    }
}

impl fmt::Debug for EventLogClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLogClient").finish_non_exhaustive()
    }
}

/// A native handle released exactly once, on drop or via [`OwnedHandle::close`].
pub struct OwnedHandle {
    client: EventLogClient,
    raw: RawHandle,
    kind: HandleKind,
}

impl OwnedHandle {
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Close now and report the outcome.
    pub fn close(mut self) -> Result<()> {
        let raw = std::mem::take(&mut self.raw);
        if raw.is_null() {
            return Ok(());
        }
        self.client
            .api
            .close(raw)
            .map_err(|e| TailError::native(e, format!("close {:?}", self.kind)))
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if self.raw.is_null() {
            return;
        }
        if let Err(err) = self.client.api.close(self.raw) {
            warn!(handle = ?self.raw, kind = ?self.kind, error = %err, "failed to release native handle");
        }
    }
}

impl fmt::Debug for OwnedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnedHandle({:?}, {:?})", self.kind, self.raw)
    }
}

/// Two-phase sized call: probe with an empty buffer, then call again with
/// exactly the reported size.
///
/// A too-small report from the probe is the sizing mechanism and is never
/// surfaced. A second too-small report means the output changed between
/// the two calls.
pub(crate) fn sized_call<T, R>(
    what: &str,
    mut call: impl FnMut(&mut [T]) -> NativeResult<R>,
) -> Result<(Vec<T>, R)>
where
    T: Copy + Default,
{
    let required = match call(&mut [][..]) {
        Ok(result) => return Ok((Vec::new(), result)),
        Err(NativeError::InsufficientBuffer { required, .. }) => required,
        Err(err) => return Err(TailError::native(err, what)),
    };

    let mut buffer = vec![T::default(); required];
    match call(&mut buffer) {
        Ok(result) => Ok((buffer, result)),
        Err(NativeError::InsufficientBuffer { required: again, .. }) => {
            Err(TailError::DecodeFault(format!(
                "{}: size changed from {} to {} between probe and render",
                what, required, again
            )))
        }
        Err(err) => Err(TailError::native(err, what)),
    }
}

/// Decode NUL-terminated little-endian UTF-16 bytes.
pub(crate) fn utf16_bytes_to_string(bytes: &[u8]) -> Result<String> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|unit| *unit != 0)
        .collect();
    String::from_utf16(&units).map_err(|_| TailError::DecodeFault("text is not valid UTF-16".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StatusCode;

    #[test]
    fn test_sized_call_probes_then_fills() {
        let text: Vec<u16> = "hello\0".encode_utf16().collect();
        let mut calls = 0;
        let (buffer, used) = sized_call("test", |buf: &mut [u16]| {
            calls += 1;
            if buf.len() < text.len() {
                return Err(NativeError::InsufficientBuffer {
                    required: text.len(),
                    property_count: 0,
                });
            }
            buf[..text.len()].copy_from_slice(&text);
            Ok(text.len())
        })
        .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(buffer.len(), 6);
        assert_eq!(used, 6);
    }

    #[test]
    fn test_sized_call_empty_output() {
        let (buffer, used) = sized_call("test", |_buf: &mut [u8]| Ok(0usize)).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(used, 0);
    }

    #[test]
    fn test_sized_call_growing_output_is_decode_fault() {
        let mut size = 4;
        let result = sized_call("test", |_buf: &mut [u8]| -> NativeResult<usize> {
            size *= 2;
            Err(NativeError::InsufficientBuffer {
                required: size,
                property_count: 0,
            })
        });
        assert!(matches!(result, Err(TailError::DecodeFault(_))));
    }

    #[test]
    fn test_sized_call_maps_status() {
        let result = sized_call("test", |_buf: &mut [u8]| -> NativeResult<usize> {
            Err(NativeError::Status(StatusCode::ACCESS_DENIED))
        });
        assert!(matches!(result, Err(TailError::AccessDenied(_))));
    }

    #[test]
    fn test_utf16_bytes_stop_at_terminator() {
        let bytes = [b'o', 0, b'k', 0, 0, 0, b'x', 0];
        assert_eq!(utf16_bytes_to_string(&bytes).unwrap(), "ok");
    }
}
