//! Resumable position markers.
//!
//! A [`Bookmark`] is the serialized form of a native bookmark: an opaque XML
//! string naming the last processed record of a channel. A
//! [`BookmarkTracker`] owns the live native bookmark for one subscription and
//! is advanced only after a record has been fully assembled.

mod store;

pub use store::FileBookmarkStore;

use crate::client::{EventLogClient, HandleKind, OwnedHandle};
use crate::error::{Result, TailError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Serialized, immutable position marker.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bookmark(String);

impl Bookmark {
    pub fn from_xml(xml: impl Into<String>) -> Self {
        Bookmark(xml.into())
    }

    pub fn as_xml(&self) -> &str {
        &self.0
    }

    pub fn into_xml(self) -> String {
        self.0
    }
}

impl fmt::Debug for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bookmark({})", self.0.trim())
    }
}

impl fmt::Display for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Live native bookmark for one subscription.
pub struct BookmarkTracker {
    client: EventLogClient,
    handle: OwnedHandle,
    current: Option<Bookmark>,
}

impl BookmarkTracker {
    /// Create a tracker, optionally seeded from a serialized bookmark.
    pub fn create(client: &EventLogClient, from: Option<&Bookmark>) -> Result<Self> {
        let raw = client
            .api()
            .create_bookmark(from.map(Bookmark::as_xml))
            .map_err(|e| TailError::native(e, "create bookmark"))?;
        Ok(Self {
            client: client.clone(),
            handle: client.adopt(raw, HandleKind::Bookmark),
            current: from.cloned(),
        })
    }

    /// Reposition to reference `event` and return the new serialized form.
    pub fn advance(&mut self, event: &OwnedHandle) -> Result<Bookmark> {
        self.client
            .api()
            .update_bookmark(self.handle.raw(), event.raw())
            .map_err(|e| TailError::native(e, "update bookmark"))?;
        let bookmark = self.serialize()?;
        self.current = Some(bookmark.clone());
        Ok(bookmark)
    }

    /// Serialize the native bookmark as it stands now.
    pub fn serialize(&self) -> Result<Bookmark> {
        self.client.render_bookmark(&self.handle).map(Bookmark)
    }

    /// The last serialized position, if any.
    pub fn current(&self) -> Option<&Bookmark> {
        self.current.as_ref()
    }

    pub(crate) fn handle(&self) -> &OwnedHandle {
        &self.handle
    }
}

impl fmt::Debug for BookmarkTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BookmarkTracker")
            .field("handle", &self.handle)
            .field("current", &self.current)
            .finish()
    }
}
