//! Publisher metadata handles.

use crate::client::{EventLogClient, HandleKind, OwnedHandle};
use crate::error::{Result, TailError};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Opens publisher metadata, optionally keeping recent handles.
///
/// With a capacity of zero every lookup opens a fresh handle that is closed
/// as soon as the caller drops it. Otherwise handles are shared through an
/// LRU cache; an evicted handle closes when its last user lets go.
pub struct PublisherCache {
    client: EventLogClient,
    cache: Option<Mutex<LruCache<String, Arc<OwnedHandle>>>>,
}

impl PublisherCache {
    pub fn new(client: EventLogClient, capacity: usize) -> Self {
        let cache = NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        Self { client, cache }
    }

    /// Resolve the metadata handle for `provider`. Failures are not cached.
    pub fn get(&self, provider: &str) -> Result<Arc<OwnedHandle>> {
        if let Some(cache) = &self.cache {
            if let Some(handle) = cache.lock().get(provider) {
                return Ok(Arc::clone(handle));
            }
        }

        let raw = self
            .client
            .api()
            .open_publisher_metadata(provider)
            .map_err(|e| TailError::native(e, format!("open publisher '{}'", provider)))?;
        let handle = Arc::new(self.client.adopt(raw, HandleKind::Publisher));

        if let Some(cache) = &self.cache {
            cache.lock().put(provider.to_string(), Arc::clone(&handle));
        }
        Ok(handle)
    }

    /// Number of cached handles.
    pub fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached handle.
    pub fn clear(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().clear();
        }
    }
}
