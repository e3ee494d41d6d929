//! Pull-style reads over a snapshot of a channel.

use crate::client::{EventLogClient, HandleKind, OwnedHandle};
use crate::error::{Result, TailError};
use crate::native::{NativeError, QueryDirection};
use crate::types::StatusCode;
use std::time::Duration;
use tracing::trace;

/// An open result set.
///
/// A timed-out fetch and an exhausted result set both yield an empty
/// batch; [`is_exhausted`](Self::is_exhausted) tells them apart.
#[derive(Debug)]
pub struct EventQuery {
    client: EventLogClient,
    handle: OwnedHandle,
    channel: String,
    exhausted: bool,
}

impl EventQuery {
    pub fn open(
        client: &EventLogClient,
        channel: &str,
        query: &str,
        direction: QueryDirection,
    ) -> Result<Self> {
        let raw = client
            .api()
            .open_query(channel, query, direction)
            .map_err(|e| TailError::native(e, format!("query '{}'", channel)))?;
        Ok(Self {
            client: client.clone(),
            handle: client.adopt(raw, HandleKind::ResultSet),
            channel: channel.to_string(),
            exhausted: false,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Fetch up to `batch_size` event handles.
    pub fn next_batch(&mut self, batch_size: usize, timeout: Duration) -> Result<Vec<OwnedHandle>> {
        if self.exhausted {
            return Ok(Vec::new());
        }
        match self.client.api().pull_next(self.handle.raw(), batch_size, timeout) {
            Ok(raws) => Ok(raws
                .into_iter()
                .map(|raw| self.client.adopt(raw, HandleKind::Event))
                .collect()),
            Err(NativeError::Status(StatusCode::NO_MORE_ITEMS)) => {
                trace!(channel = %self.channel, "query exhausted");
                self.exhausted = true;
                Ok(Vec::new())
            }
            Err(NativeError::Status(StatusCode::TIMEOUT)) => Ok(Vec::new()),
            Err(e) => Err(TailError::native(e, format!("read '{}'", self.channel))),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Abort a blocked or future fetch.
    pub fn cancel(&self) -> Result<()> {
        self.client
            .api()
            .cancel(self.handle.raw())
            .map_err(|e| TailError::native(e, "cancel query"))
    }
}
