//! Per-connection conversion pipelines and the dispatcher that routes to them

pub mod connection;
pub mod dispatcher;
pub mod pool;
pub mod shared;
pub mod stats;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::convert::MaterialTag;
use crate::error::SinkError;
use crate::texture::OutputTexture;

pub use connection::ConnectionPipeline;
pub use dispatcher::{Dispatcher, DrainReport};
pub use pool::{ResourcePool, RetireOutcome};
pub use shared::SharedDispatcher;
pub use stats::DispatcherStats;

/// Stable identifier of one logical video stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Arc<str>);

impl ConnectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

impl From<&ConnectionId> for ConnectionId {
    fn from(id: &ConnectionId) -> Self {
        id.clone()
    }
}

/// What a busy pipeline does with a newly arrived frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverloadPolicy {
    /// Finish and deliver the in-flight conversion, then start the new frame
    #[default]
    ForceComplete,
    /// Dispose the new frame and leave the in-flight conversion alone
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Conversion started and is still running (deferred mode)
    Started,
    /// Converted and delivered before `submit` returned
    Delivered,
    /// Pipeline was busy and the overload policy discarded the frame
    Dropped,
}

/// Read-only view of a connection's latest converted frame.
///
/// Borrowed from the pipeline: the texture stays valid until the next
/// result for the same connection or until teardown.
#[derive(Debug, Clone, Copy)]
pub struct ProcessedResult<'a> {
    pub connection: &'a ConnectionId,
    pub texture: &'a OutputTexture,
    pub material: Option<MaterialTag>,
    pub width: u32,
    pub height: u32,
    pub sequence: u64,
    pub timestamp: Instant,
    pub device_timestamp: Option<Duration>,
}

/// Receives every processed result, in submission order per connection
pub trait ResultSink: Send {
    fn deliver(&mut self, result: &ProcessedResult<'_>) -> Result<(), SinkError>;
}

impl<F> ResultSink for F
where
    F: FnMut(&ProcessedResult<'_>) -> Result<(), SinkError> + Send,
{
    fn deliver(&mut self, result: &ProcessedResult<'_>) -> Result<(), SinkError> {
        self(result)
    }
}

/// Pins a closure to the [`ResultSink`] signature so its argument types can be inferred
pub fn sink_fn<F>(f: F) -> F
where
    F: FnMut(&ProcessedResult<'_>) -> Result<(), SinkError> + Send,
{
    f
}
