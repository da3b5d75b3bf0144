//! Error types for the frame conversion pipeline

use thiserror::Error;

use crate::frame::{MemoryLayout, PixelFormat};
use crate::pipeline::ConnectionId;

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by result sinks
pub type SinkError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
    /// No strategy accepts this (format, layout) pair. The frame has been disposed.
    #[error("no conversion strategy for {format:?} frames in {layout:?} layout")]
    InvalidInput {
        format: PixelFormat,
        layout: MemoryLayout,
    },

    /// A call reached a dispatcher that is already delivering on this thread.
    #[error("reentrant {operation} call while a result is being delivered")]
    ReentrantCall {
        operation: &'static str,
        connection: Option<ConnectionId>,
    },

    /// The result sink returned an error. Reported, never propagated into pipeline state.
    #[error("result sink failed for connection {connection}: {source}")]
    CallbackFailure {
        connection: ConnectionId,
        #[source]
        source: SinkError,
    },

    /// The selector handed out a strategy that rejects the frame it was selected for.
    #[error("strategy {strategy} rejected a {format:?}/{layout:?} frame it was selected for")]
    StrategyMismatch {
        strategy: &'static str,
        format: PixelFormat,
        layout: MemoryLayout,
    },

    #[error("complete() called with no conversion in flight")]
    NotConverting,

    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("frame rejected: {0}")]
    InvalidFrame(String),

    #[error("texture backend error: {0}")]
    Backend(String),

    #[error("conversion worker exited before returning its result")]
    WorkerGone,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
