// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Document store integration traits.
//!
//! The supervisor does not replicate anything itself. It drives a
//! [`DocumentStore`] that knows how to read its own sequence position,
//! open a live change feed and open one-directional replication streams
//! against a link URL.
//!
//! # Example
//!
//! ```rust,no_run
//! use persist_supervisor::store::{
//!     BoxFuture, CancelHandle, DocumentStore, ReplicationStream, StoreResult,
//!     StreamOptions, StreamRequest, UpdateSeq,
//! };
//!
//! struct Noop;
//! impl CancelHandle for Noop {
//!     fn cancel(&self) {}
//! }
//!
//! struct MyStore;
//!
//! impl DocumentStore for MyStore {
//!     fn current_sequence(&self) -> BoxFuture<'_, UpdateSeq> {
//!         Box::pin(async { Ok(UpdateSeq::Number(42)) })
//!     }
//!
//!     fn open_change_feed(&self, _options: StreamOptions) -> StoreResult<Box<dyn CancelHandle>> {
//!         Ok(Box::new(Noop))
//!     }
//!
//!     fn open_replication(&self, _request: StreamRequest) -> StoreResult<ReplicationStream> {
//!         let (_events, stream) = ReplicationStream::channel(Box::new(Noop));
//!         Ok(stream)
//!     }
//! }
//! ```

use crate::direction::Side;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Result type for document store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type alias for boxed async futures returned by the store.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Options object handed to the store (`live`, `since`, filters, ...).
pub type StreamOptions = Map<String, Value>;

/// Caller-supplied handler for stream errors that are not link loss.
pub type ErrorHandler = Arc<dyn Fn(&StreamError) + Send + Sync>;

/// Simplified error for document store operations.
#[derive(Debug, Clone)]
pub struct StoreError(pub String);

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for StoreError {}

/// Error reported by a live replication stream.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct StreamError {
    /// Status code attached by the transport, if any.
    pub status: Option<u16>,
    /// Error name attached by the transport, if any.
    pub name: Option<String>,
    pub message: String,
}

impl StreamError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            name: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A local store's change sequence position.
///
/// Some stores use plain counters, others opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpdateSeq {
    Number(u64),
    Opaque(String),
}

impl UpdateSeq {
    pub fn to_value(&self) -> Value {
        match self {
            UpdateSeq::Number(n) => Value::from(*n),
            UpdateSeq::Opaque(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for UpdateSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateSeq::Number(n) => write!(f, "{}", n),
            UpdateSeq::Opaque(s) => f.write_str(s),
        }
    }
}

/// Events emitted by a replication stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A batch of documents was replicated.
    Change(Value),
    /// The stream finished (or a non-live pass completed).
    Complete(Value),
    /// The stream caught up with its source.
    UpToDate,
    /// The stream failed.
    Error(StreamError),
}

impl StreamEvent {
    pub fn kind(&self) -> StreamEventKind {
        match self {
            StreamEvent::Change(_) => StreamEventKind::Change,
            StreamEvent::Complete(_) => StreamEventKind::Complete,
            StreamEvent::UpToDate => StreamEventKind::UpToDate,
            StreamEvent::Error(_) => StreamEventKind::Error,
        }
    }

    /// Whether this event proves the stream is alive.
    pub fn is_activity(&self) -> bool {
        !matches!(self, StreamEvent::Error(_))
    }
}

/// Event kinds, used to register listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEventKind {
    Change,
    Complete,
    UpToDate,
    Error,
}

/// Handle that stops a feed or stream.
///
/// `cancel()` may be called more than once and must be idempotent.
pub trait CancelHandle: Send + Sync {
    fn cancel(&self);
}

/// Everything the store needs to open one replication stream.
#[derive(Clone)]
pub struct StreamRequest {
    pub side: Side,
    pub url: String,
    /// `{live: true}` overlaid with the direction's `opts`.
    pub options: StreamOptions,
    pub on_err: Option<ErrorHandler>,
    /// Unrecognized top-level configuration keys, passed through verbatim.
    pub extra: Map<String, Value>,
}

impl fmt::Debug for StreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRequest")
            .field("side", &self.side)
            .field("url", &self.url)
            .field("options", &self.options)
            .field("on_err", &self.on_err.is_some())
            .field("extra", &self.extra)
            .finish()
    }
}

/// A live replication stream: its events plus the handle that cancels it.
pub struct ReplicationStream {
    pub events: mpsc::UnboundedReceiver<StreamEvent>,
    pub handle: Box<dyn CancelHandle>,
}

impl ReplicationStream {
    /// Build a stream around a fresh channel, returning the sending half.
    pub fn channel(handle: Box<dyn CancelHandle>) -> (mpsc::UnboundedSender<StreamEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { events: rx, handle })
    }
}

/// What the supervisor needs from the document store.
pub trait DocumentStore: Send + Sync + 'static {
    /// Current change sequence position of the local store.
    fn current_sequence(&self) -> BoxFuture<'_, UpdateSeq>;

    /// Open a live change feed with the given options (`since`, `live`, ...).
    fn open_change_feed(&self, options: StreamOptions) -> StoreResult<Box<dyn CancelHandle>>;

    /// Open a live replication stream in `request.side` against `request.url`.
    fn open_replication(&self, request: StreamRequest) -> StoreResult<ReplicationStream>;
}

/// A store that never replicates anything.
///
/// Streams it opens stay silent until canceled, so a supervisor driving it
/// replicates but never connects.
#[derive(Clone, Default)]
pub struct NoOpStore;

struct IdleHandle(Mutex<Option<mpsc::UnboundedSender<StreamEvent>>>);

impl CancelHandle for IdleHandle {
    fn cancel(&self) {
        if let Ok(mut tx) = self.0.lock() {
            tx.take();
        }
    }
}

struct NoOpFeed;

impl CancelHandle for NoOpFeed {
    fn cancel(&self) {}
}

impl DocumentStore for NoOpStore {
    fn current_sequence(&self) -> BoxFuture<'_, UpdateSeq> {
        Box::pin(async { Ok(UpdateSeq::Number(0)) })
    }

    fn open_change_feed(&self, options: StreamOptions) -> StoreResult<Box<dyn CancelHandle>> {
        tracing::trace!(?options, "NoOp: change feed opened");
        Ok(Box::new(NoOpFeed))
    }

    fn open_replication(&self, request: StreamRequest) -> StoreResult<ReplicationStream> {
        tracing::debug!(direction = %request.side, url = %request.url, "NoOp: would replicate");
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(ReplicationStream {
            events: rx,
            handle: Box::new(IdleHandle(Mutex::new(Some(tx)))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(side: Side) -> StreamRequest {
        StreamRequest {
            side,
            url: "http://localhost:5984/db".to_string(),
            options: Map::new(),
            on_err: None,
            extra: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_noop_store_sequence() {
        let store = NoOpStore;
        assert_eq!(store.current_sequence().await.unwrap(), UpdateSeq::Number(0));
    }

    #[tokio::test]
    async fn test_noop_stream_stays_open_until_cancel() {
        let store = NoOpStore;
        let mut stream = store.open_replication(request(Side::To)).unwrap();
        assert!(stream.events.try_recv().is_err());

        stream.handle.cancel();
        stream.handle.cancel();
        assert!(stream.events.recv().await.is_none());
    }

    #[test]
    fn test_stream_event_kind() {
        assert_eq!(StreamEvent::UpToDate.kind(), StreamEventKind::UpToDate);
        assert_eq!(StreamEvent::Change(Value::Null).kind(), StreamEventKind::Change);
        assert!(StreamEvent::Complete(Value::Null).is_activity());
        assert!(!StreamEvent::Error(StreamError::new("x")).is_activity());
    }

    #[test]
    fn test_stream_error_builders() {
        let err = StreamError::new("method not allowed")
            .with_status(405)
            .with_name("unknown_error");
        assert_eq!(err.status, Some(405));
        assert_eq!(err.name.as_deref(), Some("unknown_error"));
        assert_eq!(err.to_string(), "method not allowed");
    }

    #[test]
    fn test_update_seq_serde() {
        let n: UpdateSeq = serde_json::from_str("17").unwrap();
        assert_eq!(n, UpdateSeq::Number(17));
        let s: UpdateSeq = serde_json::from_str("\"17-g1AAAA\"").unwrap();
        assert_eq!(s, UpdateSeq::Opaque("17-g1AAAA".to_string()));
        assert_eq!(s.to_value(), Value::from("17-g1AAAA"));
        assert_eq!(n.to_string(), "17");
    }

    #[test]
    fn test_stream_request_debug_hides_handler() {
        let mut req = request(Side::From);
        req.on_err = Some(Arc::new(|_e: &StreamError| {}));
        let debug = format!("{:?}", req);
        assert!(debug.contains("on_err: true"));
        assert!(debug.contains("From"));
    }

    #[test]
    fn test_store_error_display() {
        assert_eq!(StoreError("closed".to_string()).to_string(), "closed");
    }
}
