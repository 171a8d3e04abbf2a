//! Mock DocumentStore for testing.
//!
//! Records every change feed and replication stream it opens, keeps the
//! sending half of each stream so tests can inject events, and tracks
//! whether each handle has been canceled.

use persist_supervisor::store::{
    BoxFuture, CancelHandle, DocumentStore, ErrorHandler, ReplicationStream, StoreError, StoreResult,
    StreamEvent, StreamOptions, StreamRequest, UpdateSeq,
};
use persist_supervisor::Side;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

/// Cancel handle that flips a shared flag.
struct MockHandle(Arc<AtomicBool>);

impl CancelHandle for MockHandle {
    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// A recorded open_change_feed() call.
#[derive(Debug, Clone)]
pub struct FeedRecord {
    pub options: StreamOptions,
    cancelled: Arc<AtomicBool>,
}

impl FeedRecord {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A recorded open_replication() call.
pub struct StreamRecord {
    pub side: Side,
    pub url: String,
    pub options: StreamOptions,
    pub on_err: Option<ErrorHandler>,
    sender: mpsc::UnboundedSender<StreamEvent>,
    cancelled: Arc<AtomicBool>,
}

impl StreamRecord {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Push an event as if the stream produced it.
    pub fn emit(&self, event: StreamEvent) {
        let _ = self.sender.send(event);
    }
}

/// Mock implementation of DocumentStore that records all calls.
///
/// # Example
/// ```rust,ignore
/// let store = Arc::new(MockStore::new());
/// let supervisor = persist(store.clone(), options)?;
/// supervisor.start(Direction::Both).await?;
///
/// store.emit(Side::To, StreamEvent::UpToDate);
/// assert_eq!(store.open_count(Side::To), 1);
/// ```
pub struct MockStore {
    sequence: Mutex<UpdateSeq>,
    fail_sequence: AtomicBool,
    fail_feed: AtomicBool,
    /// Number of upcoming open_replication() calls that fail.
    fail_opens: AtomicUsize,
    sequence_calls: AtomicUsize,
    /// When set, current_sequence() waits until the gate reads `true`.
    sequence_gate: Mutex<Option<watch::Receiver<bool>>>,
    feeds: Mutex<Vec<FeedRecord>>,
    streams: Mutex<Vec<Arc<StreamRecord>>>,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            sequence: Mutex::new(UpdateSeq::Number(0)),
            fail_sequence: AtomicBool::new(false),
            fail_feed: AtomicBool::new(false),
            fail_opens: AtomicUsize::new(0),
            sequence_calls: AtomicUsize::new(0),
            sequence_gate: Mutex::new(None),
            feeds: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
        }
    }

    pub fn with_sequence(self, seq: UpdateSeq) -> Self {
        *self.sequence.lock().unwrap() = seq;
        self
    }

    pub fn set_sequence(&self, seq: UpdateSeq) {
        *self.sequence.lock().unwrap() = seq;
    }

    pub fn fail_sequence(&self, fail: bool) {
        self.fail_sequence.store(fail, Ordering::SeqCst);
    }

    pub fn fail_feed(&self, fail: bool) {
        self.fail_feed.store(fail, Ordering::SeqCst);
    }

    /// Make the next `n` stream opens fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.fail_opens.store(n, Ordering::SeqCst);
    }

    /// Hold every current_sequence() call until `true` is sent on the
    /// returned gate. Dropping the sender without opening it parks the calls
    /// forever.
    pub fn gate_sequence(&self) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        *self.sequence_gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn sequence_calls(&self) -> usize {
        self.sequence_calls.load(Ordering::SeqCst)
    }

    pub fn feeds(&self) -> Vec<FeedRecord> {
        self.feeds.lock().unwrap().clone()
    }

    pub fn streams(&self, side: Side) -> Vec<Arc<StreamRecord>> {
        self.streams
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.side == side)
            .cloned()
            .collect()
    }

    /// Most recently opened stream for `side`.
    pub fn latest(&self, side: Side) -> Arc<StreamRecord> {
        self.streams(side)
            .pop()
            .unwrap_or_else(|| panic!("no {} stream opened", side))
    }

    pub fn open_count(&self, side: Side) -> usize {
        self.streams(side).len()
    }

    /// Streams for `side` that have not been canceled.
    pub fn live_count(&self, side: Side) -> usize {
        self.streams(side).iter().filter(|s| !s.is_cancelled()).count()
    }

    /// Emit on the latest stream for `side`.
    pub fn emit(&self, side: Side, event: StreamEvent) {
        self.latest(side).emit(event);
    }
}

impl DocumentStore for MockStore {
    fn current_sequence(&self) -> BoxFuture<'_, UpdateSeq> {
        self.sequence_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.sequence_gate.lock().unwrap().clone();
        Box::pin(async move {
            if let Some(mut gate) = gate {
                if gate.wait_for(|open| *open).await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            if self.fail_sequence.load(Ordering::SeqCst) {
                Err(StoreError("database is closed".to_string()))
            } else {
                Ok(self.sequence.lock().unwrap().clone())
            }
        })
    }

    fn open_change_feed(&self, options: StreamOptions) -> StoreResult<Box<dyn CancelHandle>> {
        if self.fail_feed.load(Ordering::SeqCst) {
            return Err(StoreError("changes feed unavailable".to_string()));
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        self.feeds.lock().unwrap().push(FeedRecord {
            options,
            cancelled: cancelled.clone(),
        });
        Ok(Box::new(MockHandle(cancelled)))
    }

    fn open_replication(&self, request: StreamRequest) -> StoreResult<ReplicationStream> {
        let failing = self
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError(format!("cannot reach {}", request.url)));
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let (sender, stream) = ReplicationStream::channel(Box::new(MockHandle(cancelled.clone())));
        self.streams.lock().unwrap().push(Arc::new(StreamRecord {
            side: request.side,
            url: request.url,
            options: request.options,
            on_err: request.on_err,
            sender,
            cancelled,
        }));
        Ok(stream)
    }
}
