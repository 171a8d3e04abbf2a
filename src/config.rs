//! Configuration for the persistence supervisor.
//!
//! Callers hand [`PersistOptions`] to [`persist()`](crate::persist) and may
//! merge more later with [`Supervisor::config()`](crate::Supervisor::config).
//! Options are partial: anything missing falls back to a default when the
//! options are resolved into a [`SupervisorConfig`].
//!
//! # Configuration Structure
//!
//! ```text
//! PersistOptions
//! ├── url: String                 # Link URL shared by both directions
//! ├── startingTimeout: u64 (ms)   # First reopen delay (1000)
//! ├── maxTimeout: u64 (ms)        # Reopen delay ceiling (300000)
//! ├── backoff: f64                # Delay multiplier (1.1)
//! ├── manual: bool                # Don't start on construction (false)
//! ├── linkLostStatuses: [u16]     # Errors treated as link loss ([405])
//! ├── changes: { opts }           # Change feed options
//! ├── to:   { url, opts, onErr, listeners }
//! └── from: { url, opts, onErr, listeners }
//! ```
//!
//! `onErr` and `listeners` are closures and can only be set in code. Any
//! other top-level key is kept in `extra` and passed to the store with
//! every stream request.
//!
//! # JSON Example
//!
//! ```rust
//! use persist_supervisor::config::PersistOptions;
//!
//! let options = PersistOptions::from_json(r#"{
//!     "url": "http://localhost:5984/notes",
//!     "startingTimeout": 500,
//!     "from": { "opts": { "filter": "app/by_user" } }
//! }"#).unwrap();
//! assert_eq!(options.starting_timeout, Some(500));
//! ```

use crate::direction::Side;
use crate::error::{PersistError, Result};
use crate::resilience::{
    BackoffPolicy, BACKOFF_FACTOR, DEFAULT_LINK_LOST_STATUS, MAX_RETRY_TIMEOUT,
    STARTING_RETRY_TIMEOUT,
};
use crate::store::{ErrorHandler, StreamError, StreamEvent, StreamEventKind, StreamOptions, StreamRequest, UpdateSeq};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// PersistOptions: what callers pass in
// ═══════════════════════════════════════════════════════════════════════════════

/// Partial supervisor options, using the recognized option keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistOptions {
    /// Link URL used by both directions unless a direction overrides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// First reopen delay in milliseconds. Zero means "use the default".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_timeout: Option<u64>,

    /// Reopen delay ceiling in milliseconds. Zero means "use the default".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_timeout: Option<u64>,

    /// Backoff multiplier. Non-positive means "use the default".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<f64>,

    /// When true, replication waits for an explicit `start()`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual: Option<bool>,

    /// Stream error status codes that mean the link is lost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_lost_statuses: Option<Vec<u16>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<ChangesOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DirectionOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DirectionOptions>,

    /// Unrecognized keys, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PersistOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PersistError::Config(format!("Invalid options: {}", e)))
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_manual(mut self, manual: bool) -> Self {
        self.manual = Some(manual);
        self
    }

    pub fn with_timeouts(mut self, starting_ms: u64, max_ms: u64, backoff: f64) -> Self {
        self.starting_timeout = Some(starting_ms);
        self.max_timeout = Some(max_ms);
        self.backoff = Some(backoff);
        self
    }

    pub fn with_to(mut self, to: DirectionOptions) -> Self {
        self.to = Some(to);
        self
    }

    pub fn with_from(mut self, from: DirectionOptions) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_changes(mut self, opts: StreamOptions) -> Self {
        self.changes = Some(ChangesOptions { opts: Some(opts) });
        self
    }

    /// Overwrite keys present in `other`.
    ///
    /// This is a top-level merge: a new `to` replaces the old `to` entirely.
    pub fn merge(&mut self, other: PersistOptions) {
        let PersistOptions {
            url,
            starting_timeout,
            max_timeout,
            backoff,
            manual,
            link_lost_statuses,
            changes,
            to,
            from,
            extra,
        } = other;

        if url.is_some() {
            self.url = url;
        }
        if starting_timeout.is_some() {
            self.starting_timeout = starting_timeout;
        }
        if max_timeout.is_some() {
            self.max_timeout = max_timeout;
        }
        if backoff.is_some() {
            self.backoff = backoff;
        }
        if manual.is_some() {
            self.manual = manual;
        }
        if link_lost_statuses.is_some() {
            self.link_lost_statuses = link_lost_statuses;
        }
        if changes.is_some() {
            self.changes = changes;
        }
        if to.is_some() {
            self.to = to;
        }
        if from.is_some() {
            self.from = from;
        }
        self.extra.extend(extra);
    }
}

/// Change feed options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangesOptions {
    /// Overlaid on `{since: <current seq>, live: true}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<StreamOptions>,
}

/// Per-direction options.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct DirectionOptions {
    /// Overrides the shared link URL for this direction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Overlaid on `{live: true}` when the stream is opened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<StreamOptions>,

    /// Receives stream errors that are not link loss.
    #[serde(skip)]
    pub on_err: Option<ErrorHandler>,

    /// Extra listeners attached to every stream opened in this direction.
    #[serde(skip)]
    pub listeners: Vec<StreamListener>,
}

impl fmt::Debug for DirectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectionOptions")
            .field("url", &self.url)
            .field("opts", &self.opts)
            .field("on_err", &self.on_err.is_some())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl DirectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_opts(mut self, opts: StreamOptions) -> Self {
        self.opts = Some(opts);
        self
    }

    pub fn on_err<F>(mut self, handler: F) -> Self
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.on_err = Some(Arc::new(handler));
        self
    }

    pub fn with_listener(mut self, listener: StreamListener) -> Self {
        self.listeners.push(listener);
        self
    }
}

/// A caller listener on one kind of stream event.
#[derive(Clone)]
pub struct StreamListener {
    pub event: StreamEventKind,
    /// Fire only for the first matching event of each stream.
    pub once: bool,
    pub callback: Arc<dyn Fn(&StreamEvent) + Send + Sync>,
}

impl StreamListener {
    pub fn on<F>(event: StreamEventKind, callback: F) -> Self
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        Self {
            event,
            once: false,
            callback: Arc::new(callback),
        }
    }

    pub fn once<F>(event: StreamEventKind, callback: F) -> Self
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        Self {
            event,
            once: true,
            callback: Arc::new(callback),
        }
    }
}

impl fmt::Debug for StreamListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamListener")
            .field("event", &self.event)
            .field("once", &self.once)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SupervisorConfig: options resolved over defaults
// ═══════════════════════════════════════════════════════════════════════════════

/// Fully-populated configuration snapshot.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub url: Option<String>,
    pub backoff: BackoffPolicy,
    pub manual: bool,
    pub link_lost_statuses: Vec<u16>,
    pub changes: Option<StreamOptions>,
    pub to: DirectionOptions,
    pub from: DirectionOptions,
    pub extra: Map<String, Value>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::resolve(&PersistOptions::default())
    }
}

impl SupervisorConfig {
    /// Resolve partial options over the defaults.
    pub fn resolve(options: &PersistOptions) -> Self {
        let starting = options
            .starting_timeout
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(STARTING_RETRY_TIMEOUT);
        let max = options
            .max_timeout
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(MAX_RETRY_TIMEOUT);
        let factor = options
            .backoff
            .filter(|b| b.is_finite() && *b > 0.0)
            .unwrap_or(BACKOFF_FACTOR);

        Self {
            url: options.url.clone(),
            backoff: BackoffPolicy { starting, max, factor },
            manual: options.manual.unwrap_or(false),
            link_lost_statuses: options
                .link_lost_statuses
                .clone()
                .unwrap_or_else(|| vec![DEFAULT_LINK_LOST_STATUS]),
            changes: options.changes.as_ref().and_then(|c| c.opts.clone()),
            to: options.to.clone().unwrap_or_default(),
            from: options.from.clone().unwrap_or_default(),
            extra: options.extra.clone(),
        }
    }

    pub fn direction(&self, side: Side) -> &DirectionOptions {
        match side {
            Side::To => &self.to,
            Side::From => &self.from,
        }
    }

    /// The link URL for `side`: the direction's own, else the shared one.
    pub fn url_for(&self, side: Side) -> Result<String> {
        self.direction(side)
            .url
            .clone()
            .or_else(|| self.url.clone())
            .ok_or_else(|| PersistError::Config(format!("no url configured for direction {}", side)))
    }

    /// `{live: true}` overlaid with the direction's `opts`.
    pub fn stream_options(&self, side: Side) -> StreamOptions {
        let mut base = Map::new();
        base.insert("live".to_string(), Value::Bool(true));
        overlay(base, self.direction(side).opts.as_ref())
    }

    /// `{since: <seq>, live: true}` overlaid with `changes.opts`.
    pub fn change_feed_options(&self, since: &UpdateSeq) -> StreamOptions {
        let mut base = Map::new();
        base.insert("since".to_string(), since.to_value());
        base.insert("live".to_string(), Value::Bool(true));
        overlay(base, self.changes.as_ref())
    }

    /// Build the store request for opening a stream in `side`.
    pub fn stream_request(&self, side: Side) -> Result<StreamRequest> {
        Ok(StreamRequest {
            side,
            url: self.url_for(side)?,
            options: self.stream_options(side),
            on_err: self.direction(side).on_err.clone(),
            extra: self.extra.clone(),
        })
    }
}

/// Shallow merge: keys in `top` replace keys in `base`.
fn overlay(mut base: StreamOptions, top: Option<&StreamOptions>) -> StreamOptions {
    if let Some(top) = top {
        for (key, value) in top {
            base.insert(key.clone(), value.clone());
        }
    }
    base
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
