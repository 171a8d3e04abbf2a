// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change-feed baseline.
//!
//! On the first start of a session the supervisor reads the local store's
//! current sequence and opens a live change feed from there. That I/O runs
//! outside the supervisor lock; the resulting [`Anchor`] is installed once
//! the lock is retaken. The feed marks
//! "everything from now on" and is anchored once per session, never once per
//! directional retry, so reconnects don't replay history.

use crate::config::SupervisorConfig;
use crate::error::{PersistError, Result};
use crate::metrics;
use crate::store::{CancelHandle, DocumentStore, UpdateSeq};
use tracing::{debug, info};

/// The shared change feed, opened lazily and canceled on teardown.
#[derive(Default)]
pub struct Baseline {
    feed: Option<Box<dyn CancelHandle>>,
    since: Option<UpdateSeq>,
}

impl Baseline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a change feed is currently held.
    pub fn is_active(&self) -> bool {
        self.feed.is_some()
    }

    /// Sequence the current feed was anchored at.
    pub fn anchored_at(&self) -> Option<&UpdateSeq> {
        self.since.as_ref()
    }

    /// Read the store's current sequence and open a live feed from it.
    ///
    /// Runs without the supervisor lock. The returned [`Anchor`] owns the
    /// feed until it is installed; dropping it cancels the feed. Failures are
    /// setup errors and are not retried here.
    pub async fn anchor<S>(store: &S, config: &SupervisorConfig) -> Result<Anchor>
    where
        S: DocumentStore + ?Sized,
    {
        let since = store
            .current_sequence()
            .await
            .map_err(|e| PersistError::setup("current_sequence", e))?;

        let options = config.change_feed_options(&since);
        let feed = store
            .open_change_feed(options)
            .map_err(|e| PersistError::setup("open_change_feed", e))?;

        Ok(Anchor {
            since,
            feed: Some(feed),
        })
    }

    /// Take ownership of an anchored feed, canceling any feed held before.
    pub fn install(&mut self, mut anchor: Anchor) {
        self.cancel();
        if let Some(feed) = anchor.feed.take() {
            info!(since = %anchor.since, "Change feed anchored");
            metrics::set_baseline_active(true);
            self.feed = Some(feed);
            self.since = Some(anchor.since.clone());
        }
    }

    /// Cancel the held feed, if any.
    pub fn cancel(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.cancel();
            debug!(since = ?self.since, "Change feed canceled");
            metrics::set_baseline_active(false);
        }
    }
}

/// A change feed opened but not yet installed into a [`Baseline`].
pub struct Anchor {
    since: UpdateSeq,
    feed: Option<Box<dyn CancelHandle>>,
}

impl Anchor {
    pub fn since(&self) -> &UpdateSeq {
        &self.since
    }
}

impl Drop for Anchor {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.cancel();
            debug!(since = %self.since, "Unused change feed canceled");
        }
    }
}

impl Drop for Baseline {
    fn drop(&mut self) {
        self.cancel();
    }
}
