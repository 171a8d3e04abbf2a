// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the persistence supervisor.
//!
//! Only failures the caller can act on surface here. Stream errors observed
//! while replicating never become a [`PersistError`]: link loss is absorbed
//! by the retry state machine and everything else is handed to the
//! per-direction error handler (see [`crate::resilience::LinkLossPolicy`]).
//!
//! # Error Categories
//!
//! | Error Type | Surfaced by | Description |
//! |------------|-------------|-------------|
//! | `Setup` | `start()` | Baseline could not be anchored (sequence query or feed open failed) |
//! | `Config` | `start()` | A direction has no link URL |
//! | `Store` | `start()` | Other collaborator failure |
//! | `NoRuntime` | `persist()` | Auto-start requested outside a tokio runtime |

use crate::store::StoreError;
use thiserror::Error;

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, PersistError>;

/// Errors returned by the supervisor's public operations.
#[derive(Error, Debug)]
pub enum PersistError {
    /// Initialization of the replication session failed.
    ///
    /// Not retried: the supervisor never silently retries its own setup.
    /// Calling `start()` again re-attempts it.
    #[error("Setup failed ({operation}): {message}")]
    Setup {
        operation: String,
        message: String,
        #[source]
        source: Option<StoreError>,
    },

    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Document store failure outside of setup.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// `persist()` was asked to auto-start but no tokio runtime is running.
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
}

impl PersistError {
    /// Create a setup error from a store error.
    pub fn setup(operation: impl Into<String>, source: StoreError) -> Self {
        Self::Setup {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Whether this error came from anchoring the baseline.
    pub fn is_setup(&self) -> bool {
        matches!(self, Self::Setup { .. })
    }
}
