// Copyright 2025 N. Dornseif
//
// Dual-licensed under Apache 2.0 and MIT terms.

//! Error types for the generator test bench.

use std::time::Duration;

use thiserror::Error;

/// Result type for bench operations.
pub type Result<T> = std::result::Result<T, BenchError>;

/// Errors that can occur while configuring or running the bench.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Generator name outside the closed set of variants.
    #[error("Unknown generator: {0}")]
    UnknownGenerator(String),

    /// Test mode name outside the closed set of modes.
    #[error("Unknown test mode: {0}")]
    UnknownTestMode(String),

    /// Rejected configuration value.
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// A worker did not report completion within the deadlock detection bound.
    #[error("Synchronization fault in {stage}: no completion after {waited:?}")]
    SyncFault {
        stage: &'static str,
        waited: Duration,
    },

    /// Job submitted after the pool was disposed.
    #[error("Job pool has been disposed")]
    PoolDisposed,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a synchronization fault for the named stage.
    pub fn sync_fault(stage: &'static str, waited: Duration) -> Self {
        Self::SyncFault { stage, waited }
    }

    /// Synchronization faults are the only fatal class.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SyncFault { .. })
    }
}
