//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Typed fault taxonomy for the pipeline. Components return these from their
//! fallible entry points; [`crate::supervisor::supervise`] is the backstop
//! that turns a panic or unexpected return into a restart decision.

use thiserror::Error;

/// The error taxonomy described in spec section 7.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Pipe read error, segment probe hiccup, non-zero concat exit. Retried
    /// with bounded backoff within the owning component.
    #[error("transient I/O error in {component}: {message}")]
    TransientIo { component: &'static str, message: String },

    /// Reader failed repeatedly beyond the configured threshold.
    #[error("camera faulted after {attempts} consecutive reader failures")]
    StreamFault { attempts: u32 },

    /// A frame did not decode to the expected buffer size.
    #[error("decode fault: expected {expected} bytes, got {actual}")]
    DecodeFault { expected: usize, actual: usize },

    /// The detector threw or returned something nonsensical. Never fatal.
    #[error("detection error: {0}")]
    Detection(String),

    /// A label filter or mask was invalid at config-load time.
    #[error("filter misconfiguration for label '{label}': {reason}")]
    FilterMisconfiguration { label: String, reason: String },

    /// No matching segments were found, or the concat process failed.
    #[error("recording assembly failure: {0}")]
    RecordingAssemblyFailure(String),

    /// Bus accepted a publish after it had begun shutting down.
    #[error("bus is shutting down")]
    BusShuttingDown,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
