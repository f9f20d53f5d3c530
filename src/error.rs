// Copyright 2020 Joyent, Inc.

use thiserror::Error;

/// Errors surfaced by the transport and its connection pools.
///
/// Only `MaxRetriesExceeded` is ever produced by the retry loop itself;
/// everything else is fail-fast. Configuration and argument errors are raised
/// at construction time and never retried.
#[derive(Error, Debug)]
pub enum Error {
    /// The transport was constructed with unusable options.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A host descriptor or other argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The pool holds no connections at all, alive or dead.
    #[error("no connections available")]
    NoAliveConnections,

    /// Every permitted attempt failed with a transport-level error.
    #[error("request failed after {attempts} attempts, last error: {last_error}")]
    MaxRetriesExceeded {
        /// Number of attempts performed before giving up.
        attempts: u32,
        /// Rendering of the transport error from the final attempt.
        last_error: String,
    },

    /// A request body or response payload could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cluster topology could not be fetched or parsed.
    #[error("sniff failed: {0}")]
    Sniff(String),
}
