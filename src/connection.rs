// Copyright 2020 Joyent, Inc.

use std::error;
use std::time::Duration;

use crate::node::NodeName;

/// Transport metadata for one completed network call. The transport passes
/// this through to the caller unchanged.
#[derive(Clone, Debug, Default)]
pub struct ResponseInfo {
    /// Wall-clock time spent on the network call.
    pub took: Duration,
    /// The name of the node that served the request.
    pub node: NodeName,
}

/// The raw result of one network call against one node: the status code, the
/// undecoded body, and the call metadata.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub info: ResponseInfo,
}

/// Carom connection
///
/// The `Connection` trait defines the interface that must be implemented in
/// order to participate in a carom transport. An implementation performs one
/// request against the single node it is bound to and either returns the raw
/// response or fails with a transport-level error. A connection need not be
/// backed by a dedicated socket; any handle that can issue a request against
/// one node satisfies the trait.
///
/// The transport never interprets the status code of a returned
/// `RawResponse`; deciding which outcomes constitute a transport failure
/// (timeouts, refused connections, and so on) is up to the implementation.
/// Per-attempt timeouts also live here, not in the transport.
pub trait Connection: Send + Sync + Sized + 'static {
    /// The error type returned by the `request` function. This is an
    /// associated type for the trait meaning each specific implementation of
    /// the `Connection` trait may choose the appropriate concrete error type
    /// to return. The only constraint applied is that the selected error
    /// type must implement the
    /// [Error](https://doc.rust-lang.org/std/error/trait.Error.html) trait
    /// from the standard library.
    type Error: error::Error;

    /// Perform one request against the node this connection is bound to.
    /// `params` are query parameters to append to the `uri`; `body` is the
    /// already-encoded request body, if any. Returns an error only for
    /// transport-level failures; responses carrying an error status are
    /// returned as successes for the caller to interpret.
    fn request(
        &self,
        method: &str,
        uri: &str,
        params: &[(String, String)],
        body: Option<&[u8]>,
    ) -> Result<RawResponse, Self::Error>;
}
