// Copyright 2020 Joyent, Inc.

use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use slog::{debug, error, info, warn, Logger};

use crate::connection::{Connection, ResponseInfo};
use crate::connection_pool::{ConnectionPool, PoolEntry};
use crate::error::Error;
use crate::node::{Node, NodeSpec, Scheme};
use crate::serializer::Serializer;
use crate::sniffer::Sniffer;

/// How long a connection stays benched after a failure, in milliseconds,
/// unless the options say otherwise.
pub const DEFAULT_DEAD_DURATION: u64 = 60_000;
/// The URI queried for the cluster topology unless the options say
/// otherwise.
pub const DEFAULT_NODES_INFO_URI: &str = "/_cluster/nodes";

/// Configuration for a [`Transport`].
#[derive(Debug)]
pub struct TransportOptions<S, N> {
    /// The initial host descriptors. May not be empty. The scheme of the
    /// first descriptor becomes the transport scheme applied to every node
    /// discovered by sniffing.
    pub hosts: Vec<NodeSpec>,
    /// Upper bound on attempts per logical request. Must be at least 1.
    pub max_retries: u32,
    /// Sniff the cluster topology once this many requests have been
    /// dispatched since the previous sniff. `None` disables request-counted
    /// sniffing.
    pub sniff_after_requests: Option<u64>,
    /// Treat every connection failure as a topology event: rebuild the whole
    /// node set instead of benching the failing connection.
    pub sniff_on_connection_fail: bool,
    /// Sniff once at construction time.
    pub sniff_on_start: bool,
    /// Milliseconds a connection stays benched after a failure. Defaults to
    /// [`DEFAULT_DEAD_DURATION`].
    pub dead_duration: Option<u64>,
    /// URI of the cluster's node-topology endpoint. Defaults to
    /// [`DEFAULT_NODES_INFO_URI`].
    pub nodes_info_uri: Option<String>,
    pub serializer: S,
    pub sniffer: N,
    pub log: Logger,
}

/// A successful transport result: the status code, the decoded payload, and
/// the call metadata passed through from the connection unchanged.
#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub data: Value,
    pub info: ResponseInfo,
}

/// Point-in-time snapshot of the sniff scheduling state.
#[derive(Copy, Clone, Debug)]
pub struct TransportStats {
    /// Requests dispatched since the last sniff.
    pub request_counter: u64,
    /// The current sniff threshold, shrunk under failure-triggered sniffs.
    /// `None` when request-counted sniffing is disabled.
    pub sniff_threshold: Option<u64>,
    /// Consecutive failure-triggered sniffs since the last ordinary one.
    pub sniffs_due_to_failure: u32,
}

// Scheduling counters, all mutated under one lock. The counter resets to
// zero exactly when a sniff begins, whatever caused the sniff.
#[derive(Debug)]
struct SniffSchedule {
    request_counter: u64,
    threshold: Option<u64>,
    sniffs_due_to_failure: u32,
}

/// The transport dispatcher.
///
/// Owns the [`ConnectionPool`], the retry loop, and the sniff-interval state
/// machine. One logical [`perform_request`](Transport::perform_request) call
/// selects a healthy connection, dispatches the request, and on a
/// transport-level failure fails over to another connection, up to the
/// configured attempt bound. Failures feed back into connection health:
/// either the failing connection is benched in the dead pool, or, when
/// `sniff_on_connection_fail` is set, the entire node universe is rebuilt
/// from a fresh topology query. The two reactions are mutually exclusive by
/// configuration.
///
/// Sniffing is interleaved with normal traffic rather than run on a timer:
/// when `sniff_after_requests` is set, connection selection counts requests
/// and triggers a topology refresh once the count passes the current
/// threshold. Failure-triggered sniffs shrink that threshold geometrically
/// (`1 + original / 2^failures`), so an unstable cluster is re-examined
/// almost every request until the failures stop; the first ordinary sniff
/// restores the configured baseline.
///
/// Dispatch is blocking: one logical request occupies the calling thread
/// through selection, network I/O, and retries. A `Transport` may be shared
/// across threads; internal state is mutex-protected and sniffs are
/// serialized.
pub struct Transport<C, S, N, F> {
    pool: Mutex<ConnectionPool<C>>,
    schedule: Mutex<SniffSchedule>,
    sniff_lock: Mutex<()>,
    serializer: S,
    sniffer: N,
    create_connection: F,
    scheme: Scheme,
    max_retries: u32,
    sniff_after_requests: Option<u64>,
    sniff_on_connection_fail: bool,
    dead_duration: Duration,
    nodes_info_uri: String,
    log: Logger,
}

impl<C, S, N, F> Transport<C, S, N, F>
where
    C: Connection,
    S: Serializer,
    N: Sniffer,
    F: Fn(&Node) -> C + Send + Sync,
{
    /// Build a transport from its options and a connection factory. The
    /// factory is invoked once per configured host now, and again for every
    /// node discovered by sniffing later.
    ///
    /// Returns [`Error::Configuration`] for an empty host list or a zero
    /// `max_retries`, and [`Error::InvalidArgument`] for a malformed host
    /// descriptor. With `sniff_on_start` set, a failed initial sniff also
    /// fails construction.
    pub fn new(
        options: TransportOptions<S, N>,
        create_connection: F,
    ) -> Result<Self, Error> {
        let TransportOptions {
            hosts,
            max_retries,
            sniff_after_requests,
            sniff_on_connection_fail,
            sniff_on_start,
            dead_duration,
            nodes_info_uri,
            serializer,
            sniffer,
            log,
        } = options;

        if hosts.is_empty() {
            return Err(Error::Configuration(String::from(
                "at least one host must be configured",
            )));
        }
        if max_retries == 0 {
            return Err(Error::Configuration(String::from(
                "max_retries must be at least 1",
            )));
        }

        let scheme = hosts[0].scheme.unwrap_or_default();
        let dead_duration = Duration::from_millis(
            dead_duration.unwrap_or(DEFAULT_DEAD_DURATION),
        );

        let mut entries = Vec::with_capacity(hosts.len());
        for spec in &hosts {
            let node = Node::new(spec, scheme)?;
            let connection = (create_connection)(&node);
            entries.push(PoolEntry::new(node, connection));
        }

        let pool = ConnectionPool::new(entries, dead_duration, log.clone());

        let transport = Transport {
            pool: Mutex::new(pool),
            schedule: Mutex::new(SniffSchedule {
                request_counter: 0,
                threshold: sniff_after_requests,
                sniffs_due_to_failure: 0,
            }),
            sniff_lock: Mutex::new(()),
            serializer,
            sniffer,
            create_connection,
            scheme,
            max_retries,
            sniff_after_requests,
            sniff_on_connection_fail,
            dead_duration,
            nodes_info_uri: nodes_info_uri
                .unwrap_or_else(|| String::from(DEFAULT_NODES_INFO_URI)),
            log,
        };

        if sniff_on_start {
            transport.sniff_hosts(false)?;
        }

        Ok(transport)
    }

    /// Dispatch one logical request.
    ///
    /// The body, when present, is serialized exactly once up front; retries
    /// reuse the encoded bytes, so a retried request can never be
    /// double-encoded. Each attempt selects a connection not known-dead at
    /// selection time. A transport-level failure benches the connection (or
    /// triggers a failure sniff) and the next attempt runs on a different
    /// one; serializer and sniffer errors propagate immediately instead.
    ///
    /// The caller sees either a decoded successful result or an error; the
    /// per-attempt failures along the way surface only inside
    /// [`Error::MaxRetriesExceeded`].
    pub fn perform_request(
        &self,
        method: &str,
        uri: &str,
        params: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<TransportResponse, Error> {
        // A zero bound would fall through the loop below having made no
        // attempt at all. new() rejects it; reject it here too.
        if self.max_retries == 0 {
            return Err(Error::Configuration(String::from(
                "max_retries must be at least 1",
            )));
        }

        let encoded = match body {
            Some(value) => Some(self.serializer.serialize(value)?),
            None => None,
        };

        let mut last_error = String::new();
        for attempt in 1..=self.max_retries {
            let entry = self.get_connection()?;

            match entry.connection.request(
                method,
                uri,
                params,
                encoded.as_deref(),
            ) {
                Ok(raw) => {
                    debug!(
                        self.log,
                        "request to {} succeeded", entry.node.name;
                        "status" => raw.status,
                        "attempt" => attempt
                    );
                    let data = if raw.body.is_empty() {
                        Value::Null
                    } else {
                        self.serializer.deserialize(&raw.body)?
                    };
                    return Ok(TransportResponse {
                        status: raw.status,
                        data,
                        info: raw.info,
                    });
                }
                Err(e) => {
                    warn!(
                        self.log,
                        "request to {} failed: {}", entry.node.name, e;
                        "attempt" => attempt
                    );
                    last_error = e.to_string();
                    self.mark_dead(&entry)?;
                }
            }
        }

        error!(
            self.log,
            "request failed on every connection";
            "attempts" => self.max_retries
        );
        Err(Error::MaxRetriesExceeded {
            attempts: self.max_retries,
            last_error,
        })
    }

    /// React to a failed connection. With `sniff_on_connection_fail` set the
    /// failure is treated as a topology event and the whole node universe is
    /// rebuilt; the individual connection is not benched. Otherwise the
    /// connection goes to the dead pool. Public so collaborators that detect
    /// failure outside the normal request path can feed it back.
    pub fn mark_dead(&self, entry: &PoolEntry<C>) -> Result<(), Error> {
        if self.sniff_on_connection_fail {
            self.sniff_hosts(true)
        } else {
            self.pool().mark_dead(&entry.key);
            Ok(())
        }
    }

    /// Refresh the known node set from the cluster's own topology endpoint.
    ///
    /// The topology request goes through the current pool, bypassing the
    /// request-counting throttle. The discovered hosts replace the entire
    /// connection universe, dead entries included; a node absent from the
    /// new topology disappears along with any health history. Concurrent
    /// sniffs are serialized, and the request counter is zeroed before any
    /// network activity so requests racing with a sniff cannot trigger
    /// another one.
    pub fn sniff_hosts(&self, failure: bool) -> Result<(), Error> {
        let _guard = self.sniff_lock.lock().unwrap();

        self.schedule.lock().unwrap().request_counter = 0;

        info!(self.log, "sniffing cluster topology"; "failure" => failure);

        let entry = self.pool().get_connection()?;
        let raw = entry
            .connection
            .request("GET", &self.nodes_info_uri, &[], None)
            .map_err(|e| {
                Error::Sniff(format!(
                    "topology request to {} failed: {}",
                    entry.node.name, e
                ))
            })?;

        let specs = self.sniffer.parse_nodes(self.scheme, &raw.body)?;

        let mut entries = Vec::with_capacity(specs.len());
        for spec in &specs {
            let node = Node::new(spec, self.scheme)?;
            let connection = (self.create_connection)(&node);
            entries.push(PoolEntry::new(node, connection));
        }

        info!(
            self.log,
            "rebuilding connection pool from topology";
            "nodes" => entries.len()
        );

        let new_pool =
            ConnectionPool::new(entries, self.dead_duration, self.log.clone());
        *self.pool.lock().unwrap() = new_pool;

        let mut schedule = self.schedule.lock().unwrap();
        if failure {
            schedule.sniffs_due_to_failure += 1;
            if let Some(original) = self.sniff_after_requests {
                schedule.threshold = Some(next_sniff_threshold(
                    original,
                    schedule.sniffs_due_to_failure,
                ));
                debug!(
                    self.log,
                    "tightened sniff threshold";
                    "threshold" => schedule.threshold,
                    "failure_sniffs" => schedule.sniffs_due_to_failure
                );
            }
        } else {
            schedule.sniffs_due_to_failure = 0;
            schedule.threshold = self.sniff_after_requests;
        }

        Ok(())
    }

    /// Build a connection for the given host descriptor and admit it to the
    /// pool. Returns [`Error::InvalidArgument`] for a malformed descriptor.
    pub fn add_connection(&self, spec: &NodeSpec) -> Result<(), Error> {
        let node = Node::new(spec, self.scheme)?;
        let connection = (self.create_connection)(&node);
        self.pool().add_connection(PoolEntry::new(node, connection));
        Ok(())
    }

    /// Read-only snapshot of the current alive connections.
    pub fn get_all_connections(&self) -> Vec<PoolEntry<C>> {
        self.pool().get_connections()
    }

    /// Read-only snapshot of the nodes currently benched in the dead pool.
    pub fn dead_nodes(&self) -> Vec<Node> {
        self.pool().dead_nodes()
    }

    pub fn get_stats(&self) -> TransportStats {
        let schedule = self.schedule.lock().unwrap();
        TransportStats {
            request_counter: schedule.request_counter,
            sniff_threshold: schedule.threshold,
            sniffs_due_to_failure: schedule.sniffs_due_to_failure,
        }
    }

    // Select a connection for the next attempt, counting the request
    // against the sniff threshold first. The counter check and the sniff it
    // may trigger happen before pool selection so the attempt runs against
    // the refreshed node set.
    fn get_connection(&self) -> Result<PoolEntry<C>, Error> {
        let mut sniff_due = false;
        {
            let mut schedule = self.schedule.lock().unwrap();
            if let Some(threshold) = schedule.threshold {
                schedule.request_counter += 1;
                if schedule.request_counter > threshold {
                    sniff_due = true;
                }
            }
        }

        if sniff_due {
            self.sniff_hosts(false)?;
        }

        self.pool().get_connection()
    }

    // Clone the current pool handle out of the slot. Holders of a clone keep
    // operating on the pool they saw even if a sniff swaps the slot under
    // them; their mark-dead calls against dropped nodes are no-ops.
    fn pool(&self) -> ConnectionPool<C> {
        self.pool.lock().unwrap().clone()
    }
}

// Failure-adjusted sniff threshold: 1 + original / 2^failures. The leading 1
// keeps the result at or above one however large the failure count grows.
fn next_sniff_threshold(original: u64, failures: u32) -> u64 {
    original.checked_shr(failures).unwrap_or(0).saturating_add(1)
}

//
// Unit tests for the scheduling math
//
#[cfg(test)]
mod test {
    use super::*;

    use quickcheck::quickcheck;

    quickcheck! {
        fn prop_threshold_never_below_one(
            original: u64,
            failures: u32
        ) -> bool {
            next_sniff_threshold(original, failures) >= 1
        }

        fn prop_threshold_shrinks_geometrically(
            original: u64,
            failures: u8
        ) -> bool {
            let failures = u32::from(failures % 63);
            let current = next_sniff_threshold(original, failures);
            let next = next_sniff_threshold(original, failures + 1);

            next <= current
                && next == (original >> (failures + 1)).saturating_add(1)
        }
    }

    #[test]
    fn threshold_matches_formula() {
        assert_eq!(next_sniff_threshold(100, 1), 51);
        assert_eq!(next_sniff_threshold(100, 2), 26);
        assert_eq!(next_sniff_threshold(100, 7), 1);
        assert_eq!(next_sniff_threshold(8, 1), 5);
        assert_eq!(next_sniff_threshold(8, 2), 3);
        assert_eq!(next_sniff_threshold(8, 64), 1);
    }
}
