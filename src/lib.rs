// Copyright 2020 Joyent, Inc.

//! A failover-aware request transport for multi-node services
//!
//! Carom is a library for "playing the carom" -- bouncing requests between
//! the nodes of a multi-node service until one of them answers. Given a pool
//! of candidate nodes it selects a healthy connection, dispatches the
//! request, and on a transport-level failure fails over to another node, up
//! to a configured attempt bound. Use of carom requires an implementation of
//! the [`Connection`](connection/trait.Connection.html) trait, which defines
//! the behavior for issuing one request against one node; everything else --
//! body encoding via the [`Serializer`](serializer/trait.Serializer.html)
//! trait and topology parsing via the
//! [`Sniffer`](sniffer/trait.Sniffer.html) trait -- ships with a default
//! JSON implementation.
//!
//! ## Failure handling and the dead pool
//!
//! A connection that fails a request is benched in a dead pool for a
//! configurable duration rather than discarded. Connection selection runs a
//! resurrection pass before every request, so benched connections rejoin the
//! rotation as their timers expire. If every connection is benched at once
//! the pool forces the oldest one back into service early; a request only
//! fails outright when the pool holds no connections at all or every
//! permitted attempt has been consumed.
//!
//! ## Sniffing
//!
//! Carom can periodically refresh its node set by querying the cluster's own
//! topology endpoint and rebuilding the pool from the result, a maintenance
//! operation interleaved with normal traffic: every Nth request triggers a
//! refresh. The refresh is a hard reset of the known-node universe -- nodes
//! absent from the new topology disappear, dead pool included.
//!
//! Two options couple sniffing to failure. With `sniff_on_connection_fail`,
//! a failed request rebuilds the whole node set instead of benching the one
//! connection. Independently, failure-triggered refreshes tighten the
//! request-count threshold geometrically (`1 + original / 2^failures`), so
//! a client seeing consecutive failures re-examines the cluster almost
//! every request until the failures stop, then decays back to the
//! configured baseline.
//!
//! ## Example
//!
//! Use a hypothetical `Connection` implementation to dispatch a request with
//! failover across three nodes.
//!
//! ```rust,ignore
//! use std::sync::Mutex;
//!
//! use serde_json::json;
//! use slog::{o, Drain, Logger};
//!
//! use carom::node::NodeSpec;
//! use carom::serializer::JsonSerializer;
//! use carom::sniffer::ClusterNodesSniffer;
//! use carom::transport::{Transport, TransportOptions};
//!
//! fn main() {
//!     let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
//!     let log = Logger::root(
//!         Mutex::new(
//!             slog_term::FullFormat::new(plain).build()
//!         ).fuse(),
//!         o!("build-id" => "0.1.0")
//!     );
//!
//!     let options = TransportOptions {
//!         hosts: vec![
//!             NodeSpec::with_port("10.0.0.1", 9200),
//!             NodeSpec::with_port("10.0.0.2", 9200),
//!             NodeSpec::with_port("10.0.0.3", 9200),
//!         ],
//!         max_retries: 3,
//!         sniff_after_requests: Some(1000),
//!         sniff_on_connection_fail: false,
//!         sniff_on_start: true,
//!         dead_duration: None,
//!         nodes_info_uri: None,
//!         serializer: JsonSerializer,
//!         sniffer: ClusterNodesSniffer,
//!         log,
//!     };
//!
//!     let transport = Transport::new(options, |node| {
//!         HyperConnection::new(node)
//!     }).unwrap();
//!
//!     let response = transport.perform_request(
//!         "POST",
//!         "/messages",
//!         &[],
//!         Some(&json!({"body": "hello"})),
//!     ).unwrap();
//!
//!     assert_eq!(response.status, 201);
//! }
//! ```

#![allow(missing_docs)]

pub mod connection;
pub mod connection_pool;
pub mod error;
pub mod node;
pub mod serializer;
pub mod sniffer;
pub mod transport;
