// Copyright 2020 Joyent, Inc.

use std::io::Error as IOError;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use slog::{o, Drain, Logger};

use carom::connection::{Connection, RawResponse, ResponseInfo};
use carom::connection_pool::dead_pool::DeadPool;
use carom::connection_pool::{ConnectionPool, PoolEntry};
use carom::error::Error;
use carom::node::{Node, NodeSpec, Scheme};

#[derive(Debug)]
pub struct DummyConnection;

impl Connection for DummyConnection {
    type Error = IOError;

    fn request(
        &self,
        _method: &str,
        _uri: &str,
        _params: &[(String, String)],
        _body: Option<&[u8]>,
    ) -> Result<RawResponse, IOError> {
        Ok(RawResponse {
            status: 200,
            body: Vec::new(),
            info: ResponseInfo::default(),
        })
    }
}

fn test_log() -> Logger {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    Logger::root(
        Mutex::new(slog_term::FullFormat::new(plain).build()).fuse(),
        o!("build-id" => "0.1.0"),
    )
}

fn entry(host: &str) -> PoolEntry<DummyConnection> {
    let node =
        Node::new(&NodeSpec::with_port(host, 9200), Scheme::Http).unwrap();
    PoolEntry::new(node, DummyConnection)
}

#[test]
fn dead_pool_ttl() {
    let dead_duration = Duration::from_millis(50);
    let mut dead = DeadPool::new(dead_duration);
    let t0 = Instant::now();

    dead.mark_dead(entry("a"), t0);

    // Not eligible one tick before the timer expires, eligible exactly at
    // expiry.
    let early = dead.resurrect(false, t0 + Duration::from_millis(49));
    assert!(early.is_empty());
    assert_eq!(dead.len(), 1);

    let due = dead.resurrect(false, t0 + dead_duration);
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].node.name, "a:9200");
    assert!(dead.is_empty());
}

#[test]
fn dead_pool_forced_resurrection() {
    let mut dead = DeadPool::new(Duration::from_secs(60));
    let t0 = Instant::now();

    dead.mark_dead(entry("a"), t0);
    dead.mark_dead(entry("b"), t0 + Duration::from_millis(1));

    // Nothing has expired, but force still yields exactly the oldest entry.
    let forced = dead.resurrect(true, t0 + Duration::from_millis(2));
    assert_eq!(forced.len(), 1);
    assert_eq!(forced[0].node.name, "a:9200");
    assert_eq!(dead.len(), 1);
}

#[test]
fn dead_pool_empty_is_safe() {
    let mut dead: DeadPool<DummyConnection> =
        DeadPool::new(Duration::from_secs(60));
    let now = Instant::now();

    assert!(dead.resurrect(false, now).is_empty());
    assert!(dead.resurrect(true, now).is_empty());
}

#[test]
fn dead_pool_dedups_by_node_key() {
    let dead_duration = Duration::from_millis(50);
    let mut dead = DeadPool::new(dead_duration);
    let t0 = Instant::now();

    dead.mark_dead(entry("a"), t0);
    dead.mark_dead(entry("a"), t0 + Duration::from_millis(30));
    assert_eq!(dead.len(), 1);

    // The second marking refreshed the timer, so the original expiry no
    // longer applies.
    let early = dead.resurrect(false, t0 + dead_duration);
    assert!(early.is_empty());

    let due =
        dead.resurrect(false, t0 + Duration::from_millis(30) + dead_duration);
    assert_eq!(due.len(), 1);
    assert!(dead.is_empty());
}

#[test]
fn pool_round_robin_selection() {
    let pool = ConnectionPool::new(
        vec![entry("a"), entry("b"), entry("c")],
        Duration::from_secs(60),
        test_log(),
    );

    let picks: Vec<String> = (0..6)
        .map(|_| pool.get_connection().unwrap().node.name)
        .collect();

    assert_eq!(
        picks,
        vec!["a:9200", "b:9200", "c:9200", "a:9200", "b:9200", "c:9200"]
    );
}

#[test]
fn pool_excludes_dead_connections() {
    let pool = ConnectionPool::new(
        vec![entry("a"), entry("b")],
        Duration::from_secs(60),
        test_log(),
    );

    let first = pool.get_connection().unwrap();
    assert_eq!(first.node.name, "a:9200");
    pool.mark_dead(&first.key);

    for _ in 0..4 {
        assert_eq!(pool.get_connection().unwrap().node.name, "b:9200");
    }

    let dead: Vec<String> =
        pool.dead_nodes().iter().map(|n| n.name.clone()).collect();
    assert_eq!(dead, vec!["a:9200"]);

    let stats = pool.get_stats();
    assert_eq!(stats.alive_connections, 1.into());
    assert_eq!(stats.dead_connections, 1.into());
}

#[test]
fn pool_forces_resurrection_when_alive_set_is_empty() {
    let pool = ConnectionPool::new(
        vec![entry("a")],
        Duration::from_secs(60),
        test_log(),
    );

    let only = pool.get_connection().unwrap();
    pool.mark_dead(&only.key);
    assert_eq!(pool.get_stats().alive_connections, 0.into());

    // The timer is nowhere near expiry, but the pool must still produce a
    // connection.
    let forced = pool.get_connection().unwrap();
    assert_eq!(forced.node.name, "a:9200");
    assert!(pool.dead_nodes().is_empty());
}

#[test]
fn pool_with_no_connections_is_an_error() {
    let pool: ConnectionPool<DummyConnection> =
        ConnectionPool::new(Vec::new(), Duration::from_secs(60), test_log());

    assert!(matches!(
        pool.get_connection(),
        Err(Error::NoAliveConnections)
    ));
}

#[test]
fn pool_does_not_readmit_a_benched_node() {
    let pool = ConnectionPool::new(
        vec![entry("a"), entry("b")],
        Duration::from_secs(60),
        test_log(),
    );

    let first = pool.get_connection().unwrap();
    assert_eq!(first.node.name, "a:9200");
    pool.mark_dead(&first.key);

    // Re-registering the benched node must not leave it in both sets; it
    // stays benched and rejoins through resurrection alone.
    pool.add_connection(entry("a"));

    let stats = pool.get_stats();
    assert_eq!(stats.alive_connections, 1.into());
    assert_eq!(stats.dead_connections, 1.into());

    for _ in 0..3 {
        assert_eq!(pool.get_connection().unwrap().node.name, "b:9200");
    }
}

#[test]
fn pool_add_connection_replaces_in_place() {
    let pool = ConnectionPool::new(
        vec![entry("a"), entry("b")],
        Duration::from_secs(60),
        test_log(),
    );

    // Same node again: rotation order and count are unchanged.
    pool.add_connection(entry("a"));
    assert_eq!(pool.get_stats().alive_connections, 2.into());
    assert_eq!(pool.get_connection().unwrap().node.name, "a:9200");

    pool.add_connection(entry("c"));
    let names: Vec<String> = pool
        .get_connections()
        .iter()
        .map(|e| e.node.name.clone())
        .collect();
    assert_eq!(names, vec!["b:9200", "a:9200", "c:9200"]);
}
