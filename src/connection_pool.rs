// Copyright 2020 Joyent, Inc.

pub mod dead_pool;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use derive_more::{
    Add, AddAssign, Display, From, Into, Sub, SubAssign,
};
use slog::{debug, info, warn, Logger};

use crate::connection::Connection;
use crate::connection_pool::dead_pool::DeadPool;
use crate::error::Error;
use crate::node::{node_key, Node, NodeKey};

#[derive(
    Add, AddAssign, Clone, Copy, Debug, Display, Eq, From, Into, Ord,
    PartialOrd, PartialEq, Sub, SubAssign,
)]
pub struct ConnectionCount(u32);

/// Point-in-time counts of the pool's alive and dead sets.
#[derive(Copy, Clone, Debug)]
pub struct ConnectionPoolStats {
    pub alive_connections: ConnectionCount,
    pub dead_connections: ConnectionCount,
}

/// One pool slot: a node, its stable identity key, and the connection bound
/// to it. Cloning an entry clones the handle, not the underlying connection.
#[derive(Debug)]
pub struct PoolEntry<C> {
    /// The stable identity of the node across sniff cycles.
    pub key: NodeKey,
    /// The node this connection is bound to.
    pub node: Node,
    /// The shared connection handle.
    pub connection: Arc<C>,
}

impl<C> Clone for PoolEntry<C> {
    fn clone(&self) -> PoolEntry<C> {
        PoolEntry {
            key: self.key.clone(),
            node: self.node.clone(),
            connection: Arc::clone(&self.connection),
        }
    }
}

impl<C> PoolEntry<C>
where
    C: Connection,
{
    /// Wrap a freshly built connection for the given node.
    pub fn new(node: Node, connection: C) -> Self {
        PoolEntry {
            key: node_key(&node),
            node,
            connection: Arc::new(connection),
        }
    }
}

// The alive queue and the dead registry, mutated together under one lock.
#[derive(Debug)]
struct PoolData<C> {
    alive: VecDeque<PoolEntry<C>>,
    dead: DeadPool<C>,
}

// Shared, mutex-protected pool state.
#[derive(Debug)]
struct ProtectedData<C>(Arc<Mutex<PoolData<C>>>);

impl<C> ProtectedData<C>
where
    C: Connection,
{
    fn new(data: PoolData<C>) -> Self {
        ProtectedData(Arc::new(Mutex::new(data)))
    }

    fn lock(&self) -> MutexGuard<PoolData<C>> {
        self.0.lock().unwrap()
    }
}

impl<C> Clone for ProtectedData<C> {
    fn clone(&self) -> ProtectedData<C> {
        ProtectedData(Arc::clone(&self.0))
    }
}

/// The single source of truth for which connections are usable right now.
///
/// The pool composes an alive queue with a [`DeadPool`]. Selection is
/// round-robin: the queue is rotated on every
/// [`get_connection`](ConnectionPool::get_connection) call. Before any
/// selection the pool runs a resurrection pass so that connections whose
/// exclusion timer has expired rejoin the rotation, and if the alive queue is
/// empty it forces the oldest dead connection back into service rather than
/// failing the request outright.
///
/// All mutation happens under a single internal mutex, so one pool instance
/// may be shared freely across threads. Clones share the same state.
#[derive(Debug)]
pub struct ConnectionPool<C> {
    protected_data: ProtectedData<C>,
    log: Logger,
}

impl<C> Clone for ConnectionPool<C> {
    fn clone(&self) -> ConnectionPool<C> {
        ConnectionPool {
            protected_data: self.protected_data.clone(),
            log: self.log.clone(),
        }
    }
}

impl<C> ConnectionPool<C>
where
    C: Connection,
{
    /// Wrap a fresh set of connections with no pre-existing dead entries.
    pub fn new(
        entries: Vec<PoolEntry<C>>,
        dead_duration: Duration,
        log: Logger,
    ) -> Self {
        let data = PoolData {
            alive: entries.into_iter().collect(),
            dead: DeadPool::new(dead_duration),
        };

        ConnectionPool {
            protected_data: ProtectedData::new(data),
            log,
        }
    }

    /// Hand out a connection for the next request.
    ///
    /// Runs a non-forced resurrection pass first, then a forced one if the
    /// alive queue is still empty, so the only failure mode is a pool with no
    /// connections at all. A connection sitting in the dead registry at
    /// selection time is never returned.
    pub fn get_connection(&self) -> Result<PoolEntry<C>, Error> {
        let now = Instant::now();
        let mut data = self.protected_data.lock();

        for entry in data.dead.resurrect(false, now) {
            info!(
                self.log,
                "returning node {} to rotation", entry.node.name
            );
            data.alive.push_back(entry);
        }

        if data.alive.is_empty() {
            // Nothing alive. Pull the oldest dead connection back early so
            // forward progress is still possible.
            for entry in data.dead.resurrect(true, now) {
                warn!(
                    self.log,
                    "forcing dead node {} back into rotation",
                    entry.node.name
                );
                data.alive.push_back(entry);
            }
        }

        match data.alive.pop_front() {
            Some(entry) => {
                let selected = entry.clone();
                data.alive.push_back(entry);
                debug!(
                    self.log,
                    "selected connection for node {}", selected.node.name
                );
                Ok(selected)
            }
            None => Err(Error::NoAliveConnections),
        }
    }

    /// Remove the connection with the given key from the alive queue and
    /// bench it in the dead registry. A key that is neither alive nor dead
    /// belongs to a node dropped by an interleaved topology refresh and is
    /// ignored.
    pub fn mark_dead(&self, key: &NodeKey) {
        let now = Instant::now();
        let mut data = self.protected_data.lock();

        if let Some(pos) = data.alive.iter().position(|e| &e.key == key) {
            if let Some(entry) = data.alive.remove(pos) {
                warn!(self.log, "marking node {} dead", entry.node.name);
                data.dead.mark_dead(entry, now);
            }
        }
    }

    /// Admit a connection to the alive queue. An entry for a node already in
    /// rotation replaces the existing one in place. A node currently benched
    /// keeps its dead entry and its timer and rejoins through resurrection
    /// alone, so a node never occupies both sets at once.
    pub fn add_connection(&self, entry: PoolEntry<C>) {
        let mut data = self.protected_data.lock();

        if data.dead.contains(&entry.key) {
            debug!(
                self.log,
                "node {} is benched, deferring to resurrection",
                entry.node.name
            );
            return;
        }

        info!(self.log, "adding connection for node {}", entry.node.name);
        match data.alive.iter().position(|e| e.key == entry.key) {
            Some(pos) => data.alive[pos] = entry,
            None => data.alive.push_back(entry),
        }
    }

    /// Read-only snapshot of the current alive connections, in rotation
    /// order.
    pub fn get_connections(&self) -> Vec<PoolEntry<C>> {
        let data = self.protected_data.lock();
        data.alive.iter().cloned().collect()
    }

    /// Read-only snapshot of the nodes currently benched in the dead
    /// registry, oldest first.
    pub fn dead_nodes(&self) -> Vec<Node> {
        let data = self.protected_data.lock();
        data.dead.nodes()
    }

    pub fn get_stats(&self) -> ConnectionPoolStats {
        let data = self.protected_data.lock();
        ConnectionPoolStats {
            alive_connections: ConnectionCount::from(data.alive.len() as u32),
            dead_connections: ConnectionCount::from(data.dead.len() as u32),
        }
    }
}
