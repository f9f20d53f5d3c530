// Copyright 2020 Joyent, Inc.

use serde_json::Value;

use crate::error::Error;
use crate::node::{NodePort, NodeSpec, Scheme};

/// Turns a raw cluster-topology response into normalized host descriptors.
///
/// `parse_nodes` must be a pure function of its input: no side effects, no
/// dependence on prior calls. The transport applies its own scheme to every
/// descriptor the sniffer returns.
pub trait Sniffer: Send + Sync {
    fn parse_nodes(
        &self,
        scheme: Scheme,
        raw: &[u8],
    ) -> Result<Vec<NodeSpec>, Error>;
}

/// The default sniffer. Parses the cluster nodes-info document:
///
/// ```json
/// {"nodes": {"<id>": {"http": {"publish_address": "host:port"}}}}
/// ```
///
/// A node entry may instead carry plain `"host"` and `"port"` fields, which
/// some older clusters publish. Entries exposing neither form (for example
/// coordination-only nodes with no http service) are skipped rather than
/// treated as an error.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClusterNodesSniffer;

impl Sniffer for ClusterNodesSniffer {
    fn parse_nodes(
        &self,
        scheme: Scheme,
        raw: &[u8],
    ) -> Result<Vec<NodeSpec>, Error> {
        let doc: Value = serde_json::from_slice(raw).map_err(|e| {
            Error::Sniff(format!("malformed topology response: {}", e))
        })?;

        let nodes = doc
            .get("nodes")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                Error::Sniff(String::from(
                    "topology response carries no nodes object",
                ))
            })?;

        let mut specs = Vec::with_capacity(nodes.len());
        for info in nodes.values() {
            if let Some((host, port)) = node_address(info) {
                specs.push(NodeSpec {
                    host,
                    port: Some(port),
                    scheme: Some(scheme),
                });
            }
        }

        Ok(specs)
    }
}

// Extract the host and port from one node entry, preferring the http publish
// address over the plain host/port fields.
fn node_address(info: &Value) -> Option<(String, NodePort)> {
    if let Some(addr) = info
        .get("http")
        .and_then(|http| http.get("publish_address"))
        .and_then(Value::as_str)
    {
        return parse_publish_address(addr);
    }

    let host = info.get("host").and_then(Value::as_str)?;
    let port = info.get("port").and_then(Value::as_u64)?;
    if port > u64::from(u16::max_value()) {
        return None;
    }
    Some((String::from(host), port as NodePort))
}

// A publish address is "host:port", where the host segment may itself be a
// "hostname/address" pair. In the paired form the address half is the
// routable one.
fn parse_publish_address(addr: &str) -> Option<(String, NodePort)> {
    let colon = addr.rfind(':')?;
    let (host, port) = addr.split_at(colon);
    let port = port[1..].parse::<NodePort>().ok()?;

    let host = match host.rfind('/') {
        Some(slash) => &host[slash + 1..],
        None => host,
    };
    if host.is_empty() {
        return None;
    }

    Some((String::from(host), port))
}

//
// Unit tests for topology parsing
//
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_publish_addresses() {
        let doc = br#"{
            "cluster_name": "pool",
            "nodes": {
                "n1": {"http": {"publish_address": "10.0.0.1:9200"}},
                "n2": {"http": {"publish_address": "node2.local/10.0.0.2:9201"}}
            }
        }"#;

        let mut specs = ClusterNodesSniffer
            .parse_nodes(Scheme::Http, doc)
            .unwrap();
        specs.sort_by(|a, b| a.host.cmp(&b.host));

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].host, "10.0.0.1");
        assert_eq!(specs[0].port, Some(9200));
        assert_eq!(specs[0].scheme, Some(Scheme::Http));
        assert_eq!(specs[1].host, "10.0.0.2");
        assert_eq!(specs[1].port, Some(9201));
    }

    #[test]
    fn parse_plain_host_port() {
        let doc = br#"{"nodes": {"n1": {"host": "10.0.0.9", "port": 9300}}}"#;

        let specs = ClusterNodesSniffer
            .parse_nodes(Scheme::Https, doc)
            .unwrap();

        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].host, "10.0.0.9");
        assert_eq!(specs[0].port, Some(9300));
        assert_eq!(specs[0].scheme, Some(Scheme::Https));
    }

    #[test]
    fn skip_nodes_without_an_address() {
        let doc = br#"{
            "nodes": {
                "data": {"http": {"publish_address": "10.0.0.1:9200"}},
                "coord": {"roles": ["master"]}
            }
        }"#;

        let specs = ClusterNodesSniffer
            .parse_nodes(Scheme::Http, doc)
            .unwrap();

        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].host, "10.0.0.1");
    }

    #[test]
    fn missing_nodes_object_is_an_error() {
        let result =
            ClusterNodesSniffer.parse_nodes(Scheme::Http, br#"{"ok": true}"#);
        assert!(matches!(result, Err(Error::Sniff(_))));
    }

    #[test]
    fn malformed_document_is_an_error() {
        let result =
            ClusterNodesSniffer.parse_nodes(Scheme::Http, b"not json");
        assert!(matches!(result, Err(Error::Sniff(_))));
    }
}
