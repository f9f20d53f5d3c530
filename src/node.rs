// Copyright 2020 Joyent, Inc.

use std::fmt;
use std::str::FromStr;

use base64;
use sha1::Sha1;

use derive_more::{Display, From, Into};

use crate::error::Error;

/// A base64 encoded identifier based on the node name, port, and scheme.
#[derive(
    Clone, Debug, Display, Eq, From, Hash, Into, Ord, PartialOrd, PartialEq,
)]
pub struct NodeKey(String);

/// The port number for a node. This is a type alias for u16.
pub type NodePort = u16;
/// The concatenation of the node host and port with a colon
/// delimiter. This is a type alias for String.
pub type NodeName = String;

/// The port assumed for a host descriptor that does not carry one.
pub const DEFAULT_PORT: NodePort = 9200;

/// The address scheme requests to a node are issued under.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Scheme {
    Http,
    Https,
}

impl Default for Scheme {
    fn default() -> Self {
        Scheme::Http
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Scheme::Http => write!(fmt, "http"),
            Scheme::Https => write!(fmt, "https"),
        }
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            _ => Err(Error::InvalidArgument(format!(
                "unknown scheme: {}",
                s
            ))),
        }
    }
}

/// An unresolved host descriptor, as supplied by callers at configuration
/// time or produced by a sniffer from a topology response. Missing fields are
/// filled in with the transport defaults when the descriptor is resolved into
/// a [`Node`]. A descriptor may also be parsed from a
/// `[scheme://]host[:port]` string.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NodeSpec {
    /// The host name or address. May not be empty.
    pub host: String,
    /// The port, if one was supplied.
    pub port: Option<NodePort>,
    /// The scheme, if one was supplied.
    pub scheme: Option<Scheme>,
}

impl NodeSpec {
    /// Return a descriptor for a host with the default port and scheme.
    pub fn new<H: Into<String>>(host: H) -> Self {
        NodeSpec {
            host: host.into(),
            port: None,
            scheme: None,
        }
    }

    /// Return a descriptor for a host and port with the default scheme.
    pub fn with_port<H: Into<String>>(host: H, port: NodePort) -> Self {
        NodeSpec {
            host: host.into(),
            port: Some(port),
            scheme: None,
        }
    }
}

impl FromStr for NodeSpec {
    type Err = Error;

    /// Parse a `[scheme://]host[:port]` descriptor string. Returns an
    /// [`Error::InvalidArgument`] for an unknown scheme, a non-numeric port,
    /// or an empty host.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = match s.find("://") {
            Some(idx) => (Some(s[..idx].parse::<Scheme>()?), &s[idx + 3..]),
            None => (None, s),
        };

        let (host, port) = match rest.rfind(':') {
            Some(idx) => {
                let port =
                    rest[idx + 1..].parse::<NodePort>().map_err(|_| {
                        Error::InvalidArgument(format!(
                            "invalid port in descriptor: {}",
                            s
                        ))
                    })?;
                (&rest[..idx], Some(port))
            }
            None => (rest, None),
        };

        if host.is_empty() {
            return Err(Error::InvalidArgument(String::from(
                "node host may not be empty",
            )));
        }

        Ok(NodeSpec {
            host: String::from(host),
            port,
            scheme,
        })
    }
}

/// A type representing the different information about a cluster node.
#[derive(Clone, Debug)]
pub struct Node {
    /// The concatenation of the node host and port with a colon delimiter.
    pub name: NodeName,
    /// The host name or address of the node.
    pub host: String,
    /// The port of the node.
    pub port: NodePort,
    /// The scheme requests to the node are issued under.
    pub scheme: Scheme,
}

impl Node {
    /// Resolve a host descriptor into a `Node`, filling in the given scheme
    /// and the default port where the descriptor is silent. Returns an
    /// [`Error::InvalidArgument`] for a descriptor with an empty host.
    pub fn new(spec: &NodeSpec, fallback_scheme: Scheme) -> Result<Self, Error> {
        if spec.host.is_empty() {
            return Err(Error::InvalidArgument(String::from(
                "node host may not be empty",
            )));
        }

        let port = spec.port.unwrap_or(DEFAULT_PORT);

        Ok(Node {
            name: node_name(&spec.host, port),
            host: spec.host.clone(),
            port,
            scheme: spec.scheme.unwrap_or(fallback_scheme),
        })
    }
}

// Concatentate the node host and port with a colon delimiter.
fn node_name(host: &str, port: NodePort) -> NodeName {
    [String::from(host), String::from(":"), port.to_string()].concat()
}

/// Return a base64 encoded identifier based on the fields of the node. The
/// key is stable across sniff cycles: two nodes with the same host, port, and
/// scheme hash to the same key no matter when their connections were built.
pub fn node_key(node: &Node) -> NodeKey {
    let mut sha1 = Sha1::new();
    sha1.update(node.name.as_bytes());
    sha1.update(b"||");
    sha1.update(node.port.to_string().as_bytes());
    sha1.update(b"||");
    sha1.update(node.scheme.to_string().as_bytes());

    base64::encode(&sha1.digest().bytes()).into()
}

//
// Unit tests for descriptor parsing
//
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_full_descriptor() {
        let spec: NodeSpec = "https://node1.local:9201".parse().unwrap();
        assert_eq!(spec.host, "node1.local");
        assert_eq!(spec.port, Some(9201));
        assert_eq!(spec.scheme, Some(Scheme::Https));
    }

    #[test]
    fn parse_bare_host() {
        let spec: NodeSpec = "10.0.0.1".parse().unwrap();
        assert_eq!(spec.host, "10.0.0.1");
        assert_eq!(spec.port, None);
        assert_eq!(spec.scheme, None);
    }

    #[test]
    fn parse_host_and_port() {
        let spec: NodeSpec = "10.0.0.1:9300".parse().unwrap();
        assert_eq!(spec.host, "10.0.0.1");
        assert_eq!(spec.port, Some(9300));
        assert_eq!(spec.scheme, None);
    }

    #[test]
    fn unknown_scheme_is_an_error() {
        let result = "ftp://10.0.0.1:21".parse::<NodeSpec>();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn non_numeric_port_is_an_error() {
        let result = "10.0.0.1:dynamic".parse::<NodeSpec>();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn empty_host_is_an_error() {
        assert!(matches!(
            "http://".parse::<NodeSpec>(),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            "http://:9200".parse::<NodeSpec>(),
            Err(Error::InvalidArgument(_))
        ));
    }
}
