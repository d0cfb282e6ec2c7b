//! Error types.

use std::net::Ipv6Addr;

use thiserror::Error;

/// A fatal startup error in the static configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("node names must be unique, {0} is listed twice")]
    DuplicateNode(String),
    #[error("\"sink\" is reserved and can't name a node")]
    ReservedName,
    #[error("node name of {len} bytes exceeds the {max} bytes a cost report can carry")]
    NameTooLong { len: usize, max: usize },
    #[error("{0} nodes don't fit the 32 bit ordinals carried on the wire")]
    TooManyNodes(usize),
    #[error("unknown node {0}")]
    UnknownNode(String),
    #[error("expected one destination row set per node ({expected}), found {found}")]
    DestinationCount { expected: usize, found: usize },
    #[error("destination {destination} has {rows} rows, no row for node index {node}")]
    MissingRow {
        destination: usize,
        node: usize,
        rows: usize,
    },
    #[error("cost table for {node} has {rows} rows, expected {expected}")]
    RowCount {
        node: String,
        rows: usize,
        expected: usize,
    },
    #[error("{node} already has a cost table")]
    TableInstalled { node: String },
    #[error("{0} must be at least 1 ms")]
    ZeroInterval(&'static str),
    #[error("invalid network configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("couldn't read network configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// A recoverable forwarding failure, the packet is left to the next provider or dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("no known node for destination {0}")]
    UnknownDestination(Ipv6Addr),
    #[error("no candidate with a resolved egress towards {destination}")]
    NoRoute { destination: String },
}

/// A truncated or over-long record in an incoming datagram; the rest of the buffer is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MalformedReport {
    #[error("{remaining} trailing bytes don't make up a record")]
    Truncated { remaining: usize },
    #[error("declared name length {declared} overruns the {remaining} remaining bytes")]
    NameOverrun { declared: u32, remaining: usize },
}
