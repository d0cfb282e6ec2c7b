//! A congestion-aware next-hop selection protocol based on Q-routing.
//!
//! Every node holds a cost table (its "Q-register") with one row per destination, each listing the
//! candidate next hops allowed by a precomputed per-destination graph. Neighbors periodically report
//! the minimum cost of the rows they share; on receipt a node sets the matching candidate's cost to
//! the reported minimum plus the occupancy of its own egress queue towards that neighbor. Packets
//! are then forwarded through the cheapest candidate with a resolved egress.
//!
//! The routers never send anything themselves, they return the datagrams to send and are handed the
//! datagrams received. Two drivers are provided:
//!
//! 1. [`sim::Simulation`], a deterministic discrete event simulator over point-to-point links.
//! 2. `router::SyncRouter` (`sync` feature), driving a router over tokio UDP sockets.
//!
//! Notable differences with classic Q-routing:
//!
//! 1. Costs aren't learned with a rate, the reported minimum plus the local queue replaces the
//!    previous estimate outright.
//! 2. Candidates are restricted to a fixed per-destination graph, the cost exchange only picks among
//!    them.

#![cfg_attr(doc_cfg, feature(doc_cfg))]

#[cfg(feature = "codec")]
#[cfg_attr(doc_cfg, doc(cfg(feature = "codec")))]
pub mod codec;
pub mod config;
pub mod router;
pub mod sim;

mod core;

pub use crate::core::{
    address::{self, AddressBook, Interface},
    candidates::{self, resolve_egresses, DestinationSpec},
    cost_table::{self, Applied, CandidateEntry, CostTable},
    error::{ConfigError, MalformedReport, RouteError},
    id::{Hop, NodeId, NodeList, SINK},
    message,
    traits::{Egress, QueueOccupancy, Topology},
};
