//! The per-node protocol instance: cost table ownership, cost report exchange and the node life
//! cycle.

use std::{fmt, net::Ipv6Addr, sync::Arc, time::Duration};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::{
    config::Config,
    core::{
        address::{AddressBook, Interface},
        candidates::{self, DestinationSpec},
        cost_table::{Applied, CostTable},
        error::{ConfigError, MalformedReport},
        id::{NodeId, NodeList},
        message::{Channel, CostReport, Message, QueueRecord},
        traits::{QueueOccupancy, Topology},
    },
};

pub mod forwarding;
#[cfg(feature = "sync")]
mod sync;
pub mod telemetry;

#[cfg(feature = "sync")]
#[cfg_attr(doc_cfg, doc(cfg(feature = "sync")))]
pub use sync::{PeerSockets, SyncRouter};

use telemetry::QueueTelemetry;

/// A node's position in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeState {
    /// Created, no cost table yet.
    Uninitialized,
    /// The cost table is installed, all egresses unresolved.
    TableBuilt,
    /// Egresses are resolved, the node may be started.
    EgressResolved,
    /// Exchanging reports and forwarding.
    Active,
    /// Shut down, the table is frozen.
    Stopped,
}

/// The far end of a directed link cost reports are sent over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeLink {
    pub neighbor: NodeId,
    /// The neighbor's address on the shared link.
    pub peer: Ipv6Addr,
    /// The destination rows the neighbor has a use for.
    pub rows: Vec<u32>,
}

/// Counters describing the handling of one received datagram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Processed {
    /// Records that updated the local state.
    pub applied: usize,
    /// Well-formed records that were ignored.
    pub dropped: usize,
    /// Set if the tail of the datagram couldn't be decoded.
    pub malformed: Option<MalformedReport>,
}

/// A record decoded from a control datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Record {
    Cost(CostReport),
    Queue(QueueRecord),
}

/// The protocol instance of a single node.
#[derive(Debug, Clone)]
pub struct QRouter {
    local: NodeId,
    // The local name as it goes on the wire.
    sender: Bytes,
    nodes: Arc<NodeList>,
    addresses: Arc<AddressBook>,
    config: Arc<Config>,
    table: CostTable,
    interfaces: Vec<Interface>,
    links: Vec<ExchangeLink>,
    telemetry_peers: Vec<Ipv6Addr>,
    telemetry: QueueTelemetry,
    state: NodeState,
}

impl QRouter {
    /// Creates an uninitialized router for `local`.
    pub fn new(
        local: NodeId,
        nodes: Arc<NodeList>,
        addresses: Arc<AddressBook>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            sender: Bytes::copy_from_slice(local.name().as_bytes()),
            local,
            nodes,
            addresses,
            config,
            table: CostTable::default(),
            interfaces: Vec::new(),
            links: Vec::new(),
            telemetry_peers: Vec::new(),
            telemetry: QueueTelemetry::default(),
            state: NodeState::Uninitialized,
        }
    }

    /// Creates a router and builds its cost table from the candidate specification.
    pub fn with_spec(
        local: NodeId,
        nodes: Arc<NodeList>,
        addresses: Arc<AddressBook>,
        config: Arc<Config>,
        spec: &DestinationSpec,
    ) -> Result<Self, ConfigError> {
        let table = spec.build_table(&local)?;
        let mut router = Self::new(local, nodes, addresses, config);
        router.install_table(table)?;

        Ok(router)
    }

    /// Returns this router's local identity.
    pub fn local(&self) -> &NodeId {
        &self.local
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn nodes(&self) -> &NodeList {
        &self.nodes
    }

    pub fn address_book(&self) -> &AddressBook {
        &self.addresses
    }

    pub fn table(&self) -> &CostTable {
        &self.table
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn links(&self) -> &[ExchangeLink] {
        &self.links
    }

    pub fn telemetry(&self) -> &QueueTelemetry {
        &self.telemetry
    }

    pub fn is_active(&self) -> bool {
        self.state == NodeState::Active
    }

    /// Installs the cost table, it must hold exactly one row per node. A table can only be
    /// installed once, on an uninitialized router.
    pub fn install_table(&mut self, table: CostTable) -> Result<(), ConfigError> {
        if self.state != NodeState::Uninitialized {
            return Err(ConfigError::TableInstalled {
                node: self.local.name().to_string(),
            });
        }

        if table.len() != self.nodes.len() {
            return Err(ConfigError::RowCount {
                node: self.local.name().to_string(),
                rows: table.len(),
                expected: self.nodes.len(),
            });
        }

        self.table = table;
        self.transition(NodeState::TableBuilt);

        Ok(())
    }

    /// Records the local interfaces and their addresses.
    pub fn set_interfaces(&mut self, interfaces: Vec<Interface>) {
        self.interfaces = interfaces;
    }

    /// Resolves the egress of every candidate. Returns `false` if the table isn't built yet or the
    /// egresses were already resolved.
    pub fn resolve_egresses<T: Topology + ?Sized>(&mut self, topology: &T) -> bool {
        if self.state != NodeState::TableBuilt {
            return false;
        }

        let unresolved = candidates::resolve_egresses(&self.local, &mut self.table, topology);
        if unresolved > 0 {
            debug!(node = %self.local, unresolved, "egress resolution complete");
        }
        self.transition(NodeState::EgressResolved);

        true
    }

    /// Adds a link cost reports are sent over, selecting the rows the neighbor has a use for.
    pub fn add_exchange_link(&mut self, neighbor: NodeId, peer: Ipv6Addr, spec: &DestinationSpec) {
        let rows = spec.rows_reported_to(&self.local, &neighbor);
        trace!(node = %self.local, %neighbor, ?rows, "exchange link added");

        self.links.push(ExchangeLink {
            neighbor,
            peer,
            rows,
        });
    }

    /// Adds a peer queue telemetry is sent to.
    pub fn add_telemetry_peer(&mut self, peer: Ipv6Addr) {
        self.telemetry_peers.push(peer);
    }

    /// Starts exchanging and forwarding, only possible once egresses are resolved.
    pub fn start(&mut self) -> bool {
        if self.state != NodeState::EgressResolved {
            return false;
        }

        self.transition(NodeState::Active);
        true
    }

    /// Stops the router for good; its table isn't mutated afterwards. No transition leaves
    /// `Stopped`.
    pub fn stop(&mut self) {
        if self.state != NodeState::Stopped {
            self.transition(NodeState::Stopped);
        }
    }

    fn transition(&mut self, state: NodeState) {
        debug!(node = %self.local, from = ?self.state, to = ?state, "state transition");
        self.state = state;
    }

    // EXCHANGE

    /// Generates the cost reports for one link, `None` if there is nothing to send.
    pub fn cost_reports(&self, link: usize) -> Option<(Ipv6Addr, Message)> {
        if !self.is_active() {
            return None;
        }

        let link = self.links.get(link)?;
        let reports: Vec<_> = link
            .rows
            .iter()
            .filter_map(|&row| {
                let min_cost = self.table.min_cost(row as usize);
                if min_cost.is_none() {
                    debug!(node = %self.local, row, "no candidate in row, nothing to report");
                }

                min_cost.map(|min_cost| CostReport {
                    min_cost,
                    row,
                    sender: self.sender.clone(),
                })
            })
            .collect();

        if reports.is_empty() {
            return None;
        }

        Some((link.peer, Message::CostReports(reports)))
    }

    /// Samples every local egress and generates one telemetry message per peer.
    pub fn queue_status<Q: QueueOccupancy + ?Sized>(
        &self,
        occupancy: &Q,
    ) -> Vec<(Ipv6Addr, Message)> {
        if !self.is_active() || self.telemetry_peers.is_empty() {
            return Vec::new();
        }

        let records: Vec<_> = self
            .interfaces
            .iter()
            .filter_map(|interface| {
                interface.global_address().map(|addr| QueueRecord {
                    reporter: self.local.numeric(),
                    interface: addr,
                    occupancy: occupancy.occupancy(self.local.name(), interface.egress),
                })
            })
            .collect();

        if records.is_empty() {
            return Vec::new();
        }

        self.telemetry_peers
            .iter()
            .map(|&peer| (peer, Message::QueueStatus(records.clone())))
            .collect()
    }

    /// Applies a single cost report: `cost = min_cost + occupancy` of the link towards the sender.
    /// Returns `None` without touching the table unless the router is active.
    pub fn process_cost_report<Q: QueueOccupancy + ?Sized>(
        &mut self,
        report: &CostReport,
        occupancy: &Q,
    ) -> Option<Applied> {
        if !self.is_active() {
            debug!(node = %self.local, state = ?self.state, "not active, cost report ignored");
            return None;
        }

        Some(self.apply_cost_report(report, occupancy))
    }

    fn apply_cost_report<Q: QueueOccupancy + ?Sized>(
        &mut self,
        report: &CostReport,
        occupancy: &Q,
    ) -> Applied {
        let node = self.local.name();
        let applied = self.table.apply_report(
            report.row as usize,
            &report.sender,
            report.min_cost,
            // Unresolved candidates have no queue to read, they get the bare reported minimum.
            |egress| egress.map_or(0, |egress| occupancy.occupancy(node, egress)),
        );

        match applied {
            Applied::Updated { previous, cost } => {
                trace!(node, row = report.row, sender = ?report.sender, previous, cost, "cost updated")
            }
            Applied::RowOutOfRange => {
                debug!(node, row = report.row, rows = self.table.len(), "report for unknown row dropped")
            }
            Applied::NoMatchingCandidate => {
                trace!(node, row = report.row, sender = ?report.sender, "sender isn't a candidate, report dropped")
            }
        }

        applied
    }

    /// Records a peer's queue sample. Returns `false` without recording anything unless the router
    /// is active.
    pub fn process_queue_record(&mut self, record: QueueRecord, now: Duration) -> bool {
        if !self.is_active() {
            debug!(node = %self.local, state = ?self.state, "not active, queue record ignored");
            return false;
        }

        self.telemetry.record(&self.local, &self.nodes, record, now);
        true
    }

    /// Handles a datagram received on one of the control channels.
    pub fn process_datagram<Q: QueueOccupancy + ?Sized>(
        &mut self,
        channel: Channel,
        source: Ipv6Addr,
        payload: Bytes,
        occupancy: &Q,
        now: Duration,
    ) -> Processed {
        match channel {
            Channel::CostReport => {
                let records = Message::cost_reports(payload).map(|r| r.map(Record::Cost));
                self.receive(channel, source, records, occupancy, now)
            }
            Channel::QueueStatus => {
                let records = Message::queue_records(payload).map(|r| r.map(Record::Queue));
                self.receive(channel, source, records, occupancy, now)
            }
        }
    }

    /// Applies the records decoded from one datagram in order, nothing unless the router is active.
    pub(crate) fn receive<I, S, Q>(
        &mut self,
        channel: Channel,
        source: S,
        records: I,
        occupancy: &Q,
        now: Duration,
    ) -> Processed
    where
        I: IntoIterator<Item = Result<Record, MalformedReport>>,
        S: fmt::Display,
        Q: QueueOccupancy + ?Sized,
    {
        let mut processed = Processed::default();

        if !self.is_active() {
            debug!(node = %self.local, state = ?self.state, %source, "not active, datagram ignored");
            return processed;
        }

        for record in records {
            match record {
                Ok(Record::Cost(report)) => match self.apply_cost_report(&report, occupancy) {
                    Applied::Updated { .. } => processed.applied += 1,
                    _ => processed.dropped += 1,
                },
                Ok(Record::Queue(record)) => {
                    self.telemetry.record(&self.local, &self.nodes, record, now);
                    processed.applied += 1;
                }
                Err(e) => processed.malformed = Some(e),
            }
        }

        if let Some(e) = processed.malformed {
            warn!(node = %self.local, %source, ?channel, applied = processed.applied, "malformed datagram: {e}");
        }

        processed
    }
}
