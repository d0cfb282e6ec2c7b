//! Startup construction of the cost tables from the static candidate specification.

use tracing::warn;

use crate::core::{
    cost_table::{CandidateEntry, CostTable},
    error::ConfigError,
    id::{Hop, NodeId, NodeList},
    traits::Topology,
};

/// The static per-destination candidate specification.
///
/// `destinations[d][n]` lists the next hops node `n` may use towards destination `d`, both indexed
/// in [`NodeList`] order. Destination rows naming the node itself hold the sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationSpec {
    destinations: Vec<Vec<Vec<Hop>>>,
}

impl DestinationSpec {
    /// Parses the configured names, checking them against the node list.
    pub fn new(nodes: &NodeList, destinations: &[Vec<Vec<String>>]) -> Result<Self, ConfigError> {
        if destinations.len() != nodes.len() {
            return Err(ConfigError::DestinationCount {
                expected: nodes.len(),
                found: destinations.len(),
            });
        }

        let destinations = destinations
            .iter()
            .map(|rows| {
                rows.iter()
                    .map(|hops| {
                        hops.iter()
                            .map(|name| {
                                let hop = Hop::parse(name);
                                match hop.neighbor() {
                                    Some(name) if nodes.find(name).is_none() => {
                                        Err(ConfigError::UnknownNode(name.to_string()))
                                    }
                                    _ => Ok(hop),
                                }
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect::<Result<_, _>>()?;

        Ok(Self { destinations })
    }

    /// Returns the number of destinations.
    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Returns the candidates `node` may use towards `destination`.
    pub fn candidates(&self, destination: usize, node: usize) -> Option<&[Hop]> {
        self.destinations
            .get(destination)?
            .get(node)
            .map(Vec::as_slice)
    }

    /// Builds the initial cost table of `node`: every cost is 0, every egress unresolved.
    pub fn build_table(&self, node: &NodeId) -> Result<CostTable, ConfigError> {
        let rows = self
            .destinations
            .iter()
            .enumerate()
            .map(|(destination, rows)| match rows.get(node.index()) {
                Some(hops) => Ok(hops.iter().cloned().map(CandidateEntry::new).collect()),
                None => Err(ConfigError::MissingRow {
                    destination,
                    node: node.index(),
                    rows: rows.len(),
                }),
            })
            .collect::<Result<_, _>>()?;

        Ok(CostTable::from_rows(rows))
    }

    /// Builds the cost tables of every node, in node order.
    pub fn build_tables(&self, nodes: &NodeList) -> Result<Vec<CostTable>, ConfigError> {
        nodes.iter().map(|node| self.build_table(node)).collect()
    }

    /// Returns the destination rows `reporter` must report to `neighbor`: those where the
    /// neighbor's own candidates include the reporter, so the neighbor will find a matching entry.
    pub fn rows_reported_to(&self, reporter: &NodeId, neighbor: &NodeId) -> Vec<u32> {
        self.destinations
            .iter()
            .enumerate()
            .filter(|(_, rows)| {
                rows.get(neighbor.index()).is_some_and(|hops| {
                    hops.iter()
                        .any(|hop| hop.neighbor() == Some(reporter.name()))
                })
            })
            .map(|(destination, _)| destination as u32)
            .collect()
    }
}

/// Records the local egress of every candidate with a direct link, returning the number of
/// candidates left unresolved.
pub fn resolve_egresses<T: Topology + ?Sized>(
    local: &NodeId,
    table: &mut CostTable,
    topology: &T,
) -> usize {
    let mut unresolved = 0;

    for entry in table.entries_mut() {
        // The sink never resolves and isn't expected to.
        let Some(neighbor) = entry.hop.neighbor() else {
            continue;
        };

        match topology.egress_towards(local.name(), neighbor) {
            Some(egress) => entry.egress = Some(egress),
            None => {
                warn!(node = %local, %neighbor, "no direct link to candidate, it won't be forwarded through");
                unresolved += 1;
            }
        }
    }

    unresolved
}
