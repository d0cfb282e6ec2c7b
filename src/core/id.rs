//! Node identity types.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::core::{error::ConfigError, message::CostReport};

/// The reserved next-hop name denoting "this row is the node's own identity".
pub const SINK: &str = "sink";

/// A node's globally agreed name paired with its ordinal in the shared [`NodeList`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    name: Arc<str>,
    index: u32,
}

impl NodeId {
    /// Returns the node's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the node's ordinal, which is also the index of the cost table row describing it as a
    /// destination.
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Returns the ordinal as it is carried in queue telemetry records.
    pub fn numeric(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A candidate next hop within a destination row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Hop {
    /// The row describes the local node itself, there is nowhere to forward to.
    Sink,
    /// A neighboring node, by name.
    Node(Arc<str>),
}

impl Hop {
    /// Parses a configured hop name, mapping the reserved name to [`Hop::Sink`].
    pub fn parse(name: &str) -> Self {
        if name == SINK {
            Hop::Sink
        } else {
            Hop::Node(name.into())
        }
    }

    /// Returns the neighbor's name, `None` for the sink.
    pub fn neighbor(&self) -> Option<&str> {
        match self {
            Hop::Sink => None,
            Hop::Node(name) => Some(name),
        }
    }

    /// Returns `true` if the raw sender name carried in a cost report designates this hop.
    pub fn matches(&self, sender: &[u8]) -> bool {
        matches!(self, Hop::Node(name) if name.as_bytes() == sender)
    }
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hop::Sink => f.write_str(SINK),
            Hop::Node(name) => f.write_str(name),
        }
    }
}

/// The ordered list of every node identity in the network.
///
/// Every node holds an identical copy, so position `i` designates the same destination everywhere.
#[derive(Debug, Clone, Default)]
pub struct NodeList {
    ids: Vec<NodeId>,
    by_name: HashMap<Arc<str>, usize>,
}

impl NodeList {
    /// Builds the list, rejecting duplicates, the reserved sink name and names too long to be
    /// carried in a cost report.
    pub fn new<I, S>(names: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();

        for name in names {
            let name = name.as_ref();
            if name == SINK {
                return Err(ConfigError::ReservedName);
            }

            if name.len() > CostReport::MAX_SENDER_LEN {
                return Err(ConfigError::NameTooLong {
                    len: name.len(),
                    max: CostReport::MAX_SENDER_LEN,
                });
            }

            let position = list.ids.len();
            let index =
                u32::try_from(position).map_err(|_| ConfigError::TooManyNodes(position + 1))?;

            let name: Arc<str> = name.into();
            if list.by_name.insert(name.clone(), position).is_some() {
                return Err(ConfigError::DuplicateNode(name.to_string()));
            }

            list.ids.push(NodeId { name, index });
        }

        Ok(list)
    }

    /// Returns the number of nodes (and therefore of cost table rows).
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if the list holds no node.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns the identity at the ordinal, if it exists.
    pub fn get(&self, index: usize) -> Option<&NodeId> {
        self.ids.get(index)
    }

    /// Returns the identity with this name, if it exists.
    pub fn find(&self, name: &str) -> Option<&NodeId> {
        self.by_name.get(name).map(|&i| &self.ids[i])
    }

    /// Returns the ordinal of the named node.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeId> {
        self.ids.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_list_ordinals() {
        let nodes = NodeList::new(["ATLA", "CHIN", "WASH"]).unwrap();

        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes.index_of("CHIN"), Some(1));
        assert_eq!(nodes.get(2).unwrap().name(), "WASH");
        assert_eq!(nodes.find("ATLA").unwrap().numeric(), 0);
        assert!(nodes.find("DNVR").is_none());
    }

    #[test]
    fn node_list_rejects_duplicates() {
        assert!(matches!(
            NodeList::new(["A", "B", "A"]),
            Err(ConfigError::DuplicateNode(name)) if name == "A"
        ));
    }

    #[test]
    fn node_list_rejects_sink() {
        assert!(matches!(
            NodeList::new(["A", SINK]),
            Err(ConfigError::ReservedName)
        ));
    }

    #[test]
    fn node_list_rejects_unencodable_names() {
        let longest = "N".repeat(CostReport::MAX_SENDER_LEN);
        assert!(NodeList::new([longest.as_str()]).is_ok());

        let name = "N".repeat(CostReport::MAX_SENDER_LEN + 1);
        assert!(matches!(
            NodeList::new(["A", name.as_str()]),
            Err(ConfigError::NameTooLong { len, max })
                if len == CostReport::MAX_SENDER_LEN + 1 && max == CostReport::MAX_SENDER_LEN
        ));
    }

    #[test]
    fn hop_matches_raw_sender() {
        let hop = Hop::parse("IPLS");
        assert!(hop.matches(b"IPLS"));
        assert!(!hop.matches(b"IPL"));
        assert!(!Hop::parse(SINK).matches(b"sink"));
        assert_eq!(Hop::parse(SINK), Hop::Sink);
    }
}
