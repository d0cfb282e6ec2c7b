//! Point-to-point links and their address plan.

use std::{collections::HashMap, net::Ipv6Addr, sync::Arc};

use crate::{
    config::LinkConfig,
    core::{
        address::{AddressBook, Interface},
        error::ConfigError,
        id::NodeList,
        traits::{Egress, Topology},
    },
};

/// One end of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub node: Arc<str>,
    pub egress: Egress,
    pub addr: Ipv6Addr,
}

/// A point-to-point link, each one is its own `/64`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub subnet: u16,
    pub a: Endpoint,
    pub b: Endpoint,
}

impl Link {
    /// Returns the far end as seen from `node`.
    pub fn peer_of(&self, node: &str) -> Option<&Endpoint> {
        if &*self.a.node == node {
            Some(&self.b)
        } else if &*self.b.node == node {
            Some(&self.a)
        } else {
            None
        }
    }
}

/// Static links between named nodes.
///
/// Link `i` gets the subnet `fd00:i::/64`, its first endpoint `fd00:i::1` and its second
/// `fd00:i::2`. Egresses are numbered per node from 1, in link order.
#[derive(Debug, Clone, Default)]
pub struct LinkTopology {
    links: Vec<Link>,
}

impl LinkTopology {
    pub fn new(nodes: &NodeList, links: &[LinkConfig]) -> Result<Self, ConfigError> {
        let mut next_egress: HashMap<&str, u32> = HashMap::new();
        let mut topology = Self::default();

        for (subnet, link) in links.iter().enumerate() {
            let mut endpoint = |name: &str, host: u16| -> Result<Endpoint, ConfigError> {
                let id = nodes
                    .find(name)
                    .ok_or_else(|| ConfigError::UnknownNode(name.to_string()))?;
                let counter = next_egress.entry(id.name()).or_insert(0);
                *counter += 1;

                Ok(Endpoint {
                    node: id.name().into(),
                    egress: Egress(*counter),
                    addr: Ipv6Addr::new(0xfd00, subnet as u16, 0, 0, 0, 0, 0, host),
                })
            };

            let a = endpoint(&link.a, 1)?;
            let b = endpoint(&link.b, 2)?;

            topology.links.push(Link {
                subnet: subnet as u16,
                a,
                b,
            });
        }

        Ok(topology)
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Returns the node's interfaces in egress order, each with a link-local and a global address.
    pub fn interfaces_of(&self, node: &str) -> Vec<Interface> {
        self.endpoints_of(node)
            .map(|(link, end)| {
                let link_local = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, link.subnet, end.egress.0 as u16);
                Interface::new(end.egress, vec![link_local, end.addr])
            })
            .collect()
    }

    /// Returns the node's neighbors and their address on the shared link, in egress order.
    pub fn neighbors_of<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Endpoint> + 'a {
        self.links.iter().filter_map(move |link| link.peer_of(node))
    }

    /// Returns the other end of the link `addr` belongs to.
    pub fn far_end(&self, addr: &Ipv6Addr) -> Option<&Endpoint> {
        self.links.iter().find_map(|link| {
            if link.a.addr == *addr {
                Some(&link.b)
            } else if link.b.addr == *addr {
                Some(&link.a)
            } else {
                None
            }
        })
    }

    /// Maps every link address to its node.
    pub fn address_book(&self) -> AddressBook {
        let mut book = AddressBook::new();
        for link in &self.links {
            for end in [&link.a, &link.b] {
                book.insert(end.addr, &end.node);
            }
        }

        book
    }

    fn endpoints_of<'a>(&'a self, node: &'a str) -> impl Iterator<Item = (&'a Link, &'a Endpoint)> {
        self.links.iter().filter_map(move |link| {
            if &*link.a.node == node {
                Some((link, &link.a))
            } else if &*link.b.node == node {
                Some((link, &link.b))
            } else {
                None
            }
        })
    }
}

impl Topology for LinkTopology {
    /// The first link between the two nodes wins.
    fn egress_towards(&self, node: &str, neighbor: &str) -> Option<Egress> {
        self.endpoints_of(node)
            .find(|(link, _)| link.peer_of(node).map(|peer| &*peer.node) == Some(neighbor))
            .map(|(_, end)| end.egress)
    }
}
