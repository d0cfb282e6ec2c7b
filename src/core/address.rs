//! Address assignment types, as handed over by the address allocator at startup.

use std::{collections::HashMap, net::Ipv6Addr, sync::Arc};

use crate::core::traits::Egress;

/// Maps every advertised address in the network to the name of the node owning it.
///
/// Built once before the routers start and then only ever read.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    names: HashMap<Ipv6Addr, Arc<str>>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an address, returning the previous owner if the address was already known.
    pub fn insert(&mut self, addr: Ipv6Addr, name: &str) -> Option<Arc<str>> {
        self.names.insert(addr, name.into())
    }

    /// Returns the name of the node owning the address.
    pub fn resolve(&self, addr: &Ipv6Addr) -> Option<&str> {
        self.names.get(addr).map(|name| &**name)
    }

    /// Returns every address owned by the named node.
    pub fn addresses_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = Ipv6Addr> + 'a {
        self.names
            .iter()
            .filter(move |(_, owner)| &***owner == name)
            .map(|(&addr, _)| addr)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A local interface and the addresses assigned to it, in assignment order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub egress: Egress,
    pub addresses: Vec<Ipv6Addr>,
}

impl Interface {
    pub fn new(egress: Egress, addresses: Vec<Ipv6Addr>) -> Self {
        Self { egress, addresses }
    }

    /// Returns the first address usable as a packet source: neither link-local nor multicast.
    pub fn global_address(&self) -> Option<Ipv6Addr> {
        self.addresses
            .iter()
            .copied()
            .find(|addr| !is_link_local(addr) && !addr.is_multicast())
    }

    /// Returns `true` if the address is assigned to this interface.
    pub fn owns(&self, addr: &Ipv6Addr) -> bool {
        self.addresses.contains(addr)
    }
}

/// `fe80::/10`.
pub fn is_link_local(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}
