//! The per-packet forwarding decision and the ordered list of forwarding providers.

use std::{net::Ipv6Addr, sync::Arc};

use tracing::{trace, warn};

use crate::{
    config::AddressDomain,
    core::{error::RouteError, traits::Egress},
    router::QRouter,
};

/// The packet fields a forwarding decision depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub source: Ipv6Addr,
    pub destination: Ipv6Addr,
    /// The upper-layer protocol number.
    pub protocol: u8,
}

/// Whether the packet is originated locally or relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Output,
    Input,
}

/// Where a single packet goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destination: Ipv6Addr,
    /// The source address to stamp on an originated packet, the original source when relaying.
    pub source: Option<Ipv6Addr>,
    pub egress: Egress,
    /// The chosen neighbor, when known.
    pub next_hop: Option<Arc<str>>,
}

/// The verdict of a forwarding provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No opinion, the next provider should be asked.
    Decline,
    /// The packet is addressed to the node itself.
    LocalDelivery { egress: Egress },
    Forward(Route),
}

impl QRouter {
    /// Picks the egress for a packet from the current cost table.
    ///
    /// The decision is recomputed for every packet, so it always reflects the latest reports.
    pub fn route(&self, packet: &Packet, direction: Direction) -> Result<Decision, RouteError> {
        let destination = packet.destination;

        if !self.is_active()
            || !self.config.domain.contains(&destination)
            || self.config.is_control_protocol(packet.protocol)
        {
            return Ok(Decision::Decline);
        }

        if let Some(interface) = self.interfaces.iter().find(|i| i.owns(&destination)) {
            trace!(node = %self.local, %destination, egress = %interface.egress, "local delivery");
            return Ok(Decision::LocalDelivery {
                egress: interface.egress,
            });
        }

        let name = self
            .addresses
            .resolve(&destination)
            .ok_or(RouteError::UnknownDestination(destination))?;
        let row = self
            .nodes
            .index_of(name)
            .ok_or(RouteError::UnknownDestination(destination))?;

        let Some((chosen, egress)) = self
            .table
            .best_resolved(row)
            .and_then(|entry| entry.egress.map(|egress| (entry, egress)))
        else {
            return Err(RouteError::NoRoute {
                destination: name.to_string(),
            });
        };

        let source = match direction {
            Direction::Output => self
                .interfaces
                .iter()
                .find(|i| i.egress == egress)
                .and_then(|i| i.global_address()),
            Direction::Input => Some(packet.source),
        };

        trace!(
            node = %self.local,
            %destination,
            via = %chosen.hop,
            cost = chosen.cost,
            %egress,
            ?direction,
            "forwarding"
        );

        Ok(Decision::Forward(Route {
            destination,
            source,
            egress,
            next_hop: chosen.hop.neighbor().map(Arc::from),
        }))
    }
}

/// A fixed prefix-to-egress table, consulted when the cost based decision has no answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticRoutes {
    routes: Vec<(AddressDomain, Egress)>,
}

impl StaticRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route, routes are matched in insertion order.
    pub fn add(&mut self, prefix: AddressDomain, egress: Egress) {
        self.routes.push((prefix, egress));
    }

    pub fn route(&self, router: &QRouter, packet: &Packet, direction: Direction) -> Decision {
        let Some(&(_, egress)) = self
            .routes
            .iter()
            .find(|(prefix, _)| prefix.contains(&packet.destination))
        else {
            return Decision::Decline;
        };

        let source = match direction {
            Direction::Output => router
                .interfaces()
                .iter()
                .find(|i| i.egress == egress)
                .and_then(|i| i.global_address()),
            Direction::Input => Some(packet.source),
        };

        Decision::Forward(Route {
            destination: packet.destination,
            source,
            egress,
            next_hop: None,
        })
    }
}

/// A forwarding strategy installed on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    /// The Q-value based decision of [`QRouter::route`].
    CostBased,
    Static(StaticRoutes),
}

/// Forwarding providers asked in decreasing priority until one of them takes the packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderChain {
    providers: Vec<(i16, Provider)>,
}

impl Default for ProviderChain {
    /// Only the cost based provider.
    fn default() -> Self {
        Self {
            providers: vec![(100, Provider::CostBased)],
        }
    }
}

impl ProviderChain {
    pub fn empty() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Installs a provider; equal priorities keep their installation order.
    pub fn add(&mut self, priority: i16, provider: Provider) {
        let i = self
            .providers
            .iter()
            .position(|(p, _)| *p < priority)
            .unwrap_or(self.providers.len());
        self.providers.insert(i, (priority, provider));
    }

    /// Asks each provider in turn. Failures are logged and the next provider is asked; the last
    /// failure is returned if nobody takes the packet.
    pub fn route(
        &self,
        router: &QRouter,
        packet: &Packet,
        direction: Direction,
    ) -> Result<Decision, RouteError> {
        let mut failure = None;

        for (priority, provider) in &self.providers {
            let decision = match provider {
                Provider::CostBased => router.route(packet, direction),
                Provider::Static(routes) => Ok(routes.route(router, packet, direction)),
            };

            match decision {
                Ok(Decision::Decline) => continue,
                Ok(decision) => return Ok(decision),
                Err(e) => {
                    warn!(node = %router.local(), priority, destination = %packet.destination, "{e}");
                    failure = Some(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(Decision::Decline),
        }
    }
}
