//! A deterministic discrete event driver wiring routers over point-to-point links.
//!
//! Every node's exchange and telemetry timers, as well as every datagram in flight, are events on a
//! single virtual clock. Runs are reproducible for a given seed.

use std::{collections::HashMap, net::Ipv6Addr, sync::Arc, time::Duration};

use bytes::Bytes;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, warn};

use crate::{
    config::{Config, NetworkConfig},
    core::{
        error::{ConfigError, RouteError},
        id::NodeList,
        message::{Channel, Message},
        traits::{Egress, QueueOccupancy, Topology},
    },
    router::{
        forwarding::{Decision, Direction, Packet, ProviderChain},
        NodeState, QRouter,
    },
};

pub mod scheduler;
pub mod topology;

pub use scheduler::{EventId, Scheduler};
pub use topology::LinkTopology;

/// Simulation events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Time to send cost reports over one of a node's exchange links.
    ExchangeTick { node: usize, link: usize },
    /// Time for a node to send queue telemetry.
    TelemetryTick { node: usize },
    /// A datagram reaching its destination node.
    Deliver {
        to: usize,
        channel: Channel,
        source: Ipv6Addr,
        payload: Bytes,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Timer {
    Exchange(usize),
    Telemetry,
}

/// Settable egress queue occupancies, 0 unless set.
#[derive(Debug, Clone, Default)]
pub struct Occupancies {
    values: HashMap<Arc<str>, HashMap<Egress, u32>>,
}

impl Occupancies {
    pub fn set(&mut self, node: &str, egress: Egress, occupancy: u32) {
        self.values
            .entry(node.into())
            .or_default()
            .insert(egress, occupancy);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl QueueOccupancy for Occupancies {
    fn occupancy(&self, node: &str, egress: Egress) -> u32 {
        self.values
            .get(node)
            .and_then(|queues| queues.get(&egress))
            .copied()
            .unwrap_or(0)
    }
}

/// Message counters over a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub sent: usize,
    pub delivered: usize,
    pub applied: usize,
    pub dropped: usize,
    pub malformed: usize,
}

/// A network of routers driven by a virtual clock.
#[derive(Debug)]
pub struct Simulation {
    scheduler: Scheduler<Event>,
    nodes: Arc<NodeList>,
    config: Arc<Config>,
    topology: LinkTopology,
    routers: Vec<QRouter>,
    providers: Vec<ProviderChain>,
    occupancies: Occupancies,
    timers: HashMap<(usize, Timer), EventId>,
    link_delay: Duration,
    rng: StdRng,
    stats: Stats,
}

impl Simulation {
    /// The propagation delay of every link unless set otherwise.
    pub const DEFAULT_LINK_DELAY: Duration = Duration::from_millis(1);

    /// Builds and resolves every router of the network, none of them started.
    pub fn new(network: &NetworkConfig, seed: u64) -> Result<Self, ConfigError> {
        let (nodes, spec) = network.validate()?;
        let nodes = Arc::new(nodes);
        let topology = LinkTopology::new(&nodes, &network.links)?;
        let addresses = Arc::new(topology.address_book());
        let config = Arc::new(network.protocol.clone());

        let mut routers = Vec::with_capacity(nodes.len());
        for id in nodes.iter() {
            let mut router = QRouter::with_spec(
                id.clone(),
                nodes.clone(),
                addresses.clone(),
                config.clone(),
                &spec,
            )?;
            router.set_interfaces(topology.interfaces_of(id.name()));
            router.resolve_egresses(&topology);

            for peer in topology.neighbors_of(id.name()) {
                let neighbor = nodes
                    .find(&peer.node)
                    .ok_or_else(|| ConfigError::UnknownNode(peer.node.to_string()))?;
                router.add_exchange_link(neighbor.clone(), peer.addr, &spec);
                router.add_telemetry_peer(peer.addr);
            }

            routers.push(router);
        }

        Ok(Self {
            scheduler: Scheduler::new(),
            providers: vec![ProviderChain::default(); nodes.len()],
            nodes,
            config,
            topology,
            routers,
            occupancies: Occupancies::default(),
            timers: HashMap::new(),
            link_delay: Self::DEFAULT_LINK_DELAY,
            rng: StdRng::seed_from_u64(seed),
            stats: Stats::default(),
        })
    }

    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    pub fn nodes(&self) -> &NodeList {
        &self.nodes
    }

    pub fn topology(&self) -> &LinkTopology {
        &self.topology
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn router(&self, name: &str) -> Option<&QRouter> {
        self.nodes.index_of(name).map(|i| &self.routers[i])
    }

    pub fn routers(&self) -> &[QRouter] {
        &self.routers
    }

    /// Returns the forwarding providers of a node, to install fallbacks.
    pub fn providers_mut(&mut self, name: &str) -> Option<&mut ProviderChain> {
        self.nodes.index_of(name).map(|i| &mut self.providers[i])
    }

    pub fn occupancies_mut(&mut self) -> &mut Occupancies {
        &mut self.occupancies
    }

    /// Sets the occupancy of the node's egress towards a neighbor. Returns `false` if they aren't
    /// linked.
    pub fn set_occupancy(&mut self, node: &str, neighbor: &str, occupancy: u32) -> bool {
        match self.topology.egress_towards(node, neighbor) {
            Some(egress) => {
                self.occupancies.set(node, egress, occupancy);
                true
            }
            None => false,
        }
    }

    pub fn set_link_delay(&mut self, delay: Duration) {
        self.link_delay = delay;
    }

    /// Returns the number of timers the node has pending.
    pub fn pending_timers(&self, name: &str) -> usize {
        match self.nodes.index_of(name) {
            Some(node) => self.timers.keys().filter(|(n, _)| *n == node).count(),
            None => 0,
        }
    }

    /// Starts every router and schedules its timers.
    pub fn start(&mut self) {
        for node in 0..self.routers.len() {
            self.start_node(node);
        }
    }

    fn start_node(&mut self, node: usize) {
        if !self.routers[node].start() {
            return;
        }

        let max_jitter = self.config.exchange_jitter_ms;
        for link in 0..self.routers[node].links().len() {
            let jitter = match max_jitter {
                0 => Duration::ZERO,
                max => Duration::from_millis(self.rng.gen_range(0..=max)),
            };
            let at = self.config.exchange_start() + jitter;
            self.schedule_timer(node, Timer::Exchange(link), at);
        }

        let at = self.config.telemetry_start();
        self.schedule_timer(node, Timer::Telemetry, at);
    }

    /// Stops a node and cancels its timers. Datagrams already in flight are still delivered, and
    /// ignored. Returns `false` if the node is unknown or already stopped.
    pub fn stop_node(&mut self, name: &str) -> bool {
        let Some(node) = self.nodes.index_of(name) else {
            return false;
        };
        if self.routers[node].state() == NodeState::Stopped {
            return false;
        }

        self.routers[node].stop();

        let keys: Vec<_> = self.timers.keys().filter(|(n, _)| *n == node).copied().collect();
        for key in keys {
            if let Some(id) = self.timers.remove(&key) {
                self.scheduler.cancel(id);
            }
        }
        debug!(node = name, at = ?self.now(), "node stopped");

        true
    }

    fn schedule_timer(&mut self, node: usize, timer: Timer, at: Duration) {
        let event = match timer {
            Timer::Exchange(link) => Event::ExchangeTick { node, link },
            Timer::Telemetry => Event::TelemetryTick { node },
        };

        let id = self.scheduler.schedule_at(at, event);
        self.timers.insert((node, timer), id);
    }

    /// Processes every event due up to `until` and advances the clock to it. Returns the number of
    /// events processed.
    pub fn run_until(&mut self, until: Duration) -> usize {
        let mut processed = 0;
        while let Some(scheduled) = self.scheduler.step_until(until) {
            self.handle(scheduled.event);
            processed += 1;
        }

        processed
    }

    /// Runs for `duration` past the current time.
    pub fn run_for(&mut self, duration: Duration) -> usize {
        self.run_until(self.now() + duration)
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::ExchangeTick { node, link } => {
                if let Some((peer, message)) = self.routers[node].cost_reports(link) {
                    self.send(node, peer, message);
                }

                let at = self.now() + self.config.exchange_interval();
                self.schedule_timer(node, Timer::Exchange(link), at);
            }
            Event::TelemetryTick { node } => {
                for (peer, message) in self.routers[node].queue_status(&self.occupancies) {
                    self.send(node, peer, message);
                }

                let at = self.now() + self.config.telemetry_interval();
                self.schedule_timer(node, Timer::Telemetry, at);
            }
            Event::Deliver {
                to,
                channel,
                source,
                payload,
            } => {
                let now = self.now();
                let processed = self.routers[to].process_datagram(
                    channel,
                    source,
                    payload,
                    &self.occupancies,
                    now,
                );

                self.stats.delivered += 1;
                self.stats.applied += processed.applied;
                self.stats.dropped += processed.dropped;
                if processed.malformed.is_some() {
                    self.stats.malformed += 1;
                }
            }
        }
    }

    fn send(&mut self, from: usize, peer: Ipv6Addr, message: Message) {
        let to = self
            .routers[from]
            .address_book()
            .resolve(&peer)
            .and_then(|name| self.nodes.index_of(name));
        let Some(to) = to else {
            warn!(node = %self.routers[from].local(), %peer, "no node owns the peer address, message dropped");
            return;
        };

        // The source is the sender's own address on the shared link.
        let source = self
            .topology
            .far_end(&peer)
            .map_or(Ipv6Addr::UNSPECIFIED, |end| end.addr);

        self.stats.sent += 1;
        self.scheduler.schedule_after(
            self.link_delay,
            Event::Deliver {
                to,
                channel: message.channel(),
                source,
                payload: message.encode(),
            },
        );
    }

    /// Asks a node's forwarding providers about a packet.
    pub fn route(
        &self,
        name: &str,
        packet: &Packet,
        direction: Direction,
    ) -> Result<Decision, RouteError> {
        match self.nodes.index_of(name) {
            Some(i) => self.providers[i].route(&self.routers[i], packet, direction),
            None => Ok(Decision::Decline),
        }
    }

    /// Follows the forwarding decisions of successive nodes from `from` towards `destination`,
    /// returning the nodes traversed. The walk ends on local delivery, on a decision without a next
    /// hop, or once every node has been visited.
    pub fn trace_path(
        &self,
        from: &str,
        destination: Ipv6Addr,
    ) -> Result<Vec<Arc<str>>, RouteError> {
        let mut path: Vec<Arc<str>> = vec![from.into()];
        let mut packet = Packet {
            source: Ipv6Addr::UNSPECIFIED,
            destination,
            protocol: 17,
        };
        let mut direction = Direction::Output;

        while path.len() <= self.nodes.len() {
            let Some(current) = path.last().cloned() else {
                break;
            };

            match self.route(&current, &packet, direction)? {
                Decision::Forward(route) => {
                    if direction == Direction::Output {
                        packet.source = route.source.unwrap_or(Ipv6Addr::UNSPECIFIED);
                        direction = Direction::Input;
                    }
                    match route.next_hop {
                        Some(next) => path.push(next),
                        None => break,
                    }
                }
                Decision::LocalDelivery { .. } | Decision::Decline => break,
            }
        }

        Ok(path)
    }
}
