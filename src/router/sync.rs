use std::{
    collections::HashMap,
    fmt, io,
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use bytes::BytesMut;
use parking_lot::RwLock;
use tokio::{
    net::UdpSocket,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::codec::Decoder;
use tracing::warn;

use crate::{
    codec::{CostReportCodec, QueueRecordCodec},
    core::{
        cost_table::CostTable,
        error::RouteError,
        message::{Channel, Message, MAX_DATAGRAM_LEN},
        traits::QueueOccupancy,
    },
    router::{
        forwarding::{Decision, Direction, Packet},
        NodeState, Processed, QRouter, Record,
    },
};

type Occupancy = dyn QueueOccupancy + Send + Sync;

/// The transport addresses a peer receives each channel on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSockets {
    pub cost_reports: SocketAddr,
    pub queue_status: SocketAddr,
}

impl PeerSockets {
    fn get(&self, channel: Channel) -> SocketAddr {
        match channel {
            Channel::CostReport => self.cost_reports,
            Channel::QueueStatus => self.queue_status,
        }
    }
}

#[cfg_attr(doc_cfg, doc(cfg(feature = "sync")))]
#[derive(Clone)]
/// A router handle suitable for use in async contexts.
///
/// It wraps [`QRouter`] and drives it over UDP: one task per exchange link, one telemetry task and
/// one receive task per channel. Router addresses are mapped to socket addresses with
/// [`SyncRouter::map_peer`].
pub struct SyncRouter {
    router: Arc<RwLock<QRouter>>,
    occupancy: Arc<Occupancy>,
    peers: Arc<RwLock<HashMap<Ipv6Addr, PeerSockets>>>,
    epoch: Instant,
}

impl fmt::Debug for SyncRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncRouter")
            .field("router", &self.router)
            .field("peers", &self.peers)
            .finish_non_exhaustive()
    }
}

impl SyncRouter {
    pub fn new(router: QRouter, occupancy: Arc<dyn QueueOccupancy + Send + Sync>) -> Self {
        Self {
            router: Arc::new(RwLock::new(router)),
            occupancy,
            peers: Default::default(),
            epoch: Instant::now(),
        }
    }

    /// Maps a router address to the sockets its node listens on.
    pub fn map_peer(&self, peer: Ipv6Addr, sockets: PeerSockets) {
        self.peers.write().insert(peer, sockets);
    }

    pub fn state(&self) -> NodeState {
        self.router.read().state()
    }

    pub fn is_active(&self) -> bool {
        self.router.read().is_active()
    }

    /// Returns a copy of the current cost table.
    pub fn table(&self) -> CostTable {
        self.router.read().table().clone()
    }

    /// Starts exchanging and forwarding, see [`QRouter::start`].
    pub fn start(&self) -> bool {
        self.router.write().start()
    }

    /// Stops the router, its tasks exit on their next wake up.
    pub fn stop(&self) {
        self.router.write().stop()
    }

    pub fn route(&self, packet: &Packet, direction: Direction) -> Result<Decision, RouteError> {
        self.router.read().route(packet, direction)
    }

    /// Decodes and applies a datagram received from `source`. Records cut short are dropped and
    /// reported in [`Processed::malformed`].
    pub fn process_datagram(
        &self,
        channel: Channel,
        source: SocketAddr,
        datagram: &[u8],
    ) -> io::Result<Processed> {
        let mut src = BytesMut::from(datagram);
        let mut records = Vec::new();

        match channel {
            Channel::CostReport => {
                let mut codec = CostReportCodec::new();
                while let Some(report) = codec.decode(&mut src)? {
                    records.push(Ok(Record::Cost(report)));
                }
                records.extend(codec.discard_tail(&mut src).map(Err));
            }
            Channel::QueueStatus => {
                let mut codec = QueueRecordCodec::new();
                while let Some(record) = codec.decode(&mut src)? {
                    records.push(Ok(Record::Queue(record)));
                }
                records.extend(codec.discard_tail(&mut src).map(Err));
            }
        }

        let now = self.epoch.elapsed();
        let processed = self
            .router
            .write()
            .receive(channel, source, records, &*self.occupancy, now);

        Ok(processed)
    }

    /// Spawns the exchange, telemetry and receive tasks.
    pub fn spawn(
        &self,
        cost_reports: Arc<UdpSocket>,
        queue_status: Arc<UdpSocket>,
    ) -> Vec<JoinHandle<()>> {
        let (links, config) = {
            let router = self.router.read();
            (router.links().len(), router.config().clone())
        };

        let mut handles = Vec::with_capacity(links + 3);

        for link in 0..links {
            let router = self.clone();
            let socket = cost_reports.clone();
            let start = self.epoch + config.exchange_start();
            let period = config.exchange_interval();

            handles.push(tokio::spawn(async move {
                let generate = |r: &QRouter, _: &Occupancy| -> Vec<_> {
                    r.cost_reports(link).into_iter().collect()
                };
                router.tick(start, period, generate, &socket).await
            }));
        }

        let router = self.clone();
        let socket = queue_status.clone();
        let start = self.epoch + config.telemetry_start();
        let period = config.telemetry_interval();
        handles.push(tokio::spawn(async move {
            let generate = |r: &QRouter, occupancy: &Occupancy| r.queue_status(occupancy);
            router.tick(start, period, generate, &socket).await
        }));

        handles.push(self.spawn_receiver(cost_reports, Channel::CostReport));
        handles.push(self.spawn_receiver(queue_status, Channel::QueueStatus));

        handles
    }

    async fn tick<F>(&self, start: Instant, period: Duration, generate: F, socket: &UdpSocket)
    where
        F: Fn(&QRouter, &Occupancy) -> Vec<(Ipv6Addr, Message)>,
    {
        let mut interval = time::interval_at(start, period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if self.state() == NodeState::Stopped {
                break;
            }

            for (peer, message) in self.outgoing(&generate) {
                self.send(socket, peer, message).await;
            }
        }
    }

    fn outgoing<F>(&self, generate: &F) -> Vec<(Ipv6Addr, Message)>
    where
        F: Fn(&QRouter, &Occupancy) -> Vec<(Ipv6Addr, Message)>,
    {
        generate(&self.router.read(), &*self.occupancy)
    }

    async fn send(&self, socket: &UdpSocket, peer: Ipv6Addr, message: Message) {
        let channel = message.channel();
        let Some(addr) = self.peer_socket(peer, channel) else {
            warn!(%peer, ?channel, "no socket mapped for the peer, message dropped");
            return;
        };

        if let Err(e) = socket.send_to(&message.encode(), addr).await {
            warn!(%peer, %addr, "couldn't send {}: {e}", message.variant_as_str());
        }
    }

    fn peer_socket(&self, peer: Ipv6Addr, channel: Channel) -> Option<SocketAddr> {
        self.peers.read().get(&peer).map(|sockets| sockets.get(channel))
    }

    fn spawn_receiver(&self, socket: Arc<UdpSocket>, channel: Channel) -> JoinHandle<()> {
        let router = self.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

            loop {
                let (len, source) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(?channel, "receive failed: {e}");
                        continue;
                    }
                };

                if router.state() == NodeState::Stopped {
                    break;
                }

                if let Err(e) = router.process_datagram(channel, source, &buf[..len]) {
                    warn!(?channel, %source, "datagram rejected: {e}");
                }
            }
        })
    }
}
