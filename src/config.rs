//! Protocol parameters and the static network description.

use std::{io::Read, net::Ipv6Addr, time::Duration};

use serde::Deserialize;

use crate::core::{candidates::DestinationSpec, error::ConfigError, id::NodeList};

/// The upper-layer protocol number cost reports travel on.
pub const COST_REPORT_PROTOCOL: u8 = 200;
/// The upper-layer protocol number queue telemetry travels on.
pub const QUEUE_STATUS_PROTOCOL: u8 = 201;

/// An IPv6 prefix delimiting the addresses the protocol routes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AddressDomain {
    pub prefix: Ipv6Addr,
    pub len: u8,
}

impl AddressDomain {
    /// Returns `true` if the address falls within the prefix.
    pub fn contains(&self, addr: &Ipv6Addr) -> bool {
        let mask = match self.len {
            0 => 0,
            len => u128::MAX << (128 - u32::from(len.min(128))),
        };

        u128::from(*addr) & mask == u128::from(self.prefix) & mask
    }
}

impl Default for AddressDomain {
    /// Unique local addresses, `fd00::/8`.
    fn default() -> Self {
        Self {
            prefix: Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 0),
            len: 8,
        }
    }
}

/// Protocol parameters shared by every node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Time between two cost reports over the same directed link, in milliseconds.
    pub exchange_interval_ms: u64,
    /// Time of the first cost report, in milliseconds.
    pub exchange_start_ms: u64,
    /// Upper bound of the random delay added to each link's first report, in milliseconds.
    pub exchange_jitter_ms: u64,
    /// Time between two queue telemetry rounds, in milliseconds.
    pub telemetry_interval_ms: u64,
    /// Time of the first telemetry round, in milliseconds.
    pub telemetry_start_ms: u64,
    pub cost_report_protocol: u8,
    pub queue_status_protocol: u8,
    /// Packets to destinations outside the domain are left to other providers.
    pub domain: AddressDomain,
}

impl Config {
    pub fn exchange_interval(&self) -> Duration {
        Duration::from_millis(self.exchange_interval_ms)
    }

    pub fn exchange_start(&self) -> Duration {
        Duration::from_millis(self.exchange_start_ms)
    }

    pub fn exchange_jitter(&self) -> Duration {
        Duration::from_millis(self.exchange_jitter_ms)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms)
    }

    pub fn telemetry_start(&self) -> Duration {
        Duration::from_millis(self.telemetry_start_ms)
    }

    /// Rejects periods that would have a timer fire again at the same instant forever.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exchange_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("exchange_interval_ms"));
        }
        if self.telemetry_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("telemetry_interval_ms"));
        }

        Ok(())
    }

    /// Returns `true` if the protocol number belongs to one of the control channels.
    pub fn is_control_protocol(&self, protocol: u8) -> bool {
        protocol == self.cost_report_protocol || protocol == self.queue_status_protocol
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange_interval_ms: 10,
            exchange_start_ms: 2100,
            exchange_jitter_ms: 0,
            telemetry_interval_ms: 500,
            telemetry_start_ms: 1000,
            cost_report_protocol: COST_REPORT_PROTOCOL,
            queue_status_protocol: QUEUE_STATUS_PROTOCOL,
            domain: AddressDomain::default(),
        }
    }
}

/// A point-to-point link between two named nodes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkConfig {
    pub a: String,
    pub b: String,
}

/// The static description of a network, as loaded from JSON.
///
/// ```json
/// {
///   "nodes": ["A", "B"],
///   "links": [{ "a": "A", "b": "B" }],
///   "destinations": [[["sink"], ["A"]], [["B"], ["sink"]]]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NetworkConfig {
    pub nodes: Vec<String>,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    /// `destinations[d][n]`: the next hops node `n` may use towards node `d`.
    pub destinations: Vec<Vec<Vec<String>>>,
    #[serde(default)]
    pub protocol: Config,
}

impl NetworkConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Validates the protocol parameters, the node list and candidate specification.
    pub fn validate(&self) -> Result<(NodeList, DestinationSpec), ConfigError> {
        self.protocol.validate()?;

        let nodes = NodeList::new(&self.nodes)?;
        let spec = DestinationSpec::new(&nodes, &self.destinations)?;

        for link in &self.links {
            for name in [&link.a, &link.b] {
                if nodes.find(name).is_none() {
                    return Err(ConfigError::UnknownNode(name.clone()));
                }
            }
        }

        Ok((nodes, spec))
    }
}
