use std::{fs::File, net::Ipv6Addr, path::Path};

use qrouting::{config::NetworkConfig, sim::Simulation};
use tracing_subscriber::{fmt, EnvFilter};

#[allow(dead_code)]
pub fn enable_tracing() {
    fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

/// The 12 node Abilene backbone and its per-destination candidate graphs.
#[allow(dead_code)]
pub fn abilene() -> NetworkConfig {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/abilene.json");
    NetworkConfig::from_reader(File::open(path).unwrap()).unwrap()
}

/// Returns the address of the node's first interface.
#[allow(dead_code)]
pub fn first_address(sim: &Simulation, node: &str) -> Ipv6Addr {
    sim.topology().interfaces_of(node)[0]
        .global_address()
        .unwrap()
}

/// Returns the names of the nodes a packet from `from` to `to` traverses.
#[allow(dead_code)]
pub fn path(sim: &Simulation, from: &str, to: &str) -> Vec<String> {
    sim.trace_path(from, first_address(sim, to))
        .unwrap()
        .iter()
        .map(|name| name.to_string())
        .collect()
}
