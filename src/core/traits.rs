use std::fmt;

/// A handle to one of the local node's egress interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Egress(pub u32);

impl fmt::Display for Egress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

/// The topology collaborator, consulted once per candidate at startup.
///
/// The router never builds links itself, it only needs to know which local interface (if any)
/// reaches a given neighbor directly.
pub trait Topology {
    /// Returns the local egress of `node` with a direct link to `neighbor`, `None` if the two
    /// aren't adjacent.
    fn egress_towards(&self, node: &str, neighbor: &str) -> Option<Egress>;
}

impl<F> Topology for F
where
    F: Fn(&str, &str) -> Option<Egress>,
{
    fn egress_towards(&self, node: &str, neighbor: &str) -> Option<Egress> {
        self(node, neighbor)
    }
}

/// The queueing collaborator, read on every received cost report and every telemetry sample.
///
/// Implementations must not block; the value is an opaque occupancy (packets or bytes).
pub trait QueueOccupancy {
    /// Returns the current occupancy of `node`'s egress queue.
    fn occupancy(&self, node: &str, egress: Egress) -> u32;
}

impl<F> QueueOccupancy for F
where
    F: Fn(&str, Egress) -> u32,
{
    fn occupancy(&self, node: &str, egress: Egress) -> u32 {
        self(node, egress)
    }
}
