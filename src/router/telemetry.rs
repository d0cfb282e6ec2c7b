//! Queue telemetry received from peers.
//!
//! Samples are informational only, forwarding never reads them.

use std::{
    collections::HashMap,
    io::{self, Write},
    net::Ipv6Addr,
    sync::Arc,
    time::Duration,
};

use tracing::{debug, trace};

use crate::core::{
    id::{NodeId, NodeList},
    message::QueueRecord,
};

/// The latest occupancy reported for one of a peer's interfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSample {
    pub reporter: u32,
    /// `None` if the ordinal isn't in the local node list.
    pub reporter_name: Option<Arc<str>>,
    pub interface: Ipv6Addr,
    pub occupancy: u32,
    pub updated_at: Duration,
}

/// A single received sample, as it appears in the observability log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub at: Duration,
    pub receiver: u32,
    pub reporter: u32,
    pub interface: Ipv6Addr,
    pub occupancy: u32,
}

/// Every sample received, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryLog {
    records: Vec<TelemetryRecord>,
}

impl TelemetryLog {
    pub fn records(&self) -> &[TelemetryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Writes the log as comma separated lines, preceded by a header line. Times are in seconds.
    pub fn write_csv<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writeln!(writer, "time,receiver,reporter,interface,occupancy")?;
        for r in &self.records {
            writeln!(
                writer,
                "{:.6},{},{},{},{}",
                r.at.as_secs_f64(),
                r.receiver,
                r.reporter,
                r.interface,
                r.occupancy
            )?;
        }

        writer.flush()
    }
}

/// The per-node telemetry state: latest samples and the log of every update.
#[derive(Debug, Clone, Default)]
pub struct QueueTelemetry {
    samples: HashMap<(u32, Ipv6Addr), QueueSample>,
    log: TelemetryLog,
}

impl QueueTelemetry {
    /// Upserts the sample for the record's (reporter, interface) and logs it. Returns `true` if a
    /// previous sample was replaced.
    pub fn record(
        &mut self,
        receiver: &NodeId,
        nodes: &NodeList,
        record: QueueRecord,
        now: Duration,
    ) -> bool {
        let reporter_name = nodes
            .get(record.reporter as usize)
            .map(|id| Arc::from(id.name()));
        if reporter_name.is_none() {
            debug!(node = %receiver, reporter = record.reporter, "telemetry from unknown ordinal");
        }

        trace!(
            node = %receiver,
            reporter = record.reporter,
            interface = %record.interface,
            occupancy = record.occupancy,
            "queue sample"
        );

        self.log.records.push(TelemetryRecord {
            at: now,
            receiver: receiver.numeric(),
            reporter: record.reporter,
            interface: record.interface,
            occupancy: record.occupancy,
        });

        self.samples
            .insert(
                (record.reporter, record.interface),
                QueueSample {
                    reporter: record.reporter,
                    reporter_name,
                    interface: record.interface,
                    occupancy: record.occupancy,
                    updated_at: now,
                },
            )
            .is_some()
    }

    /// Returns the latest sample for the reporter's interface.
    pub fn sample(&self, reporter: u32, interface: Ipv6Addr) -> Option<&QueueSample> {
        self.samples.get(&(reporter, interface))
    }

    pub fn samples(&self) -> impl Iterator<Item = &QueueSample> {
        self.samples.values()
    }

    pub fn log(&self) -> &TelemetryLog {
        &self.log
    }
}
