//! Protocol message types and their wire encoding.
//!
//! Both message kinds are sent as raw datagrams holding records packed back to back, without a
//! count header, all integers in network byte order.

use std::net::Ipv6Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::core::error::MalformedReport;

/// The largest datagram a control channel carries.
pub const MAX_DATAGRAM_LEN: usize = 65_535;

/// One destination row's minimum cost, as reported by a neighbor.
///
/// ```text
/// min_cost : u32
/// row      : u32
/// name_len : u32
/// sender   : name_len raw bytes
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostReport {
    pub min_cost: u32,
    pub row: u32,
    /// The sender's name, kept as raw bytes since it is only ever compared.
    pub sender: Bytes,
}

impl CostReport {
    /// The size of the fixed part of a record.
    pub const HEADER_LEN: usize = 12;
    /// The longest sender name a single datagram can carry.
    pub const MAX_SENDER_LEN: usize = MAX_DATAGRAM_LEN - Self::HEADER_LEN;

    // Node names are bounded when the node list is built, only a hand-made report can exceed it.
    fn encoded_sender(&self) -> &[u8] {
        &self.sender[..self.sender.len().min(Self::MAX_SENDER_LEN)]
    }

    /// Returns the encoded size of the record.
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_LEN + self.encoded_sender().len()
    }

    /// Appends the record to `dst`. A sender longer than [`Self::MAX_SENDER_LEN`] is cut to that
    /// length so the declared length always matches the bytes written.
    pub fn encode(&self, dst: &mut BytesMut) {
        let sender = self.encoded_sender();
        if sender.len() < self.sender.len() {
            warn!(len = self.sender.len(), "sender name too long for a cost report, truncated");
        }

        let len = u32::try_from(sender.len()).unwrap_or(u32::MAX);

        dst.reserve(Self::HEADER_LEN + sender.len());
        dst.put_u32(self.min_cost);
        dst.put_u32(self.row);
        dst.put_u32(len);
        dst.put_slice(sender);
    }

    /// Decodes the record at the front of `src`, `Ok(None)` if `src` is empty.
    pub fn decode(src: &mut Bytes) -> Result<Option<Self>, MalformedReport> {
        if src.is_empty() {
            return Ok(None);
        }

        if src.len() < Self::HEADER_LEN {
            return Err(MalformedReport::Truncated {
                remaining: src.len(),
            });
        }

        // Peek the length before consuming anything so a bad record leaves `src` untouched.
        let declared = u32::from_be_bytes([src[8], src[9], src[10], src[11]]);
        let remaining = src.len() - Self::HEADER_LEN;
        if declared as usize > remaining {
            return Err(MalformedReport::NameOverrun {
                declared,
                remaining,
            });
        }

        let min_cost = src.get_u32();
        let row = src.get_u32();
        let len = src.get_u32() as usize;
        let sender = src.split_to(len);

        Ok(Some(Self {
            min_cost,
            row,
            sender,
        }))
    }
}

/// A single egress queue observation.
///
/// ```text
/// reporter  : u32
/// interface : 16 bytes
/// occupancy : u32
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueRecord {
    /// The reporter's ordinal in the shared node list.
    pub reporter: u32,
    pub interface: Ipv6Addr,
    pub occupancy: u32,
}

impl QueueRecord {
    /// The size of an encoded record.
    pub const LEN: usize = 24;

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(Self::LEN);
        dst.put_u32(self.reporter);
        dst.put_slice(&self.interface.octets());
        dst.put_u32(self.occupancy);
    }

    /// Decodes the record at the front of `src`, `Ok(None)` if `src` is empty.
    pub fn decode(src: &mut Bytes) -> Result<Option<Self>, MalformedReport> {
        if src.is_empty() {
            return Ok(None);
        }

        if src.len() < Self::LEN {
            return Err(MalformedReport::Truncated {
                remaining: src.len(),
            });
        }

        let reporter = src.get_u32();
        let mut octets = [0u8; 16];
        src.copy_to_slice(&mut octets);
        let occupancy = src.get_u32();

        Ok(Some(Self {
            reporter,
            interface: Ipv6Addr::from(octets),
            occupancy,
        }))
    }
}

/// Iterates over the records packed in a datagram, yielding at most one error after which the rest
/// of the payload is discarded.
#[derive(Debug)]
pub struct Records<T> {
    payload: Bytes,
    decode: fn(&mut Bytes) -> Result<Option<T>, MalformedReport>,
}

impl<T> Iterator for Records<T> {
    type Item = Result<T, MalformedReport>;

    fn next(&mut self) -> Option<Self::Item> {
        match (self.decode)(&mut self.payload) {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.payload.clear();
                Some(Err(e))
            }
        }
    }
}

/// The channel a control datagram travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    CostReport,
    QueueStatus,
}

/// Control message variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// COST_REPORTS carry one row minimum per record, sent periodically over each link.
    CostReports(Vec<CostReport>),
    /// QUEUE_STATUS carries one occupancy observation per local egress, for observability only.
    QueueStatus(Vec<QueueRecord>),
}

impl Message {
    pub fn variant_as_str(&self) -> &str {
        match self {
            Message::CostReports(_) => "cost_reports",
            Message::QueueStatus(_) => "queue_status",
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            Message::CostReports(_) => Channel::CostReport,
            Message::QueueStatus(_) => Channel::QueueStatus,
        }
    }

    /// Returns the number of records carried.
    pub fn len(&self) -> usize {
        match self {
            Message::CostReports(reports) => reports.len(),
            Message::QueueStatus(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encodes the records back to back into a datagram payload.
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::new();
        match self {
            Message::CostReports(reports) => reports.iter().for_each(|r| r.encode(&mut dst)),
            Message::QueueStatus(records) => records.iter().for_each(|r| r.encode(&mut dst)),
        }

        dst.freeze()
    }

    /// Iterates over the cost reports in a datagram payload.
    pub fn cost_reports(payload: Bytes) -> Records<CostReport> {
        Records {
            payload,
            decode: CostReport::decode,
        }
    }

    /// Iterates over the queue records in a datagram payload.
    pub fn queue_records(payload: Bytes) -> Records<QueueRecord> {
        Records {
            payload,
            decode: QueueRecord::decode,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{thread_rng, Rng};

    use super::*;

    fn report(min_cost: u32, row: u32, sender: &[u8]) -> CostReport {
        CostReport {
            min_cost,
            row,
            sender: Bytes::copy_from_slice(sender),
        }
    }

    #[test]
    fn cost_report_wire_layout() {
        let mut dst = BytesMut::new();
        report(10, 2, b"X").encode(&mut dst);

        assert_eq!(&dst[..], &[0, 0, 0, 10, 0, 0, 0, 2, 0, 0, 0, 1, b'X']);
    }

    #[test]
    fn cost_report_non_ascii_sender() {
        let mut rng = thread_rng();
        let sender = "Zürich-Knoten-東京".as_bytes();
        let sent = report(rng.gen(), rng.gen(), sender);

        let payload = Message::CostReports(vec![sent.clone()]).encode();
        let received: Vec<_> = Message::cost_reports(payload).collect();

        assert_eq!(received, vec![Ok(sent)]);
    }

    #[test]
    fn cost_report_raw_bytes_sender() {
        // Not valid UTF-8, must still come back untouched.
        let sent = report(1, 1, &[0xff, 0x00, 0xfe]);
        let payload = Message::CostReports(vec![sent.clone()]).encode();

        assert_eq!(Message::cost_reports(payload).next(), Some(Ok(sent)));
    }

    #[test]
    fn oversized_sender_keeps_the_header_consistent() {
        let sender = vec![b'N'; CostReport::MAX_SENDER_LEN + 7];
        let sent = report(4, 9, &sender);

        let mut dst = BytesMut::new();
        sent.encode(&mut dst);
        assert_eq!(dst.len(), MAX_DATAGRAM_LEN);
        assert_eq!(sent.encoded_len(), MAX_DATAGRAM_LEN);

        let received = CostReport::decode(&mut dst.freeze()).unwrap().unwrap();
        assert_eq!(received.sender.len(), CostReport::MAX_SENDER_LEN);
        assert_eq!(received.row, 9);
    }

    #[test]
    fn name_overrun_discards_the_rest() {
        let mut dst = BytesMut::new();
        report(3, 0, b"A").encode(&mut dst);
        // The second record claims a 100 byte name but only carries 2.
        dst.put_u32(5);
        dst.put_u32(1);
        dst.put_u32(100);
        dst.put_slice(b"AB");

        let mut records = Message::cost_reports(dst.freeze());

        assert_eq!(records.next(), Some(Ok(report(3, 0, b"A"))));
        assert_eq!(
            records.next(),
            Some(Err(MalformedReport::NameOverrun {
                declared: 100,
                remaining: 2
            }))
        );
        assert_eq!(records.next(), None);
    }

    #[test]
    fn short_tail_is_truncated() {
        let mut dst = BytesMut::new();
        report(3, 0, b"A").encode(&mut dst);
        dst.put_slice(&[0, 0, 0]);

        let records: Vec<_> = Message::cost_reports(dst.freeze()).collect();

        assert_eq!(
            records,
            vec![
                Ok(report(3, 0, b"A")),
                Err(MalformedReport::Truncated { remaining: 3 })
            ]
        );
    }

    #[test]
    fn empty_payload() {
        assert_eq!(Message::cost_reports(Bytes::new()).count(), 0);
        assert_eq!(Message::queue_records(Bytes::new()).count(), 0);
    }

    #[test]
    fn queue_records_floor_count() {
        let records = vec![
            QueueRecord {
                reporter: 3,
                interface: "fd00:1::1".parse().unwrap(),
                occupancy: 12,
            },
            QueueRecord {
                reporter: 3,
                interface: "fd00:2::2".parse().unwrap(),
                occupancy: 0,
            },
        ];

        let encoded = Message::QueueStatus(records.clone()).encode();
        assert_eq!(encoded.len(), 2 * QueueRecord::LEN);
        assert_eq!(&encoded[..4], &[0, 0, 0, 3]);

        let mut payload = BytesMut::from(&encoded[..]);
        payload.put_slice(&[1, 2, 3, 4, 5]);

        let decoded: Vec<_> = Message::queue_records(payload.freeze()).collect();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0], Ok(records[0]));
        assert_eq!(decoded[1], Ok(records[1]));
        assert_eq!(decoded[2], Err(MalformedReport::Truncated { remaining: 5 }));
    }

    #[test]
    fn variant_as_str() {
        assert_eq!(
            Message::CostReports(vec![]).variant_as_str(),
            "cost_reports"
        );
        assert_eq!(Message::QueueStatus(vec![]).variant_as_str(), "queue_status");
    }

    #[test]
    fn channel() {
        assert_eq!(Message::CostReports(vec![]).channel(), Channel::CostReport);
        assert_eq!(Message::QueueStatus(vec![]).channel(), Channel::QueueStatus);
    }
}
