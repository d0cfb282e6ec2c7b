//! Codecs for the control datagrams.
//!
//! A datagram is handed to the decoder as a whole and drained through `decode_eof`, so a record cut
//! short is dropped with a warning instead of failing the stream. Callers that need to know what
//! was dropped decode with `decode` and finish with `discard_tail`.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::core::{
    error::MalformedReport,
    message::{Channel, CostReport, Message, QueueRecord, MAX_DATAGRAM_LEN},
};

fn invalid_data(e: MalformedReport) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

fn wrong_channel(message: &Message) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{} can't be sent on this channel", message.variant_as_str()),
    )
}

/// Decodes cost reports one record at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct CostReportCodec;

impl CostReportCodec {
    pub fn new() -> Self {
        Self
    }

    /// Drops what is left of `src` once `decode` stops yielding records, returning why it didn't
    /// make up one.
    pub fn discard_tail(&mut self, src: &mut BytesMut) -> Option<MalformedReport> {
        if src.is_empty() {
            return None;
        }

        CostReport::decode(&mut src.split().freeze()).err()
    }
}

impl Decoder for CostReportCodec {
    type Item = CostReport;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < CostReport::HEADER_LEN {
            return Ok(None);
        }

        let declared = (&src[8..12]).get_u32() as usize;
        let len = CostReport::HEADER_LEN.saturating_add(declared);
        if src.len() < len {
            // The declared length is untrusted, never reserve past a whole datagram.
            src.reserve(len.min(MAX_DATAGRAM_LEN).saturating_sub(src.len()));
            return Ok(None);
        }

        let mut frame = src.split_to(len).freeze();
        CostReport::decode(&mut frame).map_err(invalid_data)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(report) = self.decode(src)? {
            return Ok(Some(report));
        }

        if let Some(e) = self.discard_tail(src) {
            warn!("discarding the end of a cost report datagram: {e}");
        }

        Ok(None)
    }
}

impl Encoder<CostReport> for CostReportCodec {
    type Error = io::Error;

    fn encode(&mut self, report: CostReport, dst: &mut BytesMut) -> Result<(), Self::Error> {
        report.encode(dst);
        Ok(())
    }
}

impl Encoder<Message> for CostReportCodec {
    type Error = io::Error;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if message.channel() != Channel::CostReport {
            return Err(wrong_channel(&message));
        }

        dst.put(message.encode());
        Ok(())
    }
}

/// Decodes fixed size queue telemetry records.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueRecordCodec;

impl QueueRecordCodec {
    pub fn new() -> Self {
        Self
    }

    /// Drops the bytes left over after the last whole record.
    pub fn discard_tail(&mut self, src: &mut BytesMut) -> Option<MalformedReport> {
        if src.is_empty() {
            return None;
        }

        let remaining = src.len();
        src.clear();

        Some(MalformedReport::Truncated { remaining })
    }
}

impl Decoder for QueueRecordCodec {
    type Item = QueueRecord;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < QueueRecord::LEN {
            src.reserve(QueueRecord::LEN - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(QueueRecord::LEN).freeze();
        QueueRecord::decode(&mut frame).map_err(invalid_data)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(record) = self.decode(src)? {
            return Ok(Some(record));
        }

        if let Some(e) = self.discard_tail(src) {
            warn!("discarding the end of a queue status datagram: {e}");
        }

        Ok(None)
    }
}

impl Encoder<QueueRecord> for QueueRecordCodec {
    type Error = io::Error;

    fn encode(&mut self, record: QueueRecord, dst: &mut BytesMut) -> Result<(), Self::Error> {
        record.encode(dst);
        Ok(())
    }
}

impl Encoder<Message> for QueueRecordCodec {
    type Error = io::Error;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if message.channel() != Channel::QueueStatus {
            return Err(wrong_channel(&message));
        }

        dst.put(message.encode());
        Ok(())
    }
}
