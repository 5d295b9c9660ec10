//! SMPP v3.4 transceiver client.
//!
//! The codec and PDU types are self-contained; [`client::SmppClient`] runs
//! one bound session and implements [`Transmitter`], the seam the worker
//! submits through.

pub mod client;
pub mod codec;
pub mod pdu;
pub mod receipt;
pub mod text;

pub use client::{ClientOptions, Inbound, SmppClient};
pub use codec::{PduFrame, SmppCodec};
pub use pdu::{Pdu, ShortMessage};
pub use receipt::Receipt;

use async_trait::async_trait;
use smsgw_common::config::{PduFields, SegmentMode};
use smsgw_common::types::Encoding;
use thiserror::Error;

/// System type sent in bind_transceiver
pub const SYSTEM_TYPE: &str = "CMT";

/// SMPP client errors.
#[derive(Debug, Error)]
pub enum SmppError {
    #[error("SMPP session is not connected")]
    NotConnected,

    #[error("throttled by peer")]
    Throttled,

    #[error("command status {0:#010x}")]
    Status(u32),

    #[error("bind failed: {0}")]
    Bind(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timed out waiting for response")]
    Timeout,
}

impl SmppError {
    /// Map a non-OK command status
    pub fn from_status(status: u32) -> Self {
        if status == pdu::status::THROTTLED {
            SmppError::Throttled
        } else {
            SmppError::Status(status)
        }
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, SmppError::Throttled)
    }
}

impl From<pdu::PduError> for SmppError {
    fn from(e: pdu::PduError) -> Self {
        match e {
            pdu::PduError::Io(io) => SmppError::Io(io),
            other => SmppError::Protocol(other.to_string()),
        }
    }
}

impl From<SmppError> for smsgw_common::Error {
    fn from(e: SmppError) -> Self {
        smsgw_common::Error::Smpp(e.to_string())
    }
}

/// Submits one wire PDU at a time and returns the operator id.
#[async_trait]
pub trait Transmitter: Send + Sync {
    async fn submit(&self, sm: ShortMessage) -> Result<String, SmppError>;
}

/// Everything needed to put one logical message on the wire.
#[derive(Debug, Clone)]
pub struct Outbound<'a> {
    pub src: &'a str,
    pub dst: &'a str,
    pub text: &'a str,
    pub enc: Encoding,
    pub is_flash: bool,
}

/// Build the submit_sm PDUs for a message, one per segment.
pub fn submit_pdus(
    out: &Outbound<'_>,
    fields: &PduFields,
    mode: SegmentMode,
    reference: u16,
) -> Vec<ShortMessage> {
    let data_coding = text::data_coding(out.enc, out.is_flash);
    text::segments(out.text, out.enc, mode, reference)
        .into_iter()
        .map(|seg| ShortMessage {
            service_type: fields.service_type.clone(),
            source_addr_ton: fields.source_addr_ton,
            source_addr_npi: fields.source_addr_npi,
            source_addr: out.src.to_string(),
            dest_addr_ton: fields.dest_addr_ton,
            dest_addr_npi: fields.dest_addr_npi,
            destination_addr: out.dst.to_string(),
            esm_class: seg.esm_class,
            protocol_id: fields.protocol_id,
            priority_flag: fields.priority_flag,
            schedule_delivery_time: fields.schedule_delivery_time.clone(),
            validity_period: String::new(),
            registered_delivery: text::REGISTERED_FINAL_RECEIPT,
            replace_if_present_flag: fields.replace_if_present_flag,
            data_coding,
            sm_default_msg_id: fields.sm_default_msg_id,
            short_message: seg.short_message,
            tlvs: seg.tlvs,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_pdus_apply_fields() {
        let fields = PduFields {
            service_type: "WAP".to_string(),
            source_addr_ton: 5,
            dest_addr_npi: 1,
            ..Default::default()
        };
        let out = Outbound {
            src: "DEMO",
            dst: "923001234567",
            text: "Hi",
            enc: Encoding::Latin,
            is_flash: false,
        };
        let pdus = submit_pdus(&out, &fields, SegmentMode::Udh, 9);
        assert_eq!(pdus.len(), 1);
        assert_eq!(pdus[0].service_type, "WAP");
        assert_eq!(pdus[0].source_addr_ton, 5);
        assert_eq!(pdus[0].dest_addr_npi, 1);
        assert_eq!(pdus[0].data_coding, 0x03);
        assert_eq!(pdus[0].registered_delivery, 1);
        assert_eq!(&pdus[0].short_message[..], b"Hi");
    }

    #[test]
    fn test_throttle_status() {
        assert!(SmppError::from_status(0x58).is_throttled());
        assert!(!SmppError::from_status(0x45).is_throttled());
    }
}
