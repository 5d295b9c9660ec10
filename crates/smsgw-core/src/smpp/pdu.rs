//! SMPP v3.4 PDU types and body encoding.
//!
//! Only the operations a transceiver ESME needs are typed; anything else
//! decodes to [`Pdu::Unknown`] so the session can answer it with a
//! generic_nack instead of dropping the link.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Fixed PDU header length in octets
pub const HEADER_LEN: usize = 16;

/// SMPP interface version 3.4
pub const INTERFACE_VERSION: u8 = 0x34;

/// PDU decoding errors.
#[derive(Debug, Error)]
pub enum PduError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid command_length {0}")]
    InvalidLength(u32),

    #[error("truncated field {0}")]
    Truncated(&'static str),

    #[error("unterminated C-string {0}")]
    Unterminated(&'static str),
}

/// Command status values the client acts upon.
pub mod status {
    pub const OK: u32 = 0x0000_0000;
    pub const INVALID_COMMAND_ID: u32 = 0x0000_0003;
    pub const BIND_FAILED: u32 = 0x0000_000D;
    pub const INVALID_PASSWORD: u32 = 0x0000_000E;
    pub const THROTTLED: u32 = 0x0000_0058;
    pub const SYSTEM_ERROR: u32 = 0x0000_0008;
}

/// Optional parameter tags.
pub mod tag {
    pub const RECEIPTED_MESSAGE_ID: u16 = 0x001E;
    pub const SAR_MSG_REF_NUM: u16 = 0x020C;
    pub const SAR_TOTAL_SEGMENTS: u16 = 0x020E;
    pub const SAR_SEGMENT_SEQNUM: u16 = 0x020F;
    pub const MESSAGE_STATE: u16 = 0x0427;
}

/// SMPP command identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    GenericNack,
    BindTransceiver,
    BindTransceiverResp,
    SubmitSm,
    SubmitSmResp,
    DeliverSm,
    DeliverSmResp,
    Unbind,
    UnbindResp,
    EnquireLink,
    EnquireLinkResp,
    Unknown(u32),
}

const RESPONSE_BIT: u32 = 0x8000_0000;

impl Command {
    pub fn id(&self) -> u32 {
        match self {
            Command::GenericNack => 0x8000_0000,
            Command::BindTransceiver => 0x0000_0009,
            Command::BindTransceiverResp => 0x8000_0009,
            Command::SubmitSm => 0x0000_0004,
            Command::SubmitSmResp => 0x8000_0004,
            Command::DeliverSm => 0x0000_0005,
            Command::DeliverSmResp => 0x8000_0005,
            Command::Unbind => 0x0000_0006,
            Command::UnbindResp => 0x8000_0006,
            Command::EnquireLink => 0x0000_0015,
            Command::EnquireLinkResp => 0x8000_0015,
            Command::Unknown(id) => *id,
        }
    }

    pub fn from_id(id: u32) -> Self {
        match id {
            0x8000_0000 => Command::GenericNack,
            0x0000_0009 => Command::BindTransceiver,
            0x8000_0009 => Command::BindTransceiverResp,
            0x0000_0004 => Command::SubmitSm,
            0x8000_0004 => Command::SubmitSmResp,
            0x0000_0005 => Command::DeliverSm,
            0x8000_0005 => Command::DeliverSmResp,
            0x0000_0006 => Command::Unbind,
            0x8000_0006 => Command::UnbindResp,
            0x0000_0015 => Command::EnquireLink,
            0x8000_0015 => Command::EnquireLinkResp,
            other => Command::Unknown(other),
        }
    }

    pub fn is_response(&self) -> bool {
        self.id() & RESPONSE_BIT != 0
    }
}

/// PDU header. `command_length` is derived when encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub command: Command,
    pub status: u32,
    pub sequence: u32,
}

impl Header {
    pub fn new(command: Command, sequence: u32) -> Self {
        Self {
            command,
            status: status::OK,
            sequence,
        }
    }

    pub fn with_status(command: Command, sequence: u32, status: u32) -> Self {
        Self {
            command,
            status,
            sequence,
        }
    }
}

/// Tagged optional parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tag: u16,
    pub value: Bytes,
}

impl Tlv {
    pub fn new(tag: u16, value: impl Into<Bytes>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    pub fn u8(tag: u16, value: u8) -> Self {
        Self::new(tag, vec![value])
    }

    pub fn u16(tag: u16, value: u16) -> Self {
        Self::new(tag, value.to_be_bytes().to_vec())
    }
}

/// Find a TLV by tag
pub fn find_tlv(tlvs: &[Tlv], tag: u16) -> Option<&Tlv> {
    tlvs.iter().find(|t| t.tag == tag)
}

/// bind_transceiver body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindTransceiver {
    pub system_id: String,
    pub password: String,
    pub system_type: String,
    pub interface_version: u8,
    pub addr_ton: u8,
    pub addr_npi: u8,
    pub address_range: String,
}

impl BindTransceiver {
    pub fn new(system_id: &str, password: &str, system_type: &str) -> Self {
        Self {
            system_id: system_id.to_string(),
            password: password.to_string(),
            system_type: system_type.to_string(),
            interface_version: INTERFACE_VERSION,
            addr_ton: 0,
            addr_npi: 0,
            address_range: String::new(),
        }
    }
}

/// Mandatory and optional fields shared by submit_sm and deliver_sm.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortMessage {
    pub service_type: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
    pub dest_addr_ton: u8,
    pub dest_addr_npi: u8,
    pub destination_addr: String,
    pub esm_class: u8,
    pub protocol_id: u8,
    pub priority_flag: u8,
    pub schedule_delivery_time: String,
    pub validity_period: String,
    pub registered_delivery: u8,
    pub replace_if_present_flag: u8,
    pub data_coding: u8,
    pub sm_default_msg_id: u8,
    pub short_message: Bytes,
    pub tlvs: Vec<Tlv>,
}

/// Typed PDU bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    GenericNack,
    BindTransceiver(BindTransceiver),
    BindTransceiverResp { system_id: String },
    SubmitSm(ShortMessage),
    SubmitSmResp { message_id: String },
    DeliverSm(ShortMessage),
    DeliverSmResp,
    Unbind,
    UnbindResp,
    EnquireLink,
    EnquireLinkResp,
    Unknown { command_id: u32, body: Bytes },
}

impl Pdu {
    pub fn command(&self) -> Command {
        match self {
            Pdu::GenericNack => Command::GenericNack,
            Pdu::BindTransceiver(_) => Command::BindTransceiver,
            Pdu::BindTransceiverResp { .. } => Command::BindTransceiverResp,
            Pdu::SubmitSm(_) => Command::SubmitSm,
            Pdu::SubmitSmResp { .. } => Command::SubmitSmResp,
            Pdu::DeliverSm(_) => Command::DeliverSm,
            Pdu::DeliverSmResp => Command::DeliverSmResp,
            Pdu::Unbind => Command::Unbind,
            Pdu::UnbindResp => Command::UnbindResp,
            Pdu::EnquireLink => Command::EnquireLink,
            Pdu::EnquireLinkResp => Command::EnquireLinkResp,
            Pdu::Unknown { command_id, .. } => Command::Unknown(*command_id),
        }
    }

    /// Write the body after the header.
    pub fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            Pdu::BindTransceiver(b) => {
                put_cstr(buf, &b.system_id);
                put_cstr(buf, &b.password);
                put_cstr(buf, &b.system_type);
                buf.put_u8(b.interface_version);
                buf.put_u8(b.addr_ton);
                buf.put_u8(b.addr_npi);
                put_cstr(buf, &b.address_range);
            }
            Pdu::BindTransceiverResp { system_id } => put_cstr(buf, system_id),
            Pdu::SubmitSm(sm) | Pdu::DeliverSm(sm) => encode_short_message(buf, sm),
            Pdu::SubmitSmResp { message_id } => put_cstr(buf, message_id),
            // deliver_sm_resp carries an unused, empty message_id
            Pdu::DeliverSmResp => buf.put_u8(0),
            Pdu::Unknown { body, .. } => buf.put_slice(body),
            Pdu::GenericNack
            | Pdu::Unbind
            | Pdu::UnbindResp
            | Pdu::EnquireLink
            | Pdu::EnquireLinkResp => {}
        }
    }

    /// Decode a body whose header has already been read.
    ///
    /// Error responses may legally omit their body, so responses with an
    /// empty body decode to their default fields.
    pub fn decode_body(header: &Header, mut body: Bytes) -> Result<Pdu, PduError> {
        let pdu = match header.command {
            Command::GenericNack => Pdu::GenericNack,
            Command::BindTransceiver => Pdu::BindTransceiver(BindTransceiver {
                system_id: get_cstr(&mut body, "system_id")?,
                password: get_cstr(&mut body, "password")?,
                system_type: get_cstr(&mut body, "system_type")?,
                interface_version: get_u8(&mut body, "interface_version")?,
                addr_ton: get_u8(&mut body, "addr_ton")?,
                addr_npi: get_u8(&mut body, "addr_npi")?,
                address_range: get_cstr(&mut body, "address_range")?,
            }),
            Command::BindTransceiverResp => Pdu::BindTransceiverResp {
                system_id: get_optional_cstr(&mut body, "system_id")?,
            },
            Command::SubmitSm => Pdu::SubmitSm(decode_short_message(&mut body)?),
            Command::SubmitSmResp => Pdu::SubmitSmResp {
                message_id: get_optional_cstr(&mut body, "message_id")?,
            },
            Command::DeliverSm => Pdu::DeliverSm(decode_short_message(&mut body)?),
            Command::DeliverSmResp => Pdu::DeliverSmResp,
            Command::Unbind => Pdu::Unbind,
            Command::UnbindResp => Pdu::UnbindResp,
            Command::EnquireLink => Pdu::EnquireLink,
            Command::EnquireLinkResp => Pdu::EnquireLinkResp,
            Command::Unknown(command_id) => Pdu::Unknown { command_id, body },
        };
        Ok(pdu)
    }
}

fn encode_short_message(buf: &mut BytesMut, sm: &ShortMessage) {
    put_cstr(buf, &sm.service_type);
    buf.put_u8(sm.source_addr_ton);
    buf.put_u8(sm.source_addr_npi);
    put_cstr(buf, &sm.source_addr);
    buf.put_u8(sm.dest_addr_ton);
    buf.put_u8(sm.dest_addr_npi);
    put_cstr(buf, &sm.destination_addr);
    buf.put_u8(sm.esm_class);
    buf.put_u8(sm.protocol_id);
    buf.put_u8(sm.priority_flag);
    put_cstr(buf, &sm.schedule_delivery_time);
    put_cstr(buf, &sm.validity_period);
    buf.put_u8(sm.registered_delivery);
    buf.put_u8(sm.replace_if_present_flag);
    buf.put_u8(sm.data_coding);
    buf.put_u8(sm.sm_default_msg_id);
    buf.put_u8(sm.short_message.len().min(u8::MAX as usize) as u8);
    buf.put_slice(&sm.short_message[..sm.short_message.len().min(u8::MAX as usize)]);
    for tlv in &sm.tlvs {
        buf.put_u16(tlv.tag);
        buf.put_u16(tlv.value.len() as u16);
        buf.put_slice(&tlv.value);
    }
}

fn decode_short_message(body: &mut Bytes) -> Result<ShortMessage, PduError> {
    let mut sm = ShortMessage {
        service_type: get_cstr(body, "service_type")?,
        source_addr_ton: get_u8(body, "source_addr_ton")?,
        source_addr_npi: get_u8(body, "source_addr_npi")?,
        source_addr: get_cstr(body, "source_addr")?,
        dest_addr_ton: get_u8(body, "dest_addr_ton")?,
        dest_addr_npi: get_u8(body, "dest_addr_npi")?,
        destination_addr: get_cstr(body, "destination_addr")?,
        esm_class: get_u8(body, "esm_class")?,
        protocol_id: get_u8(body, "protocol_id")?,
        priority_flag: get_u8(body, "priority_flag")?,
        schedule_delivery_time: get_cstr(body, "schedule_delivery_time")?,
        validity_period: get_cstr(body, "validity_period")?,
        registered_delivery: get_u8(body, "registered_delivery")?,
        replace_if_present_flag: get_u8(body, "replace_if_present_flag")?,
        data_coding: get_u8(body, "data_coding")?,
        sm_default_msg_id: get_u8(body, "sm_default_msg_id")?,
        ..Default::default()
    };
    let sm_length = get_u8(body, "sm_length")? as usize;
    if body.remaining() < sm_length {
        return Err(PduError::Truncated("short_message"));
    }
    sm.short_message = body.split_to(sm_length);

    while body.has_remaining() {
        if body.remaining() < 4 {
            return Err(PduError::Truncated("tlv header"));
        }
        let tag = body.get_u16();
        let len = body.get_u16() as usize;
        if body.remaining() < len {
            return Err(PduError::Truncated("tlv value"));
        }
        sm.tlvs.push(Tlv {
            tag,
            value: body.split_to(len),
        });
    }
    Ok(sm)
}

fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

fn get_u8(body: &mut Bytes, field: &'static str) -> Result<u8, PduError> {
    if !body.has_remaining() {
        return Err(PduError::Truncated(field));
    }
    Ok(body.get_u8())
}

fn get_cstr(body: &mut Bytes, field: &'static str) -> Result<String, PduError> {
    let end = body
        .iter()
        .position(|b| *b == 0)
        .ok_or(PduError::Unterminated(field))?;
    let raw = body.split_to(end);
    body.advance(1);
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn get_optional_cstr(body: &mut Bytes, field: &'static str) -> Result<String, PduError> {
    if body.is_empty() {
        Ok(String::new())
    } else {
        get_cstr(body, field)
    }
}
