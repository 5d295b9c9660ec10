//! Length-prefixed framing for SMPP over a byte stream.

use super::pdu::{Command, Header, Pdu, PduError, HEADER_LEN};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Largest PDU accepted from a peer
pub const MAX_PDU_LEN: usize = 64 * 1024;

/// A decoded PDU with its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduFrame {
    pub header: Header,
    pub pdu: Pdu,
}

impl PduFrame {
    /// Request frame with status OK
    pub fn new(sequence: u32, pdu: Pdu) -> Self {
        Self {
            header: Header::new(pdu.command(), sequence),
            pdu,
        }
    }

    /// Response frame carrying a command status
    pub fn response(sequence: u32, status: u32, pdu: Pdu) -> Self {
        Self {
            header: Header::with_status(pdu.command(), sequence, status),
            pdu,
        }
    }

    pub fn command(&self) -> Command {
        self.header.command
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    pub fn status(&self) -> u32 {
        self.header.status
    }

    pub fn is_response(&self) -> bool {
        self.header.command.is_response()
    }
}

/// SMPP frame codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmppCodec;

impl SmppCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for SmppCodec {
    type Item = PduFrame;
    type Error = PduError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<PduFrame>, PduError> {
        if src.len() < 4 {
            return Ok(None);
        }
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        let len = length as usize;
        if !(HEADER_LEN..=MAX_PDU_LEN).contains(&len) {
            return Err(PduError::InvalidLength(length));
        }
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(len).freeze();
        frame.advance(4);
        let header = Header {
            command: Command::from_id(frame.get_u32()),
            status: frame.get_u32(),
            sequence: frame.get_u32(),
        };
        let pdu = Pdu::decode_body(&header, frame)?;
        Ok(Some(PduFrame { header, pdu }))
    }
}

impl Encoder<PduFrame> for SmppCodec {
    type Error = PduError;

    fn encode(&mut self, frame: PduFrame, dst: &mut BytesMut) -> Result<(), PduError> {
        let start = dst.len();
        dst.put_u32(0);
        dst.put_u32(frame.header.command.id());
        dst.put_u32(frame.header.status);
        dst.put_u32(frame.header.sequence);
        frame.pdu.encode_body(dst);

        let length = (dst.len() - start) as u32;
        dst[start..start + 4].copy_from_slice(&length.to_be_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smpp::pdu::BindTransceiver;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_enquire_link_wire_bytes() {
        let mut buf = BytesMut::new();
        SmppCodec
            .encode(PduFrame::new(7, Pdu::EnquireLink), &mut buf)
            .unwrap();
        assert_eq!(
            &buf[..],
            &[0, 0, 0, 16, 0, 0, 0, 0x15, 0, 0, 0, 0, 0, 0, 0, 7]
        );
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let frame = PduFrame::new(
            1,
            Pdu::BindTransceiver(BindTransceiver::new("user", "secret", "CMT")),
        );
        let mut encoded = BytesMut::new();
        SmppCodec.encode(frame.clone(), &mut encoded).unwrap();

        let mut partial = BytesMut::from(&encoded[..10]);
        assert!(SmppCodec.decode(&mut partial).unwrap().is_none());
        partial.extend_from_slice(&encoded[10..]);
        assert_eq!(SmppCodec.decode(&mut partial).unwrap(), Some(frame));
        assert!(partial.is_empty());
    }

    #[test]
    fn test_rejects_bad_length() {
        let mut buf = BytesMut::from(&[0u8, 0, 0, 4, 0, 0, 0, 0][..]);
        assert!(matches!(
            SmppCodec.decode(&mut buf),
            Err(PduError::InvalidLength(4))
        ));
    }
}
