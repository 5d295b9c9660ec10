//! Short message text encoding and long message segmentation.

use super::pdu::{tag, Tlv};
use bytes::Bytes;
use smsgw_common::config::SegmentMode;
use smsgw_common::types::Encoding;

/// Characters that fit one unsegmented latin message
pub const MAX_SHORT_LATIN: usize = 160;
/// Characters that fit one unsegmented UCS-2 message
pub const MAX_SHORT_UCS: usize = 70;
/// Characters per latin segment once a UDH is present
pub const MAX_PART_LATIN: usize = 153;
/// Characters per UCS-2 segment once a UDH is present
pub const MAX_PART_UCS: usize = 67;

/// Most segments a concatenation header can number
pub const MAX_SEGMENTS: i32 = 255;

/// data_coding for Latin-1
pub const DCS_LATIN1: u8 = 0x03;
/// data_coding for UCS-2
pub const DCS_UCS2: u8 = 0x08;
/// Message class 0 marker
pub const DCS_FLASH: u8 = 0x10;

/// esm_class with the UDH indicator set
pub const ESM_UDHI: u8 = 0x40;

/// Registered delivery requesting a final receipt
pub const REGISTERED_FINAL_RECEIPT: u8 = 0x01;

/// (short, part) limits for an encoding
pub fn limits(enc: Encoding) -> (usize, usize) {
    match enc {
        Encoding::Latin => (MAX_SHORT_LATIN, MAX_PART_LATIN),
        Encoding::Ucs => (MAX_SHORT_UCS, MAX_PART_UCS),
    }
}

/// Number of segments the text occupies on the wire
pub fn total_segments(text: &str, enc: Encoding) -> i32 {
    let (short, part) = limits(enc);
    let len = text.chars().count();
    if len <= short {
        1
    } else {
        len.div_ceil(part) as i32
    }
}

/// Split text into per-segment chunks; short text stays whole
pub fn split(text: &str, enc: Encoding) -> Vec<String> {
    let (short, part) = limits(enc);
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= short {
        return vec![text.to_string()];
    }
    chars.chunks(part).map(|c| c.iter().collect()).collect()
}

/// Encode text; characters outside Latin-1 become '?'
pub fn encode(text: &str, enc: Encoding) -> Vec<u8> {
    match enc {
        Encoding::Latin => text
            .chars()
            .map(|c| if (c as u32) <= 0xFF { c as u8 } else { b'?' })
            .collect(),
        Encoding::Ucs => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
    }
}

/// Decode a short_message according to its data_coding
pub fn decode(data: &[u8], data_coding: u8) -> String {
    if data_coding & 0x0F == DCS_UCS2 {
        let units: Vec<u16> = data
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        data.iter().map(|b| *b as char).collect()
    }
}

pub fn data_coding(enc: Encoding, flash: bool) -> u8 {
    let dcs = match enc {
        Encoding::Latin => DCS_LATIN1,
        Encoding::Ucs => DCS_UCS2,
    };
    if flash {
        dcs | DCS_FLASH
    } else {
        dcs
    }
}

/// Concatenation user data header with 8-bit reference
pub fn udh(reference: u8, total: u8, seq: u8) -> [u8; 6] {
    [0x05, 0x00, 0x03, reference, total, seq]
}

/// One wire segment of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub esm_class: u8,
    pub short_message: Bytes,
    pub tlvs: Vec<Tlv>,
}

/// Build the wire segments of a message.
///
/// `reference` is drawn once per message; UDH mode uses its low byte.
pub fn segments(text: &str, enc: Encoding, mode: SegmentMode, reference: u16) -> Vec<Segment> {
    let parts = split(text, enc);
    if parts.len() == 1 {
        return vec![Segment {
            esm_class: 0,
            short_message: Bytes::from(encode(text, enc)),
            tlvs: Vec::new(),
        }];
    }

    let total = parts.len().min(u8::MAX as usize) as u8;
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            let seq = (i + 1) as u8;
            let body = encode(part, enc);
            match mode {
                SegmentMode::Udh => {
                    let mut payload = udh(reference as u8, total, seq).to_vec();
                    payload.extend_from_slice(&body);
                    Segment {
                        esm_class: ESM_UDHI,
                        short_message: Bytes::from(payload),
                        tlvs: Vec::new(),
                    }
                }
                SegmentMode::Sar => Segment {
                    esm_class: 0,
                    short_message: Bytes::from(body),
                    tlvs: vec![
                        Tlv::u16(tag::SAR_MSG_REF_NUM, reference),
                        Tlv::u8(tag::SAR_TOTAL_SEGMENTS, total),
                        Tlv::u8(tag::SAR_SEGMENT_SEQNUM, seq),
                    ],
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_segment_counts_at_boundaries() {
        assert_eq!(total_segments(&"a".repeat(160), Encoding::Latin), 1);
        assert_eq!(total_segments(&"a".repeat(161), Encoding::Latin), 2);
        assert_eq!(total_segments(&"a".repeat(306), Encoding::Latin), 2);
        assert_eq!(total_segments(&"a".repeat(307), Encoding::Latin), 3);
        assert_eq!(total_segments(&"ж".repeat(70), Encoding::Ucs), 1);
        assert_eq!(total_segments(&"ж".repeat(200), Encoding::Ucs), 3);
    }

    #[test]
    fn test_longest_message_numbers_every_segment() {
        let text = "a".repeat(MAX_PART_LATIN * MAX_SEGMENTS as usize);
        assert_eq!(total_segments(&text, Encoding::Latin), MAX_SEGMENTS);
        let segs = segments(&text, Encoding::Latin, SegmentMode::Udh, 5);
        assert_eq!(segs.len(), 255);
        assert_eq!(&segs[254].short_message[..6], &[0x05, 0x00, 0x03, 5, 255, 255]);
        assert_eq!(total_segments(&format!("{}a", text), Encoding::Latin), 256);
    }

    #[test]
    fn test_encode_decode() {
        assert_eq!(decode(&encode("Hi there", Encoding::Latin), DCS_LATIN1), "Hi there");
        assert_eq!(encode("€5", Encoding::Latin), b"?5".to_vec());
        let text = "Привет, мир 👋";
        assert_eq!(decode(&encode(text, Encoding::Ucs), DCS_UCS2), text);
        assert_eq!(encode("A", Encoding::Ucs), vec![0x00, 0x41]);
    }

    #[test]
    fn test_split_reassembles() {
        let text: String = (0..400).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let parts = split(&text, Encoding::Latin);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].chars().count(), 153);
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_udh_segments() {
        let text = "b".repeat(200);
        let segs = segments(&text, Encoding::Latin, SegmentMode::Udh, 0x01AB);
        assert_eq!(segs.len(), 2);
        for (i, seg) in segs.iter().enumerate() {
            assert_eq!(seg.esm_class, ESM_UDHI);
            assert_eq!(&seg.short_message[..6], &[0x05, 0x00, 0x03, 0xAB, 2, i as u8 + 1]);
        }
        assert_eq!(segs[0].short_message.len(), 6 + 153);
        assert_eq!(segs[1].short_message.len(), 6 + 47);
    }

    #[test]
    fn test_sar_segments() {
        let text = "д".repeat(200);
        let segs = segments(&text, Encoding::Ucs, SegmentMode::Sar, 777);
        assert_eq!(segs.len(), 3);
        for (i, seg) in segs.iter().enumerate() {
            assert_eq!(seg.esm_class, 0);
            assert_eq!(
                seg.tlvs,
                vec![
                    Tlv::u16(tag::SAR_MSG_REF_NUM, 777),
                    Tlv::u8(tag::SAR_TOTAL_SEGMENTS, 3),
                    Tlv::u8(tag::SAR_SEGMENT_SEQNUM, i as u8 + 1),
                ]
            );
        }
        assert_eq!(segs[2].short_message.len(), (200 - 2 * 67) * 2);
    }

    #[test]
    fn test_data_coding() {
        assert_eq!(data_coding(Encoding::Latin, false), 0x03);
        assert_eq!(data_coding(Encoding::Ucs, false), 0x08);
        assert_eq!(data_coding(Encoding::Ucs, true), 0x18);
    }
}
