//! Delivery receipt decoding.

use super::pdu::{find_tlv, tag, ShortMessage};
use super::text;
use smsgw_common::types::Status;

/// esm_class message type bits
const ESM_TYPE_MASK: u8 = 0x3C;
/// esm_class value marking an SMSC delivery receipt
const ESM_DELIVERY_RECEIPT: u8 = 0x04;

/// A decoded delivery receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Operator id echoed from submit_sm_resp
    pub id: String,
    /// Vendor state string, e.g. DELIVRD
    pub state: String,
    /// Final status, None for intermediate states
    pub status: Option<Status>,
}

/// Map a vendor state string to a final status
pub fn map_state(state: &str) -> Option<Status> {
    match state.to_ascii_uppercase().as_str() {
        "DELIVRD" => Some(Status::Delivered),
        "UNDELIV" | "REJECTD" | "EXPIRED" | "DELETED" | "UNKNOWN" => Some(Status::NotDelivered),
        _ => None,
    }
}

/// Map the message_state TLV value to its vendor state string
fn message_state_name(value: u8) -> &'static str {
    match value {
        1 => "ENROUTE",
        2 => "DELIVRD",
        3 => "EXPIRED",
        4 => "DELETED",
        5 => "UNDELIV",
        6 => "ACCEPTD",
        8 => "REJECTD",
        _ => "UNKNOWN",
    }
}

/// Extract `key:value` from the textual receipt form
fn field<'a>(body: &'a str, key: &str) -> Option<&'a str> {
    body.split_whitespace().find_map(|token| {
        let (k, v) = token.split_once(':')?;
        k.eq_ignore_ascii_case(key).then_some(v)
    })
}

/// Parse `id:<opid> sub:... stat:<STATE> ...`
pub fn parse_text(body: &str) -> Option<(String, String)> {
    let id = field(body, "id")?;
    let state = field(body, "stat")?;
    Some((id.to_string(), state.to_string()))
}

impl Receipt {
    /// Decode a receipt from a deliver_sm; None when it is a mobile
    /// originated message.
    pub fn from_deliver(sm: &ShortMessage) -> Option<Receipt> {
        let tlv_id = find_tlv(&sm.tlvs, tag::RECEIPTED_MESSAGE_ID).map(|t| {
            let raw = t.value.strip_suffix(&[0]).unwrap_or(&t.value);
            String::from_utf8_lossy(raw).into_owned()
        });
        let tlv_state =
            find_tlv(&sm.tlvs, tag::MESSAGE_STATE).and_then(|t| t.value.first().copied());

        let body = text::decode(&sm.short_message, sm.data_coding);
        let parsed = parse_text(&body);
        let marked = sm.esm_class & ESM_TYPE_MASK == ESM_DELIVERY_RECEIPT;

        let (id, state) = match (tlv_id, tlv_state, parsed) {
            (Some(id), Some(state), _) => (id, message_state_name(state).to_string()),
            (Some(id), None, Some((_, state))) => (id, state),
            (Some(id), None, None) if marked => (id, "UNKNOWN".to_string()),
            (None, _, Some((id, state))) => (id, state),
            _ => return None,
        };
        if id.is_empty() {
            return None;
        }
        Some(Receipt {
            status: map_state(&state),
            id,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smpp::pdu::Tlv;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    fn deliver(body: &str) -> ShortMessage {
        ShortMessage {
            esm_class: ESM_DELIVERY_RECEIPT,
            short_message: Bytes::from(body.as_bytes().to_vec()),
            ..Default::default()
        }
    }

    #[test]
    fn test_textual_receipt() {
        let sm = deliver("id:ABC123 sub:001 dlvrd:001 submit date:2401010000 done date:2401010001 stat:DELIVRD err:000 text:Hi");
        assert_eq!(
            Receipt::from_deliver(&sm),
            Some(Receipt {
                id: "ABC123".to_string(),
                state: "DELIVRD".to_string(),
                status: Some(Status::Delivered),
            })
        );
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(map_state("DELIVRD"), Some(Status::Delivered));
        for state in ["UNDELIV", "REJECTD", "EXPIRED", "DELETED", "UNKNOWN"] {
            assert_eq!(map_state(state), Some(Status::NotDelivered), "{}", state);
        }
        assert_eq!(map_state("ENROUTE"), None);
        assert_eq!(map_state("ACCEPTD"), None);
    }

    #[test]
    fn test_tlv_receipt_wins_over_text() {
        let mut sm = deliver("id:OTHER stat:DELIVRD");
        sm.tlvs = vec![
            Tlv::new(tag::RECEIPTED_MESSAGE_ID, b"XYZ9\0".to_vec()),
            Tlv::u8(tag::MESSAGE_STATE, 5),
        ];
        let receipt = Receipt::from_deliver(&sm).unwrap();
        assert_eq!(receipt.id, "XYZ9");
        assert_eq!(receipt.status, Some(Status::NotDelivered));
    }

    #[test]
    fn test_mobile_originated_is_not_a_receipt() {
        let mut sm = deliver("hello there");
        sm.esm_class = 0;
        assert_eq!(Receipt::from_deliver(&sm), None);
    }
}
