//! HCI event decoding.
//!
//! Packet layout: `[0x04][event code][parameter length][parameters]`. LE
//! Advertising Report parameters are `[subevent 0x02][num reports]` followed
//! by, per report, `[event type][address type][address x6][data length]
//! [data][rssi]`.

use tracing::trace;

use super::{
    AddressType, BdAddr, EVT_LE_ADVERTISING_REPORT, EVT_LE_META_EVENT, HCI_EVENT_PKT,
};
use crate::error::{Error, Result};

/// One advertising report, borrowing its AD payload from the packet buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingReport<'a> {
    /// Advertising event type (ADV_IND, ADV_NONCONN_IND, SCAN_RSP, ...).
    pub event_type: u8,
    /// Advertiser address type.
    pub address_type: AddressType,
    /// Advertiser address.
    pub address: BdAddr,
    /// Raw AD structures.
    pub data: &'a [u8],
    /// Signal strength in dBm, when the packet carried it.
    pub rssi: Option<i8>,
}

/// A decoded HCI event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HciEvent<'a> {
    /// LE Advertising Report event. May hold fewer reports than announced if
    /// the packet was truncated.
    AdvertisingReports(Vec<AdvertisingReport<'a>>),
    /// Any other LE Meta subevent.
    LeMeta {
        /// Subevent code.
        subevent: u8,
    },
    /// Any other event.
    Other {
        /// Event code.
        code: u8,
    },
}

/// Decode one HCI packet as read from the socket.
///
/// Fails only when the packet is not an event or its header is cut short.
pub fn decode_event(packet: &[u8]) -> Result<HciEvent<'_>> {
    let (&ptype, rest) = packet
        .split_first()
        .ok_or_else(|| Error::invalid_data("empty HCI packet"))?;

    if ptype != HCI_EVENT_PKT {
        return Err(Error::invalid_data(format!(
            "unexpected HCI packet type {:#04x}",
            ptype
        )));
    }

    if rest.len() < 2 {
        return Err(Error::invalid_data("truncated HCI event header"));
    }

    let code = rest[0];
    let params = &rest[2..];
    // trust the bytes we actually got over the declared length
    let params = &params[..params.len().min(usize::from(rest[1]))];

    if code != EVT_LE_META_EVENT {
        return Ok(HciEvent::Other { code });
    }

    let (&subevent, body) = params
        .split_first()
        .ok_or_else(|| Error::invalid_data("LE Meta event without subevent"))?;

    if subevent != EVT_LE_ADVERTISING_REPORT {
        return Ok(HciEvent::LeMeta { subevent });
    }

    Ok(HciEvent::AdvertisingReports(decode_reports(body)))
}

fn decode_reports(body: &[u8]) -> Vec<AdvertisingReport<'_>> {
    let Some((&count, mut rest)) = body.split_first() else {
        return Vec::new();
    };

    let mut reports = Vec::with_capacity(usize::from(count));

    for index in 0..count {
        // event type + address type + address + length
        if rest.len() < 9 {
            trace!("advertising report {} truncated in header", index);
            break;
        }

        let event_type = rest[0];
        let address_type = AddressType::from_raw(rest[1]);
        let mut address = [0u8; 6];
        address.copy_from_slice(&rest[2..8]);
        let length = usize::from(rest[8]);
        rest = &rest[9..];

        if rest.len() < length {
            trace!(
                "advertising report {} claims {} data bytes, {} left",
                index,
                length,
                rest.len()
            );
            break;
        }

        let (data, tail) = rest.split_at(length);
        let rssi = tail.first().map(|&b| b as i8);
        rest = tail.get(1..).unwrap_or_default();

        reports.push(AdvertisingReport {
            event_type,
            address_type,
            address: BdAddr::from_wire(address),
            data,
            rssi,
        });
    }

    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn report_packet(reports: &[(&[u8; 6], u8, &[u8])]) -> Vec<u8> {
        let mut params = vec![EVT_LE_ADVERTISING_REPORT, reports.len() as u8];
        for (addr, addr_type, data) in reports {
            params.push(0x00);
            params.push(*addr_type);
            params.extend_from_slice(&addr[..]);
            params.push(data.len() as u8);
            params.extend_from_slice(data);
            params.push(0xC4); // -60 dBm
        }
        let mut packet = vec![HCI_EVENT_PKT, EVT_LE_META_EVENT, params.len() as u8];
        packet.extend(params);
        packet
    }

    #[test]
    fn test_single_report() {
        let packet = report_packet(&[(&[1, 2, 3, 4, 5, 6], 0x01, &[0x02, 0x01, 0x06])]);
        let event = decode_event(&packet).unwrap();

        let HciEvent::AdvertisingReports(reports) = event else {
            panic!("expected advertising reports, got {:?}", event);
        };
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].address.to_string(), "06:05:04:03:02:01");
        assert_eq!(reports[0].address_type, AddressType::Random);
        assert_eq!(reports[0].data, &[0x02, 0x01, 0x06]);
        assert_eq!(reports[0].rssi, Some(-60));
    }

    #[test]
    fn test_multiple_reports() {
        let packet = report_packet(&[
            (&[1, 1, 1, 1, 1, 1], 0x00, &[0x02, 0x01, 0x06]),
            (&[2, 2, 2, 2, 2, 2], 0x00, &[]),
        ]);
        let HciEvent::AdvertisingReports(reports) = decode_event(&packet).unwrap() else {
            panic!("expected advertising reports");
        };
        assert_eq!(reports.len(), 2);
        assert!(reports[1].data.is_empty());
    }

    #[test]
    fn test_truncated_report_keeps_earlier_ones() {
        let mut packet = report_packet(&[
            (&[1, 1, 1, 1, 1, 1], 0x00, &[0x02, 0x01, 0x06]),
            (&[2, 2, 2, 2, 2, 2], 0x00, &[0x05, 0xFF, 0x5C, 0x00, 0x00, 0x00]),
        ]);
        packet.truncate(packet.len() - 4);

        let HciEvent::AdvertisingReports(reports) = decode_event(&packet).unwrap() else {
            panic!("expected advertising reports");
        };
        assert_eq!(reports.len(), 1);
    }

    #[test]
    fn test_other_events() {
        assert_eq!(
            decode_event(&[HCI_EVENT_PKT, 0x0E, 0x01, 0x00]).unwrap(),
            HciEvent::Other { code: 0x0E }
        );
        assert_eq!(
            decode_event(&[HCI_EVENT_PKT, EVT_LE_META_EVENT, 0x01, 0x01]).unwrap(),
            HciEvent::LeMeta { subevent: 0x01 }
        );
    }

    #[test]
    fn test_malformed_packets() {
        assert!(decode_event(&[]).is_err());
        assert!(decode_event(&[0x02, 0x00]).is_err());
        assert!(decode_event(&[HCI_EVENT_PKT, EVT_LE_META_EVENT]).is_err());
        assert!(decode_event(&[HCI_EVENT_PKT, EVT_LE_META_EVENT, 0x00]).is_err());
    }
}
