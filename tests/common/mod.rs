//! Shared fixtures: a scripted HCI device and advertising packet builders.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use le_autoconnect::config::ScanConfig;
use le_autoconnect::hci::{
    HciDevice, HciFilter, EVT_LE_ADVERTISING_REPORT, EVT_LE_META_EVENT, HCI_EVENT_PKT,
};
use le_autoconnect::transport::{ChannelBearer, LoopbackTransport, PeerEnd};
use le_autoconnect::{AutoConnect, MemoryReporter, SessionConfig};

/// Advertising data of an unconfigured target.
pub const TARGET_AD: &[u8] = &[
    0x02, 0x01, 0x06, // flags
    0x06, 0xFF, 0x5C, 0x00, 0x01, 0x02, 0x00, // manufacturer, status unconfigured
];

/// Advertising data of an already configured target.
pub const CONFIGURED_AD: &[u8] = &[0x02, 0x01, 0x06, 0x06, 0xFF, 0x5C, 0x00, 0x01, 0x02, 0x01];

/// Advertising data from another manufacturer.
pub const FOREIGN_AD: &[u8] = &[0x02, 0x01, 0x06, 0x06, 0xFF, 0x4C, 0x00, 0x01, 0x02, 0x00];

/// Address the target report advertises from, as displayed.
pub const TARGET_ADDR: &str = "C0:FF:EE:00:00:03";

/// One advertising report: wire-order address, address type, AD payload.
pub struct Report<'a> {
    pub address: [u8; 6],
    pub address_type: u8,
    pub data: &'a [u8],
}

/// Build an LE Advertising Report event packet.
pub fn advertising_event(reports: &[Report<'_>]) -> Vec<u8> {
    let mut params = vec![EVT_LE_ADVERTISING_REPORT, reports.len() as u8];
    for report in reports {
        params.push(0x00);
        params.push(report.address_type);
        params.extend_from_slice(&report.address);
        params.push(report.data.len() as u8);
        params.extend_from_slice(report.data);
        params.push(0xC8);
    }

    let mut packet = vec![HCI_EVENT_PKT, EVT_LE_META_EVENT, params.len() as u8];
    packet.extend(params);
    packet
}

/// One event with a configured device, a foreign device and the target.
pub fn three_device_event() -> Vec<u8> {
    advertising_event(&[
        Report {
            address: [0x01, 0x00, 0x00, 0xEE, 0xFF, 0xC0],
            address_type: 0x00,
            data: CONFIGURED_AD,
        },
        Report {
            address: [0x02, 0x00, 0x00, 0xEE, 0xFF, 0xC0],
            address_type: 0x00,
            data: FOREIGN_AD,
        },
        Report {
            address: [0x03, 0x00, 0x00, 0xEE, 0xFF, 0xC0],
            address_type: 0x01,
            data: TARGET_AD,
        },
    ])
}

/// Calls made on a [`ScriptedHci`].
#[derive(Debug, Default)]
pub struct HciLog {
    pub filters: Vec<HciFilter>,
    pub enables: Vec<bool>,
}

/// Plays back a fixed list of packets, then goes quiet.
pub struct ScriptedHci {
    packets: VecDeque<Vec<u8>>,
    filter: HciFilter,
    log: Arc<Mutex<HciLog>>,
}

impl ScriptedHci {
    pub fn new(packets: Vec<Vec<u8>>) -> (Self, Arc<Mutex<HciLog>>) {
        let log = Arc::new(Mutex::new(HciLog::default()));
        let device = Self {
            packets: packets.into(),
            filter: HciFilter {
                type_mask: 0x10,
                event_mask: [0xFFFF, 0],
                opcode: 0,
            },
            log: log.clone(),
        };
        (device, log)
    }

    /// The filter installed before the scan started.
    pub fn original_filter() -> HciFilter {
        HciFilter {
            type_mask: 0x10,
            event_mask: [0xFFFF, 0],
            opcode: 0,
        }
    }
}

impl HciDevice for ScriptedHci {
    fn set_scan_parameters(&mut self, _config: &ScanConfig) -> io::Result<()> {
        Ok(())
    }

    fn set_scan_enable(&mut self, enable: bool, _filter_duplicates: bool) -> io::Result<()> {
        self.log.lock().enables.push(enable);
        Ok(())
    }

    fn filter(&self) -> io::Result<HciFilter> {
        Ok(self.filter)
    }

    fn set_filter(&mut self, filter: &HciFilter) -> io::Result<()> {
        self.filter = *filter;
        self.log.lock().filters.push(*filter);
        Ok(())
    }

    fn poll_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        Ok(!self.packets.is_empty())
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.packets.pop_front() {
            Some(packet) => {
                buf[..packet.len()].copy_from_slice(&packet);
                Ok(packet.len())
            }
            None => Ok(0),
        }
    }
}

/// A session that will find the target and connect to a loopback peer.
pub fn connected_session(
    session: SessionConfig,
) -> (AutoConnect<ScriptedHci, LoopbackTransport>, PeerEnd, MemoryReporter) {
    let (device, _log) = ScriptedHci::new(vec![three_device_event()]);
    let (bearer, peer) = ChannelBearer::pair(23);
    let reporter = MemoryReporter::new();

    let autoconnect = AutoConnect::new(
        device,
        LoopbackTransport::new(bearer),
        ScanConfig::default(),
        session,
        Arc::new(reporter.clone()),
    );
    (autoconnect, peer, reporter)
}

/// The Write Request the default session sends.
pub fn default_write_request() -> Vec<u8> {
    vec![0x12, 0x17, 0x00, b'h', b'e', b'l', b'l', b'o']
}
