//! HCI radio layer.
//!
//! The scan loop talks to the controller through [`HciDevice`], a blocking,
//! poll-then-read view of an HCI socket. [`socket::HciSocket`] implements it
//! on Linux; tests substitute scripted devices.

use std::fmt;
use std::io;
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::ScanConfig;
use crate::error::{Error, Result};

pub mod event;
#[cfg(target_os = "linux")]
pub mod socket;

pub use event::{decode_event, AdvertisingReport, HciEvent};

/// HCI packet type of events.
pub const HCI_EVENT_PKT: u8 = 0x04;
/// HCI packet type of commands.
pub const HCI_COMMAND_PKT: u8 = 0x01;
/// Largest HCI event packet (type byte + header + 255 parameter bytes).
pub const HCI_MAX_EVENT_SIZE: usize = 260;

/// Command Complete event code.
pub const EVT_CMD_COMPLETE: u8 = 0x0E;
/// Command Status event code.
pub const EVT_CMD_STATUS: u8 = 0x0F;
/// LE Meta event code.
pub const EVT_LE_META_EVENT: u8 = 0x3E;
/// LE Advertising Report subevent code.
pub const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

/// LE Set Scan Parameters command opcode.
pub const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x200B;
/// LE Set Scan Enable command opcode.
pub const OCF_LE_SET_SCAN_ENABLE: u16 = 0x200C;

/// A 48-bit Bluetooth device address, stored in wire (little-endian) order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BdAddr(pub [u8; 6]);

impl BdAddr {
    /// Create from bytes in wire order.
    pub fn from_wire(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Bytes in wire order.
    pub fn as_wire(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

impl fmt::Debug for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BdAddr({})", self)
    }
}

impl FromStr for BdAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidParameter {
            name: "address".to_string(),
            value: s.to_string(),
        };

        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for slot in bytes.iter_mut().rev() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self(bytes))
    }
}

/// LE address type of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AddressType {
    /// Public device address.
    #[default]
    Public,
    /// Random device address.
    Random,
}

impl AddressType {
    /// Create from the address-type byte of an advertising report.
    ///
    /// Resolved identity addresses (0x02, 0x03) map onto their identity type.
    pub fn from_raw(value: u8) -> Self {
        if value & 0x01 == 0 {
            Self::Public
        } else {
            Self::Random
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Random => write!(f, "random"),
        }
    }
}

/// Kernel-side HCI socket filter (`struct hci_filter`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct HciFilter {
    /// Bitmask of accepted packet types.
    pub type_mask: u32,
    /// Bitmask of accepted event codes.
    pub event_mask: [u32; 2],
    /// Accepted command opcode (0 for any).
    pub opcode: u16,
}

impl HciFilter {
    /// Accept packets of type `ptype`.
    pub fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (u32::from(ptype) & 31);
    }

    /// Accept events with code `event`.
    pub fn set_event(&mut self, event: u8) {
        let bit = usize::from(event) & 63;
        self.event_mask[bit >> 5] |= 1 << (bit & 31);
    }

    /// Check if events with code `event` pass.
    pub fn accepts_event(&self, event: u8) -> bool {
        let bit = usize::from(event) & 63;
        self.event_mask[bit >> 5] & (1 << (bit & 31)) != 0
    }

    /// Filter passing only LE Meta events.
    pub fn le_meta_only() -> Self {
        let mut filter = Self::default();
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_event(EVT_LE_META_EVENT);
        filter
    }
}

/// Blocking access to an HCI controller.
///
/// All methods run on the caller's thread; `poll_readable` is the only call
/// expected to wait, and never longer than its timeout.
#[cfg_attr(test, mockall::automock)]
pub trait HciDevice: Send {
    /// Issue LE Set Scan Parameters.
    fn set_scan_parameters(&mut self, config: &ScanConfig) -> io::Result<()>;

    /// Issue LE Set Scan Enable.
    fn set_scan_enable(&mut self, enable: bool, filter_duplicates: bool) -> io::Result<()>;

    /// Read the socket filter currently installed.
    fn filter(&self) -> io::Result<HciFilter>;

    /// Install a socket filter.
    fn set_filter(&mut self, filter: &HciFilter) -> io::Result<()>;

    /// Wait up to `timeout` for an event. Returns `false` on timeout or when
    /// the wait was interrupted.
    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Read one packet into `buf`. Returns 0 at end of data.
    fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}
