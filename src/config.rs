//! Scan and session configuration.
//!
//! All values are fixed for one run; nothing is reconfigured mid-scan.

use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::ble::filter::DiscoveryProcedure;
use crate::error::{Error, Result};

/// Handle written after connecting when none is configured.
pub const DEFAULT_WRITE_HANDLE: u16 = 0x0017;

/// Hex value written after connecting when none is configured ("hello").
pub const DEFAULT_WRITE_VALUE: &str = "68656c6c6f";

/// Scan interval/window used without a discovery procedure (10 ms).
pub const DEFAULT_SCAN_INTERVAL: u16 = 0x0010;

/// Scan interval/window used with a discovery procedure (11.25 ms).
pub const DISCOVERY_SCAN_INTERVAL: u16 = 0x0012;

/// Active or passive scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum ScanType {
    /// Listen only.
    Passive = 0x00,
    /// Send scan requests.
    #[default]
    Active = 0x01,
}

/// Address type used by the local controller while scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum OwnAddressType {
    /// Public device address.
    #[default]
    Public = 0x00,
    /// Random device address (privacy).
    Random = 0x01,
}

/// Which advertisers the controller reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum ScanFilterPolicy {
    /// Report every advertiser.
    #[default]
    AcceptAll = 0x00,
    /// Report only advertisers in the controller whitelist.
    WhitelistOnly = 0x01,
}

/// Scan parameters for a single scan invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScanConfig {
    /// Discovery procedure applied to the Flags field.
    pub discovery: DiscoveryProcedure,
    /// Active or passive scanning.
    pub scan_type: ScanType,
    /// Own address type.
    pub own_address_type: OwnAddressType,
    /// Controller-side filter policy.
    pub filter_policy: ScanFilterPolicy,
    /// Ask the controller to drop duplicate reports.
    pub filter_duplicates: bool,
    /// Scan interval in 0.625 ms units.
    pub interval: u16,
    /// Scan window in 0.625 ms units.
    pub window: u16,
    /// Initial wait budget in milliseconds.
    pub budget_ms: u32,
    /// Budget consumed by each received event, in milliseconds.
    pub budget_step_ms: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryProcedure::None,
            scan_type: ScanType::Active,
            own_address_type: OwnAddressType::Public,
            filter_policy: ScanFilterPolicy::AcceptAll,
            filter_duplicates: true,
            interval: DEFAULT_SCAN_INTERVAL,
            window: DEFAULT_SCAN_INTERVAL,
            budget_ms: 5000,
            budget_step_ms: 10,
        }
    }
}

impl ScanConfig {
    /// Use `procedure`, switching to the discovery scan interval/window when
    /// a procedure is requested.
    pub fn with_discovery(mut self, procedure: DiscoveryProcedure) -> Self {
        self.discovery = procedure;
        if procedure != DiscoveryProcedure::None {
            self.interval = DISCOVERY_SCAN_INTERVAL;
            self.window = DISCOVERY_SCAN_INTERVAL;
        }
        self
    }
}

/// Link security requested for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SecurityLevel {
    /// No encryption.
    #[default]
    Low,
    /// Encryption without MITM protection.
    Medium,
    /// Encryption with MITM protection.
    High,
}

impl SecurityLevel {
    /// Name used on the wire and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for SecurityLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(Error::InvalidParameter {
                name: "sec-level".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// The characteristic written once the connection is up.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WriteTarget {
    /// Attribute handle.
    pub handle: u16,
    /// Value bytes.
    pub value: Vec<u8>,
}

impl WriteTarget {
    /// Build a target from a hex string value.
    pub fn from_hex(handle: u16, value: &str) -> Result<Self> {
        let value = hex::decode(value.trim()).map_err(|_| Error::InvalidParameter {
            name: "value".to_string(),
            value: value.to_string(),
        })?;

        if value.is_empty() {
            return Err(Error::InvalidParameter {
                name: "value".to_string(),
                value: String::new(),
            });
        }

        Ok(Self { handle, value })
    }
}

impl Default for WriteTarget {
    fn default() -> Self {
        Self {
            handle: DEFAULT_WRITE_HANDLE,
            value: b"hello".to_vec(),
        }
    }
}

/// Settings for the connected phase.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SessionConfig {
    /// Security level requested on the link.
    pub security: SecurityLevel,
    /// Requested MTU (0 lets the transport choose).
    pub mtu: u16,
    /// Keep serving peer traffic after the write completes.
    pub listen: bool,
    /// The post-connect write.
    pub write: WriteTarget,
    /// How long to wait for the peer to answer the write.
    pub transaction_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            security: SecurityLevel::Low,
            mtu: 0,
            listen: false,
            write: WriteTarget::default(),
            transaction_timeout: Duration::from_secs(30),
        }
    }
}
