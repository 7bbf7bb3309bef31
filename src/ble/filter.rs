//! Advertising report filtering.
//!
//! Two independent checks decide whether a report is interesting: the GAP
//! discovery procedure gates on the Flags field, and the target check looks
//! for an unconfigured device from the expected manufacturer.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::advertising::{read_flags, DeviceSignature, DeviceStatus};

/// Company identifier of the devices this client provisions.
pub const TARGET_COMPANY_ID: u16 = 0x005C;

/// LE Limited Discoverable Mode flag.
pub const FLAG_LE_LIMITED: u8 = 0x01;
/// LE General Discoverable Mode flag.
pub const FLAG_LE_GENERAL: u8 = 0x02;

/// GAP discovery procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DiscoveryProcedure {
    /// Accept every report.
    #[default]
    None,
    /// Accept only limited-discoverable advertisers.
    Limited,
    /// Accept limited- or general-discoverable advertisers.
    General,
}

impl DiscoveryProcedure {
    /// Check a Flags value against this procedure.
    pub fn admits(&self, flags: Option<u8>) -> bool {
        match self {
            Self::None => true,
            Self::Limited => flags.is_some_and(|f| f & FLAG_LE_LIMITED != 0),
            Self::General => {
                flags.is_some_and(|f| f & (FLAG_LE_LIMITED | FLAG_LE_GENERAL) != 0)
            }
        }
    }
}

/// Check an advertising payload against a discovery procedure.
///
/// A payload without a Flags field passes only [`DiscoveryProcedure::None`].
pub fn accepts(data: &[u8], procedure: DiscoveryProcedure) -> bool {
    if procedure == DiscoveryProcedure::None {
        return true;
    }
    procedure.admits(read_flags(data))
}

/// Whether a decoded signature is an unconfigured target device.
pub fn is_target(signature: &DeviceSignature) -> bool {
    signature.manufacturer.is_some_and(|m| {
        m.company_id == TARGET_COMPANY_ID && m.status == Some(DeviceStatus::Unconfigured)
    })
}

/// Decode `data` and check it for an unconfigured target device.
///
/// Truncated payloads never match.
pub fn matches_target(data: &[u8]) -> bool {
    DeviceSignature::decode(data).is_some_and(|s| is_target(&s))
}
