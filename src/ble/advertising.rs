//! Advertising data parsing.
//!
//! An advertising payload is a run of AD structures, each
//! `[length][type][length - 1 payload bytes]`. A zero length marks the end of
//! the significant part; a length running past the buffer stops decoding and
//! marks the payload as truncated.

use tracing::trace;

use super::filter::TARGET_COMPANY_ID;

/// Longest local name kept; longer names are dropped.
pub const MAX_NAME_LEN: usize = 29;

/// AD structure types this client understands.
///
/// Values from the Bluetooth Assigned Numbers, Generic Access Profile section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AdType {
    /// Flags (discoverable mode, BR/EDR support).
    Flags = 0x01,
    /// Incomplete list of 16-bit service UUIDs.
    Uuid16Some = 0x02,
    /// Complete list of 16-bit service UUIDs.
    Uuid16All = 0x03,
    /// Incomplete list of 32-bit service UUIDs.
    Uuid32Some = 0x04,
    /// Complete list of 32-bit service UUIDs.
    Uuid32All = 0x05,
    /// Incomplete list of 128-bit service UUIDs.
    Uuid128Some = 0x06,
    /// Complete list of 128-bit service UUIDs.
    Uuid128All = 0x07,
    /// Shortened local name.
    NameShort = 0x08,
    /// Complete local name.
    NameComplete = 0x09,
    /// TX power level.
    TxPower = 0x0A,
    /// Device ID.
    DeviceId = 0x10,
    /// Slave connection interval range.
    SlaveConnInterval = 0x12,
    /// Appearance.
    Appearance = 0x19,
    /// Manufacturer specific data.
    ManufacturerSpecific = 0xFF,
}

impl AdType {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Option<Self> {
        let ad_type = match value {
            0x01 => Self::Flags,
            0x02 => Self::Uuid16Some,
            0x03 => Self::Uuid16All,
            0x04 => Self::Uuid32Some,
            0x05 => Self::Uuid32All,
            0x06 => Self::Uuid128Some,
            0x07 => Self::Uuid128All,
            0x08 => Self::NameShort,
            0x09 => Self::NameComplete,
            0x0A => Self::TxPower,
            0x10 => Self::DeviceId,
            0x12 => Self::SlaveConnInterval,
            0x19 => Self::Appearance,
            0xFF => Self::ManufacturerSpecific,
            _ => return None,
        };
        Some(ad_type)
    }

    /// Convert to raw byte value.
    pub fn to_raw(&self) -> u8 {
        *self as u8
    }
}

/// One AD structure, borrowing its payload from the advertising buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdStructure<'a> {
    /// Raw type byte.
    pub raw_type: u8,
    /// Length byte (type byte plus payload).
    pub length: u8,
    /// Payload bytes, verbatim.
    pub payload: &'a [u8],
}

impl AdStructure<'_> {
    /// The known type of this structure, if any.
    pub fn ad_type(&self) -> Option<AdType> {
        AdType::from_raw(self.raw_type)
    }
}

/// Lazy iterator over the AD structures of a buffer.
///
/// Never reads past the buffer and always terminates: every step either
/// consumes at least one byte or ends iteration.
#[derive(Debug, Clone)]
pub struct AdStructures<'a> {
    data: &'a [u8],
    offset: usize,
    truncated: bool,
}

impl<'a> AdStructures<'a> {
    /// Iterate the structures in `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            truncated: false,
        }
    }

    /// Whether iteration stopped on a length field running past the buffer.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl<'a> Iterator for AdStructures<'a> {
    type Item = AdStructure<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.data.get(self.offset..)?;
        let (&length, rest) = remaining.split_first()?;

        if length == 0 {
            self.offset = self.data.len();
            return None;
        }

        if usize::from(length) > rest.len() {
            trace!(
                "AD structure at offset {} claims {} bytes, {} left",
                self.offset,
                length,
                rest.len()
            );
            self.truncated = true;
            self.offset = self.data.len();
            return None;
        }

        let record = &rest[..usize::from(length)];
        self.offset += 1 + usize::from(length);

        Some(AdStructure {
            raw_type: record[0],
            length,
            payload: &record[1..],
        })
    }
}

/// Provisioning state carried in the manufacturer data status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    /// Not configured yet; available for setup.
    Unconfigured,
    /// Already configured.
    Configured,
    /// Any other value.
    Reserved(u8),
}

impl DeviceStatus {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Self {
        match value {
            0x00 => Self::Unconfigured,
            0x01 => Self::Configured,
            other => Self::Reserved(other),
        }
    }

    /// Convert to raw byte value.
    pub fn to_raw(&self) -> u8 {
        match self {
            Self::Unconfigured => 0x00,
            Self::Configured => 0x01,
            Self::Reserved(value) => *value,
        }
    }
}

/// Manufacturer-specific record summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManufacturerInfo {
    /// Bluetooth SIG company identifier (little-endian on the wire).
    pub company_id: u16,
    /// Device type byte (second-to-last payload byte).
    pub device_type: Option<u8>,
    /// Status byte (last payload byte).
    pub status: Option<DeviceStatus>,
}

impl ManufacturerInfo {
    /// Decode a Manufacturer Specific payload.
    ///
    /// Needs at least the company identifier; type and status are only
    /// captured when two further bytes follow it.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let company_id = u16::from_le_bytes([*payload.first()?, *payload.get(1)?]);

        let (device_type, status) = match payload.len() {
            n if n >= 4 => (
                Some(payload[n - 2]),
                Some(DeviceStatus::from_raw(payload[n - 1])),
            ),
            _ => (None, None),
        };

        Some(Self {
            company_id,
            device_type,
            status,
        })
    }
}

/// What one advertising report says about its sender.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSignature {
    /// Flags byte.
    pub flags: Option<u8>,
    /// Local name (complete preferred over shortened).
    pub name: Option<String>,
    /// Manufacturer-specific summary.
    pub manufacturer: Option<ManufacturerInfo>,
}

impl DeviceSignature {
    /// Decode the signature of an advertising payload.
    ///
    /// Returns `None` when the payload is truncated, so a half-decoded
    /// signature can never be mistaken for a complete one. The first
    /// occurrence of each field wins, except that a complete name replaces a
    /// shortened one and a record from [`TARGET_COMPANY_ID`] replaces one
    /// from any other company.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut signature = Self::default();
        let mut name_complete = false;
        let mut structures = AdStructures::new(data);

        for ad in structures.by_ref() {
            match ad.ad_type() {
                Some(AdType::Flags) => {
                    if signature.flags.is_none() {
                        signature.flags = ad.payload.first().copied();
                    }
                }
                Some(kind @ (AdType::NameShort | AdType::NameComplete)) => {
                    if ad.payload.len() > MAX_NAME_LEN {
                        trace!("Dropping {}-byte local name", ad.payload.len());
                        continue;
                    }
                    let complete = kind == AdType::NameComplete;
                    if signature.name.is_none() || (complete && !name_complete) {
                        signature.name = Some(String::from_utf8_lossy(ad.payload).into_owned());
                        name_complete = complete;
                    }
                }
                Some(AdType::ManufacturerSpecific) => {
                    let Some(info) = ManufacturerInfo::parse(ad.payload) else {
                        continue;
                    };
                    let have_target = signature
                        .manufacturer
                        .is_some_and(|m| m.company_id == TARGET_COMPANY_ID);
                    if signature.manufacturer.is_none()
                        || (!have_target && info.company_id == TARGET_COMPANY_ID)
                    {
                        signature.manufacturer = Some(info);
                    }
                }
                Some(kind) => {
                    trace!("AD {:?} len {}: {:02X?}", kind, ad.length, ad.payload);
                }
                None => {
                    trace!("Skipping unknown AD type {:#04x}", ad.raw_type);
                }
            }
        }

        if structures.is_truncated() {
            return None;
        }

        Some(signature)
    }
}

/// Find the first Flags value in an advertising payload.
///
/// Structures decoded before a truncation still count.
pub fn read_flags(data: &[u8]) -> Option<u8> {
    AdStructures::new(data)
        .find(|ad| ad.ad_type() == Some(AdType::Flags))
        .and_then(|ad| ad.payload.first().copied())
}
