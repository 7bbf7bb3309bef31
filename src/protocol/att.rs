//! Attribute Protocol PDU primitives.
//!
//! Opcode and error-code tables plus the handful of encoders and decoders the
//! client needs. Every PDU starts with a one-byte opcode; multi-byte fields are
//! little-endian.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Fixed L2CAP channel identifier of the ATT bearer on an LE link.
pub const ATT_CID: u16 = 0x0004;

/// Minimum ATT MTU on an LE link.
pub const ATT_DEFAULT_LE_MTU: u16 = 23;

/// Bit set in every command opcode (no response is ever sent for commands).
pub const ATT_COMMAND_FLAG: u8 = 0x40;

/// ATT opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AttOpcode {
    /// Error Response.
    ErrorResponse = 0x01,
    /// Exchange MTU Request.
    ExchangeMtuRequest = 0x02,
    /// Exchange MTU Response.
    ExchangeMtuResponse = 0x03,
    /// Find Information Request.
    FindInformationRequest = 0x04,
    /// Find Information Response.
    FindInformationResponse = 0x05,
    /// Find By Type Value Request.
    FindByTypeValueRequest = 0x06,
    /// Find By Type Value Response.
    FindByTypeValueResponse = 0x07,
    /// Read By Type Request.
    ReadByTypeRequest = 0x08,
    /// Read By Type Response.
    ReadByTypeResponse = 0x09,
    /// Read Request.
    ReadRequest = 0x0A,
    /// Read Response.
    ReadResponse = 0x0B,
    /// Read Blob Request.
    ReadBlobRequest = 0x0C,
    /// Read Blob Response.
    ReadBlobResponse = 0x0D,
    /// Read Multiple Request.
    ReadMultipleRequest = 0x0E,
    /// Read Multiple Response.
    ReadMultipleResponse = 0x0F,
    /// Read By Group Type Request.
    ReadByGroupTypeRequest = 0x10,
    /// Read By Group Type Response.
    ReadByGroupTypeResponse = 0x11,
    /// Write Request.
    WriteRequest = 0x12,
    /// Write Response.
    WriteResponse = 0x13,
    /// Prepare Write Request.
    PrepareWriteRequest = 0x16,
    /// Prepare Write Response.
    PrepareWriteResponse = 0x17,
    /// Execute Write Request.
    ExecuteWriteRequest = 0x18,
    /// Execute Write Response.
    ExecuteWriteResponse = 0x19,
    /// Handle Value Notification.
    HandleValueNotification = 0x1B,
    /// Handle Value Indication.
    HandleValueIndication = 0x1D,
    /// Handle Value Confirmation.
    HandleValueConfirmation = 0x1E,
    /// Write Command.
    WriteCommand = 0x52,
    /// Signed Write Command.
    SignedWriteCommand = 0xD2,
}

impl AttOpcode {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Option<Self> {
        let opcode = match value {
            0x01 => Self::ErrorResponse,
            0x02 => Self::ExchangeMtuRequest,
            0x03 => Self::ExchangeMtuResponse,
            0x04 => Self::FindInformationRequest,
            0x05 => Self::FindInformationResponse,
            0x06 => Self::FindByTypeValueRequest,
            0x07 => Self::FindByTypeValueResponse,
            0x08 => Self::ReadByTypeRequest,
            0x09 => Self::ReadByTypeResponse,
            0x0A => Self::ReadRequest,
            0x0B => Self::ReadResponse,
            0x0C => Self::ReadBlobRequest,
            0x0D => Self::ReadBlobResponse,
            0x0E => Self::ReadMultipleRequest,
            0x0F => Self::ReadMultipleResponse,
            0x10 => Self::ReadByGroupTypeRequest,
            0x11 => Self::ReadByGroupTypeResponse,
            0x12 => Self::WriteRequest,
            0x13 => Self::WriteResponse,
            0x16 => Self::PrepareWriteRequest,
            0x17 => Self::PrepareWriteResponse,
            0x18 => Self::ExecuteWriteRequest,
            0x19 => Self::ExecuteWriteResponse,
            0x1B => Self::HandleValueNotification,
            0x1D => Self::HandleValueIndication,
            0x1E => Self::HandleValueConfirmation,
            0x52 => Self::WriteCommand,
            0xD2 => Self::SignedWriteCommand,
            _ => return None,
        };
        Some(opcode)
    }

    /// Convert to raw byte value.
    pub fn to_raw(&self) -> u8 {
        *self as u8
    }

    /// Check if this PDU answers a client request.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Self::ErrorResponse
                | Self::ExchangeMtuResponse
                | Self::FindInformationResponse
                | Self::FindByTypeValueResponse
                | Self::ReadByTypeResponse
                | Self::ReadResponse
                | Self::ReadBlobResponse
                | Self::ReadMultipleResponse
                | Self::ReadByGroupTypeResponse
                | Self::WriteResponse
                | Self::PrepareWriteResponse
                | Self::ExecuteWriteResponse
        )
    }
}

/// Check if a raw opcode is a command (never answered).
pub fn is_command(raw: u8) -> bool {
    raw & ATT_COMMAND_FLAG != 0
}

/// ATT error codes carried in an Error Response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AttErrorCode {
    /// The attribute handle was not valid on this server.
    InvalidHandle = 0x01,
    /// The attribute cannot be read.
    ReadNotPermitted = 0x02,
    /// The attribute cannot be written.
    WriteNotPermitted = 0x03,
    /// The attribute PDU was invalid.
    InvalidPdu = 0x04,
    /// Authentication is required.
    InsufficientAuthentication = 0x05,
    /// The server does not support the request.
    RequestNotSupported = 0x06,
    /// Offset past the end of the attribute.
    InvalidOffset = 0x07,
    /// No attribute found within the given range.
    AttributeNotFound = 0x0A,
    /// Unlikely error.
    Unlikely = 0x0E,
    /// Local I/O failure, also reported for malformed error responses.
    Io = 0x80,
}

impl AttErrorCode {
    /// Convert to raw byte value.
    pub fn to_raw(&self) -> u8 {
        *self as u8
    }
}

/// Read the little-endian `u16` at `offset`, if the PDU is long enough.
pub fn get_u16(pdu: &[u8], offset: usize) -> Option<u16> {
    let bytes = pdu.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Encode an Error Response for `request_opcode`.
pub fn enc_error_resp(request_opcode: u8, handle: u16, code: AttErrorCode) -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(AttOpcode::ErrorResponse.to_raw());
    buf.put_u8(request_opcode);
    buf.put_u16_le(handle);
    buf.put_u8(code.to_raw());
    buf.freeze()
}

/// Decoded Error Response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Opcode of the request that failed.
    pub request_opcode: u8,
    /// Attribute handle the error refers to.
    pub handle: u16,
    /// Raw error code.
    pub code: u8,
}

/// Decode an Error Response.
pub fn dec_error_resp(pdu: &[u8]) -> Result<ErrorResponse> {
    if pdu.len() != 5 || pdu[0] != AttOpcode::ErrorResponse.to_raw() {
        return Err(Error::protocol(
            pdu.first().copied().unwrap_or_default(),
            format!("malformed error response ({} bytes)", pdu.len()),
        ));
    }

    Ok(ErrorResponse {
        request_opcode: pdu[1],
        handle: u16::from_le_bytes([pdu[2], pdu[3]]),
        code: pdu[4],
    })
}

/// Encode a Handle Value Confirmation.
pub fn enc_confirmation() -> Bytes {
    Bytes::from_static(&[AttOpcode::HandleValueConfirmation as u8])
}

/// Encode an Exchange MTU Response.
pub fn enc_mtu_resp(mtu: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(3);
    buf.put_u8(AttOpcode::ExchangeMtuResponse.to_raw());
    buf.put_u16_le(mtu);
    buf.freeze()
}

/// Encode a Write Request, truncating the value to fit in `mtu`.
pub fn enc_write_req(handle: u16, value: &[u8], mtu: u16) -> Bytes {
    let room = usize::from(mtu.max(ATT_DEFAULT_LE_MTU)) - 3;
    let value = &value[..value.len().min(room)];

    let mut buf = BytesMut::with_capacity(3 + value.len());
    buf.put_u8(AttOpcode::WriteRequest.to_raw());
    buf.put_u16_le(handle);
    buf.put_slice(value);
    buf.freeze()
}

/// Check if `pdu` is a Write Response.
pub fn dec_write_resp(pdu: &[u8]) -> bool {
    pdu.first() == Some(&AttOpcode::WriteResponse.to_raw())
}

/// Check if `pdu` is an Execute Write Response.
pub fn dec_exec_write_resp(pdu: &[u8]) -> bool {
    pdu == [AttOpcode::ExecuteWriteResponse.to_raw()]
}
