//! Post-connect characteristic write.
//!
//! Once the link is up the client writes one value to one handle with a
//! Write Request and reports how the peer answered.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::WriteTarget;
use crate::error::Error;
use crate::protocol::att::{
    dec_error_resp, dec_exec_write_resp, dec_write_resp, enc_write_req, AttErrorCode, AttOpcode,
};
use crate::protocol::output::{ErrorCode, Response};

/// One outstanding Write Request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTransaction {
    handle: u16,
    value: Bytes,
}

impl WriteTransaction {
    /// Create a transaction for `target`.
    pub fn new(target: &WriteTarget) -> Self {
        Self {
            handle: target.handle,
            value: Bytes::copy_from_slice(&target.value),
        }
    }

    /// Attribute handle being written.
    pub fn handle(&self) -> u16 {
        self.handle
    }

    /// The Write Request PDU for a link with the given MTU.
    pub fn request(&self, mtu: u16) -> Bytes {
        if self.value.len() + 3 > usize::from(mtu) {
            warn!(
                "Value of {} bytes clipped to fit MTU {}",
                self.value.len(),
                mtu
            );
        }
        enc_write_req(self.handle, &self.value, mtu)
    }

    /// Settle the transaction with the peer's response PDU.
    ///
    /// An Error Response yields `com error`; a malformed one counts as a
    /// local I/O error. A Write Response or Execute Write Response yields
    /// the write-complete line. Anything else is a protocol error.
    pub fn complete(&self, pdu: &[u8]) -> Response {
        let status = status_of(pdu);
        if status != 0 {
            debug!("Write to {:#06x} failed with status {:#04x}", self.handle, status);
            return Response::Error(ErrorCode::ComError);
        }

        if dec_write_resp(pdu) || dec_exec_write_resp(pdu) {
            debug!("Write to {:#06x} acknowledged", self.handle);
            Response::WriteComplete
        } else {
            debug!("Unexpected answer to write: {:02X?}", pdu);
            Response::Error(ErrorCode::ProtocolError)
        }
    }

    /// Give up on the transaction: the peer never answered, or the link
    /// went away first.
    pub fn abandon(&self, reason: &Error) -> Response {
        debug!("Write to {:#06x} abandoned: {}", self.handle, reason);
        Response::Error(ErrorCode::ComError)
    }
}

/// ATT status carried by a response PDU (0 for success).
fn status_of(pdu: &[u8]) -> u8 {
    if pdu.first() != Some(&AttOpcode::ErrorResponse.to_raw()) {
        return 0;
    }
    match dec_error_resp(pdu) {
        Ok(resp) => resp.code,
        Err(_) => AttErrorCode::Io.to_raw(),
    }
}
