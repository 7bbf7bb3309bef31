//! Incoming ATT PDU dispatch.
//!
//! This client hosts no attribute database. Peer requests are answered with
//! Request Not Supported, commands are dropped, notifications and indications
//! are reported, and response-class PDUs are handed back to the caller for
//! the pending transaction. Every PDU is length-checked before any field is
//! read; a PDU of the wrong size is ignored.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::protocol::att::{
    enc_confirmation, enc_error_resp, enc_mtu_resp, get_u16, is_command, AttErrorCode, AttOpcode,
    ATT_DEFAULT_LE_MTU,
};
use crate::protocol::output::{Reporter, Response};

/// What to do with an incoming PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Send this PDU back to the peer.
    Reply(Bytes),
    /// Fully handled; nothing to send.
    Handled,
    /// A response to a request of ours.
    Response,
    /// Malformed or unexpected; ignored.
    Ignored,
}

/// Accepted PDU sizes for one opcode.
#[derive(Debug, Clone, Copy)]
enum Length {
    Exactly(usize),
    Either(usize, usize),
    AtLeast(usize),
}

impl Length {
    fn admits(self, len: usize) -> bool {
        match self {
            Self::Exactly(n) => len == n,
            Self::Either(a, b) => len == a || len == b,
            Self::AtLeast(n) => len >= n,
        }
    }
}

/// Size rule for the opcodes this dispatcher answers.
fn length_rule(opcode: AttOpcode) -> Option<Length> {
    use AttOpcode::*;

    let rule = match opcode {
        ExchangeMtuRequest => Length::Exactly(3),
        FindInformationRequest => Length::Exactly(5),
        FindByTypeValueRequest => Length::AtLeast(7),
        ReadByTypeRequest => Length::Either(7, 21),
        ReadRequest => Length::Exactly(3),
        ReadBlobRequest => Length::Exactly(5),
        ReadMultipleRequest => Length::AtLeast(5),
        ReadByGroupTypeRequest => Length::Either(7, 21),
        WriteRequest => Length::AtLeast(3),
        WriteCommand => Length::AtLeast(3),
        SignedWriteCommand => Length::AtLeast(15),
        PrepareWriteRequest => Length::AtLeast(5),
        ExecuteWriteRequest => Length::Exactly(2),
        HandleValueNotification => Length::AtLeast(3),
        HandleValueIndication => Length::AtLeast(3),
        _ => return None,
    };
    Some(rule)
}

/// Routes peer PDUs.
pub struct AttDispatcher {
    reporter: Arc<dyn Reporter>,
    mtu: u16,
}

impl AttDispatcher {
    /// Create a dispatcher for a link with the given MTU.
    pub fn new(reporter: Arc<dyn Reporter>, mtu: u16) -> Self {
        Self { reporter, mtu }
    }

    /// Handle one PDU from the peer.
    pub fn dispatch(&self, pdu: &[u8]) -> Dispatch {
        let Some(&raw) = pdu.first() else {
            debug!("Ignoring empty ATT PDU");
            return Dispatch::Ignored;
        };

        let Some(opcode) = AttOpcode::from_raw(raw) else {
            return self.unknown(raw);
        };

        if opcode.is_response() {
            return Dispatch::Response;
        }

        let Some(rule) = length_rule(opcode) else {
            trace!("Ignoring unsolicited {:?}", opcode);
            return Dispatch::Ignored;
        };

        if !rule.admits(pdu.len()) {
            debug!("Ignoring {:?} with bad length {}", opcode, pdu.len());
            return Dispatch::Ignored;
        }

        match opcode {
            AttOpcode::HandleValueNotification => {
                self.reporter.report(&Response::Notification {
                    handle: get_u16(pdu, 1).unwrap_or_default(),
                    value: Bytes::copy_from_slice(&pdu[3..]),
                });
                Dispatch::Handled
            }
            AttOpcode::HandleValueIndication => {
                self.reporter.report(&Response::Indication {
                    handle: get_u16(pdu, 1).unwrap_or_default(),
                    value: Bytes::copy_from_slice(&pdu[3..]),
                });
                Dispatch::Reply(enc_confirmation())
            }
            AttOpcode::ExchangeMtuRequest => {
                let client_mtu = get_u16(pdu, 1).unwrap_or_default();
                debug!("Peer MTU {}, answering with {}", client_mtu, self.server_mtu());
                Dispatch::Reply(enc_mtu_resp(self.server_mtu()))
            }
            AttOpcode::WriteCommand | AttOpcode::SignedWriteCommand => {
                trace!("Dropping {:?}", opcode);
                Dispatch::Handled
            }
            AttOpcode::ExecuteWriteRequest => Dispatch::Reply(not_supported(raw, 0)),
            _ => Dispatch::Reply(not_supported(raw, get_u16(pdu, 1).unwrap_or_default())),
        }
    }

    fn server_mtu(&self) -> u16 {
        self.mtu.max(ATT_DEFAULT_LE_MTU)
    }

    fn unknown(&self, raw: u8) -> Dispatch {
        if is_command(raw) {
            trace!("Dropping unknown command {:#04x}", raw);
            return Dispatch::Handled;
        }
        debug!("Rejecting unknown request {:#04x}", raw);
        Dispatch::Reply(not_supported(raw, 0))
    }
}

fn not_supported(opcode: u8, handle: u16) -> Bytes {
    enc_error_resp(opcode, handle, AttErrorCode::RequestNotSupported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::output::MemoryReporter;
    use pretty_assertions::assert_eq;

    fn dispatcher(mtu: u16) -> (AttDispatcher, MemoryReporter) {
        let reporter = MemoryReporter::new();
        (AttDispatcher::new(Arc::new(reporter.clone()), mtu), reporter)
    }

    fn reply(dispatch: Dispatch) -> Vec<u8> {
        match dispatch {
            Dispatch::Reply(pdu) => pdu.to_vec(),
            other => panic!("expected a reply, got {:?}", other),
        }
    }

    #[test]
    fn test_requests_get_request_not_supported() {
        let (d, _) = dispatcher(23);

        assert_eq!(
            reply(d.dispatch(&[0x0A, 0x17, 0x00])),
            vec![0x01, 0x0A, 0x17, 0x00, 0x06]
        );
        assert_eq!(
            reply(d.dispatch(&[0x04, 0x01, 0x00, 0xFF, 0xFF])),
            vec![0x01, 0x04, 0x01, 0x00, 0x06]
        );
        assert_eq!(
            reply(d.dispatch(&[0x12, 0x20, 0x00, 0x01])),
            vec![0x01, 0x12, 0x20, 0x00, 0x06]
        );
        assert_eq!(
            reply(d.dispatch(&[0x16, 0x21, 0x00, 0x00, 0x00, 0xAA])),
            vec![0x01, 0x16, 0x21, 0x00, 0x06]
        );
    }

    #[test]
    fn test_read_by_type_lengths() {
        let (d, _) = dispatcher(23);

        let mut short = vec![0x08, 0x01, 0x00, 0xFF, 0xFF, 0x03];
        assert_eq!(d.dispatch(&short), Dispatch::Ignored);

        short.push(0x28);
        assert!(matches!(d.dispatch(&short), Dispatch::Reply(_)));

        let mut long = vec![0x08, 0x01, 0x00, 0xFF, 0xFF];
        long.extend_from_slice(&[0u8; 16]);
        assert!(matches!(d.dispatch(&long), Dispatch::Reply(_)));

        long.push(0x00);
        assert_eq!(d.dispatch(&long), Dispatch::Ignored);
    }

    #[test]
    fn test_bad_lengths_are_ignored() {
        let (d, reporter) = dispatcher(23);

        assert_eq!(d.dispatch(&[0x0A, 0x17]), Dispatch::Ignored);
        assert_eq!(d.dispatch(&[0x0C, 0x17, 0x00]), Dispatch::Ignored);
        assert_eq!(d.dispatch(&[0x06, 0x01, 0x00, 0xFF, 0xFF, 0x00]), Dispatch::Ignored);
        assert_eq!(d.dispatch(&[0x1B, 0x17]), Dispatch::Ignored);
        assert_eq!(d.dispatch(&[0x1D]), Dispatch::Ignored);
        assert_eq!(d.dispatch(&[0xD2, 0x01, 0x00]), Dispatch::Ignored);
        assert_eq!(d.dispatch(&[0x02, 0x00]), Dispatch::Ignored);
        assert_eq!(d.dispatch(&[]), Dispatch::Ignored);
        assert!(reporter.lines().is_empty());
    }

    #[test]
    fn test_execute_write_uses_handle_zero() {
        let (d, _) = dispatcher(23);

        assert_eq!(
            reply(d.dispatch(&[0x18, 0x01])),
            vec![0x01, 0x18, 0x00, 0x00, 0x06]
        );
        assert_eq!(d.dispatch(&[0x18, 0x01, 0x00, 0x00, 0x00]), Dispatch::Ignored);
    }

    #[test]
    fn test_notification_is_reported_without_reply() {
        let (d, reporter) = dispatcher(23);

        assert_eq!(d.dispatch(&[0x1B, 0x2A, 0x00, 0x01, 0x02]), Dispatch::Handled);
        assert_eq!(reporter.lines(), vec!["respone:ntfy handle=h2A data=b0102"]);
    }

    #[test]
    fn test_indication_is_confirmed_once() {
        let (d, reporter) = dispatcher(23);

        assert_eq!(reply(d.dispatch(&[0x1D, 0x2B, 0x00, 0xFF])), vec![0x1E]);
        assert_eq!(reporter.lines(), vec!["respone:ind handle=h2B data=bFF"]);
    }

    #[test]
    fn test_commands_are_dropped() {
        let (d, reporter) = dispatcher(23);

        assert_eq!(d.dispatch(&[0x52, 0x17, 0x00, 0x01]), Dispatch::Handled);
        let mut signed = vec![0xD2, 0x17, 0x00];
        signed.extend_from_slice(&[0u8; 12]);
        assert_eq!(d.dispatch(&signed), Dispatch::Handled);
        assert_eq!(d.dispatch(&[0x7F, 0x01]), Dispatch::Handled);
        assert!(reporter.lines().is_empty());
    }

    #[test]
    fn test_unknown_request_is_rejected() {
        let (d, _) = dispatcher(23);
        assert_eq!(
            reply(d.dispatch(&[0x20, 0x01, 0x02])),
            vec![0x01, 0x20, 0x00, 0x00, 0x06]
        );
    }

    #[test]
    fn test_exchange_mtu() {
        let (d, _) = dispatcher(0);
        assert_eq!(reply(d.dispatch(&[0x02, 0x00, 0x02])), vec![0x03, 23, 0x00]);

        let (d, _) = dispatcher(256);
        assert_eq!(reply(d.dispatch(&[0x02, 0x17, 0x00])), vec![0x03, 0x00, 0x01]);
    }

    #[test]
    fn test_responses_go_to_caller() {
        let (d, _) = dispatcher(23);
        assert_eq!(d.dispatch(&[0x13]), Dispatch::Response);
        assert_eq!(d.dispatch(&[0x01, 0x12, 0x17, 0x00, 0x03]), Dispatch::Response);
        assert_eq!(d.dispatch(&[0x19]), Dispatch::Response);
    }

    #[test]
    fn test_confirmation_from_peer_is_ignored() {
        let (d, _) = dispatcher(23);
        assert_eq!(d.dispatch(&[0x1E]), Dispatch::Ignored);
    }
}
