//! Line-oriented response protocol.
//!
//! Every event the client surfaces is printed as one line on standard output,
//! starting with a `respone:<kind>` token followed by space-separated fields:
//!
//! - symbols as `tag:value` (`state:conn`, `code:com error`)
//! - unsigned values as `tag=h<HEX>` (`handle=h17`, `mtu=h0`)
//! - strings as `tag='<value>` (`dst='AA:BB:CC:DD:EE:FF`, `sec='low`)
//! - byte strings as `data=b<HEX>`
//!
//! Tooling parses these lines, so the tokens (including the historical
//! `respone` spelling) are part of the external interface.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::ble::connection::ConnectionState;
use crate::config::SecurityLevel;
use crate::hci::BdAddr;

const TAG_RESPONSE: &str = "respone";
const TAG_ERRCODE: &str = "code";
const TAG_HANDLE: &str = "handle";
const TAG_DATA: &str = "data";
const TAG_CONNSTATE: &str = "state";
const TAG_SEC_LEVEL: &str = "sec";
const TAG_MTU: &str = "mtu";
const TAG_DEVICE: &str = "dst";

/// Error codes carried by `respone:error` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The connect attempt failed.
    ConnectFail,
    /// The peer answered a request with an error, or did not answer at all.
    ComError,
    /// The peer's answer could not be decoded.
    ProtocolError,
    /// A required parameter (the peer address) was missing.
    BadParameter,
}

impl ErrorCode {
    /// Wire token for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectFail => "connect fail",
            Self::ComError => "com error",
            Self::ProtocolError => "protocol error",
            Self::BadParameter => "do not understand parameter",
        }
    }
}

/// One line of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Error report.
    Error(ErrorCode),
    /// Connection status, emitted on every state transition.
    Status {
        /// The new connection state.
        state: ConnectionState,
        /// Peer address, shown while connecting or connected.
        peer: Option<BdAddr>,
        /// Negotiated MTU (0 when not connected).
        mtu: u16,
        /// Configured security level.
        security: SecurityLevel,
    },
    /// Handle Value Notification received from the peer.
    Notification {
        /// Attribute handle.
        handle: u16,
        /// Attribute value.
        value: Bytes,
    },
    /// Handle Value Indication received from the peer.
    Indication {
        /// Attribute handle.
        handle: u16,
        /// Attribute value.
        value: Bytes,
    },
    /// Characteristic write acknowledged by the peer.
    WriteComplete,
}

impl Response {
    fn kind(&self) -> &'static str {
        match self {
            Self::Error(_) => "error",
            Self::Status { .. } => "status",
            Self::Notification { .. } => "ntfy",
            Self::Indication { .. } => "ind",
            Self::WriteComplete => "wr",
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", TAG_RESPONSE, self.kind())?;

        match self {
            Self::Error(code) => write!(f, " {}:{}", TAG_ERRCODE, code.as_str()),
            Self::Status {
                state,
                peer,
                mtu,
                security,
            } => {
                write!(f, " {}:{}", TAG_CONNSTATE, state.token())?;
                if *state != ConnectionState::Disconnected {
                    if let Some(peer) = peer {
                        write!(f, " {}='{}", TAG_DEVICE, peer)?;
                    }
                }
                write!(f, " {}=h{:X}", TAG_MTU, mtu)?;
                write!(f, " {}='{}", TAG_SEC_LEVEL, security.as_str())
            }
            Self::Notification { handle, value } | Self::Indication { handle, value } => {
                write!(f, " {}=h{:X}", TAG_HANDLE, handle)?;
                write!(f, " {}=b{}", TAG_DATA, hex::encode_upper(value))
            }
            Self::WriteComplete => Ok(()),
        }
    }
}

/// Output boundary for [`Response`] lines.
pub trait Reporter: Send + Sync {
    /// Emit one response. Implementations must not buffer across calls.
    fn report(&self, response: &Response);
}

/// Writes responses to standard output, flushing after every line.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutReporter;

impl Reporter for StdoutReporter {
    fn report(&self, response: &Response) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        // A closed stdout leaves nobody to tell.
        let _ = writeln!(out, "{}", response).and_then(|_| out.flush());
    }
}

/// Collects rendered lines in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryReporter {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryReporter {
    /// Create an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every line reported so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Number of lines containing `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.lines.lock().iter().filter(|l| l.contains(needle)).count()
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, response: &Response) {
        self.lines.lock().push(response.to_string());
    }
}
