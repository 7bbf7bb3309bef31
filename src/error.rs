//! Error types for the le-autoconnect crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error from the HCI or L2CAP socket layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No usable Bluetooth adapter, or it could not be opened.
    #[error("Bluetooth not available: {reason}")]
    BluetoothUnavailable {
        /// Why the adapter could not be used.
        reason: String,
    },

    /// The controller rejected the scan configuration.
    #[error("Scan configuration failed: {reason}")]
    ScanSetup {
        /// Description of the failing step.
        reason: String,
    },

    /// A connect was requested without a peer address.
    #[error("Remote Bluetooth address required")]
    MissingParameter,

    /// Failed to establish a connection to the peer.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The connection was lost while an operation was outstanding.
    #[error("Connection lost")]
    ConnectionLost,

    /// Invalid data was received from the radio or the peer.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// A PDU violated the Attribute Protocol.
    #[error("ATT protocol error on opcode {opcode:#04x}: {reason}")]
    Protocol {
        /// The offending opcode.
        opcode: u8,
        /// What was wrong with it.
        reason: String,
    },

    /// An ATT transaction did not complete in time.
    #[error("ATT transaction timeout")]
    Timeout,

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },
}

impl Error {
    /// Shorthand for [`Error::InvalidData`].
    pub(crate) fn invalid_data(context: impl Into<String>) -> Self {
        Self::InvalidData {
            context: context.into(),
        }
    }

    /// Shorthand for [`Error::Protocol`].
    pub(crate) fn protocol(opcode: u8, reason: impl Into<String>) -> Self {
        Self::Protocol {
            opcode,
            reason: reason.into(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
