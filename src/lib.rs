//! # le-autoconnect
//!
//! A Bluetooth Low Energy central that finds one unconfigured device, connects
//! to it and writes a single characteristic.
//!
//! A session runs in two phases:
//!
//! 1. **Scan**: an LE scan on a raw HCI socket. Each advertising report is
//!    checked against the optional GAP discovery procedure, then decoded and
//!    matched against the target: manufacturer data from company `0x005C`
//!    with status byte `0x00` (unconfigured).
//! 2. **Connected**: an L2CAP link on the fixed ATT channel to the first
//!    match. The client sends one Write Request, answers peer requests with
//!    Request Not Supported, confirms indications and reports what happens.
//!
//! ## Features
//!
//! - **Advertising parsing**: Bounds-checked AD structure iteration
//! - **Discovery filtering**: GAP limited and general discovery on the Flags field
//! - **Cancellable scanning**: Budgeted scan loop that always restores the
//!   HCI socket filter
//! - **ATT dispatch**: Length-checked handling of every peer opcode
//! - **Line protocol**: Every event reported as one `respone:` line
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(target_os = "linux")]
//! # async fn example() -> le_autoconnect::Result<()> {
//! use std::sync::Arc;
//!
//! use le_autoconnect::hci::socket::HciSocket;
//! use le_autoconnect::transport::l2cap::L2capTransport;
//! use le_autoconnect::{AutoConnect, Outcome, ScanConfig, SessionConfig, StdoutReporter};
//!
//! let session = AutoConnect::new(
//!     HciSocket::open(0)?,
//!     L2capTransport::new(),
//!     ScanConfig::default(),
//!     SessionConfig::default(),
//!     Arc::new(StdoutReporter),
//! );
//!
//! match session.run().await? {
//!     Outcome::Completed => println!("done"),
//!     other => println!("gave up: {:?}", other),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Output
//!
//! Standard output carries only response lines, for example:
//!
//! ```text
//! respone:status state:tryconn dst='00:1A:7D:DA:71:13 mtu=h0 sec='low
//! respone:status state:conn dst='00:1A:7D:DA:71:13 mtu=h17 sec='low
//! respone:wr
//! ```
//!
//! ## Platform Notes
//!
//! ### Linux
//! Needs BlueZ kernel support and `CAP_NET_RAW` (or root) for the raw HCI
//! socket. Other platforms can use the library with their own
//! [`hci::HciDevice`] and [`transport::Transport`] implementations.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for configuration types

// Public modules
pub mod autoconnect;
pub mod ble;
pub mod config;
pub mod error;
pub mod hci;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use autoconnect::{AutoConnect, Outcome};
pub use config::{ScanConfig, SecurityLevel, SessionConfig, WriteTarget};
pub use error::{Error, Result};

// Re-export commonly used types from submodules
pub use ble::connection::ConnectionState;
pub use ble::filter::DiscoveryProcedure;
pub use hci::{AddressType, BdAddr};
pub use protocol::output::{MemoryReporter, Reporter, Response, StdoutReporter};
pub use transport::{AttBearer, Transport};
