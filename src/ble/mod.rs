//! BLE central functionality.
//!
//! This module covers both phases of a session: finding a device
//! (advertising parsing, filtering, scanning) and talking to it once
//! connected (connection state, ATT dispatch, the post-connect write).

pub mod advertising;
pub mod characteristics;
pub mod connection;
pub mod dispatcher;
pub mod filter;
pub mod scanner;

pub use advertising::{AdStructures, AdType, DeviceSignature, DeviceStatus, ManufacturerInfo};
pub use characteristics::WriteTransaction;
pub use connection::{ConnectionManager, ConnectionState, Peer};
pub use dispatcher::{AttDispatcher, Dispatch};
pub use filter::{DiscoveryProcedure, TARGET_COMPANY_ID};
pub use scanner::{LeScanner, MatchedDevice, ScanOutcome};
