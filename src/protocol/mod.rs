//! Protocol module for the wire formats the client speaks.
//!
//! This module contains:
//! - ATT PDU encoding and decoding
//! - The line-oriented response protocol printed on standard output

pub mod att;
pub mod output;

pub use att::{AttErrorCode, AttOpcode};
pub use output::{ErrorCode, MemoryReporter, Reporter, Response, StdoutReporter};
