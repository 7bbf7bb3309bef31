//! ATT bearer transports.
//!
//! A [`Transport`] opens an LE link to a peer and hands back an
//! [`AttBearer`]: a packet channel carrying whole ATT PDUs on the fixed ATT
//! channel. On Linux [`l2cap::L2capTransport`] uses a kernel L2CAP socket;
//! [`loopback::LoopbackTransport`] wires a bearer to an in-process peer.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::SessionConfig;
use crate::hci::{AddressType, BdAddr};

#[cfg(target_os = "linux")]
pub mod l2cap;
pub mod loopback;

pub use loopback::{ChannelBearer, LoopbackTransport, PeerEnd};

/// A connected ATT channel.
#[async_trait]
pub trait AttBearer: Send {
    /// ATT MTU of the link.
    fn mtu(&self) -> u16;

    /// Send one PDU.
    async fn send(&mut self, pdu: Bytes) -> io::Result<()>;

    /// Receive one PDU. `None` means the peer hung up.
    async fn recv(&mut self) -> io::Result<Option<Bytes>>;
}

/// Opens ATT bearers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The bearer type produced by [`Transport::connect`].
    type Bearer: AttBearer + 'static;

    /// Connect to `peer` using `config`'s security level and MTU.
    async fn connect(
        &self,
        peer: BdAddr,
        address_type: AddressType,
        config: &SessionConfig,
    ) -> io::Result<Self::Bearer>;
}
