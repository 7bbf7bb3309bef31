//! In-process transport.
//!
//! The bearer is one end of a pair of unbounded channels; the [`PeerEnd`]
//! plays the remote device. Dropping the peer end is a hangup.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{AttBearer, Transport};
use crate::config::SessionConfig;
use crate::hci::{AddressType, BdAddr};

/// Local end of an in-process ATT channel.
#[derive(Debug)]
pub struct ChannelBearer {
    mtu: u16,
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

/// Remote end of an in-process ATT channel.
#[derive(Debug)]
pub struct PeerEnd {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl ChannelBearer {
    /// Create a connected bearer/peer pair.
    pub fn pair(mtu: u16) -> (Self, PeerEnd) {
        let (to_peer, from_local) = mpsc::unbounded_channel();
        let (to_local, from_peer) = mpsc::unbounded_channel();

        let bearer = Self {
            mtu,
            tx: to_peer,
            rx: from_peer,
        };
        let peer = PeerEnd {
            tx: to_local,
            rx: from_local,
        };
        (bearer, peer)
    }
}

#[async_trait]
impl AttBearer for ChannelBearer {
    fn mtu(&self) -> u16 {
        self.mtu
    }

    async fn send(&mut self, pdu: Bytes) -> io::Result<()> {
        self.tx
            .send(pdu)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer hung up"))
    }

    async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        Ok(self.rx.recv().await)
    }
}

impl PeerEnd {
    /// Send a PDU to the local side. Returns `false` if it is gone.
    pub fn send(&self, pdu: impl Into<Bytes>) -> bool {
        self.tx.send(pdu.into()).is_ok()
    }

    /// Wait for the next PDU from the local side.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take a PDU from the local side if one is queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}

/// Hands out one prepared bearer, or refuses the connection.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    bearer: Mutex<Option<ChannelBearer>>,
    attempts: Mutex<Vec<(BdAddr, AddressType)>>,
}

impl LoopbackTransport {
    /// A transport whose first connect succeeds with `bearer`.
    pub fn new(bearer: ChannelBearer) -> Self {
        Self {
            bearer: Mutex::new(Some(bearer)),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// A transport that refuses every connect.
    pub fn refusing() -> Self {
        Self::default()
    }

    /// Peers connect was called with, in order.
    pub fn attempts(&self) -> Vec<(BdAddr, AddressType)> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    type Bearer = ChannelBearer;

    async fn connect(
        &self,
        peer: BdAddr,
        address_type: AddressType,
        _config: &SessionConfig,
    ) -> io::Result<ChannelBearer> {
        self.attempts.lock().push((peer, address_type));
        self.bearer
            .lock()
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"))
    }
}
