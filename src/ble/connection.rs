//! Connection state machine.
//!
//! Tracks the single link this client opens: `Disconnected -> Connecting ->
//! Connected -> Disconnected`. Every state change is reported as a status
//! line carrying the peer, the MTU and the security level.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::hci::{AddressType, BdAddr};
use crate::protocol::output::{ErrorCode, Reporter, Response};
use crate::transport::{AttBearer, Transport};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No link.
    #[default]
    Disconnected,
    /// Connect issued, waiting for the link.
    Connecting,
    /// Link up.
    Connected,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Short token used in status lines.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Disconnected => "disc",
            Self::Connecting => "tryconn",
            Self::Connected => "conn",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Address and address type of a peer to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    /// Device address.
    pub address: BdAddr,
    /// Address type.
    pub address_type: AddressType,
}

/// Owns the connection state and opens links through a [`Transport`].
pub struct ConnectionManager<T> {
    transport: T,
    config: SessionConfig,
    reporter: Arc<dyn Reporter>,
    state: ConnectionState,
    peer: Option<BdAddr>,
    mtu: u16,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager in the disconnected state.
    pub fn new(transport: T, config: SessionConfig, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            transport,
            config,
            reporter,
            state: ConnectionState::Disconnected,
            peer: None,
            mtu: 0,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// MTU of the current link (0 when not connected).
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Address of the current or last peer.
    pub fn peer(&self) -> Option<BdAddr> {
        self.peer
    }

    /// Session settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The reporter status lines go to.
    pub fn reporter(&self) -> &Arc<dyn Reporter> {
        &self.reporter
    }

    /// Connect to `peer`.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingParameter`] if `peer` is `None`; the state does not
    ///   change.
    /// - [`Error::ConnectionFailed`] if already connecting or connected, or
    ///   the transport fails. A transport failure drops back to
    ///   disconnected and reports `connect fail`.
    pub async fn connect(&mut self, peer: Option<Peer>) -> Result<T::Bearer> {
        let Some(peer) = peer else {
            warn!("Connect requested without a peer address");
            self.reporter.report(&Response::Error(ErrorCode::BadParameter));
            return Err(Error::MissingParameter);
        };

        if self.state != ConnectionState::Disconnected {
            return Err(Error::ConnectionFailed {
                reason: format!("already {}", self.state),
            });
        }

        self.peer = Some(peer.address);
        self.set_state(ConnectionState::Connecting);

        match self
            .transport
            .connect(peer.address, peer.address_type, &self.config)
            .await
        {
            Ok(bearer) => {
                self.mtu = bearer.mtu();
                info!("Connected to {} (MTU {})", peer.address, self.mtu);
                self.set_state(ConnectionState::Connected);
                Ok(bearer)
            }
            Err(e) => {
                warn!("Connect to {} failed: {}", peer.address, e);
                self.mtu = 0;
                self.set_state(ConnectionState::Disconnected);
                self.reporter.report(&Response::Error(ErrorCode::ConnectFail));
                Err(Error::ConnectionFailed {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// The link went away, or was torn down locally.
    pub fn disconnected(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.mtu = 0;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Update the state and report it.
    fn set_state(&mut self, new_state: ConnectionState) {
        let old_state = self.state;
        self.state = new_state;

        debug!("Connection state changed: {} -> {}", old_state, new_state);

        self.reporter.report(&Response::Status {
            state: new_state,
            peer: self.peer,
            mtu: self.mtu,
            security: self.config.security,
        });
    }
}
