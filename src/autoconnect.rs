//! Scan, connect, write.
//!
//! [`AutoConnect`] runs the two phases of a session back to back. The scan
//! phase is blocking and runs on the blocking pool; the connected phase is a
//! single task that serves the peer, sends the post-connect write and waits
//! for its answer.

use std::io;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ble::characteristics::WriteTransaction;
use crate::ble::connection::{ConnectionManager, Peer};
use crate::ble::dispatcher::{AttDispatcher, Dispatch};
use crate::ble::scanner::{LeScanner, MatchedDevice, ScanOutcome};
use crate::config::{ScanConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::hci::HciDevice;
use crate::protocol::output::Reporter;
use crate::transport::{AttBearer, Transport};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The scan ended without finding a target.
    NoTarget,
    /// A target was found but the connection failed.
    ConnectFailed,
    /// Connected and served the peer until the session ended.
    Completed,
}

impl Outcome {
    /// Check if the session got as far as a connection.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// One scan-connect-write session.
pub struct AutoConnect<D, T> {
    device: D,
    transport: T,
    scan: ScanConfig,
    session: SessionConfig,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
}

impl<D, T> AutoConnect<D, T>
where
    D: HciDevice + 'static,
    T: Transport,
{
    /// Create a session.
    ///
    /// # Arguments
    ///
    /// * `device` - HCI device to scan on
    /// * `transport` - Transport used to connect to the matched device
    /// * `scan` - Scan parameters
    /// * `session` - Connected-phase settings
    /// * `reporter` - Sink for response lines
    pub fn new(
        device: D,
        transport: T,
        scan: ScanConfig,
        session: SessionConfig,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            device,
            transport,
            scan,
            session,
            reporter,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the session when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the session to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan could not be set up or the radio failed
    /// while scanning. A missing target or a failed connect are reported
    /// through the returned [`Outcome`].
    pub async fn run(self) -> Result<Outcome> {
        let Self {
            device,
            transport,
            scan,
            session,
            reporter,
            cancel,
        } = self;

        let Some(target) = scan_for_target(device, scan, cancel.clone()).await? else {
            return Ok(Outcome::NoTarget);
        };

        if let Some(manufacturer) = target.signature.manufacturer {
            debug!(
                "Target {} type {:?} rssi {:?}",
                target.address, manufacturer.device_type, target.rssi
            );
        }

        let mut manager = ConnectionManager::new(transport, session, reporter);
        let peer = Peer {
            address: target.address,
            address_type: target.address_type,
        };

        let bearer = match manager.connect(Some(peer)).await {
            Ok(bearer) => bearer,
            Err(Error::ConnectionFailed { reason }) => {
                warn!("Giving up on {}: {}", target.address, reason);
                return Ok(Outcome::ConnectFailed);
            }
            Err(e) => return Err(e),
        };

        serve(&mut manager, bearer, &cancel).await;
        Ok(Outcome::Completed)
    }
}

async fn scan_for_target<D: HciDevice + 'static>(
    device: D,
    config: ScanConfig,
    cancel: CancellationToken,
) -> Result<Option<MatchedDevice>> {
    let outcome = tokio::task::spawn_blocking(move || LeScanner::new(device, config).scan(&cancel))
        .await
        .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))??;

    match outcome {
        ScanOutcome::Matched(device) => Ok(Some(device)),
        other => {
            info!("No target found ({:?})", other);
            Ok(None)
        }
    }
}

/// Serve the connected peer until hangup, cancellation, or, unless
/// listening, the end of the post-connect write.
async fn serve<T: Transport>(
    manager: &mut ConnectionManager<T>,
    mut bearer: T::Bearer,
    cancel: &CancellationToken,
) {
    let reporter = manager.reporter().clone();
    let listen = manager.config().listen;
    let mtu = bearer.mtu();
    let dispatcher = AttDispatcher::new(reporter.clone(), mtu);

    let transaction = WriteTransaction::new(&manager.config().write);
    debug!("Writing handle {:#06x}", transaction.handle());
    if let Err(e) = bearer.send(transaction.request(mtu)).await {
        reporter.report(&transaction.abandon(&Error::Io(e)));
        manager.disconnected();
        return;
    }

    let mut pending = Some(transaction);
    let timeout = tokio::time::sleep(manager.config().transaction_timeout);
    tokio::pin!(timeout);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Interrupted, closing connection");
                break;
            }
            _ = &mut timeout, if pending.is_some() => {
                if let Some(transaction) = pending.take() {
                    warn!("Peer did not answer the write");
                    reporter.report(&transaction.abandon(&Error::Timeout));
                }
                if !listen {
                    break;
                }
            }
            received = bearer.recv() => {
                let pdu = match received {
                    Ok(Some(pdu)) => pdu,
                    Ok(None) => {
                        info!("Peer hung up");
                        break;
                    }
                    Err(e) => {
                        warn!("Receive failed: {}", e);
                        break;
                    }
                };

                match dispatcher.dispatch(&pdu) {
                    Dispatch::Reply(reply) => {
                        if let Err(e) = bearer.send(reply).await {
                            warn!("Reply not sent: {}", e);
                            break;
                        }
                    }
                    Dispatch::Response => match pending.take() {
                        Some(transaction) => {
                            reporter.report(&transaction.complete(&pdu));
                            if !listen {
                                break;
                            }
                        }
                        None => debug!("Unsolicited response {:02X?}", pdu),
                    },
                    Dispatch::Handled | Dispatch::Ignored => {}
                }
            }
        }
    }

    if let Some(transaction) = pending.take() {
        reporter.report(&transaction.abandon(&Error::ConnectionLost));
    }
    drop(bearer);
    manager.disconnected();
}
