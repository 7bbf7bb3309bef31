//! Linux L2CAP transport on the fixed ATT channel.
//!
//! Connects an `AF_BLUETOOTH`/`BTPROTO_L2CAP` sequential-packet socket to CID
//! 4 of an LE peer. The connect is issued non-blocking and awaited through
//! [`AsyncFd`]; afterwards each socket read or write is one ATT PDU.

use std::io::{self, Read, Write};
use std::mem;
use std::os::unix::io::AsRawFd;

use async_trait::async_trait;
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::unix::AsyncFd;
use tracing::{debug, info};

use super::{AttBearer, Transport};
use crate::config::{SecurityLevel, SessionConfig};
use crate::hci::{AddressType, BdAddr};
use crate::protocol::att::{ATT_CID, ATT_DEFAULT_LE_MTU};

const AF_BLUETOOTH: i32 = 31;
const BTPROTO_L2CAP: i32 = 0;

const SOL_BLUETOOTH: i32 = 274;
const BT_SECURITY: i32 = 4;
const BT_SECURITY_LOW: u8 = 1;
const BT_SECURITY_MEDIUM: u8 = 2;
const BT_SECURITY_HIGH: u8 = 3;

const SOL_L2CAP: i32 = 6;
const L2CAP_OPTIONS: i32 = 0x01;

const BDADDR_LE_PUBLIC: u8 = 0x01;
const BDADDR_LE_RANDOM: u8 = 0x02;

/// Largest PDU read in one go.
const RECV_BUFFER_SIZE: usize = 1024;

#[repr(C)]
#[derive(Default)]
struct SockaddrL2 {
    l2_family: libc::sa_family_t,
    l2_psm: u16,
    l2_bdaddr: [u8; 6],
    l2_cid: u16,
    l2_bdaddr_type: u8,
}

impl SockaddrL2 {
    fn att(addr: BdAddr, bdaddr_type: u8) -> Self {
        Self {
            l2_family: AF_BLUETOOTH as libc::sa_family_t,
            l2_psm: 0,
            l2_bdaddr: *addr.as_wire(),
            l2_cid: ATT_CID.to_le(),
            l2_bdaddr_type: bdaddr_type,
        }
    }
}

#[repr(C)]
struct BtSecurity {
    level: u8,
    key_size: u8,
}

#[repr(C)]
#[derive(Default)]
struct L2capOptions {
    omtu: u16,
    imtu: u16,
    flush_to: u16,
    mode: u8,
    fcs: u8,
    max_tx: u8,
    txwin_size: u16,
}

fn bdaddr_type(address_type: AddressType) -> u8 {
    match address_type {
        AddressType::Public => BDADDR_LE_PUBLIC,
        AddressType::Random => BDADDR_LE_RANDOM,
    }
}

fn security_level(level: SecurityLevel) -> u8 {
    match level {
        SecurityLevel::Low => BT_SECURITY_LOW,
        SecurityLevel::Medium => BT_SECURITY_MEDIUM,
        SecurityLevel::High => BT_SECURITY_HIGH,
    }
}

/// MTU in force on a freshly connected channel. The fixed ATT channel
/// starts at the LE default until an MTU exchange.
fn initial_mtu(cid: u16, imtu: u16) -> u16 {
    if cid == ATT_CID || imtu == 0 {
        ATT_DEFAULT_LE_MTU
    } else {
        imtu
    }
}

fn check(ret: libc::c_int) -> io::Result<()> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn bind(socket: &Socket, addr: &SockaddrL2) -> io::Result<()> {
    // SAFETY: valid fd and a correctly sized sockaddr_l2.
    check(unsafe {
        libc::bind(
            socket.as_raw_fd(),
            addr as *const SockaddrL2 as *const libc::sockaddr,
            mem::size_of::<SockaddrL2>() as libc::socklen_t,
        )
    })
}

fn set_security(socket: &Socket, level: SecurityLevel) -> io::Result<()> {
    let sec = BtSecurity {
        level: security_level(level),
        key_size: 0,
    };
    // SAFETY: valid fd and a correctly sized bt_security.
    check(unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            SOL_BLUETOOTH,
            BT_SECURITY,
            &sec as *const BtSecurity as *const libc::c_void,
            mem::size_of::<BtSecurity>() as libc::socklen_t,
        )
    })
}

fn l2cap_options(socket: &Socket) -> io::Result<L2capOptions> {
    let mut opts = L2capOptions::default();
    let mut len = mem::size_of::<L2capOptions>() as libc::socklen_t;
    // SAFETY: the kernel writes at most `len` bytes into a repr(C) l2cap_options.
    check(unsafe {
        libc::getsockopt(
            socket.as_raw_fd(),
            SOL_L2CAP,
            L2CAP_OPTIONS,
            &mut opts as *mut L2capOptions as *mut libc::c_void,
            &mut len,
        )
    })?;
    Ok(opts)
}

fn set_imtu(socket: &Socket, mtu: u16) -> io::Result<()> {
    let mut opts = l2cap_options(socket)?;
    opts.imtu = mtu;
    // SAFETY: valid fd and a correctly sized l2cap_options.
    check(unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            SOL_L2CAP,
            L2CAP_OPTIONS,
            &opts as *const L2capOptions as *const libc::c_void,
            mem::size_of::<L2capOptions>() as libc::socklen_t,
        )
    })
}

fn local_cid(socket: &Socket) -> io::Result<u16> {
    let mut addr = SockaddrL2::default();
    let mut len = mem::size_of::<SockaddrL2>() as libc::socklen_t;
    // SAFETY: the kernel writes at most `len` bytes into a repr(C) sockaddr_l2.
    check(unsafe {
        libc::getsockname(
            socket.as_raw_fd(),
            &mut addr as *mut SockaddrL2 as *mut libc::sockaddr,
            &mut len,
        )
    })?;
    Ok(u16::from_le(addr.l2_cid))
}

fn is_hangup(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
    )
}

/// Opens L2CAP ATT channels through the kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct L2capTransport;

impl L2capTransport {
    /// Create a transport using whichever adapter the kernel routes to.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for L2capTransport {
    type Bearer = L2capBearer;

    async fn connect(
        &self,
        peer: BdAddr,
        address_type: AddressType,
        config: &SessionConfig,
    ) -> io::Result<L2capBearer> {
        let socket = Socket::new(
            Domain::from(AF_BLUETOOTH),
            Type::SEQPACKET,
            Some(Protocol::from(BTPROTO_L2CAP)),
        )?;

        bind(&socket, &SockaddrL2::att(BdAddr::default(), BDADDR_LE_PUBLIC))?;
        set_security(&socket, config.security)?;
        if config.mtu != 0 {
            if let Err(e) = set_imtu(&socket, config.mtu) {
                debug!("Kernel refused MTU {}: {}", config.mtu, e);
            }
        }
        socket.set_nonblocking(true)?;

        let remote = SockaddrL2::att(peer, bdaddr_type(address_type));
        // SAFETY: valid fd and a correctly sized sockaddr_l2.
        let ret = unsafe {
            libc::connect(
                socket.as_raw_fd(),
                &remote as *const SockaddrL2 as *const libc::sockaddr,
                mem::size_of::<SockaddrL2>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINPROGRESS) {
                return Err(err);
            }
        }

        debug!("Connecting to {} ({})", peer, address_type);

        let mut bearer = L2capBearer::from_socket(socket, ATT_DEFAULT_LE_MTU)?;
        let _ = bearer.fd.writable().await?;
        if let Some(err) = bearer.fd.get_ref().take_error()? {
            return Err(err);
        }

        let cid = local_cid(bearer.fd.get_ref()).unwrap_or(ATT_CID);
        let imtu = l2cap_options(bearer.fd.get_ref())
            .map(|o| o.imtu)
            .unwrap_or_default();
        bearer.mtu = initial_mtu(cid, imtu);

        info!("L2CAP link to {} up (cid {}, imtu {})", peer, cid, imtu);

        Ok(bearer)
    }
}

/// A connected L2CAP ATT channel.
pub struct L2capBearer {
    fd: AsyncFd<Socket>,
    mtu: u16,
    buf: Vec<u8>,
}

impl L2capBearer {
    /// Register a sequential-packet socket with the reactor.
    fn from_socket(socket: Socket, mtu: u16) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        let fd = AsyncFd::try_new(socket).map_err(|e| e.into_parts().1)?;
        Ok(Self {
            fd,
            mtu,
            buf: vec![0u8; RECV_BUFFER_SIZE],
        })
    }
}

#[async_trait]
impl AttBearer for L2capBearer {
    fn mtu(&self) -> u16 {
        self.mtu
    }

    async fn send(&mut self, pdu: Bytes) -> io::Result<()> {
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| {
                let mut socket: &Socket = inner.get_ref();
                socket.write(&pdu)
            }) {
                Ok(result) => return result.map(|_| ()),
                Err(_would_block) => continue,
            }
        }
    }

    async fn recv(&mut self) -> io::Result<Option<Bytes>> {
        let Self { fd, buf, .. } = self;

        loop {
            let mut guard = fd.readable().await?;
            let read = guard.try_io(|inner| {
                let mut socket: &Socket = inner.get_ref();
                socket.read(buf)
            });

            match read {
                Ok(Ok(0)) => return Ok(None),
                Ok(Ok(n)) => return Ok(Some(Bytes::copy_from_slice(&buf[..n]))),
                Ok(Err(e)) if is_hangup(&e) => {
                    debug!("L2CAP channel closed: {}", e);
                    return Ok(None);
                }
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sockaddr_layout() {
        assert_eq!(mem::size_of::<SockaddrL2>(), 14);
        assert_eq!(mem::size_of::<BtSecurity>(), 2);
        assert_eq!(mem::size_of::<L2capOptions>(), 12);
    }

    #[test]
    fn test_address_and_security_mapping() {
        assert_eq!(bdaddr_type(AddressType::Public), 0x01);
        assert_eq!(bdaddr_type(AddressType::Random), 0x02);
        assert_eq!(security_level(SecurityLevel::Low), 1);
        assert_eq!(security_level(SecurityLevel::High), 3);
    }

    #[test]
    fn test_initial_mtu() {
        assert_eq!(initial_mtu(ATT_CID, 672), 23);
        assert_eq!(initial_mtu(0x0040, 672), 672);
        assert_eq!(initial_mtu(0x0040, 0), 23);
    }

    #[tokio::test]
    async fn test_bearer_over_seqpacket_pair() {
        let (local, remote) = Socket::pair(Domain::UNIX, Type::SEQPACKET, None).unwrap();
        let mut bearer = L2capBearer::from_socket(local, 23).unwrap();
        assert_eq!(bearer.mtu(), 23);

        bearer
            .send(Bytes::from_static(&[0x12, 0x17, 0x00, 0x01]))
            .await
            .unwrap();
        let mut buf = [0u8; 16];
        let n = (&remote).read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x12, 0x17, 0x00, 0x01]);

        (&remote).write_all(&[0x13]).unwrap();
        assert_eq!(bearer.recv().await.unwrap().unwrap().as_ref(), &[0x13]);

        drop(remote);
        assert!(bearer.recv().await.unwrap().is_none());
    }

    #[test]
    fn test_hangup_errors() {
        assert!(is_hangup(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_hangup(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
