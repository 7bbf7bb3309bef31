//! Linux raw HCI socket.
//!
//! Opens `AF_BLUETOOTH`/`BTPROTO_HCI` on the raw channel (shared with
//! bluetoothd) and implements [`HciDevice`] on top of it. Commands are sent
//! synchronously: the filter is temporarily widened to Command Complete and
//! Command Status, the matching event is awaited, then the previous filter is
//! put back.

use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, trace};

use super::{
    HciDevice, HciFilter, EVT_CMD_COMPLETE, EVT_CMD_STATUS, HCI_COMMAND_PKT, HCI_EVENT_PKT,
    HCI_MAX_EVENT_SIZE, OCF_LE_SET_SCAN_ENABLE, OCF_LE_SET_SCAN_PARAMETERS,
};
use crate::config::ScanConfig;
use crate::error::{Error, Result};

const AF_BLUETOOTH: i32 = 31;
const BTPROTO_HCI: i32 = 1;
const SOL_HCI: i32 = 0;
const HCI_FILTER: i32 = 2;
const HCI_CHANNEL_RAW: u16 = 0;

/// How long a command may take to be acknowledged.
const COMMAND_TIMEOUT: Duration = Duration::from_millis(1000);

#[repr(C)]
struct SockaddrHci {
    hci_family: libc::sa_family_t,
    hci_dev: u16,
    hci_channel: u16,
}

/// A raw HCI socket bound to one controller.
pub struct HciSocket {
    socket: Socket,
    dev_id: u16,
}

impl HciSocket {
    /// Open and bind controller `hciN`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] if the socket cannot be created
    /// or bound (no adapter, or missing `CAP_NET_RAW`).
    pub fn open(dev_id: u16) -> Result<Self> {
        let socket = Socket::new(
            Domain::from(AF_BLUETOOTH),
            Type::RAW,
            Some(Protocol::from(BTPROTO_HCI)),
        )
        .map_err(|e| Error::BluetoothUnavailable {
            reason: format!("opening HCI socket: {}", e),
        })?;

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as libc::sa_family_t,
            hci_dev: dev_id,
            hci_channel: HCI_CHANNEL_RAW,
        };
        // SAFETY: valid fd and a correctly sized sockaddr_hci.
        let ret = unsafe {
            libc::bind(
                socket.as_raw_fd(),
                &addr as *const SockaddrHci as *const libc::sockaddr,
                std::mem::size_of::<SockaddrHci>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(Error::BluetoothUnavailable {
                reason: format!("binding hci{}: {}", dev_id, io::Error::last_os_error()),
            });
        }

        debug!("Opened raw HCI socket on hci{}", dev_id);

        Ok(Self { socket, dev_id })
    }

    /// Controller index this socket is bound to.
    pub fn dev_id(&self) -> u16 {
        self.dev_id
    }

    /// Send a command and wait for its Command Complete/Status. Returns the
    /// controller status byte.
    fn send_request(&mut self, opcode: u16, params: &[u8]) -> io::Result<u8> {
        let saved = self.filter()?;

        let mut filter = HciFilter::default();
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_event(EVT_CMD_COMPLETE);
        filter.set_event(EVT_CMD_STATUS);
        filter.opcode = opcode;
        self.set_filter(&filter)?;

        let result = self.exchange(opcode, params);

        self.set_filter(&saved)?;
        result
    }

    fn exchange(&mut self, opcode: u16, params: &[u8]) -> io::Result<u8> {
        let mut packet = Vec::with_capacity(4 + params.len());
        packet.push(HCI_COMMAND_PKT);
        packet.extend_from_slice(&opcode.to_le_bytes());
        packet.push(params.len() as u8);
        packet.extend_from_slice(params);
        (&self.socket).write_all(&packet)?;

        let deadline = Instant::now() + COMMAND_TIMEOUT;
        let mut buf = [0u8; HCI_MAX_EVENT_SIZE];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.poll_readable(remaining)? {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no reply to HCI command {:#06x}", opcode),
                    ));
                }
                continue;
            }

            let len = self.read_packet(&mut buf)?;
            let packet = &buf[..len];
            trace!("HCI reply {:02X?}", packet);

            match packet {
                // [type][0x0E][len][ncmd][opcode x2][status]
                [HCI_EVENT_PKT, EVT_CMD_COMPLETE, _, _, lo, hi, status, ..]
                    if u16::from_le_bytes([*lo, *hi]) == opcode =>
                {
                    return Ok(*status)
                }
                // [type][0x0F][len][status][ncmd][opcode x2]
                [HCI_EVENT_PKT, EVT_CMD_STATUS, _, status, _, lo, hi, ..]
                    if u16::from_le_bytes([*lo, *hi]) == opcode =>
                {
                    return Ok(*status)
                }
                _ => continue,
            }
        }
    }

    fn command(&mut self, opcode: u16, params: &[u8]) -> io::Result<()> {
        match self.send_request(opcode, params)? {
            0 => Ok(()),
            status => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("HCI command {:#06x} failed with status {:#04x}", opcode, status),
            )),
        }
    }
}

impl HciDevice for HciSocket {
    fn set_scan_parameters(&mut self, config: &ScanConfig) -> io::Result<()> {
        let mut params = Vec::with_capacity(7);
        params.push(config.scan_type as u8);
        params.extend_from_slice(&config.interval.to_le_bytes());
        params.extend_from_slice(&config.window.to_le_bytes());
        params.push(config.own_address_type as u8);
        params.push(config.filter_policy as u8);
        self.command(OCF_LE_SET_SCAN_PARAMETERS, &params)
    }

    fn set_scan_enable(&mut self, enable: bool, filter_duplicates: bool) -> io::Result<()> {
        self.command(
            OCF_LE_SET_SCAN_ENABLE,
            &[u8::from(enable), u8::from(filter_duplicates)],
        )
    }

    fn filter(&self) -> io::Result<HciFilter> {
        let mut filter = HciFilter::default();
        let mut len = std::mem::size_of::<HciFilter>() as libc::socklen_t;
        // SAFETY: the kernel writes at most `len` bytes into a repr(C) hci_filter.
        let ret = unsafe {
            libc::getsockopt(
                self.socket.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                &mut filter as *mut HciFilter as *mut libc::c_void,
                &mut len,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(filter)
    }

    fn set_filter(&mut self, filter: &HciFilter) -> io::Result<()> {
        // SAFETY: valid fd and a correctly sized hci_filter.
        let ret = unsafe {
            libc::setsockopt(
                self.socket.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                filter as *const HciFilter as *const libc::c_void,
                std::mem::size_of::<HciFilter>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let mut fds = libc::pollfd {
            fd: self.socket.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

        // SAFETY: one valid pollfd.
        let n = unsafe { libc::poll(&mut fds, 1, millis) };
        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => Ok(false),
                _ => Err(err),
            };
        }
        Ok(n > 0)
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match (&self.socket).read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }
}
