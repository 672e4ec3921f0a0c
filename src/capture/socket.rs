//! AF_PACKET capture socket.

use std::io::{self, Read};
use std::mem::MaybeUninit;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};

use pnet::datalink;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{error, info, warn};

use super::filter::{install_filter, sock_fprog_len, to_sock_filters, FilterTarget};
use super::promisc::{set_promiscuous, InterfaceControl};
use super::{CaptureOptions, CaptureSource};
use crate::error::CaptureError;
use crate::interfaces::system::ifreq_for;
use crate::protocol::{FilterProgram, MirrorRequest};

const ETH_P_ALL: u16 = libc::ETH_P_ALL as u16;

/// Packet socket feeding a mirror session.
pub struct CaptureSocket {
    socket: Socket,
    interface: Option<String>,
    promisc_changed: bool,
    restore_promiscuous: bool,
}

impl CaptureSocket {
    /// Create and configure the capture socket for `request`.
    ///
    /// Without an interface the socket captures on all interfaces in cooked
    /// (`SOCK_DGRAM`) mode, since there is no single link header to keep.
    pub fn open(request: &MirrorRequest, options: &CaptureOptions) -> Result<Self, CaptureError> {
        let ty = match request.interface {
            Some(_) => Type::RAW,
            None => Type::DGRAM,
        };

        let socket = Socket::new(
            Domain::PACKET,
            ty,
            Some(Protocol::from(i32::from(ETH_P_ALL.to_be()))),
        )
        .map_err(|e| {
            error!("socket error: {}", e);
            CaptureError::Socket(e)
        })?;

        let mut capture = Self {
            socket,
            interface: None,
            promisc_changed: false,
            restore_promiscuous: options.restore_promiscuous,
        };

        if !request.filter.is_empty() {
            install_filter(&mut capture, &request.filter)?;
        }

        if let Some(name) = &request.interface {
            capture.bind_interface(name)?;
            capture.interface = Some(name.clone());

            if request.promiscuous {
                capture.promisc_changed = set_promiscuous(&capture, name, true)?;
            }
        }

        capture.socket.set_nonblocking(true).map_err(|e| {
            error!("fcntl[F_SETFL]: {}", e);
            CaptureError::NonBlocking(e)
        })?;

        info!(
            "capturing on {} ({} filter instructions)",
            capture.interface.as_deref().unwrap_or("any"),
            request.filter.len()
        );
        Ok(capture)
    }

    /// Interface the socket is bound to, `None` for all interfaces.
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// Whether opening this socket switched promiscuous mode on.
    pub fn changed_promiscuous(&self) -> bool {
        self.promisc_changed
    }

    fn bind_interface(&self, name: &str) -> Result<(), CaptureError> {
        let index = interface_index(name)?;

        let mut sll: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        sll.sll_family = libc::AF_PACKET as u16;
        sll.sll_protocol = ETH_P_ALL.to_be();
        sll.sll_ifindex = index as i32;

        let ret = unsafe {
            libc::bind(
                self.socket.as_raw_fd(),
                &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret == -1 {
            let source = io::Error::last_os_error();
            error!("bind to {}: {}", name, source);
            return Err(CaptureError::Bind {
                interface: name.to_string(),
                source,
            });
        }
        Ok(())
    }
}

/// Resolve an interface name to its kernel index.
fn interface_index(name: &str) -> Result<u32, CaptureError> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
        .map(|iface| iface.index)
        .ok_or_else(|| {
            error!("no interface named {}", name);
            CaptureError::InterfaceNotFound(name.to_string())
        })
}

impl FilterTarget for CaptureSocket {
    fn attach_filter(&mut self, program: &FilterProgram) -> io::Result<()> {
        let mut filters = to_sock_filters(program);
        let prog = libc::sock_fprog {
            len: sock_fprog_len(&filters)?,
            filter: filters.as_mut_ptr(),
        };

        let ret = unsafe {
            libc::setsockopt(
                self.socket.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_ATTACH_FILTER,
                &prog as *const libc::sock_fprog as *const libc::c_void,
                std::mem::size_of::<libc::sock_fprog>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn discard_pending(&mut self) -> io::Result<bool> {
        let mut drain = [MaybeUninit::<u8>::uninit(); 1];
        match self
            .socket
            .recv_with_flags(&mut drain, libc::MSG_TRUNC | libc::MSG_DONTWAIT)
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl InterfaceControl for CaptureSocket {
    fn interface_flags(&self, name: &str) -> io::Result<u32> {
        let mut ifr = ifreq_for(name);
        let ret = unsafe {
            libc::ioctl(
                self.socket.as_raw_fd(),
                libc::SIOCGIFFLAGS as _,
                &mut ifr as *mut libc::ifreq,
            )
        };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(u32::from(unsafe { ifr.ifr_ifru.ifru_flags } as u16))
    }

    fn set_interface_flags(&self, name: &str, flags: u32) -> io::Result<()> {
        let mut ifr = ifreq_for(name);
        ifr.ifr_ifru.ifru_flags = flags as u16 as libc::c_short;
        let ret = unsafe {
            libc::ioctl(
                self.socket.as_raw_fd(),
                libc::SIOCSIFFLAGS as _,
                &mut ifr as *mut libc::ifreq,
            )
        };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl CaptureSource for CaptureSocket {
    fn recv_frame(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.socket).read(buf)
    }
}

impl AsFd for CaptureSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

impl Drop for CaptureSocket {
    fn drop(&mut self) {
        if !(self.promisc_changed && self.restore_promiscuous) {
            return;
        }
        if let Some(name) = self.interface.clone() {
            if let Err(e) = set_promiscuous(&*self, &name, false) {
                warn!("could not restore promiscuous mode on {}: {}", name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_root() -> bool {
        unsafe { libc::geteuid() == 0 }
    }

    fn request(interface: Option<&str>, filter: FilterProgram) -> MirrorRequest {
        MirrorRequest {
            interface: interface.map(str::to_string),
            promiscuous: false,
            destination_port: 9000,
            filter,
        }
    }

    #[test]
    fn unknown_interface_is_not_found() {
        assert!(matches!(
            interface_index("nosuchif0"),
            Err(CaptureError::InterfaceNotFound(_))
        ));
    }

    #[test]
    fn opens_any_interface_socket() {
        if !is_root() {
            eprintln!("skipping: requires root or CAP_NET_RAW");
            return;
        }
        let capture = CaptureSocket::open(
            &request(None, FilterProgram::default()),
            &CaptureOptions::default(),
        )
        .unwrap();
        assert_eq!(capture.interface(), None);
        assert!(!capture.changed_promiscuous());
    }

    #[test]
    fn installs_filter_on_loopback() {
        if !is_root() {
            eprintln!("skipping: requires root or CAP_NET_RAW");
            return;
        }
        let filter = FilterProgram::parse_ddd("1\n6 0 0 65535\n").unwrap();
        let capture =
            CaptureSocket::open(&request(Some("lo"), filter), &CaptureOptions::default()).unwrap();
        assert_eq!(capture.interface(), Some("lo"));
    }

    #[test]
    fn kernel_rejects_invalid_program() {
        if !is_root() {
            eprintln!("skipping: requires root or CAP_NET_RAW");
            return;
        }
        // No trailing return instruction
        let filter = FilterProgram::parse_ddd("1\n40 0 0 12\n").unwrap();
        let err = CaptureSocket::open(&request(None, filter), &CaptureOptions::default())
            .err()
            .expect("invalid program must be rejected");
        assert!(matches!(
            err,
            CaptureError::AttachFilter {
                stage: "requested",
                ..
            }
        ));
    }
}
