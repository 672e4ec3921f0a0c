//! `getifaddrs`/ioctl backed interface source.

use std::ffi::CStr;
use std::io;
use std::os::fd::AsRawFd;

use socket2::{Domain, Socket, Type};

use super::{AddressEntry, InterfaceSource};
use crate::protocol::NAME_LEN;

/// Reads the host's interface table.
///
/// Holds a datagram socket used as the handle for interface ioctls.
pub struct SystemInterfaces {
    ioctl_socket: Socket,
}

impl SystemInterfaces {
    pub fn new() -> io::Result<Self> {
        let ioctl_socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
        Ok(Self { ioctl_socket })
    }
}

impl InterfaceSource for SystemInterfaces {
    fn entries(&self) -> io::Result<Vec<AddressEntry>> {
        let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();

        if unsafe { libc::getifaddrs(&mut ifaddrs) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let entries = collect_entries(ifaddrs);

        unsafe { libc::freeifaddrs(ifaddrs) };

        Ok(entries)
    }

    fn hardware_type(&self, name: &str) -> io::Result<u16> {
        let mut ifr = ifreq_for(name);

        let ret = unsafe {
            libc::ioctl(
                self.ioctl_socket.as_raw_fd(),
                libc::SIOCGIFHWADDR as _,
                &mut ifr as *mut libc::ifreq,
            )
        };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(unsafe { ifr.ifr_ifru.ifru_hwaddr.sa_family })
    }
}

fn collect_entries(ifaddrs: *mut libc::ifaddrs) -> Vec<AddressEntry> {
    let mut entries = Vec::new();
    let mut current = ifaddrs;

    while !current.is_null() {
        let entry = unsafe { &*current };
        current = entry.ifa_next;

        if entry.ifa_name.is_null() {
            continue;
        }
        let name = unsafe { CStr::from_ptr(entry.ifa_name) }
            .to_string_lossy()
            .into_owned();

        // Interfaces without an address have a null ifa_addr
        let link_layer = !entry.ifa_addr.is_null()
            && i32::from(unsafe { (*entry.ifa_addr).sa_family }) == libc::AF_PACKET;

        entries.push(AddressEntry {
            name,
            flags: entry.ifa_flags,
            link_layer,
        });
    }

    entries
}

/// Zeroed `ifreq` carrying `name`, truncated to leave room for the NUL.
pub(crate) fn ifreq_for(name: &str) -> libc::ifreq {
    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    let bytes = name.as_bytes();
    let len = bytes.len().min(NAME_LEN.min(libc::IFNAMSIZ) - 1);
    for (dst, &src) in ifr.ifr_name.iter_mut().zip(&bytes[..len]) {
        *dst = src as libc::c_char;
    }
    ifr
}
