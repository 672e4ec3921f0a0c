//! Shutdown notification that wakes blocked waits.
//!
//! A signal handler only sets a flag, which a thread blocked in `read` or
//! `poll` never looks at. `ShutdownSignal` pairs the flag with an eventfd
//! that becomes readable when it is triggered, so every wait in the agent
//! includes it in its poll set.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

/// Result of waiting for a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The descriptor is readable or hung up.
    Ready,
    /// Shutdown was requested first.
    Shutdown,
}

#[derive(Debug)]
pub struct ShutdownSignal {
    event: OwnedFd,
    triggered: AtomicBool,
}

impl ShutdownSignal {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            event: unsafe { OwnedFd::from_raw_fd(fd) },
            triggered: AtomicBool::new(false),
        })
    }

    /// Request shutdown. Safe to call from any thread, any number of times.
    pub fn trigger(&self) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        let one: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.event.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            debug!("eventfd write: {}", io::Error::last_os_error());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Block until `fd` is readable or shutdown is requested.
    pub fn wait_readable(&self, fd: BorrowedFd<'_>) -> io::Result<Wake> {
        loop {
            if self.is_triggered() {
                return Ok(Wake::Shutdown);
            }

            let mut fds = [
                libc::pollfd {
                    fd: fd.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.event.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if ready < 0 {
                let e = io::Error::last_os_error();
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }

            if fds[1].revents != 0 {
                return Ok(Wake::Shutdown);
            }
            if fds[0].revents != 0 {
                return Ok(Wake::Ready);
            }
        }
    }
}

impl AsFd for ShutdownSignal {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.event.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{Ipv4Addr, TcpListener, TcpStream};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn stream_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let a = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (b, _) = listener.accept().unwrap();
        (a, b)
    }

    #[test]
    fn trigger_wakes_blocked_wait() {
        let (_peer, idle) = stream_pair();
        let signal = Arc::new(ShutdownSignal::new().unwrap());

        let trigger = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.trigger();
        });

        assert_eq!(signal.wait_readable(idle.as_fd()).unwrap(), Wake::Shutdown);
        assert!(signal.is_triggered());
        handle.join().unwrap();
    }

    #[test]
    fn readable_descriptor_is_ready() {
        let (mut peer, stream) = stream_pair();
        let signal = ShutdownSignal::new().unwrap();

        peer.write_all(b"x").unwrap();
        assert_eq!(signal.wait_readable(stream.as_fd()).unwrap(), Wake::Ready);
    }

    #[test]
    fn trigger_is_latched() {
        let (_peer, stream) = stream_pair();
        let signal = ShutdownSignal::new().unwrap();

        signal.trigger();
        signal.trigger();
        assert_eq!(signal.wait_readable(stream.as_fd()).unwrap(), Wake::Shutdown);
        assert_eq!(signal.wait_readable(stream.as_fd()).unwrap(), Wake::Shutdown);
    }
}
