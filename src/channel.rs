//! Control channel transports.
//!
//! A session runs over a connected TCP socket or over a pair of plain file
//! descriptors (stdin/stdout under an ssh tunnel or a pipe). Only the mirror
//! command needs socket addresses, so those are looked up on demand.

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use socket2::SockRef;

/// Byte stream carrying commands, with the socket addresses of both ends.
pub trait ControlChannel: Read + Write + AsFd {
    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl ControlChannel for TcpStream {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

/// Channel that reads one descriptor and writes another with plain
/// `read`/`write`, so it works on pipes and ttys as well as sockets.
#[derive(Debug)]
pub struct StdioChannel {
    input: File,
    output: File,
}

impl StdioChannel {
    pub fn new(input: OwnedFd, output: OwnedFd) -> Self {
        Self {
            input: File::from(input),
            output: File::from(output),
        }
    }

    /// Duplicate stdin and stdout so the channel owns its descriptors.
    pub fn from_stdio() -> io::Result<Self> {
        let input = io::stdin().as_fd().try_clone_to_owned()?;
        let output = io::stdout().as_fd().try_clone_to_owned()?;
        Ok(Self::new(input, output))
    }
}

/// Address of an inet socket, or an error for anything else.
fn inet_addr(addr: socket2::SockAddr) -> io::Result<SocketAddr> {
    addr.as_socket().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "control channel is not an IP socket",
        )
    })
}

impl ControlChannel for StdioChannel {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        inet_addr(SockRef::from(&self.input).local_addr()?)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        inet_addr(SockRef::from(&self.input).peer_addr()?)
    }
}

impl Read for StdioChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for StdioChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.output.flush()
    }
}

/// Readiness and hang-up are watched on the input side.
impl AsFd for StdioChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.input.as_fd()
    }
}

/// Whether `fd` refers to a socket.
pub fn is_socket(fd: BorrowedFd<'_>) -> io::Result<bool> {
    use std::os::fd::AsRawFd;

    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd.as_raw_fd(), &mut st) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(st.st_mode & libc::S_IFMT == libc::S_IFSOCK)
}

#[cfg(test)]
pub(crate) mod pipes {
    use super::*;
    use std::os::fd::FromRawFd;

    /// Anonymous pipe: (read end, write end).
    pub fn pipe() -> (OwnedFd, OwnedFd) {
        let mut fds = [0 as libc::c_int; 2];
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
        assert_eq!(ret, 0, "pipe2: {}", io::Error::last_os_error());
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    /// Agent-side channel over two pipes and the controller's ends:
    /// (agent channel, controller writer, controller reader).
    pub fn pipe_channel() -> (StdioChannel, File, File) {
        let (agent_in, controller_out) = pipe();
        let (controller_in, agent_out) = pipe();
        (
            StdioChannel::new(agent_in, agent_out),
            File::from(controller_out),
            File::from(controller_in),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::pipes::pipe_channel;
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};

    mod stdio_tests {
        use super::*;

        #[test]
        fn reads_input_and_writes_output() {
            let (mut channel, mut to_agent, mut from_agent) = pipe_channel();

            to_agent.write_all(b"ping").unwrap();
            let mut buf = [0u8; 4];
            channel.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"ping");

            channel.write_all(b"pong").unwrap();
            from_agent.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"pong");
        }

        #[test]
        fn pipe_has_no_socket_address() {
            let (channel, _to_agent, _from_agent) = pipe_channel();

            let err = channel.local_addr().unwrap_err();
            assert_eq!(err.raw_os_error(), Some(libc::ENOTSOCK));
            assert!(channel.peer_addr().is_err());
        }

        #[test]
        fn socket_descriptors_report_addresses() {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            let controller = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
            let (agent, _) = listener.accept().unwrap();

            let input = agent.as_fd().try_clone_to_owned().unwrap();
            let output = OwnedFd::from(agent);
            let channel = StdioChannel::new(input, output);

            assert_eq!(channel.local_addr().unwrap(), controller.peer_addr().unwrap());
            assert_eq!(channel.peer_addr().unwrap(), controller.local_addr().unwrap());
        }
    }

    mod detection_tests {
        use super::*;
        use super::super::pipes::pipe;

        #[test]
        fn pipe_is_not_a_socket() {
            let (read, _write) = pipe();
            assert!(!is_socket(read.as_fd()).unwrap());
        }

        #[test]
        fn tcp_stream_is_a_socket() {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            assert!(is_socket(listener.as_fd()).unwrap());
        }
    }
}
