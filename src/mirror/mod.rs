//! Mirror engine.
//!
//! Bridges the capture socket to a UDP replay socket until the controller
//! closes the control channel. Single threaded: the `poll` call is the only
//! place the engine waits.

mod replay;

pub use replay::ReplaySocket;

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsFd, AsRawFd};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, trace};

use crate::capture::CaptureSource;
use crate::channel::ControlChannel;
use crate::error::AgentError;
use crate::signal::ShutdownSignal;

/// Default upper bound on a single captured frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct MirrorOptions {
    /// Bound on each readiness wait. `None` waits indefinitely.
    pub wait_timeout: Option<Duration>,
    /// Largest frame read from the capture socket; longer frames are truncated.
    pub max_frame_len: usize,
    /// Triggered by a signal handler to end the session early.
    pub shutdown: Option<Arc<ShutdownSignal>>,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            wait_timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            shutdown: None,
        }
    }
}

/// Counters for one mirror session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub frames_forwarded: u64,
    pub frames_dropped: u64,
    pub bytes_forwarded: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    Running,
    Stopped,
}

/// One mirror session. Owns the capture and replay sockets; both are
/// closed when `run` returns.
pub struct MirrorEngine<'a, C: ControlChannel, S: CaptureSource> {
    control: &'a C,
    capture: S,
    replay: ReplaySocket,
    options: MirrorOptions,
    stats: MirrorStats,
    state: MirrorState,
}

impl<'a, C: ControlChannel, S: CaptureSource> MirrorEngine<'a, C, S> {
    /// Set up the replay socket: bound to the control channel's local
    /// address (any port), connected to the peer's address at `port`.
    pub fn start(
        control: &'a C,
        capture: S,
        port: u16,
        options: MirrorOptions,
    ) -> Result<Self, AgentError> {
        let local = control.local_addr().map_err(|e| {
            error!("getsockname: {}", e);
            AgentError::os("getsockname", e)
        })?;
        let peer = control.peer_addr().map_err(|e| {
            error!("getpeername: {}", e);
            AgentError::os("getpeername", e)
        })?;

        let (local, remote) = replay_endpoints(local, peer, port);
        let replay = ReplaySocket::connect(local, remote)?;
        info!("mirroring to {}", replay.peer());

        Ok(Self {
            control,
            capture,
            replay,
            options,
            stats: MirrorStats::default(),
            state: MirrorState::Running,
        })
    }

    pub fn state(&self) -> MirrorState {
        self.state
    }

    pub fn replay(&self) -> &ReplaySocket {
        &self.replay
    }

    /// Forward frames until the session stops.
    pub fn run(mut self) -> MirrorStats {
        let mut buf = vec![0u8; self.options.max_frame_len];
        while self.state == MirrorState::Running {
            self.state = self.step(&mut buf);
        }

        info!(
            "mirror stopped: {} frames ({} bytes) forwarded, {} dropped",
            self.stats.frames_forwarded, self.stats.bytes_forwarded, self.stats.frames_dropped
        );
        self.stats
    }

    fn shutdown_requested(&self) -> bool {
        self.options
            .shutdown
            .as_ref()
            .is_some_and(|signal| signal.is_triggered())
    }

    /// One wait cycle.
    fn step(&mut self, buf: &mut [u8]) -> MirrorState {
        if self.shutdown_requested() {
            info!("shutdown requested");
            return MirrorState::Stopped;
        }

        // Without a signal the third entry is ignored by poll (fd -1)
        let shutdown_fd = self
            .options
            .shutdown
            .as_ref()
            .map_or(-1, |signal| signal.as_fd().as_raw_fd());
        let mut fds = [
            libc::pollfd {
                fd: self.control.as_fd().as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: self.capture.as_fd().as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: shutdown_fd,
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        let timeout = self
            .options
            .wait_timeout
            .map_or(-1, |d| d.as_millis().min(i32::MAX as u128) as libc::c_int);

        let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
        if ready < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                return MirrorState::Running;
            }
            error!("poll: {}", e);
            return MirrorState::Stopped;
        }
        if ready == 0 {
            return MirrorState::Running;
        }

        if fds[2].revents != 0 {
            info!("shutdown requested");
            return MirrorState::Stopped;
        }
        if fds[0].revents != 0 {
            info!("control channel closed by peer");
            return MirrorState::Stopped;
        }

        let capture = fds[1].revents;
        if capture & (libc::POLLERR | libc::POLLNVAL) != 0 {
            error!("capture socket error (revents {:#x})", capture);
            return MirrorState::Stopped;
        }
        if capture & libc::POLLIN != 0 {
            return self.forward(buf);
        }
        MirrorState::Running
    }

    fn forward(&mut self, buf: &mut [u8]) -> MirrorState {
        let len = match self.capture.recv_frame(buf) {
            Ok(len) => len,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                return MirrorState::Running;
            }
            Err(e) => {
                error!("read from capture socket: {}", e);
                return MirrorState::Stopped;
            }
        };

        match self.replay.send(&buf[..len]) {
            Ok(sent) if sent == len => {
                self.stats.frames_forwarded += 1;
                self.stats.bytes_forwarded += sent as u64;
                trace!("forwarded {} byte frame", len);
            }
            Ok(sent) => {
                self.stats.frames_dropped += 1;
                debug!("partial send: {} of {} bytes", sent, len);
            }
            Err(e) => {
                self.stats.frames_dropped += 1;
                debug!("send: {}", e);
            }
        }
        MirrorState::Running
    }
}

/// Replay endpoints: the control channel's local address with any port,
/// and the peer's address with the requested port. IPv6 scope and flow
/// information carry over unchanged.
fn replay_endpoints(local: SocketAddr, peer: SocketAddr, port: u16) -> (SocketAddr, SocketAddr) {
    let mut local = local;
    local.set_port(0);
    let mut remote = peer;
    remote.set_port(port);
    (local, remote)
}
