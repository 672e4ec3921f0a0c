//! Packet capture.
//!
//! `CaptureSocket` owns the AF_PACKET socket of a mirror session. The
//! filter installer and the promiscuous toggle work through the
//! `FilterTarget` and `InterfaceControl` traits so they can be exercised
//! without raw socket privileges.

mod filter;
mod promisc;
mod socket;

pub use filter::{install_filter, FilterTarget};
pub use promisc::{set_promiscuous, InterfaceControl};
pub use socket::CaptureSocket;

use std::io;
use std::os::fd::AsFd;

/// Capture settings that come from the agent configuration rather than the request.
#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    /// Switch promiscuous mode back off when the socket is closed, if
    /// opening it switched it on.
    pub restore_promiscuous: bool,
}

/// A pollable source of captured frames.
pub trait CaptureSource: AsFd {
    /// Read one frame into `buf`, returning its length.
    ///
    /// Non-blocking: fails with `WouldBlock` when nothing is queued.
    fn recv_frame(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}
