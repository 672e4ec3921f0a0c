//! netmirror - remote packet mirroring.
//!
//! An agent running with raw socket privileges serves commands from a
//! controller over a byte-stream control channel: it lists its network
//! interfaces, or captures traffic (optionally through a kernel BPF filter)
//! and replays every frame to the controller as a UDP datagram until the
//! controller hangs up.
//!
//! # Architecture
//!
//! - `channel`: control channel over a socket or a stdio pair
//! - `signal`: shutdown notification that wakes blocked waits
//! - `transport`: full-buffer reads and writes on the control channel
//! - `protocol`: wire layout of messages and records
//! - `interfaces`: interface enumeration and link-type mapping
//! - `capture`: packet socket setup, race-free filter attach, promiscuous mode
//! - `mirror`: the poll loop that forwards captured frames
//! - `dispatcher`: runs one command per session
//! - `controller`: client side of the protocol

pub mod capture;
pub mod channel;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod interfaces;
pub mod mirror;
pub mod protocol;
pub mod signal;
pub mod transport;

pub use config::AgentConfig;
pub use dispatcher::{Dispatcher, SessionOutcome};
pub use error::{AgentError, ProtocolError, TransportError};
pub use interfaces::{InterfaceSource, SystemInterfaces};
pub use channel::{ControlChannel, StdioChannel};
pub use mirror::{MirrorOptions, MirrorStats};
pub use protocol::{FilterProgram, InterfaceRecord, LinkType, MirrorRequest};
pub use signal::ShutdownSignal;
