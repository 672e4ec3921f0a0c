use std::io;

use thiserror::Error;

/// BSD sysexits codes used as process exit status.
pub mod exit {
    pub const OK: u8 = 0;
    pub const DATAERR: u8 = 65;
    pub const UNAVAILABLE: u8 = 69;
    pub const SOFTWARE: u8 = 70;
    pub const OSERR: u8 = 71;
    pub const CONFIG: u8 = 78;
    /// Terminated by SIGINT or SIGTERM (128 + SIGINT, as a shell reports it).
    pub const INTERRUPTED: u8 = 130;
}

/// Failure moving a buffer over the control channel.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("received EOF")]
    Eof,

    #[error("short transfer: moved {actual} of {expected} bytes")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("transfer failed: {0}")]
    System(#[source] io::Error),
}

impl TransportError {
    /// True when the peer closed the channel, at a message boundary or not.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Eof | Self::ShortTransfer { .. })
    }
}

/// Malformed or unexpected content on the control channel.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("unknown message code {0:#04x}")]
    UnknownCode(u8),

    #[error("unexpected {0} message")]
    Unexpected(&'static str),

    #[error("filter program of {declared} instructions exceeds the limit of {limit}")]
    FilterTooLong { declared: u32, limit: u32 },

    #[error("{0} records do not fit in a u32 count")]
    CountOverflow(usize),
}

/// Errors raised while setting up or using the packet capture socket.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to create packet socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to attach {stage} filter: {source}")]
    AttachFilter {
        stage: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("failed to bind to {interface}: {source}")]
    Bind {
        interface: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to change promiscuous mode on {interface}: {source}")]
    Promiscuous {
        interface: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to set non-blocking mode: {0}")]
    NonBlocking(#[source] io::Error),
}

/// Errors in the textual filter program input.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FilterParseError {
    #[error("empty filter program")]
    Empty,

    #[error("line {line}: {detail}")]
    Malformed { line: usize, detail: String },

    #[error("declared {declared} instructions but found {actual}")]
    CountMismatch { declared: usize, actual: usize },
}

/// Errors loading the agent configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Session-level failure, classified by the exit code it maps to.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("{context}: {source}")]
    Os {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("control channel: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("software error: {0}")]
    Software(String),

    #[error("replay socket unavailable: {0}")]
    Unavailable(#[source] io::Error),

    #[error("interrupted by shutdown signal")]
    Interrupted,
}

impl AgentError {
    pub fn os(context: &'static str, source: io::Error) -> Self {
        Self::Os { context, source }
    }

    /// Map to a sysexits code.
    pub fn exit_code(&self) -> u8 {
        match self {
            AgentError::Os { .. } | AgentError::Capture(_) => exit::OSERR,
            AgentError::Transport(TransportError::System(_)) => exit::OSERR,
            AgentError::Transport(_) | AgentError::Protocol(_) => exit::DATAERR,
            AgentError::Software(_) => exit::SOFTWARE,
            AgentError::Unavailable(_) => exit::UNAVAILABLE,
            AgentError::Interrupted => exit::INTERRUPTED,
        }
    }
}
