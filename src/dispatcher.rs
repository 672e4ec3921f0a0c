//! Command dispatch: one request per session.

use std::os::fd::AsFd;

use tracing::{debug, error, info};

use crate::capture::{CaptureOptions, CaptureSocket};
use crate::channel::ControlChannel;
use crate::error::{AgentError, ProtocolError};
use crate::interfaces::{self, InterfaceSource};
use crate::mirror::{MirrorEngine, MirrorOptions, MirrorStats};
use crate::protocol::{
    read_filter_program, read_message, write_interface_list, ControlMessage, MirrorHeader,
    MirrorRequest,
};
use crate::signal::Wake;

/// What a completed session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Interface list sent, with this many records.
    InterfacesListed(usize),
    /// Mirror session ran to completion.
    Mirrored(MirrorStats),
}

/// Reads one request header from the control channel and runs its handler.
pub struct Dispatcher<'a> {
    interfaces: &'a dyn InterfaceSource,
    capture: CaptureOptions,
    mirror: MirrorOptions,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        interfaces: &'a dyn InterfaceSource,
        capture: CaptureOptions,
        mirror: MirrorOptions,
    ) -> Self {
        Self {
            interfaces,
            capture,
            mirror,
        }
    }

    /// Serve a single command. Blocks until the header arrives or the
    /// shutdown signal in the mirror options fires.
    pub fn serve<C: ControlChannel>(&self, channel: &mut C) -> Result<SessionOutcome, AgentError> {
        self.wait_for_peer(channel)?;
        let message = read_message(channel)?;
        debug!("received {}", message.name());

        match message {
            ControlMessage::IflistRequest => self.list_interfaces(channel),
            ControlMessage::MirrorRequest(header) => self.mirror(channel, header),
            other => {
                error!("unexpected {} from controller", other.name());
                Err(ProtocolError::Unexpected(other.name()).into())
            }
        }
    }

    /// Wait until the controller has sent something, so a shutdown signal
    /// is not held up by a blocking read.
    fn wait_for_peer<C: ControlChannel>(&self, channel: &C) -> Result<(), AgentError> {
        let Some(signal) = &self.mirror.shutdown else {
            return Ok(());
        };
        match signal.wait_readable(channel.as_fd()) {
            Ok(Wake::Ready) => Ok(()),
            Ok(Wake::Shutdown) => {
                info!("shutdown requested while waiting for controller");
                Err(AgentError::Interrupted)
            }
            Err(e) => {
                error!("poll: {}", e);
                Err(AgentError::os("poll", e))
            }
        }
    }

    fn list_interfaces<C: ControlChannel>(
        &self,
        channel: &mut C,
    ) -> Result<SessionOutcome, AgentError> {
        let records = interfaces::enumerate(self.interfaces)?;
        write_interface_list(channel, &records)?;
        info!("sent {} interfaces", records.len());
        Ok(SessionOutcome::InterfacesListed(records.len()))
    }

    fn mirror<C: ControlChannel>(
        &self,
        channel: &mut C,
        header: MirrorHeader,
    ) -> Result<SessionOutcome, AgentError> {
        if header.filter_len > 0 {
            self.wait_for_peer(channel)?;
        }
        let filter = read_filter_program(channel, header.filter_len).map_err(|e| {
            error!("could not read filter program: {}", e);
            AgentError::Software(format!("reading {} filter instructions: {}", header.filter_len, e))
        })?;

        let request = MirrorRequest {
            interface: header.interface,
            promiscuous: header.promiscuous,
            destination_port: header.port,
            filter,
        };
        info!(
            "mirror request: interface {}, promiscuous {}, port {}",
            request.interface.as_deref().unwrap_or("any"),
            request.promiscuous,
            request.destination_port
        );

        let capture = CaptureSocket::open(&request, &self.capture)?;
        let engine = MirrorEngine::start(
            &*channel,
            capture,
            request.destination_port,
            self.mirror.clone(),
        )?;
        Ok(SessionOutcome::Mirrored(engine.run()))
    }
}
