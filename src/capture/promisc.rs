//! Promiscuous mode toggling.

use std::io;

use tracing::{error, info};

use crate::error::CaptureError;
use crate::interfaces::IFF_PROMISC;

/// Read and write interface flags (`SIOCGIFFLAGS` / `SIOCSIFFLAGS`).
pub trait InterfaceControl {
    fn interface_flags(&self, name: &str) -> io::Result<u32>;

    fn set_interface_flags(&self, name: &str, flags: u32) -> io::Result<()>;
}

/// Put `name` into (or out of) promiscuous mode.
///
/// Flags are only written when the current state differs from `enable`.
/// Returns whether a change was made, so the caller knows whether there is
/// anything to revert later.
pub fn set_promiscuous<C: InterfaceControl + ?Sized>(
    control: &C,
    name: &str,
    enable: bool,
) -> Result<bool, CaptureError> {
    let failed = |source: io::Error| CaptureError::Promiscuous {
        interface: name.to_string(),
        source,
    };

    let flags = control.interface_flags(name).map_err(|e| {
        error!("ioctl[SIOCGIFFLAGS] on {}: {}", name, e);
        failed(e)
    })?;

    if (flags & IFF_PROMISC != 0) == enable {
        return Ok(false);
    }

    let flags = if enable {
        flags | IFF_PROMISC
    } else {
        flags & !IFF_PROMISC
    };

    control.set_interface_flags(name, flags).map_err(|e| {
        error!("ioctl[SIOCSIFFLAGS] on {}: {}", name, e);
        failed(e)
    })?;

    info!(
        "{} promiscuous mode on {}",
        if enable { "enabled" } else { "disabled" },
        name
    );
    Ok(true)
}
