//! Race-free filter attachment.
//!
//! A packet socket starts queueing traffic the moment it is created. Frames
//! queued before the real filter is attached would otherwise be delivered
//! unfiltered. The installer first attaches a drop-all program, discards
//! whatever is already queued, and only then attaches the requested program.

use std::io;

use tracing::{debug, error};

use crate::error::CaptureError;
use crate::protocol::FilterProgram;

/// A socket that accepts filter programs.
pub trait FilterTarget {
    /// Attach `program`, replacing any filter already attached.
    fn attach_filter(&mut self, program: &FilterProgram) -> io::Result<()>;

    /// Discard one queued datagram without blocking.
    ///
    /// Returns `Ok(false)` once nothing is queued.
    fn discard_pending(&mut self) -> io::Result<bool>;
}

/// Attach `program` to `target` without exposing unfiltered traffic.
///
/// Returns the number of datagrams discarded between the two attachments.
pub fn install_filter<T: FilterTarget + ?Sized>(
    target: &mut T,
    program: &FilterProgram,
) -> Result<usize, CaptureError> {
    target
        .attach_filter(&FilterProgram::drop_all())
        .map_err(|source| {
            error!("setsockopt[SO_ATTACH_FILTER-total]: {}", source);
            CaptureError::AttachFilter {
                stage: "drop-all",
                source,
            }
        })?;

    let discarded = drain(target);

    target.attach_filter(program).map_err(|source| {
        error!("setsockopt[SO_ATTACH_FILTER]: {}", source);
        CaptureError::AttachFilter {
            stage: "requested",
            source,
        }
    })?;

    debug!(
        "attached {} instruction filter, discarded {} queued datagrams",
        program.len(),
        discarded
    );
    Ok(discarded)
}

fn drain<T: FilterTarget + ?Sized>(target: &mut T) -> usize {
    let mut discarded = 0;
    loop {
        match target.discard_pending() {
            Ok(true) => discarded += 1,
            Ok(false) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("drain stopped: {}", e);
                break;
            }
        }
    }
    discarded
}

/// Kernel representation of a program, ready for `SO_ATTACH_FILTER`.
pub(crate) fn to_sock_filters(program: &FilterProgram) -> Vec<libc::sock_filter> {
    program
        .instructions()
        .iter()
        .map(|insn| libc::sock_filter {
            code: insn.opcode,
            jt: insn.jump_true,
            jf: insn.jump_false,
            k: insn.immediate,
        })
        .collect()
}

/// Instruction count for `sock_fprog.len`, which is 16 bits wide.
pub(crate) fn sock_fprog_len(filters: &[libc::sock_filter]) -> io::Result<libc::c_ushort> {
    libc::c_ushort::try_from(filters.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("filter program of {} instructions is too long", filters.len()),
        )
    })
}
