//! Full-buffer transfers over the control channel.
//!
//! The control channel is a plain byte stream, so a single `read`/`write`
//! may move fewer bytes than requested. These helpers loop until the whole
//! buffer has moved and retry calls interrupted by a signal.

use std::io::{ErrorKind, Read, Write};

use tracing::error;

use crate::error::TransportError;

/// Write the whole of `buf` to `stream`.
pub fn write_all<W: Write + ?Sized>(stream: &mut W, buf: &[u8]) -> Result<(), TransportError> {
    let mut written = 0;

    while written < buf.len() {
        match stream.write(&buf[written..]) {
            Ok(0) => return Err(closed(buf.len(), written, "send")),
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("write: {}", e);
                return Err(TransportError::System(e));
            }
        }
    }

    stream.flush().map_err(|e| {
        error!("flush: {}", e);
        TransportError::System(e)
    })
}

/// Fill the whole of `buf` from `stream`.
pub fn read_all<R: Read + ?Sized>(stream: &mut R, buf: &mut [u8]) -> Result<(), TransportError> {
    let mut filled = 0;

    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(closed(buf.len(), filled, "read in")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("read: {}", e);
                return Err(TransportError::System(e));
            }
        }
    }

    Ok(())
}

fn closed(expected: usize, actual: usize, verb: &str) -> TransportError {
    if actual == 0 {
        error!("received EOF, exiting");
        TransportError::Eof
    } else {
        error!(
            "could not {} all data ({} of {} bytes), exiting",
            verb, actual, expected
        );
        TransportError::ShortTransfer { expected, actual }
    }
}
