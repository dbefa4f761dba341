//! Port I/O shim (§4.1): a receive buffer wrapped around a byte transport,
//! serving fixed-length reads under a deadline.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::error::Error;

/// Wraps a `Read + Write` transport with a receive buffer and deadline-bound
/// reads. Reads are always serial: callers must not overlap `send`/`retrieve`,
/// which the single-threaded session driver guarantees structurally.
pub struct PortIo<T> {
    transport: T,
    buffer: VecDeque<u8>,
}

impl<T> PortIo<T>
where
    T: Read + Write,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            buffer: VecDeque::new(),
        }
    }

    /// Transmits `bytes` verbatim, discarding any stale bytes in the receive
    /// buffer first.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.buffer.clear();
        trace!("sending {} bytes: {:02X?}", bytes.len(), bytes);
        self.transport.write_all(bytes)?;
        self.transport.flush()?;
        Ok(())
    }

    /// Delivers the first `n` bytes of the receive buffer, polling the
    /// underlying transport until they arrive or `deadline` elapses.
    ///
    /// The underlying transport is expected to be configured with a short
    /// per-read timeout so this loop can observe the deadline without
    /// blocking indefinitely on a silent device.
    pub fn retrieve(&mut self, n: usize, deadline: Duration) -> Result<Vec<u8>, Error> {
        let start = Instant::now();
        let mut scratch = [0u8; 256];
        while self.buffer.len() < n {
            match self.transport.read(&mut scratch) {
                Ok(0) => {}
                Ok(read) => {
                    self.buffer.extend(scratch[..read].iter().copied());
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::Interrupted =>
                {
                    // The transport's own read timeout is expected to do
                    // most of the pacing here; this small sleep only
                    // guards against a transport (such as a test double)
                    // that returns instantly instead of blocking.
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => return Err(Error::Io(e)),
            }
            if self.buffer.len() >= n {
                break;
            }
            if start.elapsed() >= deadline {
                debug!("retrieve({n}) timed out after {:?}", start.elapsed());
                return Err(Error::Timeout);
            }
        }
        Ok(self.buffer.drain(..n).collect())
    }

    /// Consumes the shim, returning the underlying transport so it can be
    /// dropped (closed) by the caller.
    pub fn into_inner(self) -> T {
        self.transport
    }
}
