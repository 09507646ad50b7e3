//! Transport layer: TLS sockets, HTTP/1.1 client, WebSocket client.
//!
//! HTTP and WebSocket both wrap a TLS socket behind the same small
//! capability set (`Read + Write` plus an explicit `close`) rather than an
//! inheritance hierarchy.
pub mod http;
pub mod tls;
pub mod ws;

use crate::error::Result;

/// The capability set every transport-consuming layer (HTTP, WebSocket)
/// needs from the socket underneath it: non-blocking partial read/write
/// with well-defined return values, and an explicit close.
pub trait Transport: Send {
    /// Copies at most `buf.len()` bytes into `buf`, returning the number
    /// actually copied. Returns `Ok(0)` when no data is available on a
    /// non-blocking socket (not EOF). Returns `Err(PeerClosed)` once the
    /// peer's half-close has been observed.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Writes at most `buf.len()` bytes, returning the number actually
    /// written (possibly 0 on a non-blocking socket under backpressure).
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Orderly shutdown: attempts the polite close handshake up to a small
    /// retry budget, then releases the underlying descriptor regardless.
    fn close(&mut self);
}

/// An in-memory `Transport` double used by unit tests for HTTP/WebSocket
/// framing without opening real sockets.
#[cfg(test)]
pub struct TestTransport {
    pub inbound: std::collections::VecDeque<u8>,
    pub outbound: Vec<u8>,
    pub peer_closed: bool,
}

#[cfg(test)]
impl TestTransport {
    pub fn new(inbound: &[u8]) -> Self {
        TestTransport {
            inbound: inbound.iter().copied().collect(),
            outbound: Vec::new(),
            peer_closed: false,
        }
    }

    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }
}

#[cfg(test)]
impl Transport for TestTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.inbound.is_empty() {
            if self.peer_closed {
                return Err(crate::error::EngineError::PeerClosed);
            }
            return Ok(0);
        }
        let n = buf.len().min(self.inbound.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.inbound.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn close(&mut self) {
        self.peer_closed = true;
    }
}
