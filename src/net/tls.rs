//! Non-blocking TLS socket transport.
//!
//! Grounded on `original_source/trading_bot/workspace/socketUtils.cpp`: the
//! handshake happens in blocking mode (DNS, TCP connect, `SSL_connect`),
//! then the underlying file descriptor is switched to non-blocking. This
//! lets the reactor (`engine::reactor`) poll many sockets from one thread
//! without any of them ever parking it.
//!
//! The TLS library context (`openssl::ssl::SslConnector`) is process-global:
//! callers are expected to build one `SslConnector` at startup and keep it
//! alive for at least as long as any `TlsSocket` built from it —
//! `TlsSocket` borrows nothing from it after the handshake completes (the
//! connector is only used to produce the initial `SslStream`), so ordering
//! is enforced by convention (build the connector first, drop it last)
//! rather than by the type system.
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use openssl::ssl::{SslConnector, SslMethod, SslStream, SslVerifyMode};

use crate::error::{EngineError, Result};
use crate::net::Transport;

/// Builds the process-wide TLS context. Construct exactly one of these at
/// startup and keep it alive until every `TlsSocket` built from it has been
/// dropped — no socket may outlive it.
pub fn new_connector() -> Result<SslConnector> {
    let mut builder = SslConnector::builder(SslMethod::tls())?;
    builder.set_verify(SslVerifyMode::PEER);
    Ok(builder.build())
}

pub struct TlsSocket {
    stream: SslStream<TcpStream>,
    half_closed: bool,
}

impl TlsSocket {
    /// Performs DNS, TCP connect, and the TLS handshake (with SNI) in
    /// blocking mode, then switches the socket to non-blocking.
    pub fn connect(connector: &SslConnector, host: &str, port: u16) -> Result<Self> {
        let tcp = TcpStream::connect((host, port))?;
        tcp.set_nodelay(true).ok();
        let ssl_stream = connector
            .connect(host, tcp)
            .map_err(|e| EngineError::Tls(e.to_string()))?;
        ssl_stream.get_ref().set_nonblocking(true)?;
        Ok(TlsSocket {
            stream: ssl_stream,
            half_closed: false,
        })
    }

    /// Builds a socket directly from an already-handshaked stream; used by
    /// the blocking single-shot HTTP wrappers (section 4.B `get`/`post`/
    /// `patch`/`del`) which drive `step` to completion without going
    /// non-blocking.
    pub fn from_blocking(connector: &SslConnector, host: &str, port: u16) -> Result<Self> {
        let tcp = TcpStream::connect((host, port))?;
        tcp.set_nodelay(true).ok();
        let ssl_stream = connector
            .connect(host, tcp)
            .map_err(|e| EngineError::Tls(e.to_string()))?;
        Ok(TlsSocket {
            stream: ssl_stream,
            half_closed: false,
        })
    }

    pub fn set_read_timeout(&self, dur: Option<Duration>) -> Result<()> {
        self.stream.get_ref().set_read_timeout(dur)?;
        Ok(())
    }
}

impl Transport for TlsSocket {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.half_closed {
            return Err(EngineError::PeerClosed);
        }
        match self.stream.read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.half_closed = true;
                Err(EngineError::PeerClosed)
            }
            Ok(n) => Ok(n),
            Err(e) if would_block(&e) => Ok(0),
            Err(e) => {
                if is_peer_closed(&e) {
                    self.half_closed = true;
                    Err(EngineError::PeerClosed)
                } else {
                    Err(EngineError::Io(e))
                }
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.half_closed {
            return Err(EngineError::PeerClosed);
        }
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if would_block(&e) => Ok(0),
            Err(e) => {
                if is_peer_closed(&e) {
                    self.half_closed = true;
                    Err(EngineError::PeerClosed)
                } else {
                    Err(EngineError::Io(e))
                }
            }
        }
    }

    fn close(&mut self) {
        const RETRY_BUDGET: u32 = 3;
        let deadline = Instant::now() + Duration::from_millis(200);
        for _ in 0..RETRY_BUDGET {
            match self.stream.shutdown() {
                Ok(_) => break,
                Err(_) if Instant::now() >= deadline => break,
                Err(_) => continue,
            }
        }
        // release the fd unconditionally regardless of shutdown outcome
        let _ = self.stream.get_ref().shutdown(std::net::Shutdown::Both);
    }
}

fn would_block(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}

fn is_peer_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe
    )
}
