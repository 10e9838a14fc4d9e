//! Byte-stream transport under a session.
//!
//! Sessions talk to a `Box<dyn Transport>` produced by a [`Connector`], so
//! tests can substitute failing or scripted connections.

use crate::config::ConnectionConfig;
use crate::endpoint::Endpoint;
use crate::error::{EipError, Result};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

pub trait Transport: Read + Write + Send {
    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()>;

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Closes both directions; further I/O fails
    fn close(&mut self);

    fn peer(&self) -> String;
}

impl Transport for TcpStream {
    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn close(&mut self) {
        let _ = self.shutdown(Shutdown::Both);
    }

    fn peer(&self) -> String {
        self.peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "<disconnected>".to_string())
    }
}

/// Opens transports for sessions
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &Endpoint, config: &ConnectionConfig) -> Result<Box<dyn Transport>>;
}

/// Plain TCP to the gateway, Nagle disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, endpoint: &Endpoint, config: &ConnectionConfig) -> Result<Box<dyn Transport>> {
        let target = endpoint.socket_addr(config.default_port);
        let addrs = target
            .to_socket_addrs()
            .map_err(|e| EipError::Open(format!("cannot resolve {}: {}", target, e)))?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.connect_timeout()) {
                Ok(stream) => {
                    stream
                        .set_nodelay(true)
                        .map_err(|e| EipError::Open(format!("{}: {}", target, e)))?;
                    tracing::debug!(endpoint = %target, %addr, "tcp connected");
                    return Ok(Box::new(stream));
                }
                Err(e) => {
                    tracing::debug!(endpoint = %target, %addr, error = %e, "tcp connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(EipError::Open(match last_error {
            Some(e) => format!("cannot connect to {}: {}", target, e),
            None => format!("{} resolved to no addresses", target),
        }))
    }
}
