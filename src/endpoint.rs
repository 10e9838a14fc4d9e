//! Endpoint strings: `host[:port](,segment)*`
//!
//! `10.1.2.3,1,0` names a controller reached through gateway `10.1.2.3`,
//! backplane port 1, slot 0. The routing path may be empty when the host is
//! the controller itself.

use crate::cip;
use crate::error::{EipError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::net::Ipv4Addr;

lazy_static! {
    static ref HOST_PORT: Regex = Regex::new(
        r"^(?P<host>[A-Za-z0-9](?:[A-Za-z0-9\-\.]*[A-Za-z0-9])?)(?::(?P<port>[0-9]{1,5}))?$"
    )
    .unwrap();
    static ref DOTTED_NUMERIC: Regex = Regex::new(r"^[0-9\.]+$").unwrap();
}

/// A parsed gateway address plus CIP routing path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: Option<u16>,
    pub path: Vec<u8>,
}

impl Endpoint {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (gateway, route) = match text.split_once(',') {
            Some((gateway, route)) => (gateway.trim(), Some(route)),
            None => (text, None),
        };

        let caps = HOST_PORT.captures(gateway).ok_or_else(|| {
            EipError::Format(format!("'{}' is not a valid host[:port]", gateway))
        })?;
        let host = caps["host"].to_string();

        if DOTTED_NUMERIC.is_match(&host) && host.parse::<Ipv4Addr>().is_err() {
            return Err(EipError::Format(format!(
                "'{}' is not a valid IPv4 address",
                host
            )));
        }

        let port = match caps.name("port") {
            Some(port) => {
                let port = port.as_str().parse::<u16>().ok().filter(|p| *p != 0);
                Some(port.ok_or_else(|| {
                    EipError::Format(format!("invalid port in '{}'", gateway))
                })?)
            }
            None => None,
        };

        let path = match route {
            Some(route) => {
                let segments = cip::parse_path_segments(route)?;
                if segments.is_empty() {
                    return Err(EipError::Format(format!(
                        "missing routing segment after ',' in '{}'",
                        text
                    )));
                }
                segments
            }
            None => Vec::new(),
        };

        Ok(Self { host, port, path })
    }

    pub fn port_or(&self, default_port: u16) -> u16 {
        self.port.unwrap_or(default_port)
    }

    pub fn is_ip_literal(&self) -> bool {
        self.host.parse::<Ipv4Addr>().is_ok()
    }

    /// `host:port` for socket resolution
    pub fn socket_addr(&self, default_port: u16) -> String {
        format!("{}:{}", self.host, self.port_or(default_port))
    }

    /// Canonical form with the port filled in; equal endpoints written
    /// differently (`plc,1,0` vs `plc:44818, 1, 0`) map to the same key
    pub fn canonical(&self, default_port: u16) -> String {
        let mut key = self.socket_addr(default_port);
        for segment in &self.path {
            key.push(',');
            key.push_str(&segment.to_string());
        }
        key
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        for segment in &self.path {
            write!(f, ",{}", segment)?;
        }
        Ok(())
    }
}
