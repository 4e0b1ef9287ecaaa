// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Forwarding endpoint parsing.
//!
//! An endpoint is either a TCP `host:port`, a bare port (short form,
//! allowed only on the side that opens the port), or a Unix socket path.

use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Net {
    Tcp,
    Unix,
}

/// A parsed forwarding endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub net: Net,
    pub addr: String,
}

impl Address {
    pub fn tcp(addr: impl Into<String>) -> Self {
        Self { net: Net::Tcp, addr: addr.into() }
    }

    pub fn unix(path: impl Into<String>) -> Self {
        Self { net: Net::Unix, addr: path.into() }
    }

    /// Split a TCP address into host and port. Errors on Unix addresses
    /// and on malformed host:port strings.
    pub fn host_port(&self) -> Result<(String, u16)> {
        if self.net != Net::Tcp {
            return Err(Error::transport(format!(
                "not a TCP address: {}",
                self.addr
            )));
        }
        let (host, port) = self
            .addr
            .rsplit_once(':')
            .ok_or_else(|| Error::transport(format!("missing port in address {}", self.addr)))?;
        let port: u16 = port
            .parse()
            .map_err(|_| Error::transport(format!("invalid port in address {}", self.addr)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok((host.to_string(), port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr)
    }
}

/// Parse a forwarding endpoint spec.
///
/// A value that parses as a bare integer is a TCP port on `localhost`,
/// permitted only when `allow_short` holds (the side that opens the
/// port). A value containing `:` is a full TCP address; anything else is
/// a Unix socket path.
pub fn parse_address(spec: &str, allow_short: bool) -> Result<Address> {
    if spec.parse::<u64>().is_ok() {
        if !allow_short {
            return Err(Error::config("bad remote forwarding specification"));
        }
        return Ok(Address::tcp(format!("localhost:{spec}")));
    }
    if spec.contains(':') {
        return Ok(Address::tcp(spec));
    }
    Ok(Address::unix(spec))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_form_allowed() {
        let a = parse_address("8080", true).unwrap();
        assert_eq!(a, Address::tcp("localhost:8080"));
    }

    #[test]
    fn test_short_form_rejected() {
        let err = parse_address("8080", false).unwrap_err();
        assert!(err.to_string().contains("bad remote forwarding"));
    }

    #[test]
    fn test_full_tcp_address() {
        let a = parse_address("0.0.0.0:8080", false).unwrap();
        assert_eq!(a.net, Net::Tcp);
        assert_eq!(a.host_port().unwrap(), ("0.0.0.0".to_string(), 8080));
    }

    #[test]
    fn test_unix_path() {
        let a = parse_address("/tmp/app.sock", false).unwrap();
        assert_eq!(a.net, Net::Unix);
        assert!(a.host_port().is_err());
    }

    #[test]
    fn test_ipv6_host_port() {
        let a = parse_address("[::1]:9000", true).unwrap();
        assert_eq!(a.host_port().unwrap(), ("::1".to_string(), 9000));
    }
}
