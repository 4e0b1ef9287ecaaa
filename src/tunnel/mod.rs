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

//! Tunnel descriptions and the runtime engine.
//!
//! [`Desc`] is the user-facing value that travels through the config file
//! and the IPC protocol. [`engine::Tunnel`] is the runtime owned by the
//! daemon. The engine never carries its internal signals across the wire;
//! only the `Desc` snapshot (with `status`/`last_conn`) does.

pub mod address;
pub mod engine;
mod forwarder;
mod socks;

pub use engine::Tunnel;

use std::fmt;

use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Forwarding mode of a tunnel.
///
/// Encoded as an integer on the wire; parsed from the mode strings of the
/// config file (`local|l|-l`, `remote|r|-r`, `socks`, `socks-remote`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Local = 0,
    Remote = 1,
    Socks = 2,
    RemoteSocks = 3,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" | "l" | "-l" => Some(Self::Local),
            "remote" | "r" | "-r" => Some(Self::Remote),
            "socks" => Some(Self::Socks),
            "socks-remote" => Some(Self::RemoteSocks),
            _ => None,
        }
    }

    fn from_int(v: u64) -> Option<Self> {
        match v {
            0 => Some(Self::Local),
            1 => Some(Self::Remote),
            2 => Some(Self::Socks),
            3 => Some(Self::RemoteSocks),
            _ => None,
        }
    }

    /// Whether the side that opens the port is the remote one.
    pub fn is_reverse(self) -> bool {
        matches!(self, Self::Remote | Self::RemoteSocks)
    }

    pub fn is_socks(self) -> bool {
        matches!(self, Self::Socks | Self::RemoteSocks)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Direction arrow as shown in the list table
        if self.is_reverse() {
            write!(f, "<-")
        } else {
            write!(f, "->")
        }
    }
}

impl Serialize for Mode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(*self as u64)
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ModeVisitor;

        impl Visitor<'_> for ModeVisitor {
            type Value = Mode;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mode string or integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Mode, E> {
                Mode::from_int(v).ok_or_else(|| E::custom("invalid mode"))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Mode, E> {
                u64::try_from(v)
                    .ok()
                    .and_then(Mode::from_int)
                    .ok_or_else(|| E::custom("invalid mode"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Mode, E> {
                Mode::parse(v).ok_or_else(|| E::custom("invalid mode"))
            }
        }

        deserializer.deserialize_any(ModeVisitor)
    }
}

/// Observable lifecycle state of a tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Status {
    #[default]
    Closed = 0,
    Open = 1,
    Reconn = 2,
}

impl Status {
    fn from_int(v: u64) -> Option<Self> {
        match v {
            0 => Some(Self::Closed),
            1 => Some(Self::Open),
            2 => Some(Self::Reconn),
            _ => None,
        }
    }

    /// Colored label for terminal tables.
    pub fn colored(self) -> String {
        match self {
            Self::Closed => format!("{}", "CLOSED".red()),
            Self::Open => format!("{}", "OPEN".green()),
            Self::Reconn => format!("{}", "RECONN".yellow()),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::Reconn => write!(f, "RECONN"),
        }
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(*self as u64)
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StatusVisitor;

        impl Visitor<'_> for StatusVisitor {
            type Value = Status;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a status integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Status, E> {
                Status::from_int(v).ok_or_else(|| E::custom("invalid status"))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Status, E> {
                u64::try_from(v)
                    .ok()
                    .and_then(Status::from_int)
                    .ok_or_else(|| E::custom("invalid status"))
            }
        }

        deserializer.deserialize_any(StatusVisitor)
    }
}

/// An endpoint spec from the config file. TOML accepts either a string
/// (`"localhost:9000"`, a unix socket path) or a bare integer port; the
/// integer form is normalized to its decimal string here and interpreted
/// by [`address::parse_address`] later.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddrSpec(pub String);

impl AddrSpec {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AddrSpec {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for AddrSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for AddrSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AddrSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SpecVisitor;

        impl Visitor<'_> for SpecVisitor {
            type Value = AddrSpec;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an address string or port integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<AddrSpec, E> {
                Ok(AddrSpec(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<AddrSpec, E> {
                Ok(AddrSpec(v.to_string()))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<AddrSpec, E> {
                Ok(AddrSpec(v.to_string()))
            }
        }

        deserializer.deserialize_any(SpecVisitor)
    }
}

/// User-facing description of a tunnel, as written in the config file and
/// echoed back by `list`. `status` and `last_conn` are runtime fields the
/// daemon fills into snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Desc {
    pub name: String,
    #[serde(rename = "local")]
    pub local_address: AddrSpec,
    #[serde(rename = "remote")]
    pub remote_address: AddrSpec,
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default, rename = "identity")]
    pub identity_file: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub keep_alive: Option<u64>,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub last_conn: Option<DateTime<Utc>>,
}

impl Desc {
    /// A shell-only descriptor carrying just the name; the daemon needs
    /// nothing else to close a tunnel.
    pub fn named(name: &str) -> Self {
        Self { name: name.to_string(), ..Default::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!(Mode::parse("local"), Some(Mode::Local));
        assert_eq!(Mode::parse("L"), Some(Mode::Local));
        assert_eq!(Mode::parse("-l"), Some(Mode::Local));
        assert_eq!(Mode::parse("Remote"), Some(Mode::Remote));
        assert_eq!(Mode::parse("-r"), Some(Mode::Remote));
        assert_eq!(Mode::parse("socks"), Some(Mode::Socks));
        assert_eq!(Mode::parse("socks-remote"), Some(Mode::RemoteSocks));
        assert_eq!(Mode::parse("bogus"), None);
    }

    #[test]
    fn test_mode_arrows() {
        assert_eq!(Mode::Local.to_string(), "->");
        assert_eq!(Mode::Socks.to_string(), "->");
        assert_eq!(Mode::Remote.to_string(), "<-");
        assert_eq!(Mode::RemoteSocks.to_string(), "<-");
    }

    #[test]
    fn test_addr_spec_from_toml_int_or_string() {
        #[derive(Deserialize)]
        struct T {
            local: AddrSpec,
            remote: AddrSpec,
        }
        let t: T = toml::from_str("local = 9000\nremote = \"localhost:9001\"").unwrap();
        assert_eq!(t.local.as_str(), "9000");
        assert_eq!(t.remote.as_str(), "localhost:9001");
    }

    #[test]
    fn test_desc_json_round_trip() {
        let desc = Desc {
            name: "dev".into(),
            local_address: "9000".into(),
            remote_address: "localhost:9001".into(),
            host: "dev-server".into(),
            mode: Mode::Remote,
            status: Status::Open,
            keep_alive: Some(30),
            ..Default::default()
        };
        let json = serde_json::to_string(&desc).unwrap();
        assert!(json.contains("\"mode\":1"));
        assert!(json.contains("\"status\":1"));
        let back: Desc = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "dev");
        assert_eq!(back.mode, Mode::Remote);
        assert_eq!(back.status, Status::Open);
        assert_eq!(back.keep_alive, Some(30));
        assert_eq!(back.local_address.as_str(), "9000");
    }

    #[test]
    fn test_desc_from_toml_with_mode_string() {
        let desc: Desc = toml::from_str(
            r#"
            name = "dev"
            local = "localhost:9000"
            remote = 9001
            host = "dev-server"
            mode = "socks-remote"
            "#,
        )
        .unwrap();
        assert_eq!(desc.mode, Mode::RemoteSocks);
        assert_eq!(desc.remote_address.as_str(), "9001");
        assert_eq!(desc.status, Status::Closed);
    }
}
