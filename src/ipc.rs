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

//! Wire protocol between the CLI and the daemon.
//!
//! One JSON object per message, newline-terminated, over the local Unix
//! socket. Each connection carries exactly one request and one response.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::error::{Error, Result};
use crate::tunnel::Desc;

/// Command kinds, encoded as integers on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CmdKind {
    Nop = 0,
    Open = 1,
    Close = 2,
    List = 3,
    Shutdown = 4,
}

impl From<CmdKind> for u8 {
    fn from(k: CmdKind) -> u8 {
        k as u8
    }
}

impl TryFrom<u8> for CmdKind {
    type Error = String;

    fn try_from(v: u8) -> std::result::Result<Self, String> {
        match v {
            0 => Ok(Self::Nop),
            1 => Ok(Self::Open),
            2 => Ok(Self::Close),
            3 => Ok(Self::List),
            4 => Ok(Self::Shutdown),
            other => Err(format!("unknown command: {other}")),
        }
    }
}

impl fmt::Display for CmdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nop => "Nop",
            Self::Open => "Open",
            Self::Close => "Close",
            Self::List => "List",
            Self::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

/// A command sent to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cmd {
    pub kind: CmdKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<Desc>,
}

impl Cmd {
    pub fn new(kind: CmdKind) -> Self {
        Self { kind, tunnel: None }
    }

    pub fn with_tunnel(kind: CmdKind, tunnel: Desc) -> Self {
        Self { kind, tunnel: Some(tunnel) }
    }
}

/// Daemon build information, checked by the CLI compatibility probe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Info {
    /// 5-character commit hash of the daemon build, empty for local builds.
    #[serde(default)]
    pub commit: String,
}

/// A response from the daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resp {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnels: Option<HashMap<String, Desc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Info>,
}

/// Serialize one message and write it newline-terminated.
pub async fn write<T, W>(value: &T, w: &mut W) -> Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let mut data =
        serde_json::to_vec(value).map_err(|e| Error::Ipc(format!("failed to serialize: {e}")))?;
    debug!("sending: {}", String::from_utf8_lossy(&data));
    data.push(b'\n');
    w.write_all(&data)
        .await
        .map_err(|e| Error::Ipc(format!("failed to write: {e}")))?;
    w.flush()
        .await
        .map_err(|e| Error::Ipc(format!("failed to flush: {e}")))?;
    Ok(())
}

/// Read exactly one newline-terminated message.
///
/// A clean EOF before any bytes is reported as a distinguishable
/// "peer closed" error so callers can ignore aborted connections.
pub async fn read<T, R>(r: &mut R) -> Result<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    let mut reader = BufReader::new(r);
    let n = reader
        .read_line(&mut line)
        .await
        .map_err(|e| Error::Ipc(format!("failed to read: {e}")))?;
    if n == 0 {
        return Err(Error::Ipc("peer closed".to_string()));
    }
    debug!("received: {}", line.trim_end());
    serde_json::from_str(&line).map_err(|e| Error::Ipc(format!("failed to deserialize: {e}")))
}

/// Whether an IPC error is a silent peer hang-up rather than a protocol
/// problem worth logging.
pub fn is_peer_closed(err: &Error) -> bool {
    matches!(err, Error::Ipc(msg) if msg == "peer closed")
}
