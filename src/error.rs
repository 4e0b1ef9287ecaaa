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

//! Error taxonomy shared between the tunnel engine and the daemon.
//!
//! The daemon flattens these into response strings over IPC, so the CLI
//! can only match on text; `AlreadyRunning` keeps a stable message for
//! that reason.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file problems: missing, unparsable, invalid names.
    #[error("{0}")]
    Config(String),

    /// SSH profile resolution problems: bad options, malformed ProxyJump,
    /// jump recursion overflow, missing host/user/port.
    #[error("{0}")]
    Profile(String),

    /// No usable signer after identity resolution.
    #[error("{0}")]
    Auth(String),

    /// No host key algorithm intersection with known_hosts.
    #[error("{0}")]
    HostKey(String),

    /// Dial, listen or remote-forward failures.
    #[error("{0}")]
    Transport(String),

    /// Errors after the tunnel is open; user-visible only as a terminal
    /// close with a logged reason.
    #[error("{0}")]
    Runtime(String),

    /// A tunnel with this name is already registered.
    #[error("already running")]
    AlreadyRunning,

    /// Close was requested for a tunnel that is not registered.
    #[error("tunnel not running")]
    NotRunning,

    /// Daemon/CLI build mismatch.
    #[error("daemon build #{daemon} not compatible with CLI build #{cli}")]
    Compat { daemon: String, cli: String },

    /// IPC framing or decoding failure.
    #[error("ipc: {0}")]
    Ipc(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn profile(msg: impl Into<String>) -> Self {
        Self::Profile(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_running_message_is_stable() {
        // The CLI downgrades open failures whose message ends with this
        // exact text, so it must not change.
        assert_eq!(Error::AlreadyRunning.to_string(), "already running");
    }
}
