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

//! Process-wide ssh-agent access.
//!
//! One connection is opened lazily on first use and shared by every
//! tunnel; the agent protocol is request/response, so all access holds
//! the lock for the duration of a request.

use std::sync::OnceLock;

use russh::keys::agent::client::AgentClient;
use russh::keys::PublicKey;
use tokio::net::UnixStream;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

type Agent = AgentClient<UnixStream>;

fn slot() -> &'static Mutex<Option<Agent>> {
    static AGENT: OnceLock<Mutex<Option<Agent>>> = OnceLock::new();
    AGENT.get_or_init(|| Mutex::new(None))
}

/// Lock the shared agent connection, connecting on first use.
///
/// The returned guard always holds `Some`.
pub async fn client() -> Result<MutexGuard<'static, Option<Agent>>> {
    let mut guard = slot().lock().await;
    if guard.is_none() {
        if std::env::var_os("SSH_AUTH_SOCK").map_or(true, |v| v.is_empty()) {
            return Err(Error::Auth("SSH_AUTH_SOCK is not set".to_string()));
        }
        let agent = AgentClient::connect_env()
            .await
            .map_err(|e| Error::Auth(format!("could not dial agent: {e}")))?;
        *guard = Some(agent);
    }
    Ok(guard)
}

/// Public keys currently held by the agent.
pub async fn identities() -> Result<Vec<PublicKey>> {
    let mut guard = client().await?;
    let agent = guard.as_mut().expect("agent guard holds a connection");
    match agent.request_identities().await {
        Ok(keys) => Ok(keys),
        Err(e) => {
            // Drop the broken connection so the next call redials.
            *guard = None;
            Err(Error::Auth(format!("could not retrieve identities from agent: {e}")))
        }
    }
}
