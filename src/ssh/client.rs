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

//! The russh client wrapper used by the tunnel engine.
//!
//! Each SSH connection is owned by a single task; everything else talks
//! to it through a command channel. This keeps russh's `Handle` out of
//! shared state entirely and gives the engine a uniform surface for
//! direct connections and connections tunneled through an outer hop.
//!
//! Connection death is observable through [`Client::closed`]: the
//! russh session task drops its handler when the transport ends, and
//! the handler cancels the latch from `Drop`.

use std::borrow::Cow;
use std::sync::Arc;

use russh::client::{self, Handle, Msg};
use russh::keys::ssh_key::Algorithm;
use russh::keys::{PrivateKeyWithHashAlg, PublicKey};
use russh::{Channel, ChannelStream, Preferred};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::ssh::agent;
use crate::ssh::hops::{ClientProfile, Hop, HostKeyPolicy};
use crate::ssh::identity::{Identity, Signer};

/// Commands served by the connection owner task.
enum Command {
    OpenDirectTcpip {
        host: String,
        port: u32,
        reply: oneshot::Sender<std::result::Result<Channel<Msg>, russh::Error>>,
    },
    TcpipForward {
        address: String,
        port: u32,
        reply: oneshot::Sender<std::result::Result<u32, russh::Error>>,
    },
    Keepalive {
        reply: oneshot::Sender<std::result::Result<(), russh::Error>>,
    },
    Disconnect,
}

/// One authenticated SSH connection.
pub struct Client {
    cmd_tx: mpsc::Sender<Command>,
    closed: CancellationToken,
    incoming: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Channel<Msg>>>>,
    host: String,
    port: u16,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

impl Client {
    /// Dial the hop directly over TCP and authenticate.
    pub async fn connect(hop: &Hop) -> Result<Self> {
        let (handler, closed, incoming) = ClientHandler::new(hop);
        let config = make_config(&hop.profile);
        let addr = (hop.host_name.as_str(), hop.port);

        let handle = timeout(hop.profile.timeout, client::connect(config, addr, handler))
            .await
            .map_err(|_| {
                Error::transport(format!(
                    "connection to {}:{} timed out",
                    hop.host_name, hop.port
                ))
            })?
            .map_err(|e| {
                Error::transport(format!("could not connect to {}:{}: {e}", hop.host_name, hop.port))
            })?;

        Self::finish(handle, hop, closed, incoming).await
    }

    /// Dial the hop through `self` (an already-established outer hop):
    /// open a TCP channel to it and run a fresh SSH handshake on top.
    pub async fn connect_via(&self, hop: &Hop) -> Result<Self> {
        let stream = self.dial_tcp(&hop.host_name, hop.port).await?;

        let (handler, closed, incoming) = ClientHandler::new(hop);
        let config = make_config(&hop.profile);

        let handle = timeout(hop.profile.timeout, client::connect_stream(config, stream, handler))
            .await
            .map_err(|_| {
                Error::transport(format!(
                    "handshake with {}:{} timed out",
                    hop.host_name, hop.port
                ))
            })?
            .map_err(|e| {
                Error::transport(format!("could not connect to {}:{}: {e}", hop.host_name, hop.port))
            })?;

        Self::finish(handle, hop, closed, incoming).await
    }

    async fn finish(
        mut handle: Handle<ClientHandler>,
        hop: &Hop,
        closed: CancellationToken,
        incoming: mpsc::UnboundedReceiver<Channel<Msg>>,
    ) -> Result<Self> {
        authenticate(&mut handle, &hop.profile.user, &hop.profile.identities).await?;

        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        tokio::spawn(owner_task(handle, cmd_rx));

        Ok(Self {
            cmd_tx,
            closed,
            incoming: std::sync::Mutex::new(Some(incoming)),
            host: hop.host_name.clone(),
            port: hop.port,
        })
    }

    /// Latch cancelled when the underlying transport terminates, for any
    /// reason.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn remote_addr(&self) -> String {
        crate::paths::join_host_port(&self.host, self.port)
    }

    /// Open a `direct-tcpip` channel to `host:port` through this
    /// connection and expose it as a byte stream.
    pub async fn dial_tcp(&self, host: &str, port: u16) -> Result<ChannelStream<Msg>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::OpenDirectTcpip { host: host.to_string(), port: port.into(), reply })
            .await?;
        let channel = self
            .recv(rx)
            .await?
            .map_err(|e| Error::transport(format!("could not dial {host}:{port}: {e}")))?;
        Ok(channel.into_stream())
    }

    /// Ask the server to listen on `address:port` and forward accepted
    /// connections back over this connection. Returns the bound port.
    pub async fn request_remote_forward(&self, address: &str, port: u16) -> Result<u16> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::TcpipForward { address: address.to_string(), port: port.into(), reply })
            .await?;
        let bound = self.recv(rx).await?.map_err(|e| {
            Error::transport(format!("remote forward request for {address}:{port} rejected: {e}"))
        })?;
        Ok(bound as u16)
    }

    /// Take the stream of server-initiated forwarded channels. Yields
    /// `None` after the first call.
    pub fn incoming(&self) -> Option<mpsc::UnboundedReceiver<Channel<Msg>>> {
        self.incoming.lock().expect("incoming lock poisoned").take()
    }

    /// Send one liveness probe with a required reply.
    ///
    /// The probe goes out as russh's `keepalive@openssh.com` global
    /// request; the handle has no API for sending a global request
    /// under any other name.
    pub async fn send_keepalive(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Keepalive { reply }).await?;
        self.recv(rx)
            .await?
            .map_err(|e| Error::runtime(format!("error sending keepalive: {e}")))
    }

    /// Terminate the connection. Idempotent; observers see `closed`.
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect).await;
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| Error::transport(format!("connection to {} is closed", self.remote_addr())))
    }

    async fn recv<T>(&self, rx: oneshot::Receiver<T>) -> Result<T> {
        rx.await
            .map_err(|_| Error::transport(format!("connection to {} is closed", self.remote_addr())))
    }
}

/// The single task that owns the russh handle. Runs until a disconnect
/// is requested or the owning `Client` is dropped, then tears the
/// connection down.
async fn owner_task(mut handle: Handle<ClientHandler>, mut cmd_rx: mpsc::Receiver<Command>) {
    loop {
        match cmd_rx.recv().await {
            Some(Command::OpenDirectTcpip { host, port, reply }) => {
                let res = handle
                    .channel_open_direct_tcpip(&host, port, "127.0.0.1", 0)
                    .await;
                let _ = reply.send(res);
            }
            Some(Command::TcpipForward { address, port, reply }) => {
                let res = handle.tcpip_forward(&address, port).await;
                let _ = reply.send(res);
            }
            Some(Command::Keepalive { reply }) => {
                // Hardcoded to keepalive@openssh.com inside russh; the
                // request name is not configurable through the public
                // API.
                let res = handle.send_keepalive(true).await;
                let _ = reply.send(res);
            }
            Some(Command::Disconnect) | None => break,
        }
    }
    let _ = handle
        .disconnect(russh::Disconnect::ByApplication, "", "en")
        .await;
}

/// russh event handler: host key verification, forwarded channels, and
/// the closed latch (fired from `Drop` when the session task ends).
struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    closed: CancellationToken,
    forward_tx: mpsc::UnboundedSender<Channel<Msg>>,
}

impl ClientHandler {
    fn new(hop: &Hop) -> (Self, CancellationToken, mpsc::UnboundedReceiver<Channel<Msg>>) {
        let closed = CancellationToken::new();
        let (forward_tx, forward_rx) = mpsc::unbounded_channel();
        let handler = Self {
            host: hop.host_name.clone(),
            port: hop.port,
            policy: hop.profile.host_key.clone(),
            closed: closed.clone(),
            forward_tx,
        };
        (handler, closed, forward_rx)
    }
}

impl Drop for ClientHandler {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match &self.policy {
            HostKeyPolicy::AcceptAny => Ok(true),
            HostKeyPolicy::Verify(hosts) => {
                let ok = hosts.verify(&self.host, self.port, server_public_key);
                if !ok {
                    warn!(
                        "host key verification failed for {}:{}",
                        self.host, self.port
                    );
                }
                Ok(ok)
            }
        }
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> std::result::Result<(), Self::Error> {
        debug!(
            "forwarded-tcpip channel: {connected_address}:{connected_port} \
             from {originator_address}:{originator_port}"
        );
        // The forwarder may not be running yet (or anymore); dropped
        // channels close themselves.
        let _ = self.forward_tx.send(channel);
        Ok(())
    }
}

/// Build the russh client config from the profile's algorithm lists.
/// Names russh does not implement are dropped with a debug log; an empty
/// result keeps the russh defaults for that list.
fn make_config(profile: &ClientProfile) -> Arc<client::Config> {
    let mut preferred = Preferred::DEFAULT;

    let kex: Vec<russh::kex::Name> = profile
        .kex_algos
        .iter()
        .filter_map(|s| named(russh::kex::Name::try_from(s.as_str()).ok(), s, "kex"))
        .collect();
    if !kex.is_empty() {
        preferred.kex = Cow::Owned(kex);
    }

    let cipher: Vec<russh::cipher::Name> = profile
        .ciphers
        .iter()
        .filter_map(|s| named(russh::cipher::Name::try_from(s.as_str()).ok(), s, "cipher"))
        .collect();
    if !cipher.is_empty() {
        preferred.cipher = Cow::Owned(cipher);
    }

    let mac: Vec<russh::mac::Name> = profile
        .macs
        .iter()
        .filter_map(|s| named(russh::mac::Name::try_from(s.as_str()).ok(), s, "mac"))
        .collect();
    if !mac.is_empty() {
        preferred.mac = Cow::Owned(mac);
    }

    let key: Vec<Algorithm> = profile
        .host_key_algos
        .iter()
        .filter_map(|s| {
            named(
                Algorithm::new(s).ok().or_else(|| Algorithm::new_certificate(s).ok()),
                s,
                "host key",
            )
        })
        .collect();
    if !key.is_empty() {
        preferred.key = Cow::Owned(key);
    }

    Arc::new(client::Config {
        preferred,
        nodelay: true,
        inactivity_timeout: None,
        keepalive_interval: None,
        ..Default::default()
    })
}

fn named<T>(value: Option<T>, name: &str, what: &str) -> Option<T> {
    if value.is_none() {
        debug!("dropping {what} algorithm '{name}': not supported");
    }
    value
}

/// Try each identity candidate in order until the server accepts one.
async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    user: &str,
    identities: &[Identity],
) -> Result<()> {
    for id in identities {
        match try_identity(handle, user, id).await {
            Ok(true) => {
                debug!("authenticated as {user} with {}", id.describe());
                return Ok(());
            }
            Ok(false) => debug!("identity {} rejected by server", id.describe()),
            Err(e) => debug!("identity {} failed: {e}", id.describe()),
        }
    }
    Err(Error::Auth(format!("could not authenticate as {user}: all identities rejected")))
}

async fn try_identity(
    handle: &mut Handle<ClientHandler>,
    user: &str,
    id: &Identity,
) -> Result<bool> {
    let auth = |e: russh::Error| Error::Auth(e.to_string());
    match (&id.signer, &id.cert) {
        (Signer::KeyFile { key, .. }, Some(cert)) => handle
            .authenticate_openssh_cert(user, key.clone(), cert.clone())
            .await
            .map(|r| r.success())
            .map_err(auth),
        (Signer::KeyFile { key, .. }, None) => {
            let hash = handle.best_supported_rsa_hash().await.map_err(auth)?.flatten();
            handle
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key.clone(), hash))
                .await
                .map(|r| r.success())
                .map_err(auth)
        }
        (Signer::Agent { key }, _) => {
            // Certificates held only on disk still authenticate through
            // the agent copy of their key.
            let hash = handle.best_supported_rsa_hash().await.map_err(auth)?.flatten();
            let mut guard = agent::client().await?;
            let agent = guard.as_mut().expect("agent guard holds a connection");
            handle
                .authenticate_publickey_with(user, key.clone(), hash, agent)
                .await
                .map(|r| r.success())
                .map_err(|e| Error::Auth(e.to_string()))
        }
    }
}
