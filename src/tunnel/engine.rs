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

//! The per-tunnel engine: connect the hop chain, run the forwarder,
//! probe liveness, reconnect on failures, and coordinate shutdown.
//!
//! State machine per tunnel:
//! Connecting → Open → (Reconnecting → Open)* → Closed.
//! `stop` aborts any state; `closed` latches exactly once when the
//! terminal state is reached, after every listener, client and
//! in-flight session is gone.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::config::DEFAULT_KEEP_ALIVE;
use crate::error::{Error, Result};
use crate::ssh::config::SshConfig;
use crate::ssh::{hops, Client, Hop, HostProfile};
use crate::tunnel::address::{parse_address, Address, Net};
use crate::tunnel::forwarder::{self, Acceptor, Dialer, Listener};
use crate::tunnel::{Desc, Mode, Status};

const INIT_RECONNECT_WAIT: Duration = Duration::from_millis(500);
const MAX_RECONNECT_WAIT: Duration = Duration::from_secs(60);
const RECONNECT_TIMEOUT: Duration = Duration::from_secs(15 * 60);
/// The first reconnect attempt is essentially immediate.
const FIRST_RECONNECT_WAIT: Duration = Duration::from_millis(2);

/// Everything derived from configuration on the first open; reconnects
/// reuse it instead of re-reading any config.
#[derive(Debug)]
struct Prepared {
    hops: Vec<Hop>,
    local: Option<Address>,
    remote: Option<Address>,
    keep_alive: u64,
}

/// One established connection generation: the hop chain plus the tasks
/// serving it.
struct Conn {
    clients: Vec<Arc<Client>>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl Conn {
    fn client(&self) -> &Arc<Client> {
        self.clients.last().expect("hop chain is never empty")
    }
}

enum Exit {
    Stopped,
    Disconnected,
}

/// A tunnel as owned by the daemon. Created from a [`Desc`], opened
/// once, then driven by its own task until `closed` fires.
pub struct Tunnel {
    desc: Desc,
    status: RwLock<Status>,
    last_conn: RwLock<Option<DateTime<Utc>>>,
    stop: CancellationToken,
    closed: CancellationToken,
    prepared: Mutex<Option<Arc<Prepared>>>,
}

impl Tunnel {
    /// Wrap a description. `parent` is the daemon's root cancellation
    /// token; the tunnel's stop signal is derived from it.
    pub fn from_desc(desc: Desc, parent: &CancellationToken) -> Self {
        Self {
            desc,
            status: RwLock::new(Status::Closed),
            last_conn: RwLock::new(None),
            stop: parent.child_token(),
            closed: CancellationToken::new(),
            prepared: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn status(&self) -> Status {
        *self.status.read().expect("status lock poisoned")
    }

    /// Snapshot of the description with the runtime fields filled in;
    /// this is what `list` returns over IPC.
    pub fn snapshot(&self) -> Desc {
        let mut desc = self.desc.clone();
        desc.status = self.status();
        desc.last_conn = *self.last_conn.read().expect("last_conn lock poisoned");
        desc
    }

    /// Latch fired exactly once when the tunnel reaches its terminal
    /// state.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Request shutdown. Erroneous once the tunnel is already Closed.
    pub fn close(&self) -> Result<()> {
        if self.status() == Status::Closed {
            return Err(Error::runtime("trying to close a closed tunnel"));
        }
        self.stop.cancel();
        Ok(())
    }

    /// Open the tunnel: resolve configuration (first time only), build
    /// the hop chain and listener, and hand off to the driver task.
    /// Returns once the listener is bound; later failures surface only
    /// through logs and the Closed state.
    pub async fn open(self: Arc<Self>) -> Result<()> {
        let prepared = self.prepare().await?;
        let conn = self.connect(&prepared).await?;

        self.mark_open();
        tokio::spawn(self.run(prepared, conn));
        Ok(())
    }

    async fn prepare(&self) -> Result<Arc<Prepared>> {
        if let Some(p) = self.prepared.lock().expect("prepared lock poisoned").clone() {
            return Ok(p);
        }

        let cfg = SshConfig::load()
            .map_err(|e| Error::profile(format!("could not parse SSH config: {e:#}")))?;
        let mut profile = HostProfile::resolve(&cfg, &self.desc.host)?;

        // Values set in the tunnel description win over ssh_config.
        if !self.desc.user.is_empty() {
            profile.user = self.desc.user.clone();
        }
        if self.desc.port != 0 {
            profile.port = self.desc.port;
        }
        if !self.desc.identity_file.is_empty() {
            profile.identity_files = vec![self.desc.identity_file.clone()];
        }
        // An alias unknown to ssh_config is taken as a literal hostname.
        if profile.host_name.is_empty() {
            profile.host_name = self.desc.host.clone();
        }
        profile.ensure_user();

        // Address specs are validated before any key material is
        // touched; both kinds of error surface synchronously from open.
        let allow_short = self.desc.mode.is_reverse();
        let remote = if self.desc.mode == Mode::Socks {
            None
        } else {
            Some(
                parse_address(self.desc.remote_address.as_str(), allow_short)
                    .map_err(|e| Error::config(format!("remote address: {e}")))?,
            )
        };
        let local = if self.desc.mode == Mode::RemoteSocks {
            None
        } else {
            Some(
                parse_address(self.desc.local_address.as_str(), !allow_short)
                    .map_err(|e| Error::config(format!("local address: {e}")))?,
            )
        };

        let hops = hops::to_hops(&cfg, profile).await?;

        let prepared = Arc::new(Prepared {
            hops,
            local,
            remote,
            keep_alive: self.desc.keep_alive.unwrap_or(DEFAULT_KEEP_ALIVE),
        });
        *self.prepared.lock().expect("prepared lock poisoned") = Some(prepared.clone());
        Ok(prepared)
    }

    /// The connection phase: dial the chain, set up the listener, spawn
    /// the serving tasks. Runs on every open, including reconnects.
    async fn connect(&self, prepared: &Prepared) -> Result<Conn> {
        if prepared.hops.is_empty() {
            return Err(Error::profile("no connections specified"));
        }

        let mut clients: Vec<Arc<Client>> = Vec::with_capacity(prepared.hops.len());
        for hop in &prepared.hops {
            let next = match clients.last() {
                None => Client::connect(hop).await,
                Some(prev) => prev.connect_via(hop).await,
            };
            match next {
                Ok(client) => {
                    debug!("{}: connected to host {}", self.name(), client.remote_addr());
                    clients.push(Arc::new(client));
                }
                Err(e) => {
                    // Tear down the partial chain, outermost last.
                    for c in clients.iter().rev() {
                        c.disconnect().await;
                    }
                    return Err(Error::transport(format!("cannot make SSH client: {e}")));
                }
            }
        }

        let client = clients.last().expect("chain checked non-empty").clone();
        let acceptor = match self.make_acceptor(prepared, &client).await {
            Ok(a) => a,
            Err(e) => {
                for c in clients.iter().rev() {
                    c.disconnect().await;
                }
                return Err(Error::transport(format!("cannot listen: {e}")));
            }
        };
        debug!("{}: listening on {}", self.name(), acceptor.desc());

        let tasks = TaskTracker::new();
        let cancel = CancellationToken::new();

        // Inner-close propagation: when a wrapped client terminates, the
        // client it was tunneled through is shut down as well.
        for (outer, inner) in clients.iter().zip(clients.iter().skip(1)) {
            let outer = outer.clone();
            let inner_closed = inner.closed();
            tasks.spawn(async move {
                inner_closed.cancelled().await;
                outer.disconnect().await;
            });
        }

        self.spawn_forwarder(prepared, acceptor, &client, &tasks, &cancel);
        self.spawn_keep_alive(prepared.keep_alive, &client, &tasks, &cancel);

        Ok(Conn { clients, tasks, cancel })
    }

    async fn make_acceptor(&self, prepared: &Prepared, client: &Arc<Client>) -> Result<Acceptor> {
        if self.desc.mode.is_reverse() {
            let remote = prepared.remote.as_ref().expect("reverse modes parse a remote address");
            if remote.net == Net::Unix {
                return Err(Error::transport(
                    "remote unix listeners are not supported".to_string(),
                ));
            }
            let (host, port) = remote.host_port()?;
            let receiver = client.incoming().expect("incoming taken once per connection");
            let bound = client.request_remote_forward(&host, port).await?;
            debug!("{}: remote side bound port {bound}", self.name());
            Ok(Acceptor::Remote(receiver))
        } else {
            let local = prepared.local.as_ref().expect("forward modes parse a local address");
            Ok(Acceptor::Local(Listener::bind(local).await?))
        }
    }

    fn spawn_forwarder(
        &self,
        prepared: &Prepared,
        acceptor: Acceptor,
        client: &Arc<Client>,
        tasks: &TaskTracker,
        cancel: &CancellationToken,
    ) {
        let name = self.name().to_string();
        let dialer = if self.desc.mode.is_reverse() {
            Dialer::Direct
        } else {
            Dialer::Ssh(client.clone())
        };
        let sessions = tasks.clone();
        let cancel = cancel.clone();
        let client = client.clone();

        if self.desc.mode.is_socks() {
            tasks.spawn(forwarder::run_socks(name, acceptor, dialer, client, sessions, cancel));
        } else {
            // The dialed side is the remote address for Local mode and
            // the local address for Remote mode.
            let target = if self.desc.mode.is_reverse() {
                prepared.local.clone().expect("forward target parsed")
            } else {
                prepared.remote.clone().expect("forward target parsed")
            };
            tasks.spawn(forwarder::run_forward(
                name, acceptor, target, dialer, client, sessions, cancel,
            ));
        }
    }

    fn spawn_keep_alive(
        &self,
        interval: u64,
        client: &Arc<Client>,
        tasks: &TaskTracker,
        cancel: &CancellationToken,
    ) {
        let name = self.name().to_string();
        if interval == 0 {
            info!("{name}: disabling keep-alives since set to 0");
            return;
        }
        let client = client.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(Duration::from_secs(interval)) => {
                        if let Err(e) = client.send_keepalive().await {
                            error!("{name}: error sending keepalive: {e}");
                            // Closing the client triggers the reconnect path.
                            client.disconnect().await;
                            return;
                        }
                        debug!("{name}: sent keep-alive");
                    }
                }
            }
        });
    }

    /// Driver task: supervise the current connection, reconnect after
    /// disconnects, and settle into Closed.
    async fn run(self: Arc<Self>, prepared: Arc<Prepared>, mut conn: Conn) {
        loop {
            match self.supervise(conn).await {
                Exit::Stopped => break,
                Exit::Disconnected => match self.reconnect_loop(&prepared).await {
                    Ok(next) => {
                        conn = next;
                        continue;
                    }
                    Err(e) => {
                        error!("{}: could not re-connect: {e}", self.name());
                        break;
                    }
                },
            }
        }
        *self.status.write().expect("status lock poisoned") = Status::Closed;
        self.closed.cancel();
    }

    /// Wait for stop or a transport disconnect, then tear the connection
    /// down completely (clients, listener, in-flight sessions).
    async fn supervise(&self, conn: Conn) -> Exit {
        let disconnected = conn.client().closed();
        let exit = tokio::select! {
            _ = self.stop.cancelled() => {
                info!("{}: received stop signal", self.name());
                Exit::Stopped
            }
            _ = disconnected.cancelled() => {
                debug!("{}: server connection lost", self.name());
                Exit::Disconnected
            }
        };

        // Stop the accept loop and keep-alive, close the chain from the
        // inside out, then wait for every forwarded session to finish.
        conn.cancel.cancel();
        conn.client().disconnect().await;
        for c in conn.clients.iter().rev() {
            c.disconnect().await;
        }
        conn.tasks.close();
        conn.tasks.wait().await;
        exit
    }

    /// Bounded reconnect: an immediate first attempt, then exponential
    /// backoff up to a cap, all within a fixed window. Stop aborts.
    async fn reconnect_loop(&self, prepared: &Prepared) -> Result<Conn> {
        *self.status.write().expect("status lock poisoned") = Status::Reconn;

        let deadline = sleep(RECONNECT_TIMEOUT);
        tokio::pin!(deadline);
        let mut wait = FIRST_RECONNECT_WAIT;
        let mut next_wait = INIT_RECONNECT_WAIT;

        loop {
            tokio::select! {
                _ = &mut deadline => return Err(Error::runtime("re-connect timeout")),
                _ = self.stop.cancelled() => {
                    return Err(Error::runtime("re-connect interrupted by stop signal"))
                }
                _ = sleep(wait) => {
                    info!("{}: try re-connect...", self.name());
                    match self.connect(prepared).await {
                        Ok(conn) => {
                            self.mark_open();
                            return Ok(conn);
                        }
                        Err(e) => {
                            error!(
                                "{}: could not re-connect: {e}. Retrying in {:?}...",
                                self.name(),
                                next_wait
                            );
                            wait = next_wait;
                            next_wait = (next_wait * 2).min(MAX_RECONNECT_WAIT);
                        }
                    }
                }
            }
        }
    }

    fn mark_open(&self) {
        *self.status.write().expect("status lock poisoned") = Status::Open;
        *self.last_conn.write().expect("last_conn lock poisoned") = Some(Utc::now());
        info!("{}: opened tunnel", self.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(mode: Mode) -> Desc {
        Desc {
            name: "t".into(),
            local_address: "9000".into(),
            remote_address: "localhost:9001".into(),
            host: "example".into(),
            mode,
            keep_alive: Some(0),
            ..Default::default()
        }
    }

    #[test]
    fn test_close_on_closed_tunnel_errors() {
        let root = CancellationToken::new();
        let t = Tunnel::from_desc(desc(Mode::Local), &root);
        // Fresh tunnels are Closed until opened.
        assert!(t.close().is_err());
    }

    #[test]
    fn test_snapshot_carries_runtime_fields() {
        let root = CancellationToken::new();
        let t = Tunnel::from_desc(desc(Mode::Local), &root);
        *t.status.write().unwrap() = Status::Reconn;
        let now = Utc::now();
        *t.last_conn.write().unwrap() = Some(now);

        let snap = t.snapshot();
        assert_eq!(snap.status, Status::Reconn);
        assert_eq!(snap.last_conn, Some(now));
        assert_eq!(snap.name, "t");
    }

    #[test]
    fn test_stop_is_derived_from_root() {
        let root = CancellationToken::new();
        let t = Tunnel::from_desc(desc(Mode::Local), &root);
        assert!(!t.stop.is_cancelled());
        root.cancel();
        assert!(t.stop.is_cancelled());
    }

    #[test]
    fn test_closed_latch_observable_repeatedly() {
        let root = CancellationToken::new();
        let t = Tunnel::from_desc(desc(Mode::Local), &root);
        let a = t.closed();
        let b = t.closed();
        t.closed.cancel();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[test]
    fn test_backoff_progression_is_monotonic_and_capped() {
        let mut wait = FIRST_RECONNECT_WAIT;
        let mut next = INIT_RECONNECT_WAIT;
        let mut seen = vec![wait];
        for _ in 0..12 {
            wait = next;
            next = (next * 2).min(MAX_RECONNECT_WAIT);
            seen.push(wait);
        }
        for pair in seen.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert_eq!(*seen.last().unwrap(), MAX_RECONNECT_WAIT);
    }

    #[tokio::test]
    async fn test_prepare_rejects_bad_remote_spec() {
        // In Local mode the remote side must be a full address; the bare
        // port short form is only allowed on the side that opens the port.
        let root = CancellationToken::new();
        let mut d = desc(Mode::Local);
        d.remote_address = "9001".into();
        d.host = "127.0.0.1".into();
        let t = Arc::new(Tunnel::from_desc(d, &root));
        let err = t.prepare().await.unwrap_err();
        assert!(err.to_string().contains("remote address"));
    }
}
