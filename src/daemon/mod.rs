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

//! The boring daemon: owns the tunnel registry, serves one IPC command
//! per connection, and drains every tunnel on shutdown.

pub mod control;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::buildinfo;
use crate::error::Error;
use crate::ipc::{self, Cmd, CmdKind, Info, Resp};
use crate::logging;
use crate::tunnel::{Desc, Tunnel};

/// CLI flag that switches the binary into daemon mode.
pub const FLAG: &str = "--daemon";

const SOCK_NAME: &str = "boringd.sock";
const LOG_FILE_NAME: &str = "boringd.log";

/// IPC socket location (`BORING_SOCK` or the temp dir).
pub fn socket_path() -> PathBuf {
    match std::env::var_os("BORING_SOCK") {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => std::env::temp_dir().join(SOCK_NAME),
    }
}

/// Daemon log file location (`BORING_LOG_FILE` or the temp dir).
pub fn log_path() -> PathBuf {
    match std::env::var_os("BORING_LOG_FILE") {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => std::env::temp_dir().join(LOG_FILE_NAME),
    }
}

type Registry = Arc<RwLock<HashMap<String, Arc<Tunnel>>>>;

struct Daemon {
    tunnels: Registry,
    root: CancellationToken,
}

/// Daemon entry point; returns only after a complete drain.
pub async fn run() {
    if let Err(e) = logging::init_daemon(&log_path()) {
        eprintln!("Failed to open log file: {e}");
        std::process::exit(1);
    }
    info!("Daemon starting");

    let listener = match listen() {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to setup listener: {e}");
            std::process::exit(1);
        }
    };
    info!("Listening on {}", socket_path().display());

    let daemon = Arc::new(Daemon {
        tunnels: Arc::new(RwLock::new(HashMap::new())),
        root: CancellationToken::new(),
    });

    spawn_signal_watcher(daemon.root.clone());

    let connections = TaskTracker::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let daemon = daemon.clone();
                    connections.spawn(async move { daemon.handle_conn(stream).await });
                }
                Err(e) => {
                    if daemon.root.is_cancelled() {
                        break;
                    }
                    error!("Failed to accept connection: {e}");
                }
            },
            _ = daemon.root.cancelled() => break,
        }
    }

    info!("Cleaning up...");
    drop(listener);
    let _ = std::fs::remove_file(socket_path());

    connections.close();
    connections.wait().await;

    // Drain: stop every tunnel, then wait for each terminal state.
    let tunnels: Vec<Arc<Tunnel>> =
        daemon.tunnels.read().await.values().cloned().collect();
    for t in &tunnels {
        let _ = t.close();
    }
    for t in &tunnels {
        t.closed().cancelled().await;
    }
    info!("Done.");
}

/// Bind the IPC socket. If the path is taken by a socket nobody answers
/// on, remove it and retry once; that is the only stale-socket recovery.
fn listen() -> std::io::Result<UnixListener> {
    let path = socket_path();
    match UnixListener::bind(&path) {
        Ok(l) => Ok(l),
        Err(bind_err) => {
            if path.exists() && std::os::unix::net::UnixStream::connect(&path).is_err() {
                warn!("Found unresponsive socket, deleting...");
                let _ = std::fs::remove_file(&path);
                return UnixListener::bind(&path);
            }
            Err(bind_err)
        }
    }
}

fn spawn_signal_watcher(root: CancellationToken) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("could not install SIGTERM handler: {e}");
                return;
            }
        };
        let mut int = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                error!("could not install SIGINT handler: {e}");
                return;
            }
        };
        tokio::select! {
            _ = term.recv() => info!("Received signal: SIGTERM"),
            _ = int.recv() => info!("Received signal: SIGINT"),
        }
        root.cancel();
    });
}

impl Daemon {
    /// Serve one connection: one command record, one response record.
    async fn handle_conn(self: Arc<Self>, mut stream: UnixStream) {
        let cmd: Cmd = tokio::select! {
            read = ipc::read(&mut stream) => match read {
                Ok(cmd) => cmd,
                Err(e) => {
                    // Clients probing the socket may hang up without
                    // sending anything.
                    if !ipc::is_peer_closed(&e) {
                        error!("Could not receive command: {e}");
                    }
                    return;
                }
            },
            _ = self.root.cancelled() => return,
        };
        debug!("Received command {}", cmd.kind);

        let resp = match cmd.kind {
            CmdKind::Nop => ok_resp(),
            CmdKind::Open => match cmd.tunnel {
                Some(desc) => self.open_tunnel(desc).await,
                None => err_resp("open command carries no tunnel"),
            },
            CmdKind::Close => match cmd.tunnel {
                Some(desc) => self.close_tunnel(&desc).await,
                None => err_resp("close command carries no tunnel"),
            },
            CmdKind::List => self.list_tunnels().await,
            CmdKind::Shutdown => {
                info!("Shutdown command received.");
                // Acknowledge before tearing the accept loop down.
                if let Err(e) = ipc::write(&ok_resp(), &mut stream).await {
                    error!("could not send response: {e}");
                }
                self.root.cancel();
                return;
            }
        };

        let write = tokio::select! {
            w = ipc::write(&resp, &mut stream) => w,
            _ = self.root.cancelled() => return,
        };
        if let Err(e) = write {
            error!("could not send response: {e}");
        }
    }

    async fn open_tunnel(&self, desc: Desc) -> Resp {
        let name = desc.name.clone();
        {
            let tunnels = self.tunnels.read().await;
            if tunnels.contains_key(&name) {
                error!("{name}: could not open: {}", Error::AlreadyRunning);
                return err_resp(&Error::AlreadyRunning.to_string());
            }
        }

        let tunnel = Arc::new(Tunnel::from_desc(desc, &self.root));
        if let Err(e) = tunnel.clone().open().await {
            error!("{name}: could not open: {e}");
            return err_resp(&e.to_string());
        }

        {
            let mut tunnels = self.tunnels.write().await;
            if tunnels.contains_key(&name) {
                // A concurrent open won the race; shut ours down again.
                let _ = tunnel.close();
                error!("{name}: could not open: {}", Error::AlreadyRunning);
                return err_resp(&Error::AlreadyRunning.to_string());
            }
            tunnels.insert(name.clone(), tunnel.clone());
        }

        // The registry entry lives exactly as long as the tunnel.
        let registry = self.tunnels.clone();
        tokio::spawn(async move {
            tunnel.closed().cancelled().await;
            registry.write().await.remove(tunnel.name());
            info!("Closed tunnel {}", tunnel.name());
        });

        ok_resp()
    }

    async fn close_tunnel(&self, desc: &Desc) -> Resp {
        let tunnel = { self.tunnels.read().await.get(&desc.name).cloned() };
        let Some(tunnel) = tunnel else {
            let e = Error::NotRunning;
            error!("{}: could not close tunnel: {e}", desc.name);
            return err_resp(&e.to_string());
        };

        if let Err(e) = tunnel.close() {
            error!("{}: could not close tunnel: {e}", desc.name);
            return err_resp(&e.to_string());
        }
        tunnel.closed().cancelled().await;
        ok_resp()
    }

    async fn list_tunnels(&self) -> Resp {
        let tunnels = self.tunnels.read().await;
        let snapshot: HashMap<String, Desc> =
            tunnels.iter().map(|(n, t)| (n.clone(), t.snapshot())).collect();
        Resp { tunnels: Some(snapshot), ..ok_resp() }
    }
}

fn ok_resp() -> Resp {
    Resp {
        success: true,
        error: None,
        tunnels: None,
        info: Some(Info { commit: buildinfo::commit() }),
    }
}

fn err_resp(msg: &str) -> Resp {
    Resp { success: false, error: Some(msg.to_string()), ..ok_resp() }
}
