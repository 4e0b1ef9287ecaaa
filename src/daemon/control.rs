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

//! Daemon bootstrap from the CLI side: probe the socket, check build
//! compatibility, restart incompatible daemons, and spawn one when none
//! is running.

use std::time::Duration;

use owo_colors::OwoColorize;
use tokio::net::UnixStream;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::buildinfo;
use crate::daemon::{socket_path, FLAG};
use crate::error::{Error, Result};
use crate::ipc::{self, Cmd, CmdKind, Resp};

const INIT_PROBE_WAIT: Duration = Duration::from_millis(4);
const INIT_KILL_WAIT: Duration = Duration::from_millis(20);

fn no_spawn() -> bool {
    std::env::var_os("BORING_NO_SPAWN").map(|v| !v.is_empty()).unwrap_or(false)
}

/// Connect to the daemon socket.
pub async fn connect() -> Result<UnixStream> {
    UnixStream::connect(socket_path())
        .await
        .map_err(|e| Error::Ipc(format!("could not connect to daemon: {e}")))
}

/// Send one command and read the response on a fresh connection.
pub async fn send_cmd(cmd: Cmd) -> Result<Resp> {
    let mut stream = connect().await?;
    ipc::write(&cmd, &mut stream)
        .await
        .map_err(|e| Error::Ipc(format!("could not send command: {e}")))?;
    ipc::read(&mut stream)
        .await
        .map_err(|e| Error::Ipc(format!("could not receive response: {e}")))
}

/// Make sure a compatible daemon is serving the socket, launching or
/// restarting one if needed. The caller bounds the overall time.
pub async fn ensure() -> Result<()> {
    let mut launching = false;
    let mut wait = Duration::ZERO;
    let mut next_wait = INIT_PROBE_WAIT;

    loop {
        sleep(wait).await;
        match probe().await {
            Ok(()) => return Ok(()),
            Err(Error::Compat { daemon, cli }) => {
                let build = if daemon.is_empty() {
                    "unknown daemon build".to_string()
                } else {
                    format!("daemon build {}", format!("#{daemon}").yellow())
                };
                info!(
                    "Detected {build} (CLI: {}), restarting daemon...",
                    format!("#{cli}").green()
                );
                if let Err(e) = kill_daemon().await {
                    return Err(Error::Ipc(format!(
                        "could not kill old daemon: {e}. Please kill the old daemon \
                         process manually. This will be automatic from now on."
                    )));
                }
                // Fall through: the daemon is now gone and gets
                // relaunched below.
            }
            Err(e) => debug!("daemon probe failed: {e}"),
        }

        if no_spawn() {
            return Err(Error::transport("not running and BORING_NO_SPAWN is set"));
        }
        if !launching {
            launch()?;
            launching = true;
        }
        wait = next_wait;
        next_wait *= 2;
    }
}

/// Probe the daemon with a `Nop` and verify the build commit. A CLI
/// built without a commit accepts any daemon.
async fn probe() -> Result<()> {
    let resp = send_cmd(Cmd::new(CmdKind::Nop)).await?;
    let cli = buildinfo::commit();
    if cli.is_empty() {
        return Ok(());
    }
    let daemon = resp.info.map(|i| i.commit).unwrap_or_default();
    if daemon != cli {
        return Err(Error::Compat { daemon, cli });
    }
    Ok(())
}

/// Shut the daemon down and wait until its socket becomes bindable.
async fn kill_daemon() -> Result<()> {
    let resp = send_cmd(Cmd::new(CmdKind::Shutdown))
        .await
        .map_err(|e| Error::Ipc(format!("could not send shutdown command: {e}")))?;
    if !resp.success {
        return Err(Error::Ipc(format!(
            "daemon error: {}",
            resp.error.unwrap_or_default()
        )));
    }

    let mut wait = INIT_KILL_WAIT;
    loop {
        sleep(wait).await;
        if let Ok(probe) = std::os::unix::net::UnixListener::bind(socket_path()) {
            // We could bind, so the old daemon is gone; release the
            // socket again for the relaunch.
            drop(probe);
            let _ = std::fs::remove_file(socket_path());
            return Ok(());
        }
        wait *= 2;
    }
}

/// Start a daemon process, detached into its own session.
fn launch() -> Result<()> {
    let exe = std::env::current_exe()
        .map_err(|e| Error::transport(format!("could not determine executable path: {e}")))?;

    let mut cmd = std::process::Command::new(exe);
    cmd.arg(FLAG)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    #[cfg(unix)]
    unsafe {
        use std::os::unix::process::CommandExt;
        cmd.pre_exec(|| {
            nix::unistd::setsid().map_err(std::io::Error::from)?;
            Ok(())
        });
    }
    let child = cmd
        .spawn()
        .map_err(|e| Error::transport(format!("launch daemon: {e}")))?;
    debug!("Daemon started with PID {}", child.id());
    Ok(())
}
