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

//! Front-end operations: load the config, make sure the daemon runs,
//! fan commands out over glob-matched tunnel names.

use std::collections::HashMap;
use std::io::IsTerminal;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use glob::Pattern;
use owo_colors::OwoColorize;
use tokio::task::JoinSet;
use tracing::warn;

use crate::buildinfo;
use crate::config::{self, Config};
use crate::daemon::control;
use crate::ipc::{Cmd, CmdKind, Resp};
use crate::table::Table;
use crate::tunnel::{Desc, Status};

/// End-to-end budget for the bootstrap stage (config load + daemon
/// ensure); actual tunnel opens are bounded by the SSH timeout instead.
const DAEMON_TIMEOUT: Duration = Duration::from_secs(2);

fn interactive() -> bool {
    std::io::stdout().is_terminal()
        || std::env::var_os("BORING_FORCE_INTERACTIVE").map(|v| !v.is_empty()).unwrap_or(false)
}

/// Load the configuration and make sure the daemon is running, both
/// concurrently under the bootstrap deadline.
async fn prepare() -> Result<Config> {
    let load = tokio::task::spawn_blocking(|| -> Result<Config> {
        if interactive() {
            Config::ensure().context("could not create config file")?;
        }
        match Config::load() {
            Ok(conf) => Ok(conf),
            Err(e) => {
                // A missing file outside interactive use is an empty
                // config, not an error.
                let missing = e
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound);
                if missing && !interactive() {
                    Ok(Config::default())
                } else {
                    Err(e.context("could not load config"))
                }
            }
        }
    });

    let ensure = async {
        tokio::time::timeout(DAEMON_TIMEOUT, control::ensure())
            .await
            .map_err(|_| anyhow!("timed out"))?
            .map_err(|e| anyhow!(e))
    };

    let (conf, ensured) = tokio::join!(load, ensure);
    ensured.context("could not start daemon")?;
    conf.expect("config load task panicked")
}

/// Shared driver for `open` and `close`.
pub async fn control_tunnels(patterns: Vec<String>, all: bool, kind: CmdKind) -> Result<()> {
    if all && !patterns.is_empty() {
        bail!("'--all' does not take any additional arguments.");
    }
    let mut patterns = if all { vec!["*".to_string()] } else { patterns };
    if patterns.is_empty() {
        let verb = if kind == CmdKind::Open { "open" } else { "close" };
        bail!("'{verb}' requires at least one 'name' argument.");
    }
    patterns.sort();
    patterns.dedup();

    let conf = prepare().await?;

    // Opens operate on configured tunnels; closes on running ones.
    let tunnels: HashMap<String, Desc> = if kind == CmdKind::Close {
        running_tunnels().await.context("Could not get running tunnels")?
    } else {
        conf.tunnels_map.clone()
    };

    let mut keep: HashMap<String, Desc> = HashMap::new();
    let mut not_matched = Vec::new();
    for pat in &patterns {
        let compiled =
            Pattern::new(pat).map_err(|_| anyhow!("Malformed glob pattern '{pat}'."))?;
        let mut n = 0;
        for (name, desc) in &tunnels {
            if compiled.matches(name) {
                keep.entry(name.clone()).or_insert_with(|| desc.clone());
                n += 1;
            }
        }
        if n == 0 {
            not_matched.push(pat.clone());
        }
    }

    let kind_word = if kind == CmdKind::Close { "running " } else { "" };
    if keep.is_empty() {
        if patterns.len() > 1 {
            bail!("No {kind_word}tunnels match any provided pattern.");
        }
        bail!("No {kind_word}tunnels match pattern '{}'.", patterns[0]);
    }
    for pat in not_matched {
        warn!("No {kind_word}tunnels match pattern '{pat}'.");
    }

    let mut ops = JoinSet::new();
    for (_, desc) in keep {
        ops.spawn(async move {
            match kind {
                CmdKind::Open => open_tunnel(desc).await,
                CmdKind::Close => close_tunnel(&desc.name).await,
                other => panic!("unknown command kind: {other}"),
            }
        });
    }

    let mut failed = false;
    while let Some(res) = ops.join_next().await {
        failed |= !res.expect("tunnel op task panicked");
    }
    if failed {
        // Details were already printed per operation.
        bail!("operation failed");
    }
    Ok(())
}

async fn open_tunnel(desc: Desc) -> bool {
    let resp = match transmit(Cmd::with_tunnel(CmdKind::Open, desc.clone())).await {
        Ok(resp) => resp,
        Err(e) => {
            eprintln!("Could not transmit 'open' command: {e}");
            return false;
        }
    };

    if !resp.success {
        let err = resp.error.unwrap_or_default();
        // The error crosses IPC as a string, so match on the message.
        if err.ends_with("already running") {
            println!("Tunnel '{}' is already running.", desc.name);
            return true;
        }
        eprintln!("Could not open tunnel '{}': {err}", desc.name);
        return false;
    }

    println!(
        "Opened tunnel '{}': {} {} {} via {}.",
        desc.name.green().bold(),
        desc.local_address,
        desc.mode,
        desc.remote_address,
        desc.host
    );
    true
}

async fn close_tunnel(name: &str) -> bool {
    // The daemon only needs the name for closing.
    let resp = match transmit(Cmd::with_tunnel(CmdKind::Close, Desc::named(name))).await {
        Ok(resp) => resp,
        Err(e) => {
            eprintln!("Could not transmit 'close' command: {e}");
            return false;
        }
    };

    if !resp.success {
        eprintln!(
            "Tunnel '{name}' could not be closed: {}",
            resp.error.unwrap_or_default()
        );
        return false;
    }
    println!("Closed tunnel '{}'.", name.green().bold());
    true
}

async fn running_tunnels() -> Result<HashMap<String, Desc>> {
    let resp = transmit(Cmd::new(CmdKind::List)).await?;
    if !resp.success {
        bail!("{}", resp.error.unwrap_or_default());
    }
    Ok(resp.tunnels.unwrap_or_default())
}

async fn transmit(cmd: Cmd) -> Result<Resp> {
    control::send_cmd(cmd).await.map_err(|e| anyhow!(e))
}

/// `boring list`: configured tunnels with live status, then running
/// tunnels that are no longer configured.
pub async fn list_tunnels() -> Result<()> {
    let conf = prepare().await?;
    let running = running_tunnels().await.context("Could not list tunnels")?;

    if running.is_empty() && conf.tunnels.is_empty() {
        println!("No tunnels configured.");
        return Ok(());
    }

    let mut table = Table::new(vec!["Status", "Name", "Local", "", "Remote", "Via"]);
    let mut visited = HashMap::new();

    for t in &conf.tunnels {
        let row = running.get(&t.name).unwrap_or(t);
        let status = if running.contains_key(&t.name) { row.status } else { Status::Closed };
        visited.insert(t.name.clone(), true);
        add_row(&mut table, row, status);
    }
    for (name, t) in &running {
        if !visited.contains_key(name) {
            add_row(&mut table, t, t.status);
        }
    }

    println!("{table}");
    Ok(())
}

fn add_row(table: &mut Table, desc: &Desc, status: Status) {
    table.add_row(vec![
        status.colored(),
        desc.name.clone(),
        desc.local_address.to_string(),
        desc.mode.to_string(),
        desc.remote_address.to_string(),
        desc.host.clone(),
    ]);
}

/// `boring edit`: open the config file in `$EDITOR`.
pub fn edit_config() -> Result<()> {
    Config::ensure().context("could not create config file")?;

    let editor = std::env::var("EDITOR").ok().filter(|e| !e.is_empty());
    let editor = editor.as_deref().unwrap_or("vi");

    let status = std::process::Command::new(editor)
        .arg(config::file_path())
        .status()
        .with_context(|| format!("Editor: could not run {editor}"))?;
    if !status.success() {
        bail!("Editor: exited with {status}");
    }
    Ok(())
}

/// `boring version`.
pub fn version() {
    println!("{}", buildinfo::version_line());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bracket_glob_is_malformed() {
        // `open [` must die with "Malformed glob pattern"; the pattern
        // library is what decides malformedness.
        assert!(Pattern::new("[").is_err());
        assert!(Pattern::new("test*").is_ok());
    }

    #[tokio::test]
    async fn test_all_with_extra_args_fails_fast() {
        let err = control_tunnels(vec!["extra".into()], true, CmdKind::Close)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "'--all' does not take any additional arguments.");
    }

    #[tokio::test]
    async fn test_missing_names_fail_fast() {
        let err = control_tunnels(Vec::new(), false, CmdKind::Open).await.unwrap_err();
        assert!(err.to_string().contains("requires at least one 'name'"));
    }
}
