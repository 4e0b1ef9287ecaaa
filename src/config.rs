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

//! The boring configuration file (TOML).
//!
//! Tunnels are declared once here; the CLI resolves names against this
//! file and the daemon receives fully-described tunnels over IPC, so the
//! daemon itself never reads the file.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::paths::expand_tilde;
use crate::tunnel::{Desc, Mode};

/// Seconds between liveness probes when a tunnel does not override it.
pub const DEFAULT_KEEP_ALIVE: u64 = 120;

const FILE_NAME: &str = ".boring.toml";

/// Placeholder shown for the side a SOCKS tunnel does not use.
pub const SOCKS_PLACEHOLDER: &str = "[SOCKS]";

const DEFAULT_TEMPLATE: &str = r#"# boring config file
# An example (local) tunnel is defined below.
# For more examples, please visit the project's GitHub page.
# All lines starting with '#' are comments.

#[[tunnels]]
#name = "dev"  # Name for the tunnel
#local = "localhost:9000"  # Local address to listen on
#remote = "localhost:9000"  # Remote address to forward to
#host = "dev-server"  # Hostname of the server, tries to match against ssh config
#port = 22  # (Optional) Server port, defaults to 22
#user = "joe"  # (Optional) Username, tries ssh config and defaults to $USER
#identity = "~/.ssh/id_dev"  # (Optional) Key file, tries ssh config and defaults to default keys

"#;

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    keep_alive: Option<u64>,
    #[serde(default)]
    tunnels: Vec<Desc>,
}

/// Parsed and validated configuration.
#[derive(Debug, Default)]
pub struct Config {
    pub tunnels: Vec<Desc>,
    /// Name-indexed view of `tunnels`; validation guarantees uniqueness.
    pub tunnels_map: HashMap<String, Desc>,
}

/// Configuration file location, in order: `BORING_CONFIG`, the XDG config
/// dir on Linux, `~/.boring.toml` elsewhere.
pub fn file_path() -> PathBuf {
    if let Some(p) = std::env::var_os("BORING_CONFIG") {
        if !p.is_empty() {
            return PathBuf::from(p);
        }
    }
    if cfg!(target_os = "linux") {
        let base = match std::env::var_os("XDG_CONFIG_HOME") {
            Some(x) if !x.is_empty() => PathBuf::from(x),
            _ => expand_tilde("~/.config"),
        };
        return base.join("boring").join(FILE_NAME);
    }
    expand_tilde("~").join(FILE_NAME)
}

impl Config {
    /// Load and validate the configuration from the discovered path.
    pub fn load() -> Result<Self> {
        Self::load_from(&file_path())
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse and validate configuration content.
    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content).context("could not parse config file")?;
        let keep_alive = raw.keep_alive.unwrap_or(DEFAULT_KEEP_ALIVE);

        let mut tunnels = raw.tunnels;
        let mut tunnels_map = HashMap::with_capacity(tunnels.len());

        for t in &mut tunnels {
            validate_name(&t.name)?;
            if t.keep_alive.is_none() {
                t.keep_alive = Some(keep_alive);
            }
            // SOCKS tunnels have no counterpart side; show a placeholder
            // instead of whatever the user left in the file.
            match t.mode {
                Mode::Socks => t.remote_address = SOCKS_PLACEHOLDER.into(),
                Mode::RemoteSocks => t.local_address = SOCKS_PLACEHOLDER.into(),
                _ => {}
            }
            if tunnels_map.insert(t.name.clone(), t.clone()).is_some() {
                bail!("found duplicated tunnel name '{}'", t.name);
            }
        }

        Ok(Self { tunnels, tunnels_map })
    }

    /// Create the config file with a commented template if it is missing.
    pub fn ensure() -> Result<()> {
        let path = file_path();
        if path.exists() {
            return Ok(());
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("could not create {}", dir.display()))?;
        }
        std::fs::write(&path, DEFAULT_TEMPLATE)
            .with_context(|| format!("could not write {}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
        }
        info!("Hi! Created boring config file: {}", path.display());
        Ok(())
    }
}

/// A valid tunnel name is non-empty, has no spaces, starts with an
/// alphanumeric character, and contains no glob metacharacters. Names are
/// both registry keys and CLI glob inputs, hence the restrictions.
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.contains(' ')
        && name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && !name.contains(['*', '?', '[']);
    if !valid {
        bail!(
            "tunnel names cannot be empty, contain spaces, start with a special \
             character, or contain any of '*', '?', '['; got '{name}'"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_applies_keep_alive_default() {
        let conf = Config::parse(
            r#"
            [[tunnels]]
            name = "a"
            local = 9000
            remote = 9001
            host = "h"

            [[tunnels]]
            name = "b"
            local = 9002
            remote = 9003
            host = "h"
            keep_alive = 1
            "#,
        )
        .unwrap();
        assert_eq!(conf.tunnels[0].keep_alive, Some(DEFAULT_KEEP_ALIVE));
        assert_eq!(conf.tunnels[1].keep_alive, Some(1));
    }

    #[test]
    fn test_parse_global_keep_alive_override() {
        let conf = Config::parse(
            r#"
            keep_alive = 30

            [[tunnels]]
            name = "a"
            local = 9000
            remote = 9001
            host = "h"
            "#,
        )
        .unwrap();
        assert_eq!(conf.tunnels[0].keep_alive, Some(30));
    }

    #[test]
    fn test_socks_placeholder_substitution() {
        let conf = Config::parse(
            r#"
            [[tunnels]]
            name = "s"
            local = 1080
            remote = "ignored:1"
            host = "h"
            mode = "socks"

            [[tunnels]]
            name = "rs"
            local = "ignored:1"
            remote = 1080
            host = "h"
            mode = "socks-remote"
            "#,
        )
        .unwrap();
        assert_eq!(conf.tunnels_map["s"].remote_address.as_str(), SOCKS_PLACEHOLDER);
        assert_eq!(conf.tunnels_map["rs"].local_address.as_str(), SOCKS_PLACEHOLDER);
        // the used side is untouched
        assert_eq!(conf.tunnels_map["s"].local_address.as_str(), "1080");
    }

    #[test]
    fn test_invalid_names_rejected() {
        for name in ["", "has space", "-dash", "glob*", "what?", "set["] {
            let content = format!(
                "[[tunnels]]\nname = \"{name}\"\nlocal = 1\nremote = 2\nhost = \"h\"\n"
            );
            let err = Config::parse(&content).unwrap_err();
            assert!(
                err.to_string().starts_with("tunnel names cannot be empty, "),
                "unexpected error for {name:?}: {err}"
            );
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = Config::parse(
            r#"
            [[tunnels]]
            name = "a"
            local = 1
            remote = 2
            host = "h"

            [[tunnels]]
            name = "a"
            local = 3
            remote = 4
            host = "h"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("found duplicated tunnel name 'a'"));
    }

    #[test]
    fn test_names_may_start_alphanumeric() {
        let conf = Config::parse(
            "[[tunnels]]\nname = \"9lives\"\nlocal = 1\nremote = 2\nhost = \"h\"\n",
        )
        .unwrap();
        assert!(conf.tunnels_map.contains_key("9lives"));
    }
}
