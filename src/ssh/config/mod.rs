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

//! Layered ssh_config lookup: user config, then system config, then
//! built-in defaults.
//!
//! The user config is re-read on every tunnel opening so edits take
//! effect without restarting the daemon; its parse errors surface
//! eagerly. A system config that fails to parse is treated as absent,
//! which keeps hosts with exotic `/etc/ssh/ssh_config` files working.

mod algorithms;
mod parser;
pub(crate) mod pattern;
pub(super) mod tokens;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::paths::expand_tilde;
use parser::HostBlock;

const SYSTEM_CONFIG_PATH: &str = "/etc/ssh/ssh_config";

/// User ssh_config location, overridable for tests and sandboxes.
pub fn user_config_path() -> PathBuf {
    if let Some(p) = std::env::var_os("BORING_SSH_CONFIG") {
        if !p.is_empty() {
            return PathBuf::from(p);
        }
    }
    expand_tilde("~/.ssh/config")
}

/// Parsed view over both config layers.
#[derive(Debug, Default)]
pub struct SshConfig {
    user: Option<Vec<HostBlock>>,
    system: Option<Vec<HostBlock>>,
}

impl SshConfig {
    /// Load both layers. A missing user config is fine; a malformed one
    /// is an error. The system config never fails the load.
    pub fn load() -> Result<Self> {
        let user = match std::fs::read_to_string(user_config_path()) {
            Ok(content) => Some(
                parser::parse(&content)
                    .with_context(|| format!("could not parse {}", user_config_path().display()))?,
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("could not read {}", user_config_path().display()))
            }
        };

        let system = match std::fs::read_to_string(SYSTEM_CONFIG_PATH) {
            Ok(content) => match parser::parse(&content) {
                Ok(blocks) => Some(blocks),
                Err(e) => {
                    debug!("ignoring system ssh config: {e}");
                    None
                }
            },
            Err(_) => None,
        };

        Ok(Self { user, system })
    }

    #[cfg(test)]
    pub fn from_strings(user: Option<&str>, system: Option<&str>) -> Result<Self> {
        Ok(Self {
            user: user.map(parser::parse).transpose()?,
            system: system.map(parser::parse).transpose()?,
        })
    }

    /// Effective single value of `key` for `alias`: the first value from
    /// a matching block of the user config, else the system config, else
    /// the built-in default. Algorithm-list operators are applied against
    /// the defaults.
    pub fn get(&self, alias: &str, key: &str) -> String {
        let lookup = |blocks: &Option<Vec<HostBlock>>| find_first(blocks, alias, key);

        let val = lookup(&self.user)
            .or_else(|| lookup(&self.system))
            .unwrap_or_else(|| algorithms::default(key).to_string());

        if algorithms::ALGO_KEYS.contains(&key) {
            algorithms::apply_operators(&val, key)
        } else {
            val
        }
    }

    /// All values of `key` for `alias` from the first layer that has any;
    /// the built-in default (if one exists) as a single entry otherwise.
    pub fn get_all(&self, alias: &str, key: &str) -> Vec<String> {
        let vals = find_all(&self.user, alias, key);
        if !vals.is_empty() {
            return vals;
        }
        let vals = find_all(&self.system, alias, key);
        if !vals.is_empty() {
            return vals;
        }
        let def = algorithms::default(key);
        if def.is_empty() {
            Vec::new()
        } else {
            vec![def.to_string()]
        }
    }
}

fn find_first(blocks: &Option<Vec<HostBlock>>, alias: &str, key: &str) -> Option<String> {
    let blocks = blocks.as_ref()?;
    let key = key.to_ascii_lowercase();
    for block in blocks {
        if !pattern::matches_patterns(alias, &block.patterns) {
            continue;
        }
        for (k, v) in &block.options {
            if *k == key {
                return Some(v.clone());
            }
        }
    }
    None
}

fn find_all(blocks: &Option<Vec<HostBlock>>, alias: &str, key: &str) -> Vec<String> {
    let Some(blocks) = blocks.as_ref() else { return Vec::new() };
    let key = key.to_ascii_lowercase();
    let mut out = Vec::new();
    for block in blocks {
        if !pattern::matches_patterns(alias, &block.patterns) {
            continue;
        }
        for (k, v) in &block.options {
            if *k == key {
                out.push(v.clone());
            }
        }
    }
    out
}
