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

//! Effective connection profile for one host alias, resolved from the
//! layered ssh_config.

use tracing::warn;

use crate::error::{Error, Result};
use crate::ssh::config::tokens::{
    local_username, Subst, HOSTNAME_TOKENS, IDENT_FILE_TOKENS, PROXY_TOKENS,
};
use crate::ssh::config::SshConfig;

/// Host key checking policy resolved from `StrictHostKeyChecking`.
///
/// `yes` and `ask` are both strict: boring never prompts. `accept-new`
/// is currently treated as strict too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyCheck {
    #[default]
    Strict,
    Off,
}

/// One `ProxyJump` entry: `[user@]host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpSpec {
    pub host: String,
    pub user: String,
    pub port: u16,
}

pub(crate) fn parse_proxy_jump(s: &str) -> Result<JumpSpec> {
    let (head, port_str) = match s.split_once(':') {
        Some((h, p)) => (h, Some(p)),
        None => (s, None),
    };
    let port = match port_str {
        Some(p) => p
            .parse::<u16>()
            .map_err(|e| Error::profile(format!("could not parse jump host port: {e}")))?,
        None => 0,
    };
    let (user, host) = match head.split_once('@') {
        Some((u, h)) => (u.to_string(), h.to_string()),
        None => (String::new(), head.to_string()),
    };
    Ok(JumpSpec { host, user, port })
}

/// The resolved profile for an alias. Empty strings and a zero port mean
/// "unset"; [`HostProfile::validate`] enforces completeness before a hop
/// is built from it.
#[derive(Debug, Clone, Default)]
pub struct HostProfile {
    pub alias: String,
    pub host_name: String,
    pub user: String,
    pub port: u16,
    pub key_check: KeyCheck,
    pub identity_files: Vec<String>,
    pub certificate_files: Vec<String>,
    pub identities_only: bool,
    pub known_hosts_files: Vec<String>,
    pub ciphers: Vec<String>,
    pub macs: Vec<String>,
    pub host_key_algos: Vec<String>,
    pub kex_algos: Vec<String>,
    pub jumps: Vec<JumpSpec>,
}

impl HostProfile {
    /// Resolve the profile for `alias` against the layered config,
    /// applying token substitution in the order ssh(1) makes values
    /// available.
    pub fn resolve(cfg: &SshConfig, alias: &str) -> Result<Self> {
        let mut p = Self { alias: alias.to_string(), ..Default::default() };
        let mut sub = Subst::new(alias);

        p.host_name = sub.apply(&cfg.get(alias, "HostName"), HOSTNAME_TOKENS);
        if !p.host_name.is_empty() {
            sub.set("%h", p.host_name.clone());
        }

        p.user = cfg.get(alias, "User");
        sub.set("%r", p.user.clone());
        p.port = cfg.get(alias, "Port").parse().unwrap_or(0);
        sub.set("%p", p.port.to_string());

        let strict = cfg.get(alias, "StrictHostKeyChecking");
        p.key_check = match strict.as_str() {
            "no" | "off" => KeyCheck::Off,
            "yes" | "ask" => KeyCheck::Strict,
            "accept-new" => {
                warn!("StrictHostKeyChecking 'accept-new' not supported, using 'yes'");
                KeyCheck::Strict
            }
            other => {
                return Err(Error::profile(format!(
                    "unsupported StrictHostKeyChecking option '{other}'"
                )))
            }
        };

        p.ciphers = split_list(&cfg.get(alias, "Ciphers"));
        p.macs = split_list(&cfg.get(alias, "MACs"));
        p.host_key_algos = split_list(&cfg.get(alias, "HostKeyAlgorithms"));
        p.kex_algos = split_list(&cfg.get(alias, "KexAlgorithms"));

        let pj = sub.apply(&cfg.get(alias, "ProxyJump"), PROXY_TOKENS);
        if !pj.is_empty() {
            for item in pj.split(',') {
                let jump = parse_proxy_jump(item.trim())
                    .map_err(|e| Error::profile(format!("could not parse jump host: {e}")))?;
                p.jumps.push(jump);
            }
        }
        if let Some(first) = p.jumps.first() {
            sub.set("%j", first.host.clone());
        }

        p.identity_files =
            sub.apply_all(&cfg.get_all(alias, "IdentityFile"), IDENT_FILE_TOKENS);
        p.certificate_files =
            sub.apply_all(&cfg.get_all(alias, "CertificateFile"), IDENT_FILE_TOKENS);
        p.identities_only = cfg.get(alias, "IdentitiesOnly").eq_ignore_ascii_case("yes");

        // Known-hosts options may hold several space-separated files in a
        // single value.
        let mut hosts = cfg.get_all(alias, "GlobalKnownHostsFile");
        hosts.extend(sub.apply_all(&cfg.get_all(alias, "UserKnownHostsFile"), IDENT_FILE_TOKENS));
        for h in hosts {
            p.known_hosts_files.extend(h.split_whitespace().map(|s| s.to_string()));
        }

        Ok(p)
    }

    /// Fall back to the local account when no user was resolved, like
    /// ssh(1).
    pub fn ensure_user(&mut self) {
        if self.user.is_empty() {
            if let Some(user) = local_username() {
                self.user = user;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host_name.is_empty() {
            return Err(Error::profile(format!("{}: no host specified", self.alias)));
        }
        if self.user.is_empty() {
            return Err(Error::profile(format!("{}: no user specified", self.alias)));
        }
        if self.port == 0 {
            return Err(Error::profile(format!("{}: no port specified", self.alias)));
        }
        Ok(())
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',').map(|x| x.trim().to_string()).filter(|x| !x.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(user: &str) -> SshConfig {
        SshConfig::from_strings(Some(user), None).unwrap()
    }

    #[test]
    fn test_parse_proxy_jump_forms() {
        assert_eq!(
            parse_proxy_jump("bastion").unwrap(),
            JumpSpec { host: "bastion".into(), user: "".into(), port: 0 }
        );
        assert_eq!(
            parse_proxy_jump("alice@bastion").unwrap(),
            JumpSpec { host: "bastion".into(), user: "alice".into(), port: 0 }
        );
        assert_eq!(
            parse_proxy_jump("alice@bastion:2222").unwrap(),
            JumpSpec { host: "bastion".into(), user: "alice".into(), port: 2222 }
        );
        assert!(parse_proxy_jump("bastion:nope").is_err());
    }

    #[test]
    fn test_resolve_basic() {
        let p = HostProfile::resolve(
            &cfg("Host dev\n  HostName dev.internal\n  User alice\n  Port 2222\n"),
            "dev",
        )
        .unwrap();
        assert_eq!(p.host_name, "dev.internal");
        assert_eq!(p.user, "alice");
        assert_eq!(p.port, 2222);
        assert_eq!(p.key_check, KeyCheck::Strict);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_resolve_hostname_token() {
        let p = HostProfile::resolve(&cfg("Host dev\n  HostName %h.internal\n"), "dev").unwrap();
        assert_eq!(p.host_name, "dev.internal");
    }

    #[test]
    fn test_identity_file_tokens_use_resolved_hostname() {
        let p = HostProfile::resolve(
            &cfg("Host dev\n  HostName dev.internal\n  IdentityFile ~/.ssh/%h_key\n"),
            "dev",
        )
        .unwrap();
        assert_eq!(p.identity_files, vec!["~/.ssh/dev.internal_key"]);
    }

    #[test]
    fn test_jump_chain_parsed() {
        let p = HostProfile::resolve(
            &cfg("Host dev\n  ProxyJump alice@bastion:2222,edge\n"),
            "dev",
        )
        .unwrap();
        assert_eq!(p.jumps.len(), 2);
        assert_eq!(p.jumps[0].host, "bastion");
        assert_eq!(p.jumps[1].host, "edge");
    }

    #[test]
    fn test_key_check_off() {
        let p =
            HostProfile::resolve(&cfg("Host dev\n  StrictHostKeyChecking no\n"), "dev").unwrap();
        assert_eq!(p.key_check, KeyCheck::Off);
    }

    #[test]
    fn test_unknown_key_check_rejected() {
        let err = HostProfile::resolve(&cfg("Host dev\n  StrictHostKeyChecking maybe\n"), "dev")
            .unwrap_err();
        assert!(err.to_string().contains("unsupported StrictHostKeyChecking"));
    }

    #[test]
    fn test_known_hosts_values_split_on_spaces() {
        let p = HostProfile::resolve(
            &cfg("Host dev\n  UserKnownHostsFile ~/.ssh/kh1 ~/.ssh/kh2\n  GlobalKnownHostsFile /etc/ssh/kh\n"),
            "dev",
        )
        .unwrap();
        assert_eq!(p.known_hosts_files, vec!["/etc/ssh/kh", "~/.ssh/kh1", "~/.ssh/kh2"]);
    }

    #[test]
    fn test_validate_missing_fields() {
        let mut p = HostProfile { alias: "x".into(), ..Default::default() };
        assert!(p.validate().is_err());
        p.host_name = "h".into();
        p.user = "u".into();
        assert!(p.validate().is_err());
        p.port = 22;
        assert!(p.validate().is_ok());
    }
}
