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

//! Hop building: turn a resolved profile into the ordered list of SSH
//! connections needed to reach the destination, expanding `ProxyJump`
//! chains recursively.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};
use crate::ssh::config::SshConfig;
use crate::ssh::identity::{self, Identity};
use crate::ssh::known_hosts::KnownHosts;
use crate::ssh::profile::{HostProfile, KeyCheck};

pub const SSH_CONN_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_JUMP_RECURSIONS: usize = 20;

/// How the server's host key is checked for one hop.
#[derive(Debug, Clone)]
pub enum HostKeyPolicy {
    /// `StrictHostKeyChecking no`: accept whatever the server presents.
    AcceptAny,
    /// Verify against the recorded known_hosts entries.
    Verify(KnownHosts),
}

/// Everything needed to dial and authenticate one SSH connection.
#[derive(Debug, Clone)]
pub struct ClientProfile {
    pub user: String,
    pub identities: Vec<Identity>,
    pub ciphers: Vec<String>,
    pub macs: Vec<String>,
    pub kex_algos: Vec<String>,
    /// Host key algorithms offered in the handshake; already intersected
    /// with known_hosts under strict checking.
    pub host_key_algos: Vec<String>,
    pub host_key: HostKeyPolicy,
    pub timeout: Duration,
}

/// One link of the connection chain; the last hop is the destination.
#[derive(Debug, Clone)]
pub struct Hop {
    pub host_name: String,
    pub port: u16,
    pub profile: ClientProfile,
}

/// Expand a resolved profile into its ordered hop list.
///
/// The first `ProxyJump` entry is expanded with its own jumps
/// recursively; subsequent entries are terminal, matching ssh(1).
pub async fn to_hops(cfg: &SshConfig, profile: HostProfile) -> Result<Vec<Hop>> {
    to_hops_impl(cfg, profile, false, 0).await
}

fn to_hops_impl<'a>(
    cfg: &'a SshConfig,
    mut profile: HostProfile,
    ignore_jumps: bool,
    depth: usize,
) -> Pin<Box<dyn Future<Output = Result<Vec<Hop>>> + Send + 'a>> {
    Box::pin(async move {
        if depth > MAX_JUMP_RECURSIONS {
            return Err(Error::profile("maximum jump recursions exceeded"));
        }

        profile.validate()?;

        if ignore_jumps {
            profile.jumps.clear();
        }

        let mut hops = Vec::new();
        let jumps = std::mem::take(&mut profile.jumps);
        for (i, jump) in jumps.iter().enumerate() {
            let mut jp = HostProfile::resolve(cfg, &jump.host).map_err(|e| {
                Error::profile(format!("could not parse SSH config for {}: {e}", jump.host))
            })?;

            // Inline user/port from the ProxyJump entry win over the
            // jump host's own config.
            if !jump.user.is_empty() {
                jp.user = jump.user.clone();
            }
            if jump.port != 0 {
                jp.port = jump.port;
            }
            if jp.host_name.is_empty() {
                jp.host_name = jump.host.clone();
            }
            jp.ensure_user();

            let js = to_hops_impl(cfg, jp, i != 0, depth + 1).await?;
            hops.extend(js);
        }

        let identities = identity::resolve(
            &profile.identity_files,
            &profile.certificate_files,
            profile.identities_only,
        )
        .await
        .map_err(|e| match e {
            Error::Auth(msg) => Error::Auth(format!("{}: {msg}", profile.alias)),
            other => other,
        })?;

        let (host_key, host_key_algos) = make_host_key_policy(&profile)?;

        let client_profile = ClientProfile {
            user: profile.user.clone(),
            identities,
            ciphers: profile.ciphers.clone(),
            macs: profile.macs.clone(),
            kex_algos: profile.kex_algos.clone(),
            host_key_algos,
            host_key,
            timeout: SSH_CONN_TIMEOUT,
        };

        hops.push(Hop {
            host_name: profile.host_name.clone(),
            port: profile.port,
            profile: client_profile,
        });
        Ok(hops)
    })
}

/// Build the host key callback policy and the algorithm list to offer.
///
/// Under strict checking the offered list is the intersection of the
/// configured algorithms with the key types already recorded for this
/// host, preserving configured order; offering anything else could only
/// produce an unverifiable key.
fn make_host_key_policy(profile: &HostProfile) -> Result<(HostKeyPolicy, Vec<String>)> {
    match profile.key_check {
        KeyCheck::Off => Ok((HostKeyPolicy::AcceptAny, profile.host_key_algos.clone())),
        KeyCheck::Strict => {
            let hosts = KnownHosts::load(&profile.known_hosts_files);
            let known = hosts.known_key_types(&profile.host_name, profile.port);
            let algos: Vec<String> = profile
                .host_key_algos
                .iter()
                .filter(|a| known.contains(a))
                .cloned()
                .collect();
            if algos.is_empty() {
                return Err(Error::HostKey(format!(
                    "{}: no suitable host key algorithms found: configured are {:?}, \
                     available in known_hosts are {:?}. Note that boring does not \
                     automatically add keys to your known_hosts.",
                    profile.alias, profile.host_key_algos, known
                )));
            }
            debug!(
                "{}: key types in known_hosts: {:?}, configured: {:?}, trying: {:?}",
                profile.alias, known, profile.host_key_algos, algos
            );
            Ok((HostKeyPolicy::Verify(hosts), algos))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recursion_cap_message() {
        // The recursion guard fires before any network or key access, so
        // it can be provoked with a self-referencing profile.
        let cfg = SshConfig::from_strings(None, None).unwrap();
        let profile = HostProfile {
            alias: "loop".into(),
            host_name: "loop".into(),
            user: "u".into(),
            port: 22,
            ..Default::default()
        };
        let fut = to_hops_impl(&cfg, profile, false, MAX_JUMP_RECURSIONS + 1);
        let err = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
            .unwrap_err();
        assert!(err.to_string().contains("maximum jump recursions exceeded"));
    }

    #[test]
    fn test_strict_with_no_known_hosts_fails_with_both_sets() {
        let profile = HostProfile {
            alias: "dev".into(),
            host_name: "dev.internal".into(),
            user: "u".into(),
            port: 22,
            host_key_algos: vec!["ssh-ed25519".into()],
            key_check: KeyCheck::Strict,
            ..Default::default()
        };
        let err = make_host_key_policy(&profile).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("no suitable host key algorithms"));
        assert!(msg.contains("ssh-ed25519"));
        assert!(msg.contains("not automatically add keys"));
    }

    #[test]
    fn test_off_keeps_declared_algorithms() {
        let profile = HostProfile {
            alias: "dev".into(),
            host_key_algos: vec!["ssh-ed25519".into(), "rsa-sha2-512".into()],
            key_check: KeyCheck::Off,
            ..Default::default()
        };
        let (policy, algos) = make_host_key_policy(&profile).unwrap();
        assert!(matches!(policy, HostKeyPolicy::AcceptAny));
        assert_eq!(algos, vec!["ssh-ed25519", "rsa-sha2-512"]);
    }
}
