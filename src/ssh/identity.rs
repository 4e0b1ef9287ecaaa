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

//! Identity resolution: turn the configured key material into an ordered
//! list of authentication candidates.
//!
//! The order reproduces ssh(1): certificates first (explicit, then
//! implicit `<key>-cert.pub` siblings), then agent keys backing
//! configured files, then other agent keys unless `IdentitiesOnly`, then
//! plain file keys that have no agent copy. Candidates are deduplicated
//! by key fingerprint, first occurrence wins.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use russh::keys::ssh_key::{Certificate, HashAlg};
use russh::keys::{load_openssh_certificate, load_public_key, load_secret_key};
use russh::keys::{PrivateKey, PublicKey};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::paths::expand_tilde;
use crate::ssh::agent;

/// Key paths probed when no IdentityFile is configured, like ssh(1)'s
/// default identities.
const DEFAULT_KEYS: [&str; 3] = ["~/.ssh/id_rsa", "~/.ssh/id_ecdsa", "~/.ssh/id_ed25519"];

/// Where the private half of an identity lives.
#[derive(Debug, Clone)]
pub enum Signer {
    /// An on-disk private key, loaded into memory.
    KeyFile { key: Arc<PrivateKey>, path: PathBuf },
    /// A key held by the ssh-agent; signing happens inside the agent.
    Agent { key: PublicKey },
}

/// An authentication candidate: a signer, optionally fronted by a
/// certificate bound to the same key.
#[derive(Debug, Clone)]
pub struct Identity {
    pub signer: Signer,
    pub cert: Option<Certificate>,
}

impl Identity {
    /// Stable fingerprint of the underlying public key.
    pub fn fingerprint(&self) -> String {
        match &self.signer {
            Signer::KeyFile { key, .. } => {
                key.public_key().fingerprint(HashAlg::Sha256).to_string()
            }
            Signer::Agent { key } => key.fingerprint(HashAlg::Sha256).to_string(),
        }
    }

    /// Short human-readable source for log lines.
    pub fn describe(&self) -> String {
        let src = match &self.signer {
            Signer::KeyFile { path, .. } => path.display().to_string(),
            Signer::Agent { .. } => "ssh-agent".to_string(),
        };
        if self.cert.is_some() {
            format!("{src} (certificate)")
        } else {
            src
        }
    }
}

#[derive(Debug)]
struct FileKey {
    path: PathBuf,
    key: Option<Arc<PrivateKey>>,
    fingerprint: Option<String>,
}

fn fingerprint_of(key: &PublicKey) -> String {
    key.fingerprint(HashAlg::Sha256).to_string()
}

fn load_file_key(path: &str, quiet: bool) -> FileKey {
    let expanded = expand_tilde(path);
    match load_secret_key(&expanded, None) {
        Ok(key) => {
            let fp = fingerprint_of(&key.public_key().clone());
            FileKey { path: expanded, key: Some(Arc::new(key)), fingerprint: Some(fp) }
        }
        Err(e) => {
            if quiet {
                debug!("default key file {} not usable: {e}", expanded.display());
            } else {
                warn!("key file {} could not be added: {e}", expanded.display());
            }
            // An unreadable private key may still have a readable .pub
            // next to it; its fingerprint lets us find the agent copy.
            let pub_path = expanded.with_file_name(format!(
                "{}.pub",
                expanded.file_name().map(|f| f.to_string_lossy()).unwrap_or_default()
            ));
            let fingerprint = load_public_key(&pub_path).ok().map(|k| fingerprint_of(&k));
            FileKey { path: expanded, key: None, fingerprint }
        }
    }
}

/// Resolve the ordered signer list for one hop.
pub async fn resolve(
    identity_files: &[String],
    certificate_files: &[String],
    identities_only: bool,
) -> Result<Vec<Identity>> {
    let defaulted = identity_files.is_empty();
    let paths: Vec<String> = if defaulted {
        debug!("no key files specified, probing default identities");
        DEFAULT_KEYS.iter().map(|s| s.to_string()).collect()
    } else {
        identity_files.to_vec()
    };

    let file_keys: Vec<FileKey> =
        paths.iter().map(|p| load_file_key(p, defaulted)).collect();

    let configured: HashSet<String> =
        file_keys.iter().filter_map(|f| f.fingerprint.clone()).collect();

    let agent_keys: Vec<PublicKey> = match agent::identities().await {
        Ok(keys) => {
            debug!("agent offered {} identities", keys.len());
            keys
        }
        Err(e) => {
            debug!("unable to get keys from ssh-agent: {e}");
            Vec::new()
        }
    };
    let agent_fps: Vec<String> = agent_keys.iter().map(fingerprint_of).collect();

    // Bind a certificate to the first key matching its public half:
    // agent keys for configured files, other agent keys unless
    // IdentitiesOnly, then loaded file keys.
    let bind = |cert: Certificate| -> Option<Identity> {
        let want = cert.public_key().fingerprint(HashAlg::Sha256).to_string();
        for (key, fp) in agent_keys.iter().zip(&agent_fps) {
            if *fp == want && (configured.contains(fp) || !identities_only) {
                return Some(Identity { signer: Signer::Agent { key: key.clone() }, cert: Some(cert) });
            }
        }
        for f in &file_keys {
            if f.fingerprint.as_deref() == Some(want.as_str()) {
                if let Some(key) = &f.key {
                    return Some(Identity {
                        signer: Signer::KeyFile { key: key.clone(), path: f.path.clone() },
                        cert: Some(cert),
                    });
                }
            }
        }
        None
    };

    let mut candidates: Vec<Identity> = Vec::new();

    // 1. Explicit certificates.
    for path in certificate_files {
        let expanded = expand_tilde(path);
        match load_openssh_certificate(&expanded) {
            Ok(cert) => match bind(cert) {
                Some(id) => candidates.push(id),
                None => warn!(
                    "certificate {} has no matching private key, skipping",
                    expanded.display()
                ),
            },
            Err(e) => warn!("certificate {} could not be added: {e}", expanded.display()),
        }
    }

    // 2. Implicit <key>-cert.pub siblings.
    for path in &paths {
        let cert_path = expand_tilde(&format!("{path}-cert.pub"));
        if let Ok(cert) = load_openssh_certificate(&cert_path) {
            if let Some(id) = bind(cert) {
                candidates.push(id);
            }
        }
    }

    // 3. Agent-held certificates would come next; the agent client only
    // surfaces plain keys, so there is nothing to add here.

    // 4. Agent keys backing configured files.
    for (key, fp) in agent_keys.iter().zip(&agent_fps) {
        if configured.contains(fp) {
            candidates.push(Identity { signer: Signer::Agent { key: key.clone() }, cert: None });
        }
    }

    // 5. Remaining agent keys.
    if !identities_only {
        for (key, fp) in agent_keys.iter().zip(&agent_fps) {
            if !configured.contains(fp) {
                candidates
                    .push(Identity { signer: Signer::Agent { key: key.clone() }, cert: None });
            }
        }
    }

    // 6. Plain file keys without an agent copy.
    for f in &file_keys {
        let fronted =
            f.fingerprint.as_ref().is_some_and(|fp| agent_fps.iter().any(|a| a == fp));
        if fronted {
            continue;
        }
        if let Some(key) = &f.key {
            candidates.push(Identity {
                signer: Signer::KeyFile { key: key.clone(), path: f.path.clone() },
                cert: None,
            });
        }
    }

    // Dedup by (fingerprint, certified), first occurrence wins.
    let mut seen = HashSet::new();
    candidates.retain(|id| seen.insert((id.fingerprint(), id.cert.is_some())));

    if candidates.is_empty() {
        return Err(Error::Auth("no key files found".to_string()));
    }
    debug!("trying {} identity candidate(s)", candidates.len());
    Ok(candidates)
}
