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

//! known_hosts handling for strict host-key checking.
//!
//! boring never writes to known_hosts; it verifies presented keys
//! against existing entries and extracts the key types already recorded
//! for a host so the handshake can be restricted to algorithms that can
//! actually verify.

use std::collections::HashSet;

use russh::keys::{PublicKey, PublicKeyBase64};
use tracing::debug;

use crate::paths::expand_tilde;
use crate::ssh::config::pattern;

#[derive(Debug, Clone)]
struct Entry {
    /// Comma-separated host patterns, kept split.
    patterns: Vec<String>,
    key_type: String,
    key_data: String,
    revoked: bool,
}

/// Parsed union of one or more known_hosts files.
#[derive(Debug, Default, Clone)]
pub struct KnownHosts {
    entries: Vec<Entry>,
}

impl KnownHosts {
    /// Load every readable file of `paths`; unreadable files are skipped
    /// with a debug log, matching ssh(1) tolerance for missing files.
    pub fn load(paths: &[String]) -> Self {
        let mut entries = Vec::new();
        for p in paths {
            let path = expand_tilde(p);
            match std::fs::read_to_string(&path) {
                Ok(content) => parse_into(&content, &mut entries),
                Err(e) => debug!("could not open known hosts file {}: {e}", path.display()),
            }
        }
        Self { entries }
    }

    #[cfg(test)]
    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        parse_into(content, &mut entries);
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn matching(&self, host: &str, port: u16) -> impl Iterator<Item = &Entry> {
        let bracketed = join_host_port_pattern(host, port);
        let plain = (port == 22).then(|| host.to_string());
        self.entries.iter().filter(move |e| {
            pattern::matches_patterns(&bracketed, &e.patterns)
                || plain.as_ref().is_some_and(|p| pattern::matches_patterns(p, &e.patterns))
        })
    }

    /// The key types already recorded for `(host, port)`. An `ssh-rsa`
    /// entry can also verify the SHA-2 RSA algorithms.
    pub fn known_key_types(&self, host: &str, port: u16) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut push = |t: &str| {
            if seen.insert(t.to_string()) {
                out.push(t.to_string());
            }
        };
        for e in self.matching(host, port) {
            if e.revoked {
                continue;
            }
            push(&e.key_type);
            if e.key_type == "ssh-rsa" {
                push("rsa-sha2-256");
                push("rsa-sha2-512");
            }
        }
        out
    }

    /// Verify a presented host key: true only when a non-revoked entry
    /// for this host carries exactly this key.
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> bool {
        let presented = key.public_key_base64();
        let mut found_host = false;
        for e in self.matching(host, port) {
            found_host = true;
            if e.key_data == presented {
                if e.revoked {
                    debug!("host key for {host}:{port} is revoked");
                    return false;
                }
                return true;
            }
        }
        if found_host {
            debug!("host key mismatch for {host}:{port}");
        } else {
            debug!("no known_hosts entry for {host}:{port}");
        }
        false
    }
}

fn parse_into(content: &str, entries: &mut Vec<Entry>) {
    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let mut first = fields.next().unwrap_or_default();

        let mut revoked = false;
        if first.starts_with('@') {
            match first {
                "@revoked" => revoked = true,
                // @cert-authority entries vouch for CAs, not host keys
                _ => continue,
            }
            first = match fields.next() {
                Some(f) => f,
                None => continue,
            };
        }

        // Hashed hostnames cannot be enumerated for key types and are
        // not matched for verification either.
        if first.starts_with("|1|") {
            debug!("skipping hashed known_hosts entry");
            continue;
        }

        let (Some(key_type), Some(key_data)) = (fields.next(), fields.next()) else {
            debug!("skipping malformed known_hosts line: {line}");
            continue;
        };

        entries.push(Entry {
            patterns: first.split(',').map(|s| s.to_string()).collect(),
            key_type: key_type.to_string(),
            key_data: key_data.to_string(),
            revoked,
        });
    }
}

/// Pattern form ssh uses for non-22 ports: `[host]:port`; port 22
/// entries are written bare, but a bracketed 22 still matches.
fn join_host_port_pattern(host: &str, port: u16) -> String {
    format!("[{host}]:{port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ED25519_B64: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIFo6fWO3DHZ6PaSM4y7BYnGRoCbkx3R8YJNMfCkVma1p";

    fn sample() -> KnownHosts {
        KnownHosts::parse(&format!(
            "dev.internal ssh-ed25519 {ED25519_B64}\n\
             [dev.internal]:2222 ssh-rsa AAAAB3NzaC1yc2EAAAADAQAB\n\
             *.wild.example ecdsa-sha2-nistp256 AAAA...\n\
             # comment\n\
             |1|saltsalt|hashhash ssh-ed25519 AAAA...\n\
             @revoked bad.example ssh-ed25519 {ED25519_B64}\n"
        ))
    }

    #[test]
    fn test_known_key_types_default_port() {
        assert_eq!(sample().known_key_types("dev.internal", 22), vec!["ssh-ed25519"]);
    }

    #[test]
    fn test_known_key_types_bracketed_port_and_rsa_expansion() {
        assert_eq!(
            sample().known_key_types("dev.internal", 2222),
            vec!["ssh-rsa", "rsa-sha2-256", "rsa-sha2-512"]
        );
    }

    #[test]
    fn test_wildcard_patterns_match() {
        assert_eq!(
            sample().known_key_types("a.wild.example", 22),
            vec!["ecdsa-sha2-nistp256"]
        );
    }

    #[test]
    fn test_unknown_host_has_no_types() {
        assert!(sample().known_key_types("nope.example", 22).is_empty());
    }

    #[test]
    fn test_revoked_entries_never_vouch() {
        assert!(sample().known_key_types("bad.example", 22).is_empty());
    }

    #[test]
    fn test_hashed_entries_are_skipped() {
        // The hashed line must not create a phantom entry.
        let kh = KnownHosts::parse("|1|c2FsdA==|aGFzaA== ssh-ed25519 AAAA\n");
        assert!(kh.is_empty());
    }
}
