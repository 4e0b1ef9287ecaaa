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

//! Percent-token substitution for ssh_config values.
//!
//! Only the keys listed per option are substituted; unknown tokens pass
//! through untouched, matching ssh(1).

use std::collections::HashMap;

/// Tokens valid in `HostName`.
pub(crate) const HOSTNAME_TOKENS: &[&str] = &["%%", "%h"];

/// Tokens valid in `ProxyJump`.
pub(crate) const PROXY_TOKENS: &[&str] = &["%%", "%h", "%n", "%p", "%r"];

/// Tokens valid in `IdentityFile`, `CertificateFile` and
/// `UserKnownHostsFile`.
pub(crate) const IDENT_FILE_TOKENS: &[&str] =
    &["%%", "%d", "%h", "%i", "%j", "%L", "%n", "%p", "%r", "%u"];

/// The substitution table built up while resolving one alias.
#[derive(Debug, Default)]
pub(crate) struct Subst {
    map: HashMap<&'static str, String>,
}

impl Subst {
    /// Seed the table with everything known before any option lookup:
    /// the alias, the default port, and local account facts.
    pub fn new(alias: &str) -> Self {
        let mut map = HashMap::new();
        map.insert("%%", "%".to_string());
        map.insert("%p", "22".to_string());
        map.insert("%h", alias.to_string());
        map.insert("%n", alias.to_string());

        if let Some(user) = local_username() {
            map.insert("%u", user);
        }
        if let Some(home) = dirs::home_dir() {
            map.insert("%d", home.to_string_lossy().into_owned());
        }
        #[cfg(unix)]
        {
            map.insert("%i", nix::unistd::Uid::current().to_string());
            if let Ok(name) = nix::unistd::gethostname() {
                let name = name.to_string_lossy();
                let short = name.split('.').next().unwrap_or(&name).to_string();
                map.insert("%L", short);
            }
        }
        Self { map }
    }

    pub fn set(&mut self, token: &'static str, value: impl Into<String>) {
        self.map.insert(token, value.into());
    }

    /// Replace every known token from `keys` in `value`.
    pub fn apply(&self, value: &str, keys: &[&str]) -> String {
        if !value.contains('%') {
            return value.to_string();
        }
        let mut out = value.to_string();
        for key in keys {
            if let Some(repl) = self.map.get(key) {
                out = out.replace(key, repl);
            }
        }
        out
    }

    pub fn apply_all(&self, values: &[String], keys: &[&str]) -> Vec<String> {
        values.iter().map(|v| self.apply(v, keys)).collect()
    }
}

/// The local account name, as ssh(1) would use for `%u` and the user
/// fallback.
pub(crate) fn local_username() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|u| !u.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_escape() {
        let s = Subst::new("dev");
        assert_eq!(s.apply("100%%", HOSTNAME_TOKENS), "100%");
    }

    #[test]
    fn test_hostname_tokens() {
        let mut s = Subst::new("dev");
        assert_eq!(s.apply("%h.internal", HOSTNAME_TOKENS), "dev.internal");
        s.set("%h", "dev.internal");
        assert_eq!(s.apply("%h", HOSTNAME_TOKENS), "dev.internal");
    }

    #[test]
    fn test_unknown_tokens_pass_through() {
        let s = Subst::new("dev");
        // %T is not a recognized token
        assert_eq!(s.apply("%T-%n", IDENT_FILE_TOKENS), "%T-dev");
    }

    #[test]
    fn test_tokens_outside_allowed_set_untouched() {
        let s = Subst::new("dev");
        // %n is not allowed in HostName values
        assert_eq!(s.apply("%n", HOSTNAME_TOKENS), "%n");
    }

    #[test]
    fn test_port_and_user_tokens() {
        let mut s = Subst::new("dev");
        s.set("%p", "2222");
        s.set("%r", "alice");
        assert_eq!(s.apply("%r@%h:%p", PROXY_TOKENS), "alice@dev:2222");
    }
}
