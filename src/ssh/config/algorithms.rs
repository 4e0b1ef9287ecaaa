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

//! Built-in ssh_config defaults and the `+`/`-`/`^` algorithm-list
//! operators.

/// Keys whose values are comma-separated algorithm lists subject to the
/// prefix operators.
pub(super) const ALGO_KEYS: [&str; 4] =
    ["Ciphers", "MACs", "HostKeyAlgorithms", "KexAlgorithms"];

const DEFAULT_CIPHERS: &str = "chacha20-poly1305@openssh.com,aes128-ctr,aes192-ctr,aes256-ctr,\
                               aes128-gcm@openssh.com,aes256-gcm@openssh.com";

const DEFAULT_MACS: &str = "umac-64-etm@openssh.com,umac-128-etm@openssh.com,\
                            hmac-sha2-256-etm@openssh.com,hmac-sha2-512-etm@openssh.com,\
                            hmac-sha1-etm@openssh.com,umac-64@openssh.com,umac-128@openssh.com,\
                            hmac-sha2-256,hmac-sha2-512,hmac-sha1";

const DEFAULT_HOST_KEY_ALGOS: &str = "ssh-ed25519-cert-v01@openssh.com,\
                                      ecdsa-sha2-nistp256-cert-v01@openssh.com,\
                                      ecdsa-sha2-nistp384-cert-v01@openssh.com,\
                                      ecdsa-sha2-nistp521-cert-v01@openssh.com,\
                                      rsa-sha2-512-cert-v01@openssh.com,\
                                      rsa-sha2-256-cert-v01@openssh.com,\
                                      ssh-ed25519,ecdsa-sha2-nistp256,ecdsa-sha2-nistp384,\
                                      ecdsa-sha2-nistp521,rsa-sha2-512,rsa-sha2-256";

const DEFAULT_KEX_ALGOS: &str = "curve25519-sha256,curve25519-sha256@libssh.org,\
                                 ecdh-sha2-nistp256,ecdh-sha2-nistp384,ecdh-sha2-nistp521,\
                                 diffie-hellman-group-exchange-sha256,\
                                 diffie-hellman-group16-sha512,diffie-hellman-group18-sha512,\
                                 diffie-hellman-group14-sha256";

/// Built-in default for an ssh_config option, the last layer of the
/// user → system → default lookup.
pub(crate) fn default(key: &str) -> &'static str {
    match key {
        "Port" => "22",
        "Ciphers" => DEFAULT_CIPHERS,
        "MACs" => DEFAULT_MACS,
        "HostKeyAlgorithms" => DEFAULT_HOST_KEY_ALGOS,
        "KexAlgorithms" => DEFAULT_KEX_ALGOS,
        "StrictHostKeyChecking" => "ask",
        "IdentitiesOnly" => "no",
        "UserKnownHostsFile" => "~/.ssh/known_hosts ~/.ssh/known_hosts2",
        "GlobalKnownHostsFile" => "/etc/ssh/ssh_known_hosts /etc/ssh/ssh_known_hosts2",
        // No IdentityFile default: when no key files are configured,
        // agent identities and the conventional default key paths take
        // over during identity resolution.
        _ => "",
    }
}

fn split(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Apply the OpenSSH algorithm-list operators against the defaults:
/// `+list` appends, `-list` removes, `^list` moves to the front.
/// Values without an operator prefix are returned verbatim.
pub(crate) fn apply_operators(value: &str, key: &str) -> String {
    let Some(op) = value.chars().next().filter(|c| matches!(c, '+' | '-' | '^')) else {
        return value.to_string();
    };

    let given = split(&value[1..]);
    let def = split(default(key));

    let out: Vec<String> = match op {
        '+' => def.into_iter().chain(given).collect(),
        '-' => def.into_iter().filter(|a| !given.contains(a)).collect(),
        '^' => {
            let mut out: Vec<String> =
                given.iter().filter(|a| def.contains(a)).cloned().collect();
            for a in def {
                if !out.contains(&a) {
                    out.push(a);
                }
            }
            out
        }
        _ => unreachable!(),
    };

    out.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_operator_passthrough() {
        assert_eq!(apply_operators("aes128-ctr,aes256-ctr", "Ciphers"), "aes128-ctr,aes256-ctr");
    }

    #[test]
    fn test_plus_appends() {
        let got = apply_operators("+3des-cbc", "Ciphers");
        assert!(got.ends_with(",3des-cbc"));
        assert!(got.starts_with(default("Ciphers").split(',').next().unwrap()));
    }

    #[test]
    fn test_minus_removes() {
        let got = apply_operators("-aes128-ctr", "Ciphers");
        assert!(!split(&got).contains(&"aes128-ctr".to_string()));
        assert_eq!(split(&got).len(), split(default("Ciphers")).len() - 1);
    }

    #[test]
    fn test_caret_moves_to_front() {
        let got = apply_operators("^aes256-ctr", "Ciphers");
        let items = split(&got);
        assert_eq!(items[0], "aes256-ctr");
        // set of entries is preserved
        let mut a = items.clone();
        let mut b = split(default("Ciphers"));
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn test_plus_then_remove_restores_default() {
        let appended = apply_operators("+3des-cbc", "Ciphers");
        let removed: Vec<String> =
            split(&appended).into_iter().filter(|a| a != "3des-cbc").collect();
        assert_eq!(removed.join(","), default("Ciphers"));
    }

    #[test]
    fn test_caret_ignores_unknown_entries() {
        // entries not in the default list are dropped by ^
        let got = apply_operators("^not-a-cipher", "Ciphers");
        assert!(!got.contains("not-a-cipher"));
    }
}
