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

//! Path helpers shared by the config and SSH layers.

use std::path::PathBuf;

/// Expand a leading `~` or `~/` to the user's home directory.
///
/// Paths without a tilde prefix are returned unchanged. If the home
/// directory cannot be determined the path is also returned unchanged,
/// which surfaces as a regular "file not found" later on.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Like [`expand_tilde`], but keeps the result as a `String` for values
/// that travel through string-typed config fields.
pub fn expand_tilde_string(path: &str) -> String {
    expand_tilde(path).to_string_lossy().into_owned()
}

/// Join `[host]:port` the way known_hosts and dial sites expect it.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        // Bare IPv6 addresses need brackets
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde("~"), home);
        assert_eq!(expand_tilde("~/.ssh/config"), home.join(".ssh/config"));
        assert_eq!(expand_tilde("/etc/ssh/ssh_config"), PathBuf::from("/etc/ssh/ssh_config"));
        // A tilde in the middle is not expanded
        assert_eq!(expand_tilde("/tmp/~file"), PathBuf::from("/tmp/~file"));
    }

    #[test]
    fn test_join_host_port() {
        assert_eq!(join_host_port("example.com", 22), "example.com:22");
        assert_eq!(join_host_port("::1", 2222), "[::1]:2222");
    }
}
