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

//! Build identity used for the daemon/CLI compatibility probe.
//!
//! Release builds embed a short commit hash through the `BORING_COMMIT`
//! compile-time environment variable; local builds carry none, which
//! disables the compatibility check entirely. The `*_OVERRIDE` runtime
//! variables exist for the end-to-end test harness.

/// The 5-character commit hash identifying this build, if any.
pub fn commit() -> String {
    if let Ok(c) = std::env::var("BORING_COMMIT_OVERRIDE") {
        return c;
    }
    option_env!("BORING_COMMIT").unwrap_or_default().to_string()
}

/// Release tag of this build, falling back to the crate version.
pub fn tag() -> String {
    if let Ok(t) = std::env::var("BORING_TAG_OVERRIDE") {
        return t;
    }
    option_env!("BORING_TAG")
        .unwrap_or(env!("CARGO_PKG_VERSION"))
        .to_string()
}

/// Human-readable version line for `boring version` and usage output.
pub fn version_line() -> String {
    let tag = tag();
    let commit = commit();
    if commit.is_empty() {
        format!("boring {tag}")
    } else {
        format!("boring {tag} (#{commit})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_line_contains_tag() {
        assert!(version_line().starts_with("boring "));
    }
}
