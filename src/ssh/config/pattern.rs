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

//! Host pattern matching for ssh_config `Host` blocks and known_hosts
//! entries: `*`, `?`, and `!` negation.

/// Match a hostname against a pattern list. A matching negated pattern
/// excludes the host even if another pattern matches.
pub(crate) fn matches_patterns(hostname: &str, patterns: &[String]) -> bool {
    let mut matched = false;
    for pattern in patterns {
        if let Some(negated) = pattern.strip_prefix('!') {
            if matches_pattern(hostname, negated) {
                return false;
            }
        } else if matches_pattern(hostname, pattern) {
            matched = true;
        }
    }
    matched
}

/// Match a hostname against a single positive pattern.
pub(crate) fn matches_pattern(hostname: &str, pattern: &str) -> bool {
    if pattern.contains('*') || pattern.contains('?') {
        let text: Vec<char> = hostname.chars().collect();
        let pat: Vec<char> = pattern.chars().collect();
        match_recursive(&text, &pat, 0, 0)
    } else {
        hostname.eq_ignore_ascii_case(pattern)
    }
}

fn match_recursive(text: &[char], pattern: &[char], ti: usize, pi: usize) -> bool {
    if pi >= pattern.len() {
        return ti >= text.len();
    }
    if ti >= text.len() {
        return pattern[pi..].iter().all(|&c| c == '*');
    }
    match pattern[pi] {
        '*' => {
            match_recursive(text, pattern, ti, pi + 1) || match_recursive(text, pattern, ti + 1, pi)
        }
        '?' => match_recursive(text, pattern, ti + 1, pi + 1),
        c => {
            text[ti].eq_ignore_ascii_case(&c) && match_recursive(text, pattern, ti + 1, pi + 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pats(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exact_and_wildcards() {
        assert!(matches_pattern("dev-server", "dev-server"));
        assert!(matches_pattern("DEV-server", "dev-server"));
        assert!(matches_pattern("web1.example.com", "web*.example.com"));
        assert!(matches_pattern("web1.example.com", "web?.example.com"));
        assert!(!matches_pattern("db.example.com", "web*.example.com"));
        assert!(matches_pattern("anything", "*"));
    }

    #[test]
    fn test_negation_excludes() {
        assert!(matches_patterns("web1", &pats(&["web*"])));
        assert!(!matches_patterns("web1", &pats(&["*", "!web1"])));
        assert!(matches_patterns("web2", &pats(&["*", "!web1"])));
        // A lone negation matches nothing positively
        assert!(!matches_patterns("db1", &pats(&["!web1"])));
    }
}
