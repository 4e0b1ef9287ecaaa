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

//! ssh_config file parsing.
//!
//! The file is kept as an ordered list of `Host` blocks with their raw
//! options; per-option resolution (first obtained value wins) happens in
//! the query layer. Options before the first `Host` directive apply to
//! every host.

use anyhow::{bail, Result};

/// One `Host` block: patterns plus the options in file order.
#[derive(Debug, Clone)]
pub(super) struct HostBlock {
    pub patterns: Vec<String>,
    /// (canonical key, value) pairs; keys are stored lowercased.
    pub options: Vec<(String, String)>,
}

/// Parse ssh_config content into host blocks.
pub(super) fn parse(content: &str) -> Result<Vec<HostBlock>> {
    let mut blocks = Vec::new();
    // Leading options outside any Host block apply everywhere.
    let mut current = HostBlock { patterns: vec!["*".to_string()], options: Vec::new() };
    let mut have_leading = false;

    for (idx, raw) in content.lines().enumerate() {
        let line_number = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (keyword, value) = split_line(line);
        if keyword.is_empty() {
            continue;
        }

        if keyword == "host" {
            if value.is_empty() {
                bail!("Host directive requires at least one pattern at line {line_number}");
            }
            if have_leading || !current.options.is_empty() || current.patterns != ["*"] {
                blocks.push(current);
            }
            have_leading = true;
            current = HostBlock {
                patterns: value.split_whitespace().map(|s| s.to_string()).collect(),
                options: Vec::new(),
            };
        } else if keyword == "match" {
            // Match blocks are not evaluated; a following Host directive
            // resumes normal parsing. Collect it as a never-matching block
            // so its options stay inert.
            if have_leading || !current.options.is_empty() || current.patterns != ["*"] {
                blocks.push(current);
            }
            have_leading = true;
            current = HostBlock { patterns: Vec::new(), options: Vec::new() };
        } else {
            if value.is_empty() {
                bail!("option '{keyword}' requires a value at line {line_number}");
            }
            current.options.push((keyword, value));
        }
    }

    blocks.push(current);
    Ok(blocks)
}

/// Split an ssh_config line into lowercased keyword and value, handling
/// both `Key Value` and `Key=Value` syntax plus surrounding quotes.
fn split_line(line: &str) -> (String, String) {
    let (key_part, value_part) = if let Some(eq) = line.find(['=', ' ', '\t']) {
        let sep = line.as_bytes()[eq];
        let key = &line[..eq];
        let mut rest = line[eq + 1..].trim_start();
        // Tolerate "Key = Value"
        if sep != b'=' {
            if let Some(stripped) = rest.strip_prefix('=') {
                rest = stripped.trim_start();
            }
        }
        (key, rest.trim_end())
    } else {
        (line, "")
    };

    let value = value_part
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value_part);

    (key_part.to_ascii_lowercase(), value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_blocks() {
        let blocks = parse(
            "Host dev\n    HostName dev.internal\n    Port 2222\n\nHost *.prod\n    User ops\n",
        )
        .unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].patterns, vec!["dev"]);
        assert_eq!(
            blocks[0].options,
            vec![
                ("hostname".to_string(), "dev.internal".to_string()),
                ("port".to_string(), "2222".to_string()),
            ]
        );
        assert_eq!(blocks[1].patterns, vec!["*.prod"]);
    }

    #[test]
    fn test_leading_options_apply_everywhere() {
        let blocks = parse("User fallback\n\nHost dev\n    Port 1\n").unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].patterns, vec!["*"]);
        assert_eq!(blocks[0].options[0].0, "user");
    }

    #[test]
    fn test_equals_syntax_and_quotes() {
        let blocks = parse("Host dev\n    IdentityFile=\"~/.ssh/my key\"\n").unwrap();
        assert_eq!(blocks[0].options[0], ("identityfile".into(), "~/.ssh/my key".into()));
    }

    #[test]
    fn test_host_without_pattern_fails() {
        let err = parse("Host\n").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_option_without_value_fails() {
        assert!(parse("Host dev\n    Port\n").is_err());
    }

    #[test]
    fn test_match_blocks_are_inert() {
        let blocks = parse(
            "Host dev\n    Port 1\nMatch user root\n    Port 9\nHost dev2\n    Port 2\n",
        )
        .unwrap();
        // dev, inert match, dev2
        assert_eq!(blocks.len(), 3);
        assert!(blocks[1].patterns.is_empty());
    }

    #[test]
    fn test_comments_and_blanks_ignored() {
        let blocks = parse("# comment\n\nHost dev\n  # inner\n  Port 22\n").unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].options.len(), 1);
    }
}
