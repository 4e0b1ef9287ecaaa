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

//! Minimal aligned-column table for `boring list`.
//!
//! Cells may contain ANSI color sequences; widths are computed on the
//! visible text.

use std::fmt;
use std::sync::OnceLock;

use owo_colors::OwoColorize;
use regex::Regex;

const PAD: usize = 2;

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("\x1b\\[[0-9;]*m").expect("static regex"))
}

fn visible_len(s: &str) -> usize {
    ansi_re().replace_all(s, "").chars().count()
}

pub struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    widths: Vec<usize>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: Vec<S>) -> Self {
        let header: Vec<String> = columns.into_iter().map(Into::into).collect();
        let widths = header.iter().map(|h| visible_len(h)).collect();
        Self { header, rows: Vec::new(), widths }
    }

    pub fn add_row(&mut self, cells: Vec<String>) {
        assert_eq!(cells.len(), self.header.len(), "column count mismatch");
        for (i, c) in cells.iter().enumerate() {
            self.widths[i] = self.widths[i].max(visible_len(c));
        }
        self.rows.push(cells);
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, h) in self.header.iter().enumerate() {
            let pad = self.widths[i] + PAD - visible_len(h);
            write!(f, "{}{}", h.bold(), " ".repeat(pad))?;
        }
        for row in &self.rows {
            writeln!(f)?;
            for (i, cell) in row.iter().enumerate() {
                let pad = self.widths[i] + PAD - visible_len(cell);
                write!(f, "{}{}", cell, " ".repeat(pad))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_ignores_ansi() {
        let mut t = Table::new(vec!["Status", "Name"]);
        t.add_row(vec![format!("{}", "OPEN".green()), "dev".into()]);
        t.add_row(vec!["CLOSED".into(), "prod-db".into()]);
        let out = t.to_string();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        // "CLOSED" is the widest visible status; both name columns start at
        // the same visible offset.
        let strip = |s: &str| ansi_re().replace_all(s, "").to_string();
        let open_row = strip(lines[1]);
        let closed_row = strip(lines[2]);
        assert_eq!(open_row.find("dev"), closed_row.find("prod-db"));
    }

    #[test]
    #[should_panic(expected = "column count mismatch")]
    fn test_row_width_is_enforced() {
        let mut t = Table::new(vec!["A", "B"]);
        t.add_row(vec!["only one".into()]);
    }
}
