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

//! Logging setup for the two process flavors.
//!
//! The CLI logs to stderr so user-facing output on stdout stays clean.
//! The daemon logs to a file that is truncated in place once it exceeds
//! 128 KiB; boringd is a long-running background process and must never
//! grow its log without bound.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

const MAX_LOG_SIZE: u64 = 128 * 1024;

/// Whether debug logging was requested via the `DEBUG` environment variable.
pub fn debug_enabled() -> bool {
    std::env::var_os("DEBUG").map(|v| !v.is_empty()).unwrap_or(false)
}

fn filter() -> EnvFilter {
    if debug_enabled() {
        EnvFilter::new("boring=debug")
    } else {
        EnvFilter::new("boring=info")
    }
}

/// Initialize logging for the short-lived CLI front-end.
pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Initialize logging for the daemon, writing to `path` with rotation.
pub fn init_daemon(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let writer = RotatingWriter::new(file);
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_target(false)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .init();
    Ok(())
}

/// A log sink that truncates the file in place when it grows past the
/// size threshold. Single writer, guarded by a lock; rotation happens
/// between whole log lines.
#[derive(Clone)]
pub struct RotatingWriter {
    file: Arc<Mutex<File>>,
}

impl RotatingWriter {
    pub fn new(file: File) -> Self {
        Self { file: Arc::new(Mutex::new(file)) }
    }

    fn try_rotate(file: &mut File) {
        let Ok(meta) = file.metadata() else { return };
        if meta.len() < MAX_LOG_SIZE {
            return;
        }
        let _ = file.set_len(0);
        let _ = file.seek(SeekFrom::Start(0));
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.file.lock().expect("log writer lock poisoned");
        Self::try_rotate(&mut file);
        file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut file = self.file.lock().expect("log writer lock poisoned");
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_rotation_truncates_in_place() {
        let tmp = NamedTempFile::new().unwrap();
        let file = OpenOptions::new().append(true).open(tmp.path()).unwrap();
        let mut writer = RotatingWriter::new(file);

        let line = vec![b'x'; 1024];
        for _ in 0..130 {
            writer.write_all(&line).unwrap();
        }
        // Passed the threshold at least once, so the file was reset and
        // must be smaller than threshold + one burst.
        let len = std::fs::metadata(tmp.path()).unwrap().len();
        assert!(len <= MAX_LOG_SIZE + 1024, "log grew unbounded: {len}");
    }

    #[test]
    fn test_small_writes_are_untouched() {
        let tmp = NamedTempFile::new().unwrap();
        let file = OpenOptions::new().append(true).open(tmp.path()).unwrap();
        let mut writer = RotatingWriter::new(file);

        writer.write_all(b"hello\n").unwrap();
        writer.write_all(b"world\n").unwrap();
        let content = std::fs::read_to_string(tmp.path()).unwrap();
        assert_eq!(content, "hello\nworld\n");
    }
}
