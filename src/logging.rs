// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Streaming or buffered diagnostics behind the `log` facade.
// Author: Lukas Bower

//! Diagnostics sink.
//!
//! In debug mode every record goes straight to stderr through
//! `env_logger`. Otherwise records are kept in memory and only written out
//! by [`Diagnostics::dump`] when the boot fails, so a successful boot stays
//! quiet.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    Streaming,
    Buffered,
}

struct Inner {
    mode: LogMode,
    level: LevelFilter,
    stream: env_logger::Logger,
    buffer: Mutex<Vec<String>>,
}

/// Process logger. Clones share the same buffer.
#[derive(Clone)]
pub struct Diagnostics {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("mode", &self.inner.mode)
            .field("level", &self.inner.level)
            .finish_non_exhaustive()
    }
}

impl Diagnostics {
    pub fn new(debug: bool) -> Self {
        let (mode, level) = if debug {
            (LogMode::Streaming, LevelFilter::Debug)
        } else {
            (LogMode::Buffered, LevelFilter::Info)
        };
        let stream = env_logger::Builder::new()
            .filter_level(level)
            .format_timestamp_millis()
            .target(env_logger::Target::Stderr)
            .build();
        Self {
            inner: Arc::new(Inner {
                mode,
                level,
                stream,
                buffer: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn mode(&self) -> LogMode {
        self.inner.mode
    }

    /// Install as the global `log` backend.
    pub fn install(&self) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(self.clone()))?;
        log::set_max_level(self.inner.level);
        Ok(())
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<String>> {
        self.inner
            .buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffered lines not yet dumped.
    pub fn lines(&self) -> Vec<String> {
        self.buffer().clone()
    }

    /// Write and clear the buffered lines. Returns how many were written.
    pub fn dump(&self, out: &mut dyn Write) -> io::Result<usize> {
        let lines = std::mem::take(&mut *self.buffer());
        for line in &lines {
            writeln!(out, "{line}")?;
        }
        out.flush()?;
        Ok(lines.len())
    }
}

impl Log for Diagnostics {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.inner.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        match self.inner.mode {
            LogMode::Streaming => self.inner.stream.log(record),
            LogMode::Buffered => self.buffer().push(format!(
                "[{:<5} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )),
        }
    }

    fn flush(&self) {
        self.inner.stream.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    fn emit(diag: &Diagnostics, level: Level, msg: &str) {
        diag.log(
            &Record::builder()
                .args(format_args!("{msg}"))
                .level(level)
                .target("mboot")
                .build(),
        );
    }

    #[test]
    fn buffered_mode_keeps_info_and_drops_debug() {
        let diag = Diagnostics::new(false);
        assert_eq!(diag.mode(), LogMode::Buffered);
        emit(&diag, Level::Info, "attaching volume");
        emit(&diag, Level::Debug, "noise");
        let lines = diag.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("attaching volume"));
        assert!(lines[0].contains("mboot"));
    }

    #[test]
    fn dump_writes_then_clears() {
        let diag = Diagnostics::new(false);
        emit(&diag, Level::Warn, "collector failed");
        emit(&diag, Level::Error, "kernel measurement failed");
        let mut out = Vec::new();
        assert_eq!(diag.dump(&mut out).unwrap(), 2);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("collector failed"));
        assert!(text.ends_with("kernel measurement failed\n"));

        let mut again = Vec::new();
        assert_eq!(diag.dump(&mut again).unwrap(), 0);
        assert!(again.is_empty());
    }

    #[test]
    fn clones_share_the_buffer() {
        let diag = Diagnostics::new(false);
        let other = diag.clone();
        emit(&other, Level::Info, "from clone");
        assert_eq!(diag.lines().len(), 1);
    }

    #[test]
    fn streaming_mode_buffers_nothing() {
        let diag = Diagnostics::new(true);
        assert_eq!(diag.mode(), LogMode::Streaming);
        assert!(diag.enabled(&Metadata::builder().level(Level::Debug).build()));
        emit(&diag, Level::Info, "straight to stderr");
        assert!(diag.lines().is_empty());
    }
}
