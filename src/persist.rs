// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Queue debug artifacts during boot and write them out in one flush.
// Author: Lukas Bower

//! Deferred artifact persistence.
//!
//! Nothing touches disk while evidence is collected; artifacts are queued and
//! written in order by [`PersistQueue::flush`] just before mounts are
//! released.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to create {dir} for {tag}: {source}")]
    CreateDir {
        tag: String,
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path} for {tag}: {source}")]
    Write {
        tag: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One queued artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistRequest {
    pub tag: String,
    pub data: Vec<u8>,
    pub destination: PathBuf,
    pub filename: String,
}

impl PersistRequest {
    pub fn target(&self) -> PathBuf {
        self.destination.join(&self.filename)
    }
}

#[derive(Debug, Default)]
pub struct PersistQueue {
    pending: Vec<PersistRequest>,
}

impl PersistQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `data` for `destination/filename`.
    pub fn enqueue(&mut self, tag: &str, data: Vec<u8>, destination: &Path, filename: &str) {
        debug!(
            "persist: queued {tag} ({} bytes) for {}",
            data.len(),
            destination.join(filename).display()
        );
        self.pending.push(PersistRequest {
            tag: tag.to_owned(),
            data,
            destination: destination.to_path_buf(),
            filename: filename.to_owned(),
        });
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> &[PersistRequest] {
        &self.pending
    }

    /// Write every queued artifact, oldest first.
    ///
    /// Stops at the first failure; the failed artifact and everything after it
    /// stay queued.
    pub fn flush(&mut self) -> Result<(), PersistError> {
        let total = self.pending.len();
        while let Some(req) = self.pending.first() {
            fs::create_dir_all(&req.destination).map_err(|source| PersistError::CreateDir {
                tag: req.tag.clone(),
                dir: req.destination.clone(),
                source,
            })?;
            let path = req.target();
            fs::write(&path, &req.data).map_err(|source| PersistError::Write {
                tag: req.tag.clone(),
                path: path.clone(),
                source,
            })?;
            info!("persist: wrote {} to {}", req.tag, path.display());
            self.pending.remove(0);
        }
        debug!("persist: flushed {total} artifacts");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn flush_writes_in_order_and_empties_queue() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("slaunch");
        let mut queue = PersistQueue::new();
        queue.enqueue("eventlog", b"one".to_vec(), &dest, "eventlog.json");
        queue.enqueue("policy", b"two".to_vec(), &dest, "policy.txt");
        queue.flush().unwrap();
        assert!(queue.is_empty());
        assert_eq!(fs::read(dest.join("eventlog.json")).unwrap(), b"one");
        assert_eq!(fs::read(dest.join("policy.txt")).unwrap(), b"two");
    }

    #[test]
    fn flush_failure_keeps_remaining_items() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"").unwrap();
        let good = dir.path().join("ok");
        let mut queue = PersistQueue::new();
        queue.enqueue("first", b"a".to_vec(), &good, "a");
        queue.enqueue("second", b"b".to_vec(), &blocker.join("sub"), "b");
        let err = queue.flush().unwrap_err();
        assert!(matches!(err, PersistError::CreateDir { ref tag, .. } if tag == "second"));
        assert_eq!(queue.len(), 1);
        assert!(good.join("a").exists());
    }
}
