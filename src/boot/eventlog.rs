// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Append measurement events to the DRTM log and finalise it for persistence.
// Author: Lukas Bower

//! DRTM event log plumbing.
//!
//! [`EventSink`] is the append-only write side used while measuring.
//! [`SecureLaunchLog`] is the read side: once every measurement is in, it
//! decodes the accumulated log and queues a readable copy for persistence.

use std::cell::RefCell;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{debug, info};
use serde::Serialize;
use thiserror::Error;

use crate::boot::measure::{encode_event, HashAlgorithm};
use crate::boot::tpm::DeviceError;
use crate::persist::PersistQueue;
use crate::policy::EventLog;

/// securityfs node exposing the secure-launch event log.
pub const DEFAULT_EVENTLOG_PATH: &str = "/sys/kernel/security/slaunch/eventlog";

/// Append-only destination for encoded events.
pub trait EventSink {
    /// Append one encoded event. A partial write is an error.
    fn record(&mut self, encoded: &[u8]) -> Result<(), DeviceError>;
}

/// Encode a SHA-256 event and hand it to `sink`.
pub fn record_event(
    sink: &mut dyn EventSink,
    pcr: u32,
    digest: &[u8],
    description: &str,
) -> Result<(), DeviceError> {
    debug!("{description}");
    let encoded = encode_event(pcr, digest, description.as_bytes())?;
    sink.record(&encoded)
}

/// Writes each event to a file with a single `write(2)`.
#[derive(Debug, Clone)]
pub struct SecurityFsSink {
    path: PathBuf,
}

impl SecurityFsSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for SecurityFsSink {
    fn default() -> Self {
        Self::new(DEFAULT_EVENTLOG_PATH)
    }
}

impl EventSink for SecurityFsSink {
    fn record(&mut self, encoded: &[u8]) -> Result<(), DeviceError> {
        let mut file = OpenOptions::new()
            .write(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| DeviceError::Open {
                path: self.path.clone(),
                source,
            })?;
        write_event(&mut file, encoded)
    }
}

/// Hand `encoded` to the log interface in a single write. The securityfs
/// node takes one event per write; a partial write is not resumed.
pub fn write_event<W: Write>(out: &mut W, encoded: &[u8]) -> Result<(), DeviceError> {
    let written = out.write(encoded)?;
    if written != encoded.len() {
        return Err(DeviceError::ShortWrite {
            written,
            expected: encoded.len(),
        });
    }
    Ok(())
}

/// In-memory sink; clones share the same event list.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded event, oldest first.
    pub fn events(&self) -> Vec<Vec<u8>> {
        self.events.borrow().clone()
    }

    /// All events concatenated the way the kernel log stores them.
    pub fn concatenated(&self) -> Vec<u8> {
        self.events.borrow().concat()
    }
}

impl EventSink for MemorySink {
    fn record(&mut self, encoded: &[u8]) -> Result<(), DeviceError> {
        self.events.borrow_mut().push(encoded.to_vec());
        Ok(())
    }
}

/// Errors raised while finalising the event log.
#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("failed to read event log {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("event log truncated at offset {offset}: need {needed} bytes, {available} left")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("event at offset {offset} carries no digests")]
    NoDigests { offset: usize },
    #[error("event at offset {offset} uses unknown algorithm {id:#06x}")]
    UnknownAlgorithm { offset: usize, id: u32 },
    #[error("failed to render event log: {0}")]
    Render(#[from] serde_json::Error),
}

/// One digest of a decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDigest {
    pub algorithm: HashAlgorithm,
    pub digest: Vec<u8>,
}

/// An event read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    pub pcr_index: u32,
    pub event_type: u32,
    pub digests: Vec<EventDigest>,
    pub description: Vec<u8>,
}

#[derive(Serialize)]
struct RenderedDigest {
    algorithm: u16,
    digest: String,
}

#[derive(Serialize)]
struct RenderedEvent {
    pcr: u32,
    event_type: u32,
    digests: Vec<RenderedDigest>,
    description: String,
}

impl From<&DecodedEvent> for RenderedEvent {
    fn from(event: &DecodedEvent) -> Self {
        RenderedEvent {
            pcr: event.pcr_index,
            event_type: event.event_type,
            digests: event
                .digests
                .iter()
                .map(|d| RenderedDigest {
                    algorithm: d.algorithm.id(),
                    digest: hex::encode(&d.digest),
                })
                .collect(),
            description: String::from_utf8_lossy(&event.description).into_owned(),
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], EventLogError> {
        let available = self.data.len() - self.pos;
        if n > available {
            return Err(EventLogError::Truncated {
                offset: self.pos,
                needed: n,
                available,
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, EventLogError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn done(&self) -> bool {
        self.pos >= self.data.len()
    }
}

/// Decode a concatenation of secure-launch events.
pub fn decode_events(data: &[u8]) -> Result<Vec<DecodedEvent>, EventLogError> {
    let mut reader = Reader { data, pos: 0 };
    let mut events = Vec::new();
    while !reader.done() {
        let start = reader.pos;
        let pcr_index = reader.u32()?;
        let event_type = reader.u32()?;
        let count = reader.u32()?;
        if count == 0 {
            return Err(EventLogError::NoDigests { offset: start });
        }
        let mut digests = Vec::new();
        for _ in 0..count {
            let id = reader.u32()?;
            let algorithm = HashAlgorithm::from_id(id)
                .ok_or(EventLogError::UnknownAlgorithm { offset: start, id })?;
            let digest = reader.take(algorithm.digest_size())?.to_vec();
            digests.push(EventDigest { algorithm, digest });
        }
        let description_len = reader.u32()? as usize;
        let description = reader.take(description_len)?.to_vec();
        events.push(DecodedEvent {
            pcr_index,
            event_type,
            digests,
            description,
        });
    }
    Ok(events)
}

/// The secure-launch event log as an [`EventLog`] capability.
#[derive(Debug, Clone)]
pub struct SecureLaunchLog {
    path: PathBuf,
    destination: Option<PathBuf>,
    filename: String,
}

impl SecureLaunchLog {
    /// Read the log from `path`; queue a copy under `destination` if given.
    pub fn new(path: impl Into<PathBuf>, destination: Option<PathBuf>) -> Self {
        Self {
            path: path.into(),
            destination,
            filename: "eventlog.json".to_owned(),
        }
    }

    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = filename.to_owned();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventLog for SecureLaunchLog {
    fn parse(&mut self, persist: &mut PersistQueue) -> Result<(), EventLogError> {
        let raw = fs::read(&self.path).map_err(|source| EventLogError::Read {
            path: self.path.clone(),
            source,
        })?;
        let events = decode_events(&raw)?;
        info!("event log {} holds {} entries", self.path.display(), events.len());
        for event in &events {
            debug!(
                "PCR[{}] type={:#x} {}",
                event.pcr_index,
                event.event_type,
                String::from_utf8_lossy(&event.description)
            );
        }
        if let Some(dest) = &self.destination {
            let rendered: Vec<RenderedEvent> = events.iter().map(RenderedEvent::from).collect();
            let json = serde_json::to_vec_pretty(&rendered)?;
            persist.enqueue("eventlog", json, dest, &self.filename);
        }
        Ok(())
    }
}
