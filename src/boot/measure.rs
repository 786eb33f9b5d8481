// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Encode DRTM secure-launch measurement events and provide SHA-256 helpers.
// Author: Lukas Bower

//! Secure-launch measurement events.
//!
//! Every evidence record appended to the DRTM event log is a fixed header
//! followed by one digest and a free-form description:
//!
//! ```text
//! u32 pcr_index | u32 event_type | u32 digest_count | u32 algorithm_id
//! [u8] digest   | u32 description_len | [u8] description
//! ```
//!
//! All integers are little endian and nothing is padded or aligned.

#![forbid(unsafe_code)]

use std::io::{self, Read, Write};

use log::debug;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// TXT specification base value for DRTM event types.
pub const TXT_EVTYPE_BASE: u32 = 0x400;

/// Event type of a secure-launch log entry.
pub const SLAUNCH_EVENT_TYPE: u32 = TXT_EVTYPE_BASE + 0x102;

/// Number of digests carried by each event.
pub const DIGEST_COUNT: u32 = 1;

/// Bytes preceding the digest: pcr, type, count and algorithm id.
pub const EVENT_HEADER_LEN: usize = 16;

/// Digest algorithms understood by the event log, keyed by TPM algorithm id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// `TPM_ALG_SHA256`.
    Sha256,
}

impl HashAlgorithm {
    /// TPM algorithm identifier written into the event.
    pub const fn id(self) -> u16 {
        match self {
            HashAlgorithm::Sha256 => 0x000B,
        }
    }

    /// Size in bytes of a digest produced by this algorithm.
    pub const fn digest_size(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
        }
    }

    /// Map a TPM algorithm identifier back to a known algorithm.
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0x000B => Some(HashAlgorithm::Sha256),
            _ => None,
        }
    }
}

/// Errors raised while serialising a measurement event.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The byte sink refused the write.
    #[error("event sink rejected write: {0}")]
    Io(#[from] io::Error),
    /// The description length does not fit the u32 length field.
    #[error("event description of {0} bytes exceeds the u32 length field")]
    DescriptionTooLong(usize),
}

/// One entry destined for the secure-launch event log.
#[derive(Debug, Clone, Copy)]
pub struct MeasurementEvent<'a> {
    /// PCR the evidence logically extends.
    pub pcr_index: u32,
    /// Algorithm that produced `digest`.
    pub algorithm: HashAlgorithm,
    /// Digest bytes, written verbatim.
    pub digest: &'a [u8],
    /// Human readable description.
    pub description: &'a [u8],
}

impl<'a> MeasurementEvent<'a> {
    /// Build a SHA-256 event.
    pub fn new(pcr_index: u32, digest: &'a [u8], description: &'a [u8]) -> Self {
        Self::with_algorithm(pcr_index, HashAlgorithm::Sha256, digest, description)
    }

    /// Build an event for an explicit digest algorithm.
    pub fn with_algorithm(
        pcr_index: u32,
        algorithm: HashAlgorithm,
        digest: &'a [u8],
        description: &'a [u8],
    ) -> Self {
        Self {
            pcr_index,
            algorithm,
            digest,
            description,
        }
    }

    /// Length of the encoded event in bytes.
    pub fn encoded_len(&self) -> usize {
        EVENT_HEADER_LEN + self.digest.len() + 4 + self.description.len()
    }

    /// Serialise the event into `out`.
    ///
    /// The digest length is not checked here; callers pass what the
    /// algorithm produced.
    pub fn encode_into<W: Write>(&self, out: &mut W) -> Result<(), EncodingError> {
        let description_len: u32 = self
            .description
            .len()
            .try_into()
            .map_err(|_| EncodingError::DescriptionTooLong(self.description.len()))?;
        debug!(
            "encode event: pcr={} type={:#x} count={} alg={:#06x} desc={:?} desc_len={}",
            self.pcr_index,
            SLAUNCH_EVENT_TYPE,
            DIGEST_COUNT,
            self.algorithm.id(),
            String::from_utf8_lossy(self.description),
            description_len
        );
        out.write_all(&self.pcr_index.to_le_bytes())?;
        out.write_all(&SLAUNCH_EVENT_TYPE.to_le_bytes())?;
        out.write_all(&DIGEST_COUNT.to_le_bytes())?;
        out.write_all(&u32::from(self.algorithm.id()).to_le_bytes())?;
        out.write_all(self.digest)?;
        out.write_all(&description_len.to_le_bytes())?;
        out.write_all(self.description)?;
        Ok(())
    }

    /// Serialise the event into a fresh buffer.
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }
}

/// Encode a SHA-256 secure-launch event for `pcr_index`.
pub fn encode_event(
    pcr_index: u32,
    digest: &[u8],
    description: &[u8],
) -> Result<Vec<u8>, EncodingError> {
    MeasurementEvent::new(pcr_index, digest, description).encode()
}

/// SHA-256 of an in-memory buffer.
pub fn sha256_digest(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 of everything `reader` yields.
pub fn sha256_reader<R: Read>(reader: &mut R) -> io::Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    io::copy(reader, &mut hasher)?;
    Ok(hasher.finalize().into())
}

/// Extend a 32‑byte Platform Configuration Register **in place**.
///
/// Pseudocode: `PCR := SHA256(PCR || data)`
pub fn extend_pcr(pcr: &mut [u8; 32], data: &[u8]) {
    let mut hasher = Sha256::new();
    hasher.update(&*pcr);
    hasher.update(data);
    *pcr = hasher.finalize().into();
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FullSink;

    impl Write for FullSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::OutOfMemory, "sink full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn reference_event_layout() {
        let digest = [0u8; 32];
        let bytes = encode_event(17, &digest, b"test").unwrap();
        assert_eq!(bytes.len(), 56);
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), 17);
        assert_eq!(&bytes[16..48], &digest[..]);
        assert_eq!(u32::from_le_bytes(bytes[48..52].try_into().unwrap()), 4);
        assert_eq!(&bytes[52..56], b"test");
    }

    #[test]
    fn header_constants_are_little_endian() {
        let bytes = encode_event(0x0102_0304, &[0xAA; 32], b"").unwrap();
        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[4..8], &0x502u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &1u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &0x000Bu32.to_le_bytes());
    }

    #[test]
    fn length_follows_field_sizes() {
        for (digest_len, desc) in [(0usize, &b""[..]), (20, &b"short"[..]), (32, &b"kernel /boot/vmlinuz"[..])] {
            let digest = vec![7u8; digest_len];
            let event = MeasurementEvent::new(3, &digest, desc);
            let bytes = event.encode().unwrap();
            assert_eq!(bytes.len(), 16 + digest_len + 4 + desc.len());
            assert_eq!(bytes.len(), event.encoded_len());
            assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), 3);
        }
    }

    #[test]
    fn rejecting_sink_surfaces_io_error() {
        let event = MeasurementEvent::new(18, &[0u8; 32], b"x");
        let err = event.encode_into(&mut FullSink).unwrap_err();
        assert!(matches!(err, EncodingError::Io(_)));
    }

    #[test]
    fn pcr_is_not_zero_after_extend() {
        let mut pcr = [0u8; 32];
        extend_pcr(&mut pcr, b"cohesix");
        assert!(pcr.iter().any(|&b| b != 0));
    }

    #[test]
    fn reader_digest_matches_buffer_digest() {
        let data = b"initramfs contents".to_vec();
        let from_reader = sha256_reader(&mut data.as_slice()).unwrap();
        assert_eq!(from_reader, sha256_digest(&data));
    }
}
