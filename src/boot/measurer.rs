// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Measurement capability handed to collectors and launchers.
// Author: Lukas Bower

use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::debug;

use crate::boot::eventlog::{record_event, EventSink};
use crate::boot::measure::{sha256_digest, sha256_reader, HashAlgorithm};
use crate::boot::tpm::{DeviceError, TrustAnchor};

/// Pairs the trust anchor with the event sink: every PCR extension made
/// through a `Measurer` is also written to the event log.
pub struct Measurer<'a> {
    anchor: &'a mut dyn TrustAnchor,
    sink: &'a mut dyn EventSink,
}

impl<'a> Measurer<'a> {
    pub fn new(anchor: &'a mut dyn TrustAnchor, sink: &'a mut dyn EventSink) -> Self {
        Self { anchor, sink }
    }

    /// `false` in no-TPM mode; measurements are then skipped.
    pub fn is_enabled(&self) -> bool {
        self.anchor.is_present()
    }

    /// Extend `pcr` with an already computed SHA-256 `digest` and log it.
    pub fn extend_digest(
        &mut self,
        pcr: u32,
        digest: &[u8],
        description: &str,
    ) -> Result<(), DeviceError> {
        if !self.is_enabled() {
            debug!("TPM disabled, skipping measurement: {description}");
            return Ok(());
        }
        self.anchor.extend(pcr, HashAlgorithm::Sha256, digest)?;
        record_event(&mut *self.sink, pcr, digest, description)
    }

    /// Hash `data` into `pcr`. Returns the digest.
    pub fn measure_bytes(
        &mut self,
        pcr: u32,
        data: &[u8],
        description: &str,
    ) -> Result<[u8; 32], DeviceError> {
        let digest = sha256_digest(data);
        self.extend_digest(pcr, &digest, description)?;
        Ok(digest)
    }

    /// Hash the file at `path` into `pcr`. Returns the digest.
    pub fn measure_file(
        &mut self,
        pcr: u32,
        path: &Path,
        description: &str,
    ) -> Result<[u8; 32], DeviceError> {
        let mut file = File::open(path).map_err(|source| DeviceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        self.measure_reader(pcr, &mut file, description)
    }

    /// Hash everything `reader` yields into `pcr`. Returns the digest.
    pub fn measure_reader<R: Read>(
        &mut self,
        pcr: u32,
        reader: &mut R,
        description: &str,
    ) -> Result<[u8; 32], DeviceError> {
        let digest = sha256_reader(reader)?;
        self.extend_digest(pcr, &digest, description)?;
        Ok(digest)
    }
}
