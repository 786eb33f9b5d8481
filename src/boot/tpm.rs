// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Trust-anchor (TPM) acquisition, PCR extension and scoped release.
// Author: Lukas Bower

//! Trust anchor handles.
//!
//! The orchestrator acquires exactly one [`TrustAnchor`] per run through an
//! [`AnchorProvider`] and holds it in an [`AnchorGuard`], which releases the
//! handle exactly once whichever way the run ends.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use thiserror::Error;

use crate::boot::measure::{extend_pcr, EncodingError, HashAlgorithm};

/// Default TPM character device.
pub const DEFAULT_TPM_DEVICE: &str = "/dev/tpm0";

/// Number of PCRs in a TPM 2.0 SHA-256 bank.
pub const PCR_COUNT: usize = 24;

const TPM_ST_SESSIONS: u16 = 0x8002;
const TPM_CC_PCR_EXTEND: u32 = 0x0000_0182;
const TPM_RS_PW: u32 = 0x4000_0009;
const TPM_RC_SUCCESS: u32 = 0;
const TPM2_HEADER_SIZE: usize = 10;

/// Failures of the trust anchor or the event-log device.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("device I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("device accepted {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("TPM returned response code {0:#010x}")]
    Tpm(u32),
    #[error("malformed TPM response ({0} bytes)")]
    MalformedResponse(usize),
    #[error("PCR index {0} out of range")]
    PcrIndex(u32),
    #[error("digest is {actual} bytes, algorithm expects {expected}")]
    DigestSize { expected: usize, actual: usize },
    #[error("trust anchor already released")]
    Released,
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// A handle on the platform trust anchor.
pub trait TrustAnchor {
    /// Extend `pcr` with `digest` in the bank of `algorithm`.
    fn extend(&mut self, pcr: u32, algorithm: HashAlgorithm, digest: &[u8])
        -> Result<(), DeviceError>;

    /// Give the handle back to the platform. Further extends fail.
    fn release(&mut self);

    /// `false` when measurements are disabled and nothing is recorded.
    fn is_present(&self) -> bool {
        true
    }
}

/// Source of trust anchors.
pub trait AnchorProvider {
    /// Acquire the anchor for the remainder of the run.
    fn acquire(&mut self) -> Result<Box<dyn TrustAnchor>, DeviceError>;
}

/// Scoped ownership of the acquired anchor: released on drop, exactly once.
pub struct AnchorGuard {
    anchor: Box<dyn TrustAnchor>,
    released: bool,
}

impl AnchorGuard {
    pub fn new(anchor: Box<dyn TrustAnchor>) -> Self {
        Self {
            anchor,
            released: false,
        }
    }

    /// Borrow the anchor for measurement or launch.
    pub fn get_mut(&mut self) -> &mut dyn TrustAnchor {
        self.anchor.as_mut()
    }

    /// Release now instead of at scope end. Idempotent.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.anchor.release();
        }
    }
}

impl Drop for AnchorGuard {
    fn drop(&mut self) {
        self.release();
    }
}

fn check_digest(algorithm: HashAlgorithm, digest: &[u8]) -> Result<(), DeviceError> {
    if digest.len() != algorithm.digest_size() {
        return Err(DeviceError::DigestSize {
            expected: algorithm.digest_size(),
            actual: digest.len(),
        });
    }
    Ok(())
}

/// Build a `TPM2_PCR_Extend` command authorised with an empty password session.
pub fn pcr_extend_command(pcr: u32, algorithm: HashAlgorithm, digest: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(64);
    body.extend_from_slice(&pcr.to_be_bytes());
    // authorisation area: TPM_RS_PW, empty nonce, no attributes, empty hmac
    body.extend_from_slice(&9u32.to_be_bytes());
    body.extend_from_slice(&TPM_RS_PW.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());
    body.push(0);
    body.extend_from_slice(&0u16.to_be_bytes());
    // TPML_DIGEST_VALUES with a single entry
    body.extend_from_slice(&1u32.to_be_bytes());
    body.extend_from_slice(&algorithm.id().to_be_bytes());
    body.extend_from_slice(digest);

    let size = (TPM2_HEADER_SIZE + body.len()) as u32;
    let mut cmd = Vec::with_capacity(size as usize);
    cmd.extend_from_slice(&TPM_ST_SESSIONS.to_be_bytes());
    cmd.extend_from_slice(&size.to_be_bytes());
    cmd.extend_from_slice(&TPM_CC_PCR_EXTEND.to_be_bytes());
    cmd.extend_from_slice(&body);
    cmd
}

fn response_code(resp: &[u8]) -> Result<u32, DeviceError> {
    if resp.len() < TPM2_HEADER_SIZE {
        return Err(DeviceError::MalformedResponse(resp.len()));
    }
    Ok(u32::from_be_bytes([resp[6], resp[7], resp[8], resp[9]]))
}

/// TPM 2.0 reached through its Linux character device.
pub struct DeviceAnchor {
    path: PathBuf,
    file: Option<File>,
}

impl DeviceAnchor {
    pub fn open(path: &Path) -> Result<Self, DeviceError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| DeviceError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        info!("TPM device {} opened", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }
}

impl TrustAnchor for DeviceAnchor {
    fn extend(
        &mut self,
        pcr: u32,
        algorithm: HashAlgorithm,
        digest: &[u8],
    ) -> Result<(), DeviceError> {
        if pcr as usize >= PCR_COUNT {
            return Err(DeviceError::PcrIndex(pcr));
        }
        check_digest(algorithm, digest)?;
        let file = self.file.as_mut().ok_or(DeviceError::Released)?;
        let cmd = pcr_extend_command(pcr, algorithm, digest);
        let written = file.write(&cmd)?;
        if written != cmd.len() {
            return Err(DeviceError::ShortWrite {
                written,
                expected: cmd.len(),
            });
        }
        let mut resp = [0u8; 64];
        let n = file.read(&mut resp)?;
        match response_code(&resp[..n])? {
            TPM_RC_SUCCESS => {
                debug!("PCR[{pcr}] extended with {}", hex::encode(digest));
                Ok(())
            }
            rc => Err(DeviceError::Tpm(rc)),
        }
    }

    fn release(&mut self) {
        if self.file.take().is_some() {
            info!("TPM device {} released", self.path.display());
        }
    }
}

/// Opens [`DeviceAnchor`]s on a fixed device path.
pub struct DeviceAnchorProvider {
    pub path: PathBuf,
}

impl AnchorProvider for DeviceAnchorProvider {
    fn acquire(&mut self) -> Result<Box<dyn TrustAnchor>, DeviceError> {
        Ok(Box::new(DeviceAnchor::open(&self.path)?))
    }
}

/// In-memory SHA-256 PCR bank.
#[derive(Debug, Clone)]
pub struct SoftwarePcrBank {
    pcrs: [[u8; 32]; PCR_COUNT],
    released: bool,
}

impl Default for SoftwarePcrBank {
    fn default() -> Self {
        Self {
            pcrs: [[0u8; 32]; PCR_COUNT],
            released: false,
        }
    }
}

impl SoftwarePcrBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `pcr`, if it exists.
    pub fn pcr(&self, pcr: u32) -> Option<[u8; 32]> {
        self.pcrs.get(pcr as usize).copied()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl TrustAnchor for SoftwarePcrBank {
    fn extend(
        &mut self,
        pcr: u32,
        algorithm: HashAlgorithm,
        digest: &[u8],
    ) -> Result<(), DeviceError> {
        if self.released {
            return Err(DeviceError::Released);
        }
        check_digest(algorithm, digest)?;
        let slot = self
            .pcrs
            .get_mut(pcr as usize)
            .ok_or(DeviceError::PcrIndex(pcr))?;
        extend_pcr(slot, digest);
        Ok(())
    }

    fn release(&mut self) {
        self.released = true;
    }
}

/// Anchor used when the TPM is switched off: nothing is extended or logged.
#[derive(Debug, Default)]
pub struct DisabledAnchor;

impl TrustAnchor for DisabledAnchor {
    fn extend(
        &mut self,
        pcr: u32,
        _algorithm: HashAlgorithm,
        _digest: &[u8],
    ) -> Result<(), DeviceError> {
        debug!("TPM disabled, PCR[{pcr}] not extended");
        Ok(())
    }

    fn release(&mut self) {}

    fn is_present(&self) -> bool {
        false
    }
}

/// Provider for runs with the TPM disabled.
#[derive(Debug, Default)]
pub struct DisabledAnchorProvider;

impl AnchorProvider for DisabledAnchorProvider {
    fn acquire(&mut self) -> Result<Box<dyn TrustAnchor>, DeviceError> {
        warn!("TPM is disabled. No measurements will be taken.");
        Ok(Box::new(DisabledAnchor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct CountingAnchor(Rc<Cell<u32>>);

    impl TrustAnchor for CountingAnchor {
        fn extend(&mut self, _: u32, _: HashAlgorithm, _: &[u8]) -> Result<(), DeviceError> {
            Ok(())
        }

        fn release(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn guard_releases_once() {
        let releases = Rc::new(Cell::new(0));
        {
            let mut guard = AnchorGuard::new(Box::new(CountingAnchor(releases.clone())));
            guard.release();
            guard.release();
        }
        assert_eq!(releases.get(), 1);
    }

    #[test]
    fn guard_releases_on_drop() {
        let releases = Rc::new(Cell::new(0));
        drop(AnchorGuard::new(Box::new(CountingAnchor(releases.clone()))));
        assert_eq!(releases.get(), 1);
    }

    #[test]
    fn extend_command_layout() {
        let digest = [0x11u8; 32];
        let cmd = pcr_extend_command(17, HashAlgorithm::Sha256, &digest);
        assert_eq!(cmd.len(), 65);
        assert_eq!(&cmd[0..2], &[0x80, 0x02]);
        assert_eq!(u32::from_be_bytes(cmd[2..6].try_into().unwrap()), 65);
        assert_eq!(u32::from_be_bytes(cmd[6..10].try_into().unwrap()), 0x182);
        assert_eq!(u32::from_be_bytes(cmd[10..14].try_into().unwrap()), 17);
        assert_eq!(&cmd[31..33], &[0x00, 0x0B]);
        assert_eq!(&cmd[33..], &digest[..]);
    }

    #[test]
    fn software_bank_extends_and_rejects_after_release() {
        let mut bank = SoftwarePcrBank::new();
        let digest = [0x22u8; 32];
        bank.extend(22, HashAlgorithm::Sha256, &digest).unwrap();
        let mut expected = [0u8; 32];
        extend_pcr(&mut expected, &digest);
        assert_eq!(bank.pcr(22), Some(expected));

        assert!(matches!(
            bank.extend(24, HashAlgorithm::Sha256, &digest),
            Err(DeviceError::PcrIndex(24))
        ));
        assert!(matches!(
            bank.extend(1, HashAlgorithm::Sha256, &digest[..20]),
            Err(DeviceError::DigestSize { .. })
        ));

        bank.release();
        assert!(matches!(
            bank.extend(22, HashAlgorithm::Sha256, &digest),
            Err(DeviceError::Released)
        ));
    }

    #[test]
    fn short_response_is_malformed() {
        assert!(matches!(
            response_code(&[0x80, 0x01, 0, 0]),
            Err(DeviceError::MalformedResponse(4))
        ));
        assert_eq!(
            response_code(&[0x80, 0x01, 0, 0, 0, 10, 0, 0, 0x01, 0x01]).unwrap(),
            0x101
        );
    }
}
