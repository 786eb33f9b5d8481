// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Track mounted and attached volumes and release each exactly once.
// Author: Lukas Bower

//! Mount bookkeeping.

use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};

/// Detaches a mounted or attached resource.
pub trait Unmount {
    fn unmount(&mut self, target: &Path) -> io::Result<()>;
}

/// `umount2(MNT_DETACH)`; targets that are not mounted count as released.
#[derive(Debug, Default)]
pub struct SysUnmount;

#[cfg(target_os = "linux")]
impl Unmount for SysUnmount {
    fn unmount(&mut self, target: &Path) -> io::Result<()> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_target = CString::new(target.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        // SAFETY: c_target is a valid NUL-terminated path for the duration of the call.
        let rc = unsafe { libc::umount2(c_target.as_ptr(), libc::MNT_DETACH) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINVAL) | Some(libc::ENOENT) => Ok(()),
            _ => Err(err),
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl Unmount for SysUnmount {
    fn unmount(&mut self, _target: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unmount requires Linux",
        ))
    }
}

/// Resources mounted or attached during this boot, in acquisition order.
pub struct MountTable {
    mounted: Vec<PathBuf>,
    unmounter: Box<dyn Unmount>,
}

impl MountTable {
    pub fn new(unmounter: Box<dyn Unmount>) -> Self {
        Self {
            mounted: Vec::new(),
            unmounter,
        }
    }

    /// Remember `target` so it is released at the end of the run.
    pub fn register(&mut self, target: impl Into<PathBuf>) {
        let target = target.into();
        if !self.mounted.contains(&target) {
            self.mounted.push(target);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mounted.is_empty()
    }

    pub fn mounted(&self) -> &[PathBuf] {
        &self.mounted
    }

    /// Release everything in reverse order. Failures are logged, not returned;
    /// a released entry is forgotten either way, so a second call is a no-op.
    pub fn release_all(&mut self) -> usize {
        let mut released = 0;
        while let Some(target) = self.mounted.pop() {
            match self.unmounter.unmount(&target) {
                Ok(()) => {
                    info!("released {}", target.display());
                    released += 1;
                }
                Err(e) => warn!("failed to release {}: {e}", target.display()),
            }
        }
        released
    }
}

impl std::fmt::Debug for MountTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountTable")
            .field("mounted", &self.mounted)
            .finish_non_exhaustive()
    }
}
