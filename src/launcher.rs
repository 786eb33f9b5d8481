// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Measure the next-stage kernel and hand over to it with kexec.
// Author: Lukas Bower

use std::ffi::CString;
use std::fs::File;
use std::io::{self, Seek};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::boot::measurer::Measurer;
use crate::boot::tpm::{DeviceError, TrustAnchor};
use crate::policy::{BootError, Launcher, MeasureError, DEFAULT_PCR};

const KEXEC_FILE_NO_INITRAMFS: u64 = 0x0000_0004;

/// Boots a kernel image (and optional initramfs) via `kexec_file_load`.
///
/// The images are opened once, in [`Launcher::measure_kernel`], and the
/// same handles are later passed to the kernel. Replacing the files on disk
/// after measurement does not change what gets booted.
#[derive(Debug)]
pub struct KexecLauncher {
    kernel: PathBuf,
    initrd: Option<PathBuf>,
    cmdline: String,
    measured: Option<MeasuredImages>,
}

#[derive(Debug)]
struct MeasuredImages {
    kernel: File,
    initrd: Option<File>,
}

/// What `kexec_file_load` is handed.
struct LaunchImage<'a> {
    kernel: &'a File,
    initrd: Option<&'a File>,
    cmdline: CString,
}

impl KexecLauncher {
    pub fn new(kernel: impl Into<PathBuf>, initrd: Option<PathBuf>, cmdline: &str) -> Self {
        Self {
            kernel: kernel.into(),
            initrd,
            cmdline: cmdline.to_owned(),
            measured: None,
        }
    }

    pub fn kernel(&self) -> &Path {
        &self.kernel
    }

    pub fn is_measured(&self) -> bool {
        self.measured.is_some()
    }

    fn launch_image(&self) -> Result<LaunchImage<'_>, BootError> {
        let cmdline =
            CString::new(self.cmdline.as_str()).map_err(|e| BootError::Cmdline(e.to_string()))?;
        let measured = self.measured.as_ref().ok_or(BootError::NotMeasured)?;
        Ok(LaunchImage {
            kernel: &measured.kernel,
            initrd: measured.initrd.as_ref(),
            cmdline,
        })
    }
}

/// Open `path`, hash it into PCR 22 and rewind the handle for the loader.
fn measure_image(
    measurer: &mut Measurer<'_>,
    path: &Path,
    label: &str,
) -> Result<File, DeviceError> {
    let mut file = File::open(path).map_err(|source| DeviceError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let digest = measurer.measure_reader(
        DEFAULT_PCR,
        &mut file,
        &format!("{label}: {}", path.display()),
    )?;
    file.rewind()?;
    debug!("{label} {} sha256 {}", path.display(), hex::encode(digest));
    Ok(file)
}

impl Launcher for KexecLauncher {
    fn measure_kernel(&mut self, measurer: &mut Measurer<'_>) -> Result<(), MeasureError> {
        self.measured = None;
        let kernel = measure_image(measurer, &self.kernel, "Kernel")?;
        let initrd = match &self.initrd {
            Some(path) => Some(measure_image(measurer, path, "Initrd")?),
            None => None,
        };
        measurer.measure_bytes(DEFAULT_PCR, self.cmdline.as_bytes(), "Kernel command line")?;
        self.measured = Some(MeasuredImages { kernel, initrd });
        Ok(())
    }

    fn boot(&mut self, anchor: &mut dyn TrustAnchor) -> BootError {
        let image = match self.launch_image() {
            Ok(image) => image,
            Err(e) => return e,
        };
        if !anchor.is_present() {
            warn!("TPM is disabled, launching an unmeasured kernel");
        }
        if let Err(e) = kexec_load(image.kernel, image.initrd, &image.cmdline) {
            return BootError::Load(e);
        }
        info!("kernel {} loaded, rebooting into it", self.kernel.display());
        BootError::Exec(kexec_reboot())
    }
}

#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "riscv64")
))]
fn kexec_load(kernel: &File, initrd: Option<&File>, cmdline: &CString) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let initrd_fd = initrd.map_or(-1, |f| f.as_raw_fd());
    let flags = if initrd.is_none() {
        KEXEC_FILE_NO_INITRAMFS
    } else {
        0
    };
    let cmdline_len = cmdline.as_bytes_with_nul().len();
    // SAFETY: the descriptors and the NUL-terminated command line outlive the call.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_kexec_file_load,
            kernel.as_raw_fd(),
            initrd_fd,
            cmdline_len as libc::c_ulong,
            cmdline.as_ptr(),
            flags as libc::c_ulong,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "riscv64")
)))]
fn kexec_load(_kernel: &File, _initrd: Option<&File>, _cmdline: &CString) -> io::Result<()> {
    let _ = KEXEC_FILE_NO_INITRAMFS;
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "kexec_file_load is not available on this platform",
    ))
}

/// Returns only when the reboot was refused.
#[cfg(target_os = "linux")]
fn kexec_reboot() -> io::Error {
    // SAFETY: plain syscalls without pointer arguments.
    unsafe {
        libc::sync();
        libc::reboot(libc::LINUX_REBOOT_CMD_KEXEC);
    }
    io::Error::last_os_error()
}

#[cfg(not(target_os = "linux"))]
fn kexec_reboot() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "kexec reboot requires Linux")
}
