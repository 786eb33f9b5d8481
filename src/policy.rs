// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Capability traits supplied by the boot policy and a cmdline-backed policy source.
// Author: Lukas Bower

//! Boot policy capabilities.
//!
//! A [`Policy`] is an opaque bundle: an ordered list of evidence
//! [`Collector`]s, the [`Launcher`] for the next-stage kernel and the
//! [`EventLog`] to finalise. The orchestrator only calls through these traits.

use std::io;
use std::path::PathBuf;

use log::{debug, info};
use thiserror::Error;

use crate::boot::eventlog::{EventLogError, SecureLaunchLog};
use crate::boot::measurer::Measurer;
use crate::boot::tpm::{DeviceError, TrustAnchor};
use crate::bootloader::args::BootArgs;
use crate::launcher::KexecLauncher;
use crate::mounts::MountTable;
use crate::persist::PersistQueue;

/// PCR extended with policy and kernel measurements.
pub const DEFAULT_PCR: u32 = 22;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("no policy found: {0}")]
    NotFound(String),
    #[error("invalid policy: {0}")]
    Invalid(String),
    #[error("measuring policy failed: {0}")]
    Device(#[from] DeviceError),
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum MeasureError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum BootError {
    #[error("kernel was not measured before launch")]
    NotMeasured,
    #[error("invalid kernel command line: {0}")]
    Cmdline(String),
    #[error("kexec_file_load failed: {0}")]
    Load(#[source] io::Error),
    #[error("reboot into loaded kernel failed: {0}")]
    Exec(#[source] io::Error),
    #[error("launch is not supported on this platform")]
    Unsupported,
    #[error("{0}")]
    Failed(String),
}

/// Gathers one category of evidence and records it through the [`Measurer`].
pub trait Collector {
    fn name(&self) -> &str;
    fn collect(&mut self, measurer: &mut Measurer<'_>) -> Result<(), CollectError>;
}

/// Measures and boots the next-stage kernel.
pub trait Launcher {
    fn measure_kernel(&mut self, measurer: &mut Measurer<'_>) -> Result<(), MeasureError>;

    /// Transfer control to the measured kernel. Never returns on success, so
    /// whatever it returns is the reason the launch failed.
    fn boot(&mut self, anchor: &mut dyn TrustAnchor) -> BootError;
}

/// Finalises the accumulated event log before persistence.
pub trait EventLog {
    fn parse(&mut self, persist: &mut PersistQueue) -> Result<(), EventLogError>;
}

/// Capabilities selected by the platform policy.
pub struct Policy {
    pub collectors: Vec<Box<dyn Collector>>,
    pub launcher: Box<dyn Launcher>,
    pub event_log: Box<dyn EventLog>,
    pub debug_artifacts: Option<PathBuf>,
}

impl std::fmt::Debug for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.collectors.iter().map(|c| c.name()).collect();
        f.debug_struct("Policy")
            .field("collectors", &names)
            .field("debug_artifacts", &self.debug_artifacts)
            .finish_non_exhaustive()
    }
}

/// Locates, measures and parses the platform policy.
pub trait PolicySource {
    fn acquire(
        &mut self,
        measurer: &mut Measurer<'_>,
        mounts: &mut MountTable,
    ) -> Result<Policy, PolicyError>;
}

/// Policy assembled from `mboot.*` kernel flags.
///
/// * `mboot.kernel=` – kernel image to launch (required)
/// * `mboot.initrd=` – initramfs
/// * `mboot.append=` – command line for the launched kernel
/// * `mboot.artifacts=` – directory receiving the event log copy
///
/// It brings no evidence collectors of its own.
pub struct CmdlinePolicy {
    args: BootArgs,
    eventlog: PathBuf,
}

impl CmdlinePolicy {
    pub fn new(args: BootArgs, eventlog: impl Into<PathBuf>) -> Self {
        Self {
            args,
            eventlog: eventlog.into(),
        }
    }

    fn describe(&self) -> String {
        ["mboot.kernel", "mboot.initrd", "mboot.append", "mboot.artifacts"]
            .iter()
            .filter_map(|k| self.args.get(k).map(|v| format!("{k}={v}")))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl PolicySource for CmdlinePolicy {
    fn acquire(
        &mut self,
        measurer: &mut Measurer<'_>,
        _mounts: &mut MountTable,
    ) -> Result<Policy, PolicyError> {
        let kernel = self
            .args
            .get("mboot.kernel")
            .ok_or_else(|| PolicyError::NotFound("mboot.kernel flag is not set".into()))?;
        if kernel.is_empty() {
            return Err(PolicyError::Invalid("mboot.kernel is empty".into()));
        }
        let policy_text = self.describe();
        debug!("policy: {policy_text}");
        measurer.measure_bytes(DEFAULT_PCR, policy_text.as_bytes(), "Policy: kernel command line")?;

        let launcher = KexecLauncher::new(
            kernel,
            self.args.get("mboot.initrd").map(PathBuf::from),
            self.args.get("mboot.append").unwrap_or_default(),
        );
        let debug_artifacts = self.args.get("mboot.artifacts").map(PathBuf::from);
        info!("policy selects kernel {kernel}");
        Ok(Policy {
            collectors: Vec::new(),
            launcher: Box::new(launcher),
            event_log: Box::new(SecureLaunchLog::new(
                self.eventlog.clone(),
                debug_artifacts.clone(),
            )),
            debug_artifacts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::eventlog::{decode_events, MemorySink};
    use crate::boot::tpm::SoftwarePcrBank;
    use crate::bootloader::args::parse_cmdline;
    use crate::mounts::SysUnmount;

    #[test]
    fn cmdline_policy_measures_itself() {
        let args = parse_cmdline(
            "mboot.kernel=/boot/vmlinuz mboot.initrd=/boot/initrd mboot.artifacts=/tmp/sl",
        );
        let mut source = CmdlinePolicy::new(args, "/tmp/eventlog");
        let mut bank = SoftwarePcrBank::new();
        let mut sink = MemorySink::new();
        let mut mounts = MountTable::new(Box::new(SysUnmount));
        let policy = {
            let mut m = Measurer::new(&mut bank, &mut sink);
            source.acquire(&mut m, &mut mounts).unwrap()
        };
        assert!(policy.collectors.is_empty());
        assert_eq!(policy.debug_artifacts, Some(PathBuf::from("/tmp/sl")));
        let events = decode_events(&sink.concatenated()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pcr_index, DEFAULT_PCR);
        assert_ne!(bank.pcr(DEFAULT_PCR), Some([0u8; 32]));
    }

    #[test]
    fn missing_kernel_flag_is_not_found() {
        let mut source = CmdlinePolicy::new(parse_cmdline("quiet"), "/tmp/eventlog");
        let mut bank = SoftwarePcrBank::new();
        let mut sink = MemorySink::new();
        let mut mounts = MountTable::new(Box::new(SysUnmount));
        let mut m = Measurer::new(&mut bank, &mut sink);
        assert!(matches!(
            source.acquire(&mut m, &mut mounts),
            Err(PolicyError::NotFound(_))
        ));
        assert!(sink.events().is_empty());
    }
}
