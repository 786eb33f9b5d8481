// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Fail-closed measured-boot state machine.
// Author: Lukas Bower

//! Boot orchestration.
//!
//! Steps run strictly in order:
//!
//! ```text
//! Init → AnchorAcquired → PolicyAcquired → EvidenceCollected → KernelMeasured
//!      → LogFinalized → Persisted → Unmounted → Launched
//! ```
//!
//! Remote volume attach and individual collectors are best effort. Every
//! other step is fatal: the run stops, the [`Cleanup`] finalizer releases
//! mounts, dumps buffered diagnostics and terminates with status 1. The
//! next-stage kernel is never reached after a fatal error.

use std::convert::Infallible;
use std::fmt;
use std::io::Write;

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::boot::eventlog::{EventLogError, EventSink};
use crate::boot::measurer::Measurer;
use crate::boot::tpm::{AnchorGuard, AnchorProvider, DeviceError};
use crate::config::InitConfig;
use crate::logging::Diagnostics;
use crate::mounts::{MountTable, Unmount};
use crate::netroot::{self, NetrootError, NetrootFlags, VolumeAttacher};
use crate::persist::{PersistError, PersistQueue};
use crate::policy::{BootError, MeasureError, PolicyError, PolicySource};

pub mod cleanup;

pub use cleanup::{Cleanup, ProcessExit, Terminate, FAILURE_STATUS};

/// Progress of a boot run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BootState {
    Init,
    AnchorAcquired,
    PolicyAcquired,
    EvidenceCollected,
    KernelMeasured,
    LogFinalized,
    Persisted,
    Unmounted,
    /// Control left this process; never observed from inside it.
    Launched,
    Failed,
}

impl fmt::Display for BootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootState::Init => "init",
            BootState::AnchorAcquired => "anchor acquired",
            BootState::PolicyAcquired => "policy acquired",
            BootState::EvidenceCollected => "evidence collected",
            BootState::KernelMeasured => "kernel measured",
            BootState::LogFinalized => "event log finalized",
            BootState::Persisted => "artifacts persisted",
            BootState::Unmounted => "unmounted",
            BootState::Launched => "launched",
            BootState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Fatal boot errors.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("acquiring trust anchor failed: {0}")]
    Anchor(#[from] DeviceError),
    #[error("acquiring policy failed: {0}")]
    Policy(#[from] PolicyError),
    #[error("measuring kernel failed: {0}")]
    Measure(#[from] MeasureError),
    #[error("finalizing event log failed: {0}")]
    EventLog(#[from] EventLogError),
    #[error("persisting artifacts failed: {0}")]
    Persist(#[from] PersistError),
    #[error("launch failed: {0}")]
    Boot(#[from] BootError),
}

/// Outcome of [`Orchestrator::run`]; a run that returns has failed.
#[derive(Debug)]
pub struct Failure {
    /// Last state completed before the fatal error.
    pub reached: BootState,
    /// States entered, in order, ending with [`BootState::Failed`].
    pub trail: Vec<BootState>,
    pub cause: InitError,
}

/// Platform collaborators used by a run.
pub struct Platform {
    pub anchors: Box<dyn AnchorProvider>,
    pub policies: Box<dyn PolicySource>,
    pub sink: Box<dyn EventSink>,
    /// `None` disables remote volume attach.
    pub attacher: Option<Box<dyn VolumeAttacher>>,
    pub unmounter: Box<dyn Unmount>,
    pub terminator: Box<dyn Terminate>,
    /// Receives buffered diagnostics on failure.
    pub console: Box<dyn Write>,
}

/// The measured-boot state machine.
///
/// The cleanup finalizer is armed at construction and owned by the
/// orchestrator, so dropping it releases mounts and terminates even if
/// [`run`](Self::run) never completes.
pub struct Orchestrator {
    netroot: NetrootFlags,
    anchors: Box<dyn AnchorProvider>,
    policies: Box<dyn PolicySource>,
    sink: Box<dyn EventSink>,
    attacher: Option<Box<dyn VolumeAttacher>>,
    cleanup: Cleanup,
    state: BootState,
    trail: Vec<BootState>,
}

impl Orchestrator {
    pub fn new(
        config: &InitConfig,
        netroot: NetrootFlags,
        platform: Platform,
        diagnostics: Diagnostics,
    ) -> Self {
        let cleanup = Cleanup::new(
            MountTable::new(platform.unmounter),
            diagnostics,
            platform.console,
            config.grace,
            platform.terminator,
        );
        Self {
            netroot,
            anchors: platform.anchors,
            policies: platform.policies,
            sink: platform.sink,
            attacher: platform.attacher,
            cleanup,
            state: BootState::Init,
            trail: vec![BootState::Init],
        }
    }

    pub fn state(&self) -> BootState {
        self.state
    }

    /// Drive the boot. Returns only when the boot failed, after cleanup ran.
    pub fn run(mut self) -> Failure {
        let cause = match self.drive() {
            Ok(never) => match never {},
            Err(e) => e,
        };
        error!("boot failed after '{}': {cause}", self.state);
        let reached = self.state;
        self.enter(BootState::Failed);
        let trail = std::mem::take(&mut self.trail);
        self.cleanup.run();
        Failure {
            reached,
            trail,
            cause,
        }
    }

    fn enter(&mut self, state: BootState) {
        debug!("boot state: {state}");
        self.state = state;
        self.trail.push(state);
    }

    fn attach_remote_volume(&mut self) {
        let Some(attacher) = self.attacher.as_mut() else {
            return;
        };
        match netroot::attach_netroot(&self.netroot, attacher.as_mut(), self.cleanup.mounts_mut())
        {
            Ok(devices) => info!("remote volume attached as {devices:?}"),
            Err(NetrootError::MissingFlag(flag)) => debug!("{flag} not set, no remote volume"),
            Err(e) => warn!("continuing without remote volume: {e}"),
        }
    }

    fn drive(&mut self) -> Result<Infallible, InitError> {
        self.attach_remote_volume();

        let mut anchor = AnchorGuard::new(self.anchors.acquire()?);
        self.enter(BootState::AnchorAcquired);

        let mut policy = {
            let mut measurer = Measurer::new(anchor.get_mut(), self.sink.as_mut());
            self.policies
                .acquire(&mut measurer, self.cleanup.mounts_mut())?
        };
        if let Some(dir) = &policy.debug_artifacts {
            debug!("debug artifacts go to {}", dir.display());
        }
        self.enter(BootState::PolicyAcquired);

        for collector in policy.collectors.iter_mut() {
            let mut measurer = Measurer::new(anchor.get_mut(), self.sink.as_mut());
            match collector.collect(&mut measurer) {
                Ok(()) => debug!("collector {} done", collector.name()),
                Err(e) => warn!("collector {} failed: {e}", collector.name()),
            }
        }
        self.enter(BootState::EvidenceCollected);

        {
            let mut measurer = Measurer::new(anchor.get_mut(), self.sink.as_mut());
            policy.launcher.measure_kernel(&mut measurer)?;
        }
        self.enter(BootState::KernelMeasured);

        let mut persist = PersistQueue::new();
        policy.event_log.parse(&mut persist)?;
        self.enter(BootState::LogFinalized);

        persist.flush()?;
        self.enter(BootState::Persisted);

        let released = self.cleanup.mounts_mut().release_all();
        debug!("released {released} mount(s) before launch");
        self.enter(BootState::Unmounted);

        info!("launching measured kernel");
        Err(policy.launcher.boot(anchor.get_mut()).into())
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state)
            .field("netroot", &self.netroot)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_ordered_along_the_happy_path() {
        let path = [
            BootState::Init,
            BootState::AnchorAcquired,
            BootState::PolicyAcquired,
            BootState::EvidenceCollected,
            BootState::KernelMeasured,
            BootState::LogFinalized,
            BootState::Persisted,
            BootState::Unmounted,
            BootState::Launched,
        ];
        assert!(path.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn init_error_names_the_failed_step() {
        let e = InitError::from(MeasureError::Failed("hash mismatch".into()));
        assert_eq!(e.to_string(), "measuring kernel failed: hash mismatch");
        assert_eq!(BootState::KernelMeasured.to_string(), "kernel measured");
    }
}
