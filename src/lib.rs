// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v2.0
// Date Modified: 2026-10-18
// Author: Lukas Bower

//! Measured-boot init: measures the next-stage kernel into the TPM, keeps the
//! secure-launch event log and launches the kernel only when every required
//! measurement succeeded.

/// Event encoding, trust anchor and event log.
pub mod boot;

/// Kernel command-line inputs.
pub mod bootloader;

/// CLI and resolved runtime configuration.
pub mod config;

/// Kexec based next-stage launcher.
pub mod launcher;

/// Streaming or buffered diagnostics.
pub mod logging;

/// Mount bookkeeping released before launch or on failure.
pub mod mounts;

/// `netroot=` descriptor parsing and iSCSI attach.
pub mod netroot;

/// Boot state machine and failure cleanup.
pub mod orchestrator;

/// Deferred artifact writes.
pub mod persist;

/// Capabilities supplied by the boot policy.
pub mod policy;

pub use orchestrator::{BootState, Failure, InitError, Orchestrator, Platform};
