// CLASSIFICATION: COMMUNITY
// Filename: mod.rs · measured-boot primitives
// Date Modified: 2026-10-18
// Author: Lukas Bower
//
// ─────────────────────────────────────────────────────────────
// Boot Measurement – Root Module
//
// Everything that touches a PCR or the secure-launch event log.
//
// ## Current sub‑modules
// * `measure`  – event encoding and SHA‑256 PCR helpers.
// * `tpm`      – trust anchor handles and the TPM device.
// * `eventlog` – event sink and log decoding.
// * `measurer` – anchor + sink pair handed to collectors.
// ─────────────────────────────────────────────────────────────

/// Event encoding and PCR extension helpers based on SHA‑256.
/// Re‑export [`measure::encode_event`] for convenience.
pub mod measure;
pub use measure::{encode_event, extend_pcr};

/// Secure-launch event log sink and decoder.
pub mod eventlog;
/// Measurement capability.
pub mod measurer;
/// Trust anchor (TPM) handles.
pub mod tpm;
