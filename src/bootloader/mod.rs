// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.3
// Date Modified: 2026-10-18
// Author: Lukas Bower
//
// ─────────────────────────────────────────────────────────────
// Cohesix · Bootloader Inputs
//
// Everything the measured-boot init learns from the stage that
// started it.
//
// Current sub‑modules
// -------------------
// * `args` – kernel command-line parser
// ─────────────────────────────────────────────────────────────

/// Kernel command‑line parser.
pub mod args;
