// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-18

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::boot::eventlog::DEFAULT_EVENTLOG_PATH;
use crate::boot::tpm::DEFAULT_TPM_DEVICE;
use crate::bootloader::args::PROC_CMDLINE;

/// Default pause before exiting after a failed boot.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Command line of `mboot-init`.
#[derive(Parser, Debug)]
#[command(name = "mboot-init", about = "Measured-boot init", version)]
pub struct Cli {
    /// Stream all logs instead of buffering them until failure.
    #[arg(short = 'd', long)]
    pub debug: bool,
    /// Run without a TPM. No measurements are taken; implies --debug.
    #[arg(short = 't', long = "no-tpm")]
    pub no_tpm: bool,
    #[arg(long, default_value = PROC_CMDLINE)]
    pub cmdline: PathBuf,
    #[arg(long, default_value = DEFAULT_EVENTLOG_PATH)]
    pub eventlog: PathBuf,
    #[arg(long = "tpm-device", default_value = DEFAULT_TPM_DEVICE)]
    pub tpm_device: PathBuf,
    /// Seconds to wait before exiting on failure.
    #[arg(long = "grace-secs", default_value_t = 5)]
    pub grace_secs: u64,
}

/// Resolved configuration after CLI parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitConfig {
    pub debug: bool,
    pub tpm_enabled: bool,
    pub cmdline: PathBuf,
    pub eventlog: PathBuf,
    pub tpm_device: PathBuf,
    pub grace: Duration,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            debug: false,
            tpm_enabled: true,
            cmdline: PathBuf::from(PROC_CMDLINE),
            eventlog: PathBuf::from(DEFAULT_EVENTLOG_PATH),
            tpm_device: PathBuf::from(DEFAULT_TPM_DEVICE),
            grace: DEFAULT_GRACE,
        }
    }
}

impl InitConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            // Without a TPM nothing ends up in the event log, so keep the
            // console output instead.
            debug: cli.debug || cli.no_tpm,
            tpm_enabled: !cli.no_tpm,
            cmdline: cli.cmdline.clone(),
            eventlog: cli.eventlog.clone(),
            tpm_device: cli.tpm_device.clone(),
            grace: Duration::from_secs(cli.grace_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let cfg = InitConfig::from_cli(&Cli::parse_from(["mboot-init"]));
        assert_eq!(cfg, InitConfig::default());
        assert_eq!(cfg.grace, Duration::from_secs(5));
        assert_eq!(cfg.tpm_device, PathBuf::from("/dev/tpm0"));
    }

    #[test]
    fn no_tpm_forces_debug() {
        let cfg = InitConfig::from_cli(&Cli::parse_from(["mboot-init", "-t"]));
        assert!(cfg.debug);
        assert!(!cfg.tpm_enabled);
    }

    #[test]
    fn paths_and_grace_are_overridable() {
        let cli = Cli::parse_from([
            "mboot-init",
            "-d",
            "--cmdline",
            "/tmp/cmdline",
            "--grace-secs",
            "0",
        ]);
        let cfg = InitConfig::from_cli(&cli);
        assert!(cfg.debug && cfg.tpm_enabled);
        assert_eq!(cfg.cmdline, PathBuf::from("/tmp/cmdline"));
        assert_eq!(cfg.grace, Duration::ZERO);
    }
}
