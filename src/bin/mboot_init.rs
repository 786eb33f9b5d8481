// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Entry point for the measured-boot init.
// Author: Lukas Bower

//! `mboot-init`: measure, log and kexec the next-stage kernel, or stop.

use std::io;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use mboot::boot::eventlog::SecurityFsSink;
use mboot::boot::tpm::{AnchorProvider, DeviceAnchorProvider, DisabledAnchorProvider};
use mboot::bootloader::args::BootArgs;
use mboot::config::{Cli, InitConfig};
use mboot::logging::Diagnostics;
use mboot::mounts::SysUnmount;
use mboot::netroot::{IscsiStartAttacher, NetrootFlags};
use mboot::orchestrator::{Failure, Orchestrator, Platform, ProcessExit, FAILURE_STATUS};
use mboot::policy::CmdlinePolicy;

fn start(config: &InitConfig, diagnostics: Diagnostics) -> Result<Failure> {
    let args = BootArgs::load(&config.cmdline)
        .with_context(|| format!("reading boot arguments from {}", config.cmdline.display()))?;

    let anchors: Box<dyn AnchorProvider> = if config.tpm_enabled {
        Box::new(DeviceAnchorProvider {
            path: config.tpm_device.clone(),
        })
    } else {
        Box::new(DisabledAnchorProvider)
    };
    let platform = Platform {
        anchors,
        policies: Box::new(CmdlinePolicy::new(args.clone(), config.eventlog.clone())),
        sink: Box::new(SecurityFsSink::new(config.eventlog.clone())),
        attacher: Some(Box::new(IscsiStartAttacher::default())),
        unmounter: Box::new(SysUnmount),
        terminator: Box::new(ProcessExit),
        console: Box::new(io::stderr()),
    };
    let netroot = NetrootFlags::from_cmdline(&args);
    Ok(Orchestrator::new(config, netroot, platform, diagnostics).run())
}

fn main() {
    let cli = Cli::parse();
    let config = InitConfig::from_cli(&cli);
    let diagnostics = Diagnostics::new(config.debug);
    if let Err(e) = diagnostics.install() {
        eprintln!("mboot-init: logger unavailable: {e}");
    }
    info!("mboot-init starting (debug={}, tpm={})", config.debug, config.tpm_enabled);

    match start(&config, diagnostics.clone()) {
        Ok(failure) => error!("boot stopped after '{}': {}", failure.reached, failure.cause),
        Err(e) => {
            error!("{e:#}");
            let _ = diagnostics.dump(&mut io::stderr());
            thread::sleep(config.grace);
        }
    }
    std::process::exit(FAILURE_STATUS);
}
