// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Run-once failure finalizer: release mounts, dump diagnostics, exit.
// Author: Lukas Bower

use std::io::Write;
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::logging::Diagnostics;
use crate::mounts::MountTable;

/// Exit status used whenever the boot does not hand over.
pub const FAILURE_STATUS: i32 = 1;

/// Ends the process.
pub trait Terminate {
    fn terminate(&mut self, status: i32);
}

/// [`Terminate`] through `std::process::exit`.
#[derive(Debug, Default)]
pub struct ProcessExit;

impl Terminate for ProcessExit {
    fn terminate(&mut self, status: i32) {
        std::process::exit(status);
    }
}

/// Failure finalizer.
///
/// Runs once, either explicitly or when dropped: release every mount still
/// registered, write buffered diagnostics to the console, wait `grace` for
/// the console to drain and terminate with [`FAILURE_STATUS`].
pub struct Cleanup {
    mounts: MountTable,
    diagnostics: Diagnostics,
    console: Box<dyn Write>,
    grace: Duration,
    terminator: Box<dyn Terminate>,
    done: bool,
}

impl Cleanup {
    pub fn new(
        mounts: MountTable,
        diagnostics: Diagnostics,
        console: Box<dyn Write>,
        grace: Duration,
        terminator: Box<dyn Terminate>,
    ) -> Self {
        Self {
            mounts,
            diagnostics,
            console,
            grace,
            terminator,
            done: false,
        }
    }

    /// Mounts released by the finalizer.
    pub fn mounts_mut(&mut self) -> &mut MountTable {
        &mut self.mounts
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn run(&mut self) {
        if self.done {
            debug!("cleanup already ran");
            return;
        }
        self.done = true;

        let released = self.mounts.release_all();
        info!("cleanup released {released} mount(s), exiting in {:?}", self.grace);
        // Nothing left to report to if the console itself is gone.
        let _ = self.diagnostics.dump(self.console.as_mut());
        if !self.grace.is_zero() {
            thread::sleep(self.grace);
        }
        self.terminator.terminate(FAILURE_STATUS);
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        self.run();
    }
}
