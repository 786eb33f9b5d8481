// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Attach iSCSI boot volumes through open-iscsi's iscsistart.
// Author: Lukas Bower

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, warn};

use super::{AttachError, AttachRequest, VolumeAttacher};

/// Logs in with `iscsistart` and resolves the resulting disks via udev's
/// `/dev/disk/by-path` links.
#[derive(Debug, Clone)]
pub struct IscsiStartAttacher {
    program: PathBuf,
    by_path: PathBuf,
    sysfs_block: PathBuf,
}

impl Default for IscsiStartAttacher {
    fn default() -> Self {
        Self {
            program: PathBuf::from("iscsistart"),
            by_path: PathBuf::from("/dev/disk/by-path"),
            sysfs_block: PathBuf::from("/sys/block"),
        }
    }
}

impl IscsiStartAttacher {
    pub fn new(
        program: impl Into<PathBuf>,
        by_path: impl Into<PathBuf>,
        sysfs_block: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            by_path: by_path.into(),
            sysfs_block: sysfs_block.into(),
        }
    }

    /// Arguments handed to `iscsistart` for `request`.
    pub fn command_args(request: &AttachRequest) -> Vec<String> {
        let d = &request.descriptor;
        vec![
            "-i".into(),
            d.initiator_id.clone(),
            "-t".into(),
            d.volume_id.clone(),
            "-g".into(),
            d.portal_group.clone(),
            "-a".into(),
            d.address.clone(),
            "-p".into(),
            d.port.clone(),
            "-P".into(),
            format!("node.session.cmds_max={}", request.options.max_cmds_in_flight),
            "-P".into(),
            format!("node.session.queue_depth={}", request.options.queue_depth),
        ]
    }

    fn discover(&self, volume_id: &str) -> Result<Vec<PathBuf>, std::io::Error> {
        let needle = format!("-iscsi-{volume_id}-lun-");
        let mut devices = Vec::new();
        for entry in fs::read_dir(&self.by_path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.contains(&needle) || name.contains("-part") {
                continue;
            }
            let dev = fs::canonicalize(entry.path())?;
            if !devices.contains(&dev) {
                devices.push(dev);
            }
        }
        devices.sort();
        Ok(devices)
    }

    fn apply_scheduler(&self, device: &Path, scheduler: &str) {
        let Some(name) = device.file_name() else {
            return;
        };
        let knob = self.sysfs_block.join(name).join("queue/scheduler");
        match fs::write(&knob, scheduler) {
            Ok(()) => debug!("{}: io scheduler {scheduler}", device.display()),
            Err(e) => warn!("{}: cannot set io scheduler {scheduler}: {e}", device.display()),
        }
    }
}

impl VolumeAttacher for IscsiStartAttacher {
    fn attach(&mut self, request: &AttachRequest) -> Result<Vec<PathBuf>, AttachError> {
        let target = request.target_address();
        let fail = |reason: String| AttachError {
            target: target.clone(),
            reason,
        };
        let output = Command::new(&self.program)
            .args(Self::command_args(request))
            .output()
            .map_err(|e| fail(format!("cannot run {}: {e}", self.program.display())))?;
        if !output.status.success() {
            return Err(fail(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let devices = self
            .discover(&request.descriptor.volume_id)
            .map_err(|e| fail(format!("device discovery failed: {e}")))?;
        if devices.is_empty() {
            return Err(fail("login succeeded but no block device appeared".into()));
        }
        for dev in &devices {
            self.apply_scheduler(dev, &request.options.io_scheduler);
        }
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netroot::{AttachOptions, NetrootDescriptor};
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    fn request() -> AttachRequest {
        AttachRequest {
            descriptor: NetrootDescriptor::parse(
                "iscsi:@10.0.0.5::3260::iqn.2001-04.com.example:boot",
                "iqn.1988-12.com.oracle:host",
            )
            .unwrap(),
            options: AttachOptions::default(),
        }
    }

    #[test]
    fn command_carries_target_and_session_tuning() {
        let args = IscsiStartAttacher::command_args(&request());
        let joined = args.join(" ");
        assert!(joined.contains("-t iqn.2001-04.com.example:boot"));
        assert!(joined.contains("-a 10.0.0.5 -p 3260"));
        assert!(joined.contains("-g 1"));
        assert!(joined.contains("node.session.cmds_max=128"));
        assert!(joined.contains("node.session.queue_depth=16"));
    }

    #[test]
    fn attach_resolves_disks_and_sets_scheduler() {
        let dir = tempdir().unwrap();
        let dev = dir.path().join("dev");
        let by_path = dir.path().join("by-path");
        let sys = dir.path().join("sys");
        fs::create_dir_all(&dev).unwrap();
        fs::create_dir_all(&by_path).unwrap();
        fs::create_dir_all(sys.join("sdb/queue")).unwrap();
        fs::write(dev.join("sdb"), b"").unwrap();
        fs::write(dev.join("sdb1"), b"").unwrap();
        symlink(
            dev.join("sdb"),
            by_path.join("ip-10.0.0.5:3260-iscsi-iqn.2001-04.com.example:boot-lun-0"),
        )
        .unwrap();
        symlink(
            dev.join("sdb1"),
            by_path.join("ip-10.0.0.5:3260-iscsi-iqn.2001-04.com.example:boot-lun-0-part1"),
        )
        .unwrap();

        let mut attacher = IscsiStartAttacher::new("true", &by_path, &sys);
        let devices = attacher.attach(&request()).unwrap();
        assert_eq!(devices, vec![fs::canonicalize(dev.join("sdb")).unwrap()]);
        assert_eq!(
            fs::read_to_string(sys.join("sdb/queue/scheduler")).unwrap(),
            "noop"
        );
    }

    #[test]
    fn failed_login_is_attach_error() {
        let dir = tempdir().unwrap();
        let mut attacher = IscsiStartAttacher::new("false", dir.path(), dir.path());
        let err = attacher.attach(&request()).unwrap_err();
        assert_eq!(err.target, "10.0.0.5:3260");
    }
}
