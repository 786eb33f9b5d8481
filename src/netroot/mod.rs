// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Parse the netroot= iSCSI descriptor and attach the remote boot volume.
// Author: Lukas Bower

//! Remote boot volume (`netroot=`) handling.
//!
//! Descriptor format:
//!
//! ```text
//! netroot=iscsi:@<address>[:@<portal group>]::<port>::<target iqn>
//! ```
//!
//! The initiator identity comes from a separate `rd.iscsi.initiator=` flag.
//! Address and target are taken verbatim; only the delimiters are checked.

use std::fmt;
use std::path::PathBuf;

use log::{debug, info};
use thiserror::Error;

use crate::bootloader::args::BootArgs;
use crate::mounts::MountTable;

pub mod iscsi;

pub use iscsi::IscsiStartAttacher;

/// Kernel flag carrying the descriptor.
pub const NETROOT_FLAG: &str = "netroot";
/// Kernel flag carrying the initiator IQN.
pub const INITIATOR_FLAG: &str = "rd.iscsi.initiator";
/// Portal group used when the descriptor names none.
pub const DEFAULT_PORTAL_GROUP: &str = "1";

/// Failure reported by the volume attach transport.
#[derive(Debug, Error)]
#[error("attach of {target} failed: {reason}")]
pub struct AttachError {
    pub target: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum NetrootError {
    #[error("{value}: {reason} (usage: netroot=iscsi:@10.X.Y.Z::3260::iqn.foo:hostname-bar)")]
    Parse { value: String, reason: String },
    #[error("{0} flag is not set")]
    MissingFlag(&'static str),
    #[error(transparent)]
    Attach(#[from] AttachError),
}

fn parse_error(value: &str, reason: impl fmt::Display) -> NetrootError {
    NetrootError::Parse {
        value: value.to_owned(),
        reason: reason.to_string(),
    }
}

/// A parsed remote boot volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetrootDescriptor {
    pub address: String,
    pub port: String,
    pub volume_id: String,
    pub initiator_id: String,
    pub portal_group: String,
}

impl NetrootDescriptor {
    /// Parse `netroot` and pair it with `initiator`.
    pub fn parse(netroot: &str, initiator: &str) -> Result<Self, NetrootError> {
        let segments: Vec<&str> = netroot.split("::").collect();
        if segments.len() != 3 {
            return Err(parse_error(
                netroot,
                format_args!("expected 3 '::' separated fields, found {}", segments.len()),
            ));
        }
        let (head, port, volume_id) = (segments[0], segments[1], segments[2]);

        let parts: Vec<&str> = head.split(":@").collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(parse_error(
                netroot,
                format_args!("expected 2 or 3 ':@' separated fields, found {}", parts.len()),
            ));
        }
        if parts[0] != "iscsi" {
            return Err(parse_error(
                netroot,
                format_args!("transport {:?} is not 'iscsi'", parts[0]),
            ));
        }
        let address = parts[1];
        let portal_group = parts.get(2).copied().unwrap_or(DEFAULT_PORTAL_GROUP);

        for (field, value) in [
            ("address", address),
            ("port", port),
            ("target", volume_id),
            ("portal group", portal_group),
        ] {
            if value.is_empty() {
                return Err(parse_error(netroot, format_args!("{field} is empty")));
            }
        }
        if initiator.is_empty() {
            return Err(parse_error(initiator, "initiator name is empty"));
        }

        Ok(Self {
            address: address.to_owned(),
            port: port.to_owned(),
            volume_id: volume_id.to_owned(),
            initiator_id: initiator.to_owned(),
            portal_group: portal_group.to_owned(),
        })
    }

    /// `address:port` of the target portal, using the port from the descriptor.
    pub fn target_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Session tuning passed to the attach transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachOptions {
    pub max_cmds_in_flight: u32,
    pub queue_depth: u32,
    pub io_scheduler: String,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            max_cmds_in_flight: 128,
            queue_depth: 16,
            io_scheduler: "noop".to_owned(),
        }
    }
}

/// Everything the transport needs to log in to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachRequest {
    pub descriptor: NetrootDescriptor,
    pub options: AttachOptions,
}

impl AttachRequest {
    pub fn target_address(&self) -> String {
        self.descriptor.target_address()
    }
}

/// Transport that logs in to a remote volume and exposes it as block devices.
pub trait VolumeAttacher {
    fn attach(&mut self, request: &AttachRequest) -> Result<Vec<PathBuf>, AttachError>;
}

/// Raw netroot inputs taken from the kernel command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetrootFlags {
    pub netroot: Option<String>,
    pub initiator: Option<String>,
}

impl NetrootFlags {
    pub fn from_cmdline(args: &BootArgs) -> Self {
        Self {
            netroot: args.get(NETROOT_FLAG).map(str::to_owned),
            initiator: args.get(INITIATOR_FLAG).map(str::to_owned),
        }
    }

    /// Check both flags are present and parse them.
    pub fn descriptor(&self) -> Result<NetrootDescriptor, NetrootError> {
        let netroot = self
            .netroot
            .as_deref()
            .ok_or(NetrootError::MissingFlag(NETROOT_FLAG))?;
        debug!("netroot flag is set with val={netroot}");
        let initiator = self
            .initiator
            .as_deref()
            .ok_or(NetrootError::MissingFlag(INITIATOR_FLAG))?;
        NetrootDescriptor::parse(netroot, initiator)
    }
}

/// Parse the netroot flags, attach the volume and register its devices.
///
/// Nothing is attached unless parsing succeeds.
pub fn attach_netroot(
    flags: &NetrootFlags,
    attacher: &mut dyn VolumeAttacher,
    mounts: &mut MountTable,
) -> Result<Vec<PathBuf>, NetrootError> {
    let descriptor = flags.descriptor()?;
    let request = AttachRequest {
        descriptor,
        options: AttachOptions::default(),
    };
    info!(
        "attaching {} at {} as {}",
        request.descriptor.volume_id,
        request.target_address(),
        request.descriptor.initiator_id
    );
    let devices = attacher.attach(&request)?;
    for dev in &devices {
        debug!("mounted at dev {}", dev.display());
        mounts.register(dev.clone());
    }
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETROOT: &str = "iscsi:@10.196.210.62::3260::iqn.1986-03.com.sun:ovs112-boot";
    const INITIATOR: &str = "iqn.1988-12.com.oracle:ovs112";

    #[test]
    fn parses_reference_descriptor() {
        let d = NetrootDescriptor::parse(NETROOT, INITIATOR).unwrap();
        assert_eq!(d.address, "10.196.210.62");
        assert_eq!(d.port, "3260");
        assert_eq!(d.volume_id, "iqn.1986-03.com.sun:ovs112-boot");
        assert_eq!(d.initiator_id, INITIATOR);
        assert_eq!(d.portal_group, DEFAULT_PORTAL_GROUP);
    }

    #[test]
    fn attach_address_uses_descriptor_port() {
        let d = NetrootDescriptor::parse("iscsi:@10.0.0.9::3261::iqn.x:vol", INITIATOR).unwrap();
        // Deliberately not the well-known 3260.
        assert_eq!(d.target_address(), "10.0.0.9:3261");
    }

    #[test]
    fn portal_group_segment_is_accepted() {
        let d = NetrootDescriptor::parse("iscsi:@10.0.0.9:@2::3260::iqn.x:vol", INITIATOR).unwrap();
        assert_eq!(d.address, "10.0.0.9");
        assert_eq!(d.portal_group, "2");
    }

    #[test]
    fn wrong_double_colon_count_is_rejected() {
        for bad in [
            "iscsi:@10.0.0.1::3260",
            "iscsi:@10.0.0.1::3260::iqn.x::extra",
            "iscsi:@10.0.0.1",
        ] {
            let err = NetrootDescriptor::parse(bad, INITIATOR).unwrap_err();
            match err {
                NetrootError::Parse { value, reason } => {
                    assert_eq!(value, bad);
                    assert!(reason.contains("'::'"), "{reason}");
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn wrong_at_count_is_rejected() {
        let err = NetrootDescriptor::parse("iscsi10.0.0.1::3260::iqn.x", INITIATOR).unwrap_err();
        assert!(matches!(err, NetrootError::Parse { ref reason, .. } if reason.contains("':@'")));
        let err =
            NetrootDescriptor::parse("iscsi:@a:@b:@c::3260::iqn.x", INITIATOR).unwrap_err();
        assert!(matches!(err, NetrootError::Parse { .. }));
    }

    #[test]
    fn non_iscsi_transport_is_rejected() {
        let err = NetrootDescriptor::parse("nbd:@10.0.0.1::3260::iqn.x", INITIATOR).unwrap_err();
        assert!(matches!(err, NetrootError::Parse { ref reason, .. } if reason.contains("iscsi")));
    }

    #[test]
    fn empty_fields_are_rejected() {
        assert!(NetrootDescriptor::parse("iscsi:@::3260::iqn.x", INITIATOR).is_err());
        assert!(NetrootDescriptor::parse("iscsi:@10.0.0.1::::iqn.x", INITIATOR).is_err());
        assert!(NetrootDescriptor::parse(NETROOT, "").is_err());
    }

    #[test]
    fn missing_flags_are_reported_by_name() {
        let flags = NetrootFlags::default();
        assert!(matches!(
            flags.descriptor(),
            Err(NetrootError::MissingFlag(NETROOT_FLAG))
        ));
        let flags = NetrootFlags {
            netroot: Some(NETROOT.to_owned()),
            initiator: None,
        };
        assert!(matches!(
            flags.descriptor(),
            Err(NetrootError::MissingFlag(INITIATOR_FLAG))
        ));
    }
}
