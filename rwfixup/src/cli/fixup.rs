/*
 * SPDX-FileCopyrightText: 2026 rwfixup contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    cli::{status, warning},
    config::Config,
    host::{self, Host, MountGuard},
    patch::script::{self, Backup, PatchReport},
    util,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Must be run as root")]
    NotRoot,
    #[error("Not running in recovery: {property}={actual:?}, expected {expected:?}")]
    NotMaintenanceMode {
        property: String,
        expected: String,
        actual: Option<String>,
    },
    #[error("Target script not found: {0:?}")]
    TargetMissing(PathBuf),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// The system partition is mounted directly on the system directory.
    Standard,
    /// The system partition is the root of the system image and the system
    /// directory lives inside it.
    SystemAsRoot,
}

/// Mounts held for the duration of the patch. Fields drop in declaration
/// order, so the bind mount is always released before the partition.
struct SystemMounts<'a> {
    bind: Option<MountGuard<'a>>,
    root: MountGuard<'a>,
}

impl SystemMounts<'_> {
    fn unmount(self) -> host::Result<()> {
        let Self { bind, root } = self;

        if let Some(bind) = bind {
            if let Err(e) = bind.unmount() {
                // The partition is still busy underneath the bind mount.
                root.leave_mounted();
                return Err(e);
            }
        }

        root.unmount()
    }
}

fn prop_equals(host: &dyn Host, name: &str, expected: &str) -> Result<(bool, Option<String>)> {
    let value = host
        .get_prop(name)
        .with_context(|| format!("Failed to read property: {name:?}"))?;

    Ok((value.as_deref() == Some(expected), value))
}

fn check_preconditions(config: &Config, host: &dyn Host) -> Result<()> {
    if !host.is_root() {
        return Err(Error::NotRoot.into());
    }

    let device = &config.device;
    let (matched, actual) =
        prop_equals(host, &device.maintenance_property, &device.maintenance_value)?;
    if !matched {
        return Err(Error::NotMaintenanceMode {
            property: device.maintenance_property.clone(),
            expected: device.maintenance_value.clone(),
            actual,
        }
        .into());
    }

    Ok(())
}

pub fn detect_layout(config: &Config, host: &dyn Host) -> Result<Layout> {
    let device = &config.device;
    let (matched, _) =
        prop_equals(host, &device.system_as_root_property, &device.system_as_root_value)?;

    Ok(if matched {
        Layout::SystemAsRoot
    } else {
        Layout::Standard
    })
}

pub fn block_device(config: &Config, host: &dyn Host) -> Result<PathBuf> {
    let device = &config.device;

    let suffix = if device.slot_suffix_property.is_empty() {
        None
    } else {
        host.get_prop(&device.slot_suffix_property)
            .with_context(|| {
                format!("Failed to read property: {:?}", device.slot_suffix_property)
            })?
    };

    Ok(host::with_slot_suffix(&device.block_device, suffix.as_deref()))
}

/// Recoveries often mount the system partition read-only on their own. The
/// filesystem tools need it unmounted, so try to unmount both possible mount
/// points and ignore failures.
fn release_existing_mounts(config: &Config, host: &dyn Host) {
    for target in [&config.device.system_mount, &config.device.root_mount] {
        if let Err(e) = host::unmount(host, &config.tools.umount, target) {
            debug!("Ignoring unmount failure: {e}");
        }
    }
}

fn check_filesystem(config: &Config, host: &dyn Host, device: &Path) -> Result<()> {
    status!("Checking filesystem: {device:?}");
    host.run(&config.tools.e2fsck, &[OsStr::new("-fy"), device.as_os_str()])
        .with_context(|| format!("Filesystem check failed: {device:?}"))?;

    status!("Resizing filesystem: {device:?}");
    host.run(&config.tools.resize2fs, &[device.as_os_str()])
        .with_context(|| format!("Filesystem resize failed: {device:?}"))?;

    Ok(())
}

fn mount_system<'a>(
    config: &'a Config,
    host: &'a dyn Host,
    layout: Layout,
    device: &Path,
) -> Result<SystemMounts<'a>> {
    let dev = &config.device;

    match layout {
        Layout::Standard => {
            status!("Mounting {device:?} at {:?}", dev.system_mount);

            let root = host::mount(
                host,
                &config.tools,
                device,
                &dev.system_mount,
                &dev.fs_type,
                "rw",
            )
            .with_context(|| format!("Failed to mount {device:?} at {:?}", dev.system_mount))?;

            Ok(SystemMounts { bind: None, root })
        }
        Layout::SystemAsRoot => {
            status!("Mounting {device:?} at {:?}", dev.root_mount);

            let root = host::mount(
                host,
                &config.tools,
                device,
                &dev.root_mount,
                &dev.fs_type,
                "rw",
            )
            .with_context(|| format!("Failed to mount {device:?} at {:?}", dev.root_mount))?;

            let source = dev.root_mount.join("system");
            status!("Bind mounting {source:?} at {:?}", dev.system_mount);

            let bind = host::bind_mount(host, &config.tools, &source, &dev.system_mount)
                .with_context(|| {
                    format!("Failed to bind mount {source:?} at {:?}", dev.system_mount)
                })?;

            Ok(SystemMounts {
                bind: Some(bind),
                root,
            })
        }
    }
}

fn log_report(report: &PatchReport) {
    if !report.region.found {
        warning!("Remount block not found; only path substitutions were applied");
    } else if report.region.is_unterminated() {
        warning!("Remount block has no end marker; commented out to end of file");
    }

    info!(
        "Commented {} line(s), {} already commented, {} path substitution(s) across {} line(s)",
        report.region.commented,
        report.region.already_commented,
        report.substitutions,
        report.lines,
    );

    match report.backup {
        Backup::Created => info!("Backup written: {:?}", report.backup_path),
        Backup::Existing => info!("Backup already present: {:?}", report.backup_path),
        Backup::NotNeeded => {}
    }
}

/// Run every step of the fixup in order. Any failure aborts the remaining
/// steps. Mounts made along the way are released on every path out.
pub fn fixup_main(
    config: &Config,
    host: &dyn Host,
    cancel_signal: &AtomicBool,
) -> Result<PatchReport> {
    status!("Checking preconditions");
    check_preconditions(config, host)?;

    let layout = detect_layout(config, host)?;
    let device = block_device(config, host)?;
    info!("Layout: {layout:?}, system partition: {device:?}");

    util::check_cancel(cancel_signal)?;

    release_existing_mounts(config, host);
    check_filesystem(config, host, &device)?;

    util::check_cancel(cancel_signal)?;

    let mounts = mount_system(config, host, layout, &device)?;

    util::check_cancel(cancel_signal)?;

    let script_path = config.script_path();
    let exists = script_path
        .try_exists()
        .with_context(|| format!("Failed to access: {script_path:?}"))?;
    if !exists {
        return Err(Error::TargetMissing(script_path).into());
    }

    status!("Patching {script_path:?}");
    let report = script::patch_script(&script_path, config, host, cancel_signal)
        .with_context(|| format!("Failed to patch script: {script_path:?}"))?;
    log_report(&report);

    status!("Unmounting system");
    mounts.unmount().context("Failed to unmount system")?;

    status!("Done");

    Ok(report)
}
