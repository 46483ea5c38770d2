/*
 * SPDX-FileCopyrightText: 2026 rwfixup contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    ffi::{OsStr, OsString},
    fmt, io,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{config::ToolsConfig, util::DebugString};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to run command: {0:?}")]
    CommandSpawn(DebugString, #[source] io::Error),
    #[error("Command failed with status: {1}: {0:?}")]
    CommandFailed(DebugString, ExitStatus),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Everything the fixup needs from the running system. The real
/// implementation shells out to the recovery's tools. Tests substitute a
/// recording implementation.
pub trait Host {
    /// Whether the effective user is root.
    fn is_root(&self) -> bool;

    /// Read a system property. Unset and empty properties are both [`None`].
    fn get_prop(&self, name: &str) -> Result<Option<String>>;

    /// Run a program to completion. A non-zero exit status is an error.
    fn run(&self, program: &Path, args: &[&OsStr]) -> Result<()>;
}

pub struct SystemHost {
    getprop: PathBuf,
}

impl SystemHost {
    pub fn new(tools: &ToolsConfig) -> Self {
        Self {
            getprop: tools.getprop.clone(),
        }
    }
}

impl Host for SystemHost {
    #[cfg(unix)]
    fn is_root(&self) -> bool {
        rustix::process::geteuid().is_root()
    }

    #[cfg(not(unix))]
    fn is_root(&self) -> bool {
        false
    }

    fn get_prop(&self, name: &str) -> Result<Option<String>> {
        let mut command = Command::new(&self.getprop);
        command.arg(name);
        command.stdin(Stdio::null());
        command.stderr(Stdio::inherit());

        debug!("Running: {command:?}");

        let output = command
            .output()
            .map_err(|e| Error::CommandSpawn(DebugString::new(&command), e))?;
        if !output.status.success() {
            return Err(Error::CommandFailed(
                DebugString::new(&command),
                output.status,
            ));
        }

        let value = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        debug!("Property {name:?} = {value:?}");

        Ok((!value.is_empty()).then_some(value))
    }

    fn run(&self, program: &Path, args: &[&OsStr]) -> Result<()> {
        let mut command = Command::new(program);
        command.args(args);
        command.stdin(Stdio::null());

        debug!("Running: {command:?}");

        let status = command
            .status()
            .map_err(|e| Error::CommandSpawn(DebugString::new(&command), e))?;
        if !status.success() {
            return Err(Error::CommandFailed(DebugString::new(&command), status));
        }

        Ok(())
    }
}

/// An active mount. Dropping the guard unmounts it and only logs failures. Use
/// [`Self::unmount`] to find out whether unmounting succeeded.
#[must_use]
pub struct MountGuard<'a> {
    host: &'a dyn Host,
    umount: &'a Path,
    target: PathBuf,
    active: bool,
}

impl fmt::Debug for MountGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountGuard")
            .field("target", &self.target)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl MountGuard<'_> {
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn unmount(mut self) -> Result<()> {
        self.active = false;
        unmount(self.host, self.umount, &self.target)
    }

    /// Drop the guard without unmounting.
    pub fn leave_mounted(mut self) {
        warn!("Leaving {:?} mounted", self.target);
        self.active = false;
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = unmount(self.host, self.umount, &self.target) {
                warn!("Failed to unmount {:?}: {e}", self.target);
            }
        }
    }
}

/// Mount `source` at `target` with the given filesystem type and options.
pub fn mount<'a>(
    host: &'a dyn Host,
    tools: &'a ToolsConfig,
    source: &Path,
    target: &Path,
    fs_type: &str,
    options: &str,
) -> Result<MountGuard<'a>> {
    host.run(
        &tools.mount,
        &[
            OsStr::new("-t"),
            OsStr::new(fs_type),
            OsStr::new("-o"),
            OsStr::new(options),
            source.as_os_str(),
            target.as_os_str(),
        ],
    )?;

    Ok(MountGuard {
        host,
        umount: &tools.umount,
        target: target.to_owned(),
        active: true,
    })
}

/// Bind mount the directory `source` at `target`.
pub fn bind_mount<'a>(
    host: &'a dyn Host,
    tools: &'a ToolsConfig,
    source: &Path,
    target: &Path,
) -> Result<MountGuard<'a>> {
    host.run(
        &tools.mount,
        &[
            OsStr::new("-o"),
            OsStr::new("bind"),
            source.as_os_str(),
            target.as_os_str(),
        ],
    )?;

    Ok(MountGuard {
        host,
        umount: &tools.umount,
        target: target.to_owned(),
        active: true,
    })
}

pub fn unmount(host: &dyn Host, umount: &Path, target: &Path) -> Result<()> {
    host.run(umount, &[target.as_os_str()])
}

/// Set the SELinux context of a file.
pub fn set_label(host: &dyn Host, tools: &ToolsConfig, path: &Path, label: &str) -> Result<()> {
    host.run(&tools.chcon, &[OsStr::new(label), path.as_os_str()])
}

/// Build a block device path by appending the A/B slot suffix, if any.
pub fn with_slot_suffix(device: &Path, suffix: Option<&str>) -> PathBuf {
    match suffix {
        Some(s) => {
            let mut path = OsString::from(device);
            path.push(s);
            PathBuf::from(path)
        }
        None => device.to_owned(),
    }
}
