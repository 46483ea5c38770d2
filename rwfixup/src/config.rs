/*
 * SPDX-FileCopyrightText: 2026 rwfixup contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{
    octal,
    patch::{region, substitute},
};

/// Environment variable pointing to an optional TOML config file.
pub const CONFIG_ENV: &str = "RWFIXUP_CONFIG";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config: {0:?}")]
    Read(PathBuf, #[source] io::Error),
    #[error("Failed to parse config: {0:?}")]
    Parse(PathBuf, #[source] toml_edit::de::Error),
    #[error("Invalid config: {0} must not be empty")]
    Empty(&'static str),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
    /// Script path relative to the mounted system directory.
    pub path: PathBuf,
    /// Appended to the script's file name to name the backup.
    pub backup_suffix: String,
    #[serde(deserialize_with = "octal::deserialize")]
    pub mode: u32,
    /// SELinux context.
    pub label: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("bin/rw-system.sh"),
            backup_suffix: ".orig".to_owned(),
            mode: 0o755,
            label: "u:object_r:phhsu_exec:s0".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegionConfig {
    pub start: String,
    pub end: String,
    pub prefix: String,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            start: "if mount -o remount,rw /system; then".to_owned(),
            end: "mount -o remount,ro / || true".to_owned(),
            prefix: String::from_utf8_lossy(region::DEFAULT_PREFIX).into_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubstituteConfig {
    pub from: String,
    pub to: String,
}

impl Default for SubstituteConfig {
    fn default() -> Self {
        Self {
            from: substitute::DEFAULT_FROM.to_owned(),
            to: substitute::DEFAULT_TO.to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// System partition block device, without the slot suffix.
    pub block_device: PathBuf,
    /// Property holding the A/B slot suffix. Empty to never append one.
    pub slot_suffix_property: String,
    pub maintenance_property: String,
    pub maintenance_value: String,
    pub system_as_root_property: String,
    pub system_as_root_value: String,
    /// Where the system directory ends up in both layouts.
    pub system_mount: PathBuf,
    /// Where the partition is mounted in the system-as-root layout.
    pub root_mount: PathBuf,
    pub fs_type: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            block_device: PathBuf::from("/dev/block/bootdevice/by-name/system"),
            slot_suffix_property: "ro.boot.slot_suffix".to_owned(),
            maintenance_property: "ro.twrp.boot".to_owned(),
            maintenance_value: "1".to_owned(),
            system_as_root_property: "ro.build.system_root_image".to_owned(),
            system_as_root_value: "true".to_owned(),
            system_mount: PathBuf::from("/system"),
            root_mount: PathBuf::from("/system_root"),
            fs_type: "ext4".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub getprop: PathBuf,
    pub e2fsck: PathBuf,
    pub resize2fs: PathBuf,
    pub mount: PathBuf,
    pub umount: PathBuf,
    pub chcon: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            getprop: PathBuf::from("getprop"),
            e2fsck: PathBuf::from("e2fsck"),
            resize2fs: PathBuf::from("resize2fs"),
            mount: PathBuf::from("mount"),
            umount: PathBuf::from("umount"),
            chcon: PathBuf::from("chcon"),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub target: TargetConfig,
    pub region: RegionConfig,
    pub substitute: SubstituteConfig,
    pub device: DeviceConfig,
    pub tools: ToolsConfig,
}

impl Config {
    pub fn parse(path: &Path, data: &str) -> Result<Self> {
        let config: Self =
            toml_edit::de::from_str(data).map_err(|e| Error::Parse(path.to_owned(), e))?;
        config.validate()?;

        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| Error::Read(path.to_owned(), e))?;

        Self::parse(path, &data)
    }

    /// Load the file named by [`CONFIG_ENV`], or use the defaults if the
    /// variable is unset or empty.
    pub fn from_env() -> Result<Self> {
        match env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => {
                let path = PathBuf::from(path);
                debug!("Loading config: {path:?}");
                Self::load(&path)
            }
            _ => {
                debug!("Using built-in config");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("region.start", self.region.start.as_str()),
            ("region.end", self.region.end.as_str()),
            ("region.prefix", self.region.prefix.as_str()),
            ("substitute.from", self.substitute.from.as_str()),
        ];

        for (name, value) in required {
            if value.is_empty() {
                return Err(Error::Empty(name));
            }
        }

        if self.target.path.as_os_str().is_empty() {
            return Err(Error::Empty("target.path"));
        }
        if self.target.backup_suffix.is_empty() {
            return Err(Error::Empty("target.backup_suffix"));
        }

        Ok(())
    }

    /// Absolute path to the script once the system directory is mounted.
    pub fn script_path(&self) -> PathBuf {
        self.device.system_mount.join(&self.target.path)
    }
}
