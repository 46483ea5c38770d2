/*
 * SPDX-FileCopyrightText: 2026 rwfixup contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    env,
    io::{self, IsTerminal},
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::{Level, warn};

use crate::{cli::fixup, config::Config, host::SystemHost};

/// Environment variable selecting the log level.
pub const LOG_ENV: &str = "RWFIXUP_LOG";

/// Patch the system partition's rw-system.sh so that the remount block does
/// not stop the device from booting.
///
/// Must be run as root from recovery. Takes no arguments. Set RWFIXUP_CONFIG to
/// a TOML file to override paths and markers and RWFIXUP_LOG to change the log
/// level.
#[derive(Debug, Parser)]
#[command(disable_help_flag = true, disable_version_flag = true)]
pub struct Cli {}

fn parse_level(value: Option<&str>) -> std::result::Result<Level, String> {
    match value {
        None | Some("") => Ok(Level::INFO),
        Some(v) => v.parse::<Level>().map_err(|_| v.to_owned()),
    }
}

pub fn init_logging(logging_initialized: &AtomicBool) {
    let value = env::var(LOG_ENV).ok();
    let (level, invalid) = match parse_level(value.as_deref()) {
        Ok(level) => (level, None),
        Err(v) => (Level::INFO, Some(v)),
    };

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_max_level(level)
        .with_target(false)
        .init();

    logging_initialized.store(true, Ordering::SeqCst);

    if let Some(v) = invalid {
        warn!("Ignoring invalid {LOG_ENV} value: {v:?}");
    }
}

pub fn main(logging_initialized: &AtomicBool, cancel_signal: &AtomicBool) -> Result<()> {
    if let Err(e) = Cli::try_parse() {
        // Always show the usage text, even for --help.
        eprintln!("{e}");
        eprintln!("{}", Cli::command_help());
        return Err(anyhow!("No arguments are accepted"));
    }

    init_logging(logging_initialized);

    let config = Config::from_env().context("Failed to load config")?;
    let host = SystemHost::new(&config.tools);

    fixup::fixup_main(&config, &host, cancel_signal)?;

    Ok(())
}

impl Cli {
    fn command_help() -> String {
        use clap::CommandFactory;

        Self::command().render_long_help().to_string()
    }
}
