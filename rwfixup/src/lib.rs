/*
 * SPDX-FileCopyrightText: 2026 rwfixup contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! rwfixup is an application first. The CLI behavior is the stable surface;
//! the Rust APIs exist so the pieces can be tested in isolation and may change
//! at any time.
//!
//! The `patch` modules are pure or file-local and know nothing about devices.
//! Everything that touches the running system goes through [`host::Host`].

pub mod cli;
pub mod config;
pub mod host;
pub mod octal;
pub mod patch;
pub mod util;
