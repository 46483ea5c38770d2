/*
 * SPDX-FileCopyrightText: 2026 rwfixup contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

pub mod region;
pub mod script;
pub mod substitute;
