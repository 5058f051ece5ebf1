// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::process::Command;

use slog::debug;
use slog::Logger;

use aal::{AccelError, AccelResult};

// Run an external tool with a fixed argument vector; no shell is involved.
// On success, it returns the stdout of the command.  On failure, it
// distinguishes between a command that fails to run at all (e.g., if the
// binary is missing) and a command that runs to completion, but exits with a
// non-0 status.
pub(crate) fn run_cmd(
    log: &Logger,
    cmd: &str,
    args: &[String],
) -> AccelResult<Vec<String>> {
    debug!(log, "running {cmd} {}", args.join(" "));
    let out = Command::new(cmd).args(args).output().map_err(|err| {
        AccelError::Command {
            cmd: cmd.to_string(),
            err,
        }
    })?;

    if !out.status.success() {
        return Err(AccelError::Failed {
            cmd: format!("{cmd} {}", args.first().map_or("", |a| a.as_str())),
            status: out.status.to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(|l| l.to_string())
        .collect())
}
