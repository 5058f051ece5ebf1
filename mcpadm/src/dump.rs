// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::time::SystemTime;

use anyhow::Context;
use structopt::*;
use tokio::time::{sleep, Duration, Instant};

#[derive(Debug, StructOpt)]
pub struct Dump {
    #[structopt(long, default_value = common::DEFAULT_DUMP_FILE)]
    dump_file: String,

    /// Seconds to wait for the daemon to write the dump
    #[structopt(long, default_value = "5")]
    timeout: u64,
}

fn modified(path: &str) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

pub async fn dump_cmd(pid_file: &str, d: Dump) -> anyhow::Result<()> {
    let before = modified(&d.dump_file);
    crate::signal_daemon(pid_file, libc::SIGUSR1)?;

    let deadline = Instant::now() + Duration::from_secs(d.timeout);
    loop {
        let now = modified(&d.dump_file);
        if now.is_some() && now != before {
            break;
        }
        if Instant::now() >= deadline {
            anyhow::bail!("timed out waiting for {}", d.dump_file);
        }
        sleep(Duration::from_millis(100)).await;
    }

    let txt = std::fs::read_to_string(&d.dump_file)
        .with_context(|| format!("failed to read {}", d.dump_file))?;
    print!("{txt}");
    Ok(())
}
