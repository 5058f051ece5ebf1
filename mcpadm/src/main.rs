// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use anyhow::Context;
use structopt::*;

mod dump;
mod request;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "mcpadm",
    about = "provides a command-line interface to the multicast daemon",
    version = "0.0.1"
)]
struct GlobalOpts {
    #[structopt(
        short,
        long,
        help = "file holding the daemon's pid",
        default_value = common::DEFAULT_PID_FILE
    )]
    pid_file: String,

    #[structopt(subcommand)]
    cmd: Commands,
}

#[derive(Debug, StructOpt)]
enum Commands {
    /// Have the daemon write out its state, then print it.
    Dump(dump::Dump),
    /// Join a group on a LAN device, outside of IGMP.
    Join(request::Request),
    /// Leave a group joined with `join`.
    Leave(request::Request),
    /// Show the request waiting in the override file, if any.
    Override {
        #[structopt(long, default_value = common::DEFAULT_OVERRIDE_FILE)]
        override_file: String,
    },
}

/// Find the running daemon.
pub fn read_pid(path: &str) -> anyhow::Result<libc::pid_t> {
    let txt = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read pid file {path}"))?;
    let pid: libc::pid_t = txt
        .trim()
        .parse()
        .with_context(|| format!("bad pid file {path}: {:?}", txt.trim()))?;
    if pid <= 0 {
        anyhow::bail!("bad pid file {path}: {pid}");
    }
    Ok(pid)
}

pub fn signal_daemon(pid_file: &str, sig: libc::c_int) -> anyhow::Result<()> {
    let pid = read_pid(pid_file)?;
    if unsafe { libc::kill(pid, sig) } < 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("failed to signal mcpad (pid {pid})"));
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let opts = GlobalOpts::from_args();

    match opts.cmd {
        Commands::Dump(d) => dump::dump_cmd(&opts.pid_file, d).await,
        Commands::Join(r) => {
            request::send(&opts.pid_file, common::vsa::VsaOp::Join, r)
        }
        Commands::Leave(r) => {
            request::send(&opts.pid_file, common::vsa::VsaOp::Leave, r)
        }
        Commands::Override { override_file } => {
            match common::vsa::read_request(&override_file)? {
                Some(req) => println!("{req}"),
                None => println!("no request pending"),
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_pid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "4242").unwrap();
        let path = file.path().display().to_string();
        assert_eq!(read_pid(&path).unwrap(), 4242);

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "mcpad").unwrap();
        assert!(read_pid(&path).is_err());

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "0").unwrap();
        assert!(read_pid(&path).is_err());

        assert!(read_pid("/nonexistent/mcpad.pid").is_err());
    }
}
