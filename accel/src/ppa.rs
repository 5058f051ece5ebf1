// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Intel PPA, programmed through `ppacmd addmc`.  Each invocation replaces the
//! group's complete downstream list, so both joins and leaves send every
//! interface that should remain forwarded.

use slog::{info, o, Logger};

use aal::{AccelOps, AccelResult, FlowRequest};

use crate::cmd::run_cmd;

pub const PPACMD: &str = "ppacmd";

pub struct PpaHandle {
    log: Logger,
    cmd: String,
}

impl PpaHandle {
    pub fn new(log: &Logger, cmd: Option<&str>) -> Self {
        PpaHandle {
            log: log.new(o!("accel" => "ppa")),
            cmd: cmd.unwrap_or(PPACMD).to_string(),
        }
    }
}

fn addmc_args<'a>(
    req: &FlowRequest,
    lan: impl Iterator<Item = &'a String>,
) -> Vec<String> {
    let mut args = vec![
        "addmc".to_string(),
        "-s".to_string(),
        if req.source.is_bridged() { "1" } else { "0" }.to_string(),
        "-g".to_string(),
        req.group.to_string(),
        "-w".to_string(),
        req.wan.clone(),
    ];
    if let Some(src) = req.source.address() {
        args.push("-i".to_string());
        args.push(src.to_string());
    }
    for l in lan {
        args.push("-l".to_string());
        args.push(l.clone());
    }
    args
}

pub(crate) fn join_args(req: &FlowRequest) -> Vec<String> {
    let mut args = addmc_args(req, req.lan.iter());
    // The new member is normally in the list already.
    if !req.lan.contains(&req.lan_dev) {
        args.push("-l".to_string());
        args.push(req.lan_dev.clone());
    }
    args
}

pub(crate) fn leave_args(req: &FlowRequest) -> Vec<String> {
    let remaining: Vec<&String> =
        req.lan.iter().filter(|l| **l != req.lan_dev).collect();
    if remaining.is_empty() {
        vec!["addmc".to_string(), "-g".to_string(), req.group.to_string()]
    } else {
        addmc_args(req, remaining.into_iter())
    }
}

impl AccelOps for PpaHandle {
    fn init(&self) -> AccelResult<()> {
        info!(self.log, "using {}", self.cmd);
        Ok(())
    }

    fn join(&self, req: &FlowRequest) -> AccelResult<()> {
        run_cmd(&self.log, &self.cmd, &join_args(req)).map(|_| ())
    }

    fn leave(&self, req: &FlowRequest) -> AccelResult<()> {
        run_cmd(&self.log, &self.cmd, &leave_args(req)).map(|_| ())
    }

    fn deinit(&self) -> AccelResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aal::FlowSource;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    fn req(source: FlowSource, lan: &[&str], lan_dev: &str) -> FlowRequest {
        FlowRequest {
            group: Ipv4Addr::new(239, 1, 1, 1),
            source,
            wan: "wan".to_string(),
            lan: lan.iter().map(|l| l.to_string()).collect(),
            lan_dev: lan_dev.to_string(),
            src_mac: None,
            update: false,
        }
    }

    #[test]
    fn test_join_args() {
        let src = FlowSource::Address(Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(
            join_args(&req(src, &["lan1", "lan2"], "lan2")).join(" "),
            "addmc -s 0 -g 239.1.1.1 -w wan -i 10.0.0.5 -l lan1 -l lan2"
        );
        assert_eq!(
            join_args(&req(FlowSource::Bridged, &[], "lan1")).join(" "),
            "addmc -s 1 -g 239.1.1.1 -w wan -l lan1"
        );
    }

    #[test]
    fn test_leave_args() {
        let src = FlowSource::Address(Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(
            leave_args(&req(src, &["lan1", "lan2"], "lan1")).join(" "),
            "addmc -s 0 -g 239.1.1.1 -w wan -i 10.0.0.5 -l lan2"
        );
        assert_eq!(
            leave_args(&req(src, &["lan1"], "lan1")).join(" "),
            "addmc -g 239.1.1.1"
        );
    }
}
