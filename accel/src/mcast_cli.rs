// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Intel `mcast_cli`, which programs one downstream interface per call.

use slog::{info, o, Logger};

use aal::{AccelOps, AccelResult, FlowRequest};

use crate::cmd::run_cmd;

pub const MCAST_CLI: &str = "/opt/lantiq/usr/sbin/mcast_cli";

pub struct McastCliHandle {
    log: Logger,
    cmd: String,
    uninit_on_exit: bool,
}

impl McastCliHandle {
    pub fn new(log: &Logger, cmd: Option<&str>, uninit_on_exit: bool) -> Self {
        McastCliHandle {
            log: log.new(o!("accel" => "mcast_cli")),
            cmd: cmd.unwrap_or(MCAST_CLI).to_string(),
            uninit_on_exit,
        }
    }

    fn op(&self, args: Vec<String>) -> AccelResult<()> {
        run_cmd(&self.log, &self.cmd, &args).map(|_| ())
    }
}

fn op_args(op: &str) -> Vec<String> {
    vec!["-O".to_string(), op.to_string()]
}

pub(crate) fn entry_args(op: &str, req: &FlowRequest) -> Vec<String> {
    let mut args = op_args(op);
    args.extend([
        "-G".to_string(),
        req.group.to_string(),
        "-R".to_string(),
        req.wan.clone(),
    ]);
    if let Some(src) = req.source.address() {
        args.extend(["-S".to_string(), src.to_string()]);
    }
    args.extend(["-I".to_string(), req.lan_dev.clone()]);
    args
}

impl AccelOps for McastCliHandle {
    fn init(&self) -> AccelResult<()> {
        self.op(op_args("INIT"))?;
        info!(self.log, "mcast_cli initialized");
        Ok(())
    }

    fn join(&self, req: &FlowRequest) -> AccelResult<()> {
        self.op(entry_args("ADD", req))
    }

    fn leave(&self, req: &FlowRequest) -> AccelResult<()> {
        self.op(entry_args("DEL", req))
    }

    fn deinit(&self) -> AccelResult<()> {
        // UNINIT tears down the whole mcast subsystem, including entries
        // owned by other agents.
        if self.uninit_on_exit {
            self.op(op_args("UNINIT"))
        } else {
            info!(self.log, "leaving mcast_cli initialized");
            Ok(())
        }
    }
}
