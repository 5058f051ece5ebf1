// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! An in-memory accelerator.  It keeps the flow table a real device would
//! hold and a journal of every call made against it.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use slog::{debug, info, o, warn};

use aal::{AccelError, AccelOps, AccelResult, FlowRequest};

pub mod flows;

/// One call made against the accelerator, in the order it was made.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccelCall {
    Init,
    Join(FlowRequest),
    Leave(FlowRequest),
    Deinit,
}

pub struct StubHandle {
    log: slog::Logger,
    initialized: Mutex<bool>,
    flows: Mutex<flows::FlowTable>,
    journal: Mutex<Vec<AccelCall>>,
    refused: Mutex<BTreeSet<String>>,
}

impl StubHandle {
    pub fn new(log: &slog::Logger) -> Self {
        StubHandle {
            log: log.new(o!("accel" => "stub")),
            initialized: Mutex::new(false),
            flows: Mutex::new(flows::FlowTable::default()),
            journal: Mutex::new(Vec::new()),
            refused: Mutex::new(BTreeSet::new()),
        }
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<AccelCall> {
        self.journal.lock().unwrap().clone()
    }

    /// Every join request made so far, successful or not.
    pub fn joins(&self) -> Vec<FlowRequest> {
        self.journal
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                AccelCall::Join(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every leave request made so far, successful or not.
    pub fn leaves(&self) -> Vec<FlowRequest> {
        self.journal
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                AccelCall::Leave(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget the journal, leaving the flow table intact.
    pub fn clear_calls(&self) {
        self.journal.lock().unwrap().clear();
    }

    /// The downstream interfaces `group` is currently forwarded to.
    pub fn members(&self, group: Ipv4Addr) -> Vec<String> {
        self.flows.lock().unwrap().members(group)
    }

    pub fn flow_count(&self) -> usize {
        self.flows.lock().unwrap().flow_count()
    }

    /// Make joins for `lan_dev` fail until `allow()` is called for it.
    pub fn refuse(&self, lan_dev: &str) {
        self.refused.lock().unwrap().insert(lan_dev.to_string());
    }

    pub fn allow(&self, lan_dev: &str) {
        self.refused.lock().unwrap().remove(lan_dev);
    }

    fn record(&self, call: AccelCall) {
        self.journal.lock().unwrap().push(call);
    }

    fn check_init(&self, op: &str) -> AccelResult<()> {
        match *self.initialized.lock().unwrap() {
            true => Ok(()),
            false => Err(AccelError::Uninitialized(op.to_string())),
        }
    }
}

impl AccelOps for StubHandle {
    fn init(&self) -> AccelResult<()> {
        self.record(AccelCall::Init);
        let mut initialized = self.initialized.lock().unwrap();
        if *initialized {
            warn!(self.log, "accelerator initialized twice");
        }
        *initialized = true;
        info!(self.log, "stub accelerator ready");
        Ok(())
    }

    fn join(&self, req: &FlowRequest) -> AccelResult<()> {
        self.record(AccelCall::Join(req.clone()));
        self.check_init("join")?;
        if self.refused.lock().unwrap().contains(&req.lan_dev) {
            return Err(AccelError::Synthetic(format!(
                "joins refused for {}",
                req.lan_dev
            )));
        }

        let first = self.flows.lock().unwrap().add(req)?;
        if first == req.update {
            // Real backends would pick the wrong add/update entry point here.
            warn!(self.log, "update flag disagrees with flow table";
                "group" => %req.group,
                "lan_dev" => &req.lan_dev,
                "update" => req.update);
        }
        debug!(self.log, "join"; "req" => %req);
        Ok(())
    }

    fn leave(&self, req: &FlowRequest) -> AccelResult<()> {
        self.record(AccelCall::Leave(req.clone()));
        self.check_init("leave")?;
        self.flows.lock().unwrap().remove(req)?;
        debug!(self.log, "leave"; "req" => %req);
        Ok(())
    }

    fn deinit(&self) -> AccelResult<()> {
        self.record(AccelCall::Deinit);
        let mut initialized = self.initialized.lock().unwrap();
        let remaining = self.flows.lock().unwrap().flow_count();
        if remaining > 0 {
            warn!(self.log, "deinit with flows still programmed";
                "flows" => remaining);
        }
        *initialized = false;
        Ok(())
    }
}
