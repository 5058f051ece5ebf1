// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use aal::{AccelError, AccelResult, FlowRequest, FlowSource};
use common::network::MacAddr;

/// One programmed flow: `group` traffic from `source` arriving on `wan`,
/// forwarded to a single downstream interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Flow {
    pub source: FlowSource,
    pub wan: String,
}

// Subscribers behind the same port are told apart by MAC.
type FlowKey = (String, Option<MacAddr>);

fn flow_key(req: &FlowRequest) -> FlowKey {
    (req.lan_dev.clone(), req.src_mac)
}

/// The forwarding state a real accelerator would hold, keyed by group and
/// then by downstream interface and subscriber.
#[derive(Debug, Default)]
pub struct FlowTable {
    groups: BTreeMap<Ipv4Addr, BTreeMap<FlowKey, Flow>>,
}

fn no_flow(req: &FlowRequest) -> AccelError {
    AccelError::Missing(format!(
        "no flow for group {} on {}",
        req.group, req.lan_dev
    ))
}

impl FlowTable {
    /// Add a flow.  Returns `true` if this was the group's first flow.
    pub fn add(&mut self, req: &FlowRequest) -> AccelResult<bool> {
        let group = self.groups.entry(req.group).or_default();
        let key = flow_key(req);
        if group.contains_key(&key) {
            return Err(AccelError::Exists(format!(
                "group {} already forwarded to {}",
                req.group, req.lan_dev
            )));
        }

        let first = group.is_empty();
        group.insert(
            key,
            Flow {
                source: req.source,
                wan: req.wan.clone(),
            },
        );
        Ok(first)
    }

    /// Remove a flow, dropping the group once its last flow is gone.
    pub fn remove(&mut self, req: &FlowRequest) -> AccelResult<Flow> {
        let group =
            self.groups.get_mut(&req.group).ok_or_else(|| no_flow(req))?;
        let flow =
            group.remove(&flow_key(req)).ok_or_else(|| no_flow(req))?;
        if group.is_empty() {
            self.groups.remove(&req.group);
        }
        Ok(flow)
    }

    /// Return the downstream interfaces a group is forwarded to, once per
    /// subscriber.
    pub fn members(&self, group: Ipv4Addr) -> Vec<String> {
        self.groups
            .get(&group)
            .map(|g| g.keys().map(|(dev, _)| dev.clone()).collect())
            .unwrap_or_default()
    }

    pub fn get(
        &self,
        group: Ipv4Addr,
        lan_dev: &str,
        src_mac: Option<MacAddr>,
    ) -> Option<&Flow> {
        self.groups
            .get(&group)
            .and_then(|g| g.get(&(lan_dev.to_string(), src_mac)))
    }

    /// Get the total number of flows across all groups.
    pub fn flow_count(&self) -> usize {
        self.groups.values().map(|g| g.len()).sum()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}
