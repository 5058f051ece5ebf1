// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The group table: every multicast group with at least one downstream
//! member, and the reconciliation of that table with the accelerator.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

use slog::{debug, error, info, warn};

use aal::{AccelOps, FlowRequest, FlowSource};
use common::network::MacAddr;

use crate::daemon::Context;
use crate::ifname::IfResolver;
use crate::types::{CallStats, McastError, McastResult, Outcome, SourceMode};

/// A downstream member is a bridge port, optionally narrowed to one
/// subscribing device on that port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemberKey {
    pub ifindex: u32,
    pub mac: Option<MacAddr>,
}

impl MemberKey {
    pub fn new(ifindex: u32, mac: Option<MacAddr>) -> Self {
        MemberKey { ifindex, mac }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberRecord {
    pub key: MemberKey,
    /// The accelerator has accepted a join for this member
    pub joined: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupRecord {
    pub addr: IpAddr,
    /// Bridge the members were learned on, or 0 for manual entries
    pub bridge_ifindex: u32,
    /// Interface the group's traffic arrives on, once a route names it
    pub ingress: Option<u32>,
    /// Sender bound by the first qualifying multicast route
    pub source: Option<IpAddr>,
    /// At least one member is joined in bridged mode
    pub joined: bool,
    members: BTreeMap<MemberKey, MemberRecord>,
}

impl GroupRecord {
    fn new(addr: IpAddr, bridge_ifindex: u32) -> Self {
        GroupRecord {
            addr,
            bridge_ifindex,
            ingress: None,
            source: None,
            joined: false,
            members: BTreeMap::new(),
        }
    }

    pub fn members(&self) -> impl Iterator<Item = &MemberRecord> {
        self.members.values()
    }

    pub fn member(&self, key: &MemberKey) -> Option<&MemberRecord> {
        self.members.get(key)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn joined_count(&self) -> usize {
        self.members.values().filter(|m| m.joined).count()
    }

    /// Drop one member, returning it if it was present.
    pub fn remove_member(&mut self, key: &MemberKey) -> Option<MemberRecord> {
        self.members.remove(key)
    }

    /// Bind the group's source and ingress, unless a source is already
    /// bound.  Returns whether the binding was made.
    pub fn bind_source(&mut self, source: IpAddr, ingress: u32) -> bool {
        if self.source.is_some() {
            return false;
        }
        self.source = Some(source);
        self.ingress = Some(ingress);
        true
    }

    fn member_names<R: IfResolver>(&self, ifnames: &R) -> Vec<String> {
        self.members
            .keys()
            .map(|k| ifnames.display_name(k.ifindex))
            .collect()
    }

    fn wan_name<H, R: IfResolver>(&self, ctx: &Context<H, R>) -> String {
        match self.ingress {
            Some(idx) => ctx.ifnames.display_name(idx),
            None => ctx.hosts.default_wan().to_string(),
        }
    }

    // The source the accelerator should be given for this group, if it can
    // be programmed at all yet.
    fn flow_source(&self, mode: SourceMode) -> Option<FlowSource> {
        match mode {
            SourceMode::Bridged => Some(FlowSource::Bridged),
            SourceMode::Fixed(src) => Some(FlowSource::Address(src)),
            SourceMode::Routed => match self.source {
                Some(IpAddr::V4(src)) => Some(FlowSource::Address(src)),
                _ => None,
            },
        }
    }

    fn request<R: IfResolver>(
        &self,
        group: Ipv4Addr,
        source: FlowSource,
        wan: &str,
        key: &MemberKey,
        ifnames: &R,
    ) -> FlowRequest {
        FlowRequest {
            group,
            source,
            wan: wan.to_string(),
            lan: self.member_names(ifnames),
            lan_dev: ifnames.display_name(key.ifindex),
            src_mac: key.mac,
            update: self.members.values().any(|m| m.joined && m.key != *key),
        }
    }
}

pub struct GroupTable {
    groups: BTreeMap<IpAddr, GroupRecord>,
    max_groups: usize,
    max_members: usize,
}

impl GroupTable {
    pub fn new(max_groups: usize, max_members: usize) -> Self {
        GroupTable {
            groups: BTreeMap::new(),
            max_groups,
            max_members,
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupRecord> {
        self.groups.values()
    }

    pub fn find(&self, addr: &IpAddr) -> Option<&GroupRecord> {
        self.groups.get(addr)
    }

    pub fn find_mut(&mut self, addr: &IpAddr) -> Option<&mut GroupRecord> {
        self.groups.get_mut(addr)
    }

    pub fn create(
        &mut self,
        addr: IpAddr,
        bridge_ifindex: u32,
    ) -> McastResult<&mut GroupRecord> {
        if self.groups.contains_key(&addr) {
            return Err(McastError::Exists(format!("group {addr}")));
        }
        if self.groups.len() >= self.max_groups {
            return Err(McastError::TableFull(format!(
                "groups ({} entries)",
                self.max_groups
            )));
        }
        Ok(self
            .groups
            .entry(addr)
            .or_insert_with(|| GroupRecord::new(addr, bridge_ifindex)))
    }

    /// Find the group, creating it if needed.  The bool is `true` if the
    /// group was created.
    pub fn find_or_create(
        &mut self,
        addr: IpAddr,
        bridge_ifindex: u32,
    ) -> McastResult<(&mut GroupRecord, bool)> {
        if self.groups.contains_key(&addr) {
            let group = self.groups.get_mut(&addr).ok_or_else(|| {
                McastError::Missing(format!("group {addr}"))
            })?;
            return Ok((group, false));
        }
        self.create(addr, bridge_ifindex).map(|g| (g, true))
    }

    /// Add a member to an existing group.  Returns `false` if it was already
    /// present.
    pub fn add_member(
        &mut self,
        addr: &IpAddr,
        key: MemberKey,
    ) -> McastResult<bool> {
        let max = self.max_members;
        let group = self
            .groups
            .get_mut(addr)
            .ok_or_else(|| McastError::Missing(format!("group {addr}")))?;
        if group.members.contains_key(&key) {
            return Ok(false);
        }
        if group.members.len() >= max {
            return Err(McastError::TableFull(format!(
                "members of {addr} ({max} entries)"
            )));
        }
        group.members.insert(key, MemberRecord { key, joined: false });
        Ok(true)
    }

    /// Drop the group if it has no members left.
    pub fn remove_if_empty(&mut self, addr: &IpAddr) -> bool {
        match self.groups.get(addr) {
            Some(g) if g.members.is_empty() => {
                self.groups.remove(addr);
                true
            }
            _ => false,
        }
    }

    /// Issue a join for every member of the group not yet joined.  Members
    /// whose join fails stay unjoined and are retried by the next reconcile.
    pub fn reconcile_join<H: AccelOps, R: IfResolver>(
        &mut self,
        addr: &IpAddr,
        ctx: &Context<H, R>,
    ) -> Outcome {
        let Some(group) = self.groups.get_mut(addr) else {
            return Outcome::LookupMiss(format!("group {addr}"));
        };
        let IpAddr::V4(group_addr) = *addr else {
            return Outcome::Ignored("IPv6 groups are not accelerated".into());
        };
        let Some(source) = group.flow_source(ctx.mode) else {
            debug!(ctx.log, "no source yet"; "group" => %addr);
            return Outcome::NotReady;
        };

        let wan = group.wan_name(ctx);
        let pending: Vec<MemberKey> = group
            .members
            .values()
            .filter(|m| !m.joined)
            .map(|m| m.key)
            .collect();

        let mut stats = CallStats::default();
        for key in pending {
            let req =
                group.request(group_addr, source, &wan, &key, &ctx.ifnames);
            match ctx.accel.join(&req) {
                Ok(()) => {
                    info!(ctx.log, "joined"; "flow" => %req);
                    if let Some(m) = group.members.get_mut(&key) {
                        m.joined = true;
                    }
                    stats.joined += 1;
                }
                Err(e) => {
                    error!(ctx.log, "join failed: {e}"; "flow" => %req);
                    stats.failed += 1;
                }
            }
        }

        if source.is_bridged() && group.joined_count() > 0 {
            group.joined = true;
        }
        Outcome::Applied(stats)
    }

    /// Leave and remove one member of the group, or every member if `target`
    /// is `None`.  Only joined members cost an accelerator call.  The group
    /// goes away with its last member.
    pub fn reconcile_leave<H: AccelOps, R: IfResolver>(
        &mut self,
        addr: &IpAddr,
        target: Option<MemberKey>,
        ctx: &Context<H, R>,
    ) -> Outcome {
        let Some(group) = self.groups.get_mut(addr) else {
            info!(ctx.log, "leave for untracked group"; "group" => %addr);
            return Outcome::LookupMiss(format!("group {addr}"));
        };
        let targets: Vec<MemberKey> = match target {
            Some(key) if !group.members.contains_key(&key) => {
                let member = ctx.ifnames.display_name(key.ifindex);
                info!(ctx.log, "leave for unknown member";
                    "group" => %addr, "member" => &member);
                return Outcome::LookupMiss(format!(
                    "member {member} of group {addr}"
                ));
            }
            Some(key) => vec![key],
            None => group.members.keys().copied().collect(),
        };

        let source = group.flow_source(ctx.mode);
        let wan = group.wan_name(ctx);
        let mut stats = CallStats::default();
        for key in targets {
            let joined = group.members.get(&key).is_some_and(|m| m.joined);
            if joined {
                match (*addr, source) {
                    (IpAddr::V4(g), Some(source)) => {
                        let req =
                            group.request(g, source, &wan, &key, &ctx.ifnames);
                        match ctx.accel.leave(&req) {
                            Ok(()) => {
                                info!(ctx.log, "left"; "flow" => %req);
                                stats.left += 1;
                            }
                            Err(e) => {
                                error!(ctx.log, "leave failed: {e}";
                                    "flow" => %req);
                                stats.failed += 1;
                            }
                        }
                    }
                    _ => warn!(ctx.log, "joined member has no flow to leave";
                        "group" => %addr, "ifindex" => key.ifindex),
                }
            }
            // Removed as we go, so each leave sees the remaining members.
            group.remove_member(&key);
        }

        if group.joined && group.joined_count() == 0 {
            group.joined = false;
        }
        if group.members.is_empty() {
            self.groups.remove(addr);
            info!(ctx.log, "group removed"; "group" => %addr);
        }
        Outcome::Applied(stats)
    }

    /// Leave every joined member of every group and empty the table.
    pub fn flush_all<H: AccelOps, R: IfResolver>(
        &mut self,
        ctx: &Context<H, R>,
    ) -> CallStats {
        let addrs: Vec<IpAddr> = self.groups.keys().copied().collect();
        let mut stats = CallStats::default();
        for addr in addrs {
            if let Outcome::Applied(s) = self.reconcile_leave(&addr, None, ctx)
            {
                stats.absorb(s);
            }
        }
        stats
    }
}
