// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Handling of route notifications.  Unicast routes teach us the router's
//! own addresses; multicast routes bind a group to the sender and upstream
//! interface its traffic comes from.

use std::net::IpAddr;

use slog::{debug, info};

use aal::AccelOps;
use nlpacket::RouteMsg;

use crate::daemon::Daemon;
use crate::ifname::IfResolver;
use crate::types::Outcome;

// What a qualifying multicast route tells us.
struct McastRoute {
    source: IpAddr,
    group: IpAddr,
    iif: u32,
}

impl<H: AccelOps, R: IfResolver> Daemon<H, R> {
    pub fn route_add(&mut self, r: &RouteMsg) -> Outcome {
        self.learn_prefsrc(r)
    }

    /// Withdrawals still name a preferred source worth learning.  Addresses
    /// are never forgotten.  Only routes out of an upstream interface, or
    /// with no output interface at all, are consulted.
    pub fn route_delete(&mut self, r: &RouteMsg) -> Outcome {
        debug!(self.ctx.log, "route withdrawn";
            "dst" => r.dst.map(|a| a.to_string()),
            "prefsrc" => r.prefsrc.map(|a| a.to_string()));
        self.learn_prefsrc(r)
    }

    fn learn_prefsrc(&mut self, r: &RouteMsg) -> Outcome {
        if let Some(oif) = r.oif {
            match self.ctx.ifnames.name(oif) {
                Some(name) if self.ctx.hosts.is_wan(&name) => {}
                _ => return Outcome::Filtered("not an upstream route"),
            }
        }
        let Some(addr) = r.prefsrc else {
            return Outcome::Ignored("no preferred source".into());
        };
        if self.ctx.hosts.add_host_addr(addr) {
            info!(self.ctx.log, "learned host address"; "addr" => %addr);
        }
        Outcome::Applied(Default::default())
    }

    fn mroute_filter(&self, r: &RouteMsg) -> Result<McastRoute, Outcome> {
        if r.family != nlpacket::RTNL_FAMILY_IPMR {
            return Err(Outcome::Ignored(format!(
                "multicast routes of family {}",
                r.family
            )));
        }
        let Some(iif) = r.iif else {
            return Err(Outcome::Ignored("no incoming interface".into()));
        };
        let (Some(source), Some(group)) = (r.src, r.dst) else {
            return Err(Outcome::Ignored("no (S, G)".into()));
        };
        match self.ctx.ifnames.name(iif) {
            Some(name) if self.ctx.hosts.is_wan(&name) => {}
            _ => return Err(Outcome::Filtered("not from upstream")),
        }
        if self.ctx.hosts.is_local(&source) {
            return Err(Outcome::Filtered("locally originated"));
        }
        Ok(McastRoute { source, group, iif })
    }

    /// A multicast route appeared: bind its sender to the group if the group
    /// has none yet, then join whatever is waiting.
    pub fn mroute_add(&mut self, r: &RouteMsg) -> Outcome {
        let m = match self.mroute_filter(r) {
            Ok(m) => m,
            Err(out) => {
                debug!(self.ctx.log, "multicast route skipped: {out}";
                    "src" => r.src.map(|a| a.to_string()),
                    "group" => r.dst.map(|a| a.to_string()));
                return out;
            }
        };

        let Some(group) = self.groups.find_mut(&m.group) else {
            // Nobody downstream has asked for it (yet).
            info!(self.ctx.log, "route for untracked group";
                "group" => %m.group, "src" => %m.source);
            return Outcome::LookupMiss(format!("group {}", m.group));
        };
        match group.source {
            None => {
                group.bind_source(m.source, m.iif);
                info!(self.ctx.log, "source bound";
                    "group" => %m.group,
                    "src" => %m.source,
                    "wan" => self.ctx.ifnames.display_name(m.iif));
            }
            // A repeat of the route we bound: retry anything that failed.
            Some(src) if src == m.source => {}
            Some(src) => {
                debug!(self.ctx.log, "group already has a source";
                    "group" => %m.group,
                    "bound" => %src,
                    "offered" => %m.source);
                return Outcome::Ignored(format!("source already {src}"));
            }
        }
        self.groups.reconcile_join(&m.group, &self.ctx)
    }

    /// The kernel expiring a cache entry doesn't mean the group's members
    /// went away, so the flows are left alone.
    pub fn mroute_delete(&mut self, r: &RouteMsg) -> Outcome {
        debug!(self.ctx.log, "multicast route withdrawn";
            "src" => r.src.map(|a| a.to_string()),
            "group" => r.dst.map(|a| a.to_string()));
        Outcome::Ignored("multicast route withdrawal".into())
    }
}
