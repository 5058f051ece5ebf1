// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Handling of bridge multicast database notifications: each entry names a
//! group and the bridge port (and maybe the device) that subscribed to it.

use slog::{debug, error, info};

use aal::AccelOps;
use nlpacket::{MdbEntry, MdbMsg};

use crate::daemon::Daemon;
use crate::group::MemberKey;
use crate::ifname::IfResolver;
use crate::types::Outcome;

impl<H: AccelOps, R: IfResolver> Daemon<H, R> {
    /// Record new memberships and join them.  There is one outcome per
    /// entry in the message.
    pub fn membership_add(&mut self, msg: &MdbMsg) -> Vec<Outcome> {
        msg.entries
            .iter()
            .map(|e| self.membership_entry_add(msg.bridge_ifindex, e))
            .collect()
    }

    /// Leave and forget departed memberships.
    pub fn membership_delete(&mut self, msg: &MdbMsg) -> Vec<Outcome> {
        msg.entries
            .iter()
            .map(|e| self.membership_entry_delete(msg.bridge_ifindex, e))
            .collect()
    }

    // Returns the reason the entry should be dropped, if it should be.
    fn membership_filter(
        &self,
        bridge_ifindex: u32,
        e: &MdbEntry,
    ) -> Option<&'static str> {
        let ctx = &self.ctx;
        let port = ctx.ifnames.name(e.port_ifindex);
        if port.as_deref().is_some_and(|p| ctx.hosts.is_wan(p)) {
            return Some("port is upstream");
        }
        let bridge = ctx.ifnames.name(bridge_ifindex);
        if bridge.as_deref().is_some_and(|b| ctx.hosts.is_wan(b)) {
            return Some("bridge is upstream");
        }
        if let Some(want) = &ctx.config.bridge {
            if bridge.as_deref() != Some(want.as_str()) {
                return Some("not the configured bridge");
            }
        }
        if ctx.config.nowifi
            && port
                .as_deref()
                .is_some_and(|p| p.starts_with(&ctx.config.wifi_prefix))
        {
            return Some("wireless port");
        }
        if e.is_permanent() {
            return Some("permanent entry");
        }
        if e.group.is_ipv6() {
            return Some("IPv6 group");
        }
        None
    }

    fn membership_entry_add(
        &mut self,
        bridge_ifindex: u32,
        e: &MdbEntry,
    ) -> Outcome {
        let log = &self.ctx.log;
        let port = self.ctx.ifnames.display_name(e.port_ifindex);
        if let Some(why) = self.membership_filter(bridge_ifindex, e) {
            debug!(log, "membership filtered: {why}";
                "group" => %e.group, "port" => &port);
            return Outcome::Filtered(why);
        }

        let created = match self.groups.find_or_create(e.group, bridge_ifindex)
        {
            Ok((_, created)) => created,
            Err(err) => {
                error!(log, "dropping membership: {err}";
                    "group" => %e.group, "port" => &port);
                return Outcome::Abandoned(err.to_string());
            }
        };
        if created {
            info!(log, "new group"; "group" => %e.group,
                "bridge" => self.ctx.ifnames.display_name(bridge_ifindex));
        }

        let key = MemberKey::new(e.port_ifindex, e.src_mac);
        match self.groups.add_member(&e.group, key) {
            Ok(true) => info!(log, "member added";
                "group" => %e.group,
                "port" => &port,
                "mac" => e.src_mac.map(|m| m.to_string())),
            Ok(false) => debug!(log, "member already present";
                "group" => %e.group, "port" => &port),
            Err(err) => {
                error!(log, "dropping membership: {err}";
                    "group" => %e.group, "port" => &port);
                if created {
                    self.groups.remove_if_empty(&e.group);
                }
                return Outcome::Abandoned(err.to_string());
            }
        }

        self.groups.reconcile_join(&e.group, &self.ctx)
    }

    fn membership_entry_delete(
        &mut self,
        bridge_ifindex: u32,
        e: &MdbEntry,
    ) -> Outcome {
        let port = self.ctx.ifnames.display_name(e.port_ifindex);
        if let Some(why) = self.membership_filter(bridge_ifindex, e) {
            debug!(self.ctx.log, "membership filtered: {why}";
                "group" => %e.group, "port" => &port);
            return Outcome::Filtered(why);
        }

        info!(self.ctx.log, "member departed";
            "group" => %e.group, "port" => &port);
        let key = MemberKey::new(e.port_ifindex, e.src_mac);
        self.groups.reconcile_leave(&e.group, Some(key), &self.ctx)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::group::MemberKey;
    use crate::test_util::*;
    use crate::types::{CallStats, Outcome};
    use common::network::MacAddr;
    use nlpacket::mdb::MDB_PERMANENT;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    fn joined(n: usize) -> Outcome {
        Outcome::Applied(CallStats {
            joined: n,
            ..Default::default()
        })
    }

    fn left(n: usize) -> Outcome {
        Outcome::Applied(CallStats {
            left: n,
            ..Default::default()
        })
    }

    fn fixed_config() -> Config {
        Config {
            source: Some(Ipv4Addr::new(10, 1, 1, 1)),
            ..test_config()
        }
    }

    #[test]
    fn test_routed_add_waits() {
        let mut d = test_daemon(test_config());
        let g = ip("224.0.18.100");
        let out = d.membership_add(&mdb(IF_BR_LAN, IF_LAN1, "224.0.18.100"));
        assert_eq!(out, vec![Outcome::NotReady]);

        let rec = d.groups.find(&g).unwrap();
        assert_eq!(rec.bridge_ifindex, IF_BR_LAN);
        assert_eq!(rec.member_count(), 1);
        assert!(d.ctx.accel.joins().is_empty());
    }

    #[test]
    fn test_duplicate_add() {
        let mut d = test_daemon(fixed_config());
        let msg = mdb(IF_BR_LAN, IF_LAN1, "239.1.1.1");
        assert_eq!(d.membership_add(&msg), vec![joined(1)]);
        assert_eq!(d.membership_add(&msg), vec![joined(0)]);
        assert_eq!(d.ctx.accel.joins().len(), 1);
        assert_eq!(d.groups.find(&ip("239.1.1.1")).unwrap().member_count(), 1);
    }

    #[test]
    fn test_macs_are_distinct_members() {
        let mut d = test_daemon(Config {
            mdb_src_mac: true,
            ..fixed_config()
        });
        let m1 = MacAddr::new(0, 0, 0, 0, 0, 1);
        let m2 = MacAddr::new(0, 0, 0, 0, 0, 2);
        d.membership_add(&mdb_mac(IF_BR_LAN, IF_LAN1, "239.1.1.1", Some(m1)));
        d.membership_add(&mdb_mac(IF_BR_LAN, IF_LAN1, "239.1.1.1", Some(m2)));

        let joins = d.ctx.accel.joins();
        assert_eq!(joins.len(), 2);
        assert_eq!(joins[0].src_mac, Some(m1));
        assert_eq!(joins[1].src_mac, Some(m2));
        assert!(joins[1].update);

        let out = d.membership_delete(&mdb_mac(
            IF_BR_LAN,
            IF_LAN1,
            "239.1.1.1",
            Some(m1),
        ));
        assert_eq!(out, vec![left(1)]);
        let rec = d.groups.find(&ip("239.1.1.1")).unwrap();
        assert!(rec.member(&MemberKey::new(IF_LAN1, Some(m2))).is_some());
    }

    #[test]
    fn test_delete_unknown() {
        let mut d = test_daemon(fixed_config());
        let out = d.membership_delete(&mdb(IF_BR_LAN, IF_LAN1, "239.1.1.1"));
        assert!(matches!(out[..], [Outcome::LookupMiss(_)]));

        d.membership_add(&mdb(IF_BR_LAN, IF_LAN1, "239.1.1.1"));
        let out = d.membership_delete(&mdb(IF_BR_LAN, IF_LAN2, "239.1.1.1"));
        assert!(matches!(out[..], [Outcome::LookupMiss(_)]));
        assert!(d.ctx.accel.leaves().is_empty());
    }

    #[test]
    fn test_last_member_removes_group() {
        let mut d = test_daemon(fixed_config());
        d.membership_add(&mdb(IF_BR_LAN, IF_LAN1, "239.1.1.1"));
        let out = d.membership_delete(&mdb(IF_BR_LAN, IF_LAN1, "239.1.1.1"));
        assert_eq!(out, vec![left(1)]);
        assert!(d.groups.is_empty());
    }

    #[test]
    fn test_filters() {
        let mut d = test_daemon(Config {
            nowifi: true,
            video2lan: Some("br-video".to_string()),
            ..fixed_config()
        });

        let out = d.membership_add(&mdb(IF_BR_LAN, IF_WAN, "239.1.1.1"));
        assert_eq!(out, vec![Outcome::Filtered("port is upstream")]);
        let out = d.membership_add(&mdb(IF_BR_VIDEO, IF_LAN1, "239.1.1.1"));
        assert_eq!(out, vec![Outcome::Filtered("bridge is upstream")]);
        let out = d.membership_add(&mdb(IF_BR_LAN, IF_WLAN, "239.1.1.1"));
        assert_eq!(out, vec![Outcome::Filtered("wireless port")]);
        let out = d.membership_add(&mdb(IF_BR_LAN, IF_LAN1, "ff05::1:3"));
        assert_eq!(out, vec![Outcome::Filtered("IPv6 group")]);

        let mut msg = mdb(IF_BR_LAN, IF_LAN1, "239.1.1.1");
        msg.entries[0].state = MDB_PERMANENT;
        assert_eq!(
            d.membership_add(&msg),
            vec![Outcome::Filtered("permanent entry")]
        );

        assert!(d.groups.is_empty());
        assert!(d.ctx.accel.joins().is_empty());
    }

    #[test]
    fn test_explicit_bridge() {
        let mut d = test_daemon(Config {
            bridge: Some("br-lan".to_string()),
            ..test_config()
        });
        let out = d.membership_add(&mdb(IF_BR_VIDEO, IF_LAN1, "239.1.1.1"));
        assert_eq!(out, vec![Outcome::Filtered("not the configured bridge")]);

        let out = d.membership_add(&mdb(IF_BR_LAN, IF_LAN1, "239.1.1.1"));
        assert_eq!(out, vec![joined(1)]);
        assert!(d.groups.find(&ip("239.1.1.1")).unwrap().joined);
    }

    #[test]
    fn test_wireless_allowed_without_nowifi() {
        let mut d = test_daemon(fixed_config());
        let out = d.membership_add(&mdb(IF_BR_LAN, IF_WLAN, "239.1.1.1"));
        assert_eq!(out, vec![joined(1)]);
        assert_eq!(d.ctx.accel.joins()[0].lan_dev, "wlan0");
    }

    #[test]
    fn test_table_full() {
        let mut d = test_daemon(Config {
            max_groups: 1,
            max_members: 1,
            ..fixed_config()
        });
        d.membership_add(&mdb(IF_BR_LAN, IF_LAN1, "239.1.1.1"));

        let out = d.membership_add(&mdb(IF_BR_LAN, IF_LAN1, "239.1.1.2"));
        assert!(matches!(out[..], [Outcome::Abandoned(_)]));
        let out = d.membership_add(&mdb(IF_BR_LAN, IF_LAN2, "239.1.1.1"));
        assert!(matches!(out[..], [Outcome::Abandoned(_)]));

        assert_eq!(d.groups.len(), 1);
        assert_eq!(d.ctx.accel.joins().len(), 1);
    }

    #[test]
    fn test_multi_entry_message() {
        let mut d = test_daemon(fixed_config());
        let mut msg = mdb(IF_BR_LAN, IF_LAN1, "239.1.1.1");
        let mut second = msg.entries[0].clone();
        second.port_ifindex = IF_WAN;
        msg.entries.push(second);
        let mut third = msg.entries[0].clone();
        third.port_ifindex = IF_LAN2;
        msg.entries.push(third);

        let out = d.membership_add(&msg);
        assert_eq!(
            out,
            vec![
                joined(1),
                Outcome::Filtered("port is upstream"),
                joined(1)
            ]
        );
    }
}
