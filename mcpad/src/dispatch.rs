// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use slog::{debug, warn};

use aal::AccelOps;
use nlpacket::{MdbMsg, Message, RouteMsg};
use nlpacket::{RTNL_FAMILY_IP6MR, RTNL_FAMILY_IPMR};

use crate::daemon::Daemon;
use crate::ifname::IfResolver;
use crate::types::Outcome;

/// The six notifications the daemon acts on, plus everything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Event<'a> {
    MembershipAdd(&'a MdbMsg),
    MembershipDelete(&'a MdbMsg),
    RouteAdd(&'a RouteMsg),
    RouteDelete(&'a RouteMsg),
    MrouteAdd(&'a RouteMsg),
    MrouteDelete(&'a RouteMsg),
    /// Netlink housekeeping: acks, dump terminators and the like
    Control,
    Unrecognized(u16),
}

fn is_mroute(r: &RouteMsg) -> bool {
    r.family == RTNL_FAMILY_IPMR || r.family == RTNL_FAMILY_IP6MR
}

pub fn classify(msg: &Message) -> Event<'_> {
    match msg {
        Message::NewMdb(m) => Event::MembershipAdd(m),
        Message::DelMdb(m) => Event::MembershipDelete(m),
        Message::NewRoute(r) if is_mroute(r) => Event::MrouteAdd(r),
        Message::DelRoute(r) if is_mroute(r) => Event::MrouteDelete(r),
        Message::NewRoute(r) => Event::RouteAdd(r),
        Message::DelRoute(r) => Event::RouteDelete(r),
        Message::Noop | Message::Done | Message::Error(_) => Event::Control,
        Message::Overrun => Event::Control,
        Message::Unknown(kind) => Event::Unrecognized(*kind),
    }
}

impl<H: AccelOps, R: IfResolver> Daemon<H, R> {
    /// Apply one decoded message.
    pub fn handle_message(&mut self, msg: &Message) -> Vec<Outcome> {
        let event = classify(msg);
        let outcomes = match event {
            Event::MembershipAdd(m) => self.membership_add(m),
            Event::MembershipDelete(m) => self.membership_delete(m),
            Event::RouteAdd(r) => vec![self.route_add(r)],
            Event::RouteDelete(r) => vec![self.route_delete(r)],
            Event::MrouteAdd(r) => vec![self.mroute_add(r)],
            Event::MrouteDelete(r) => vec![self.mroute_delete(r)],
            Event::Control => {
                match msg {
                    Message::Error(errno) if *errno != 0 => {
                        warn!(self.ctx.log, "netlink error"; "errno" => errno)
                    }
                    Message::Overrun => {
                        warn!(self.ctx.log, "netlink overrun reported")
                    }
                    _ => {}
                }
                Vec::new()
            }
            Event::Unrecognized(kind) => {
                debug!(self.ctx.log, "unrecognized message"; "type" => kind);
                Vec::new()
            }
        };
        let name: &'static str = event.into();
        for out in &outcomes {
            debug!(self.ctx.log, "{name}: {out}");
        }
        outcomes
    }

    /// Apply every message in one datagram from the event socket.  Returns
    /// how many messages were decoded.
    pub fn handle_datagram(&mut self, buf: &[u8]) -> usize {
        let opts = self.ctx.parse_options();
        let mut handled = 0;
        for msg in nlpacket::messages(buf, &opts) {
            match msg {
                Ok(env) => {
                    self.handle_message(&env.msg);
                    handled += 1;
                }
                Err(e) => warn!(self.ctx.log, "malformed message: {e}"),
            }
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_util::*;
    use bytes::BytesMut;
    use nlpacket::{encode, encode_message, ParseOptions, RTM_NEWMDB};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify() {
        let m = mdb(IF_BR_LAN, IF_LAN1, "239.1.1.1");
        let r = mroute("10.0.0.5", "239.1.1.1", IF_WAN);
        let u = local_route("192.168.1.1", IF_BR_LAN);

        let msg = Message::NewMdb(m.clone());
        assert_eq!(classify(&msg), Event::MembershipAdd(&m));
        let msg = Message::DelMdb(m.clone());
        assert_eq!(classify(&msg), Event::MembershipDelete(&m));
        let msg = Message::NewRoute(r.clone());
        assert_eq!(classify(&msg), Event::MrouteAdd(&r));
        let msg = Message::DelRoute(r.clone());
        assert_eq!(classify(&msg), Event::MrouteDelete(&r));
        let msg = Message::NewRoute(u.clone());
        assert_eq!(classify(&msg), Event::RouteAdd(&u));
        let msg = Message::DelRoute(u.clone());
        assert_eq!(classify(&msg), Event::RouteDelete(&u));
        assert_eq!(classify(&Message::Done), Event::Control);
        assert_eq!(classify(&Message::Unknown(16)), Event::Unrecognized(16));

        let name: &'static str = Event::MrouteAdd(&r).into();
        assert_eq!(name, "mroute_add");
    }

    #[test]
    fn test_datagram() {
        let mut d = test_daemon(test_config());
        let opts = ParseOptions::default();
        let mut dgram = BytesMut::new();
        for msg in [
            Message::NewMdb(mdb(IF_BR_LAN, IF_LAN1, "224.0.18.100")),
            Message::NewRoute(local_route("100.64.0.2", IF_WAN)),
            Message::NewRoute(mroute("10.0.0.5", "224.0.18.100", IF_WAN)),
            Message::Unknown(16),
        ] {
            dgram.extend_from_slice(&encode_message(&msg, 0, &opts));
        }

        assert_eq!(d.handle_datagram(&dgram), 4);
        assert_eq!(d.ctx.accel.joins().len(), 1);
        assert!(d.ctx.hosts.is_local(&ip("100.64.0.2")));
    }

    #[test]
    fn test_malformed_message_skipped() {
        let mut d = test_daemon(Config {
            source: Some("10.1.1.1".parse().unwrap()),
            ..test_config()
        });
        let opts = ParseOptions::default();
        let mut dgram = BytesMut::new();
        // an MDB message too short to hold a br_port_msg
        dgram.extend_from_slice(&encode(RTM_NEWMDB, 0, 1, &[7, 0]));
        dgram.extend_from_slice(&encode_message(
            &Message::NewMdb(mdb(IF_BR_LAN, IF_LAN1, "239.1.1.1")),
            2,
            &opts,
        ));

        assert_eq!(d.handle_datagram(&dgram), 1);
        assert_eq!(d.ctx.accel.joins().len(), 1);
    }

    #[test]
    fn test_src_mac_option() {
        let mut d = test_daemon(Config {
            source: Some("10.1.1.1".parse().unwrap()),
            mdb_src_mac: true,
            ..test_config()
        });
        let mac = common::network::MacAddr::new(2, 0, 0, 0, 0, 9);
        let opts = ParseOptions { src_mac_ext: true };
        let msg = Message::NewMdb(mdb_mac(
            IF_BR_LAN,
            IF_LAN1,
            "239.1.1.1",
            Some(mac),
        ));
        d.handle_datagram(&encode_message(&msg, 0, &opts));
        assert_eq!(d.ctx.accel.joins()[0].src_mac, Some(mac));
    }
}
