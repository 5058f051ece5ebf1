// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use netlink_packet_route::route::{
    RouteAddress, RouteAttribute, RouteMessage, RouteType,
};
use netlink_packet_route::AddressFamily;

use crate::{PacketError, PacketResult};

/// sizeof(struct rtmsg)
pub const RTMSG_LEN: usize = 12;

pub const RTN_UNICAST: u8 = 1;
pub const RTN_LOCAL: u8 = 2;
pub const RTN_MULTICAST: u8 = 5;

/// The parts of an `RTM_NEWROUTE` / `RTM_DELROUTE` body we act on.
/// Multicast routes (`RTNL_FAMILY_IPMR`) describe an (S, G) entry: `src` is
/// the sender, `dst` the group and `iif` the interface the traffic arrives
/// on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteMsg {
    pub family: u8,
    pub dst_len: u8,
    pub src_len: u8,
    pub table: u32,
    pub kind: u8,
    pub dst: Option<IpAddr>,
    pub src: Option<IpAddr>,
    pub iif: Option<u32>,
    pub oif: Option<u32>,
    pub gateway: Option<IpAddr>,
    pub prefsrc: Option<IpAddr>,
}

impl RouteMsg {
    pub fn is_multicast(&self) -> bool {
        self.kind == RTN_MULTICAST
    }
}

// Families above AF_MAX, like the multicast routing caches, come back from
// the decoder as raw bytes.
fn route_addr(family: u8, addr: &RouteAddress) -> PacketResult<IpAddr> {
    let ip = match addr {
        RouteAddress::Inet(a) => IpAddr::V4(*a),
        RouteAddress::Inet6(a) => IpAddr::V6(*a),
        RouteAddress::Other(raw) => match raw.len() {
            4 => {
                let b: [u8; 4] = raw[..].try_into().unwrap_or_default();
                IpAddr::V4(Ipv4Addr::from(b))
            }
            16 => {
                let b: [u8; 16] = raw[..].try_into().unwrap_or_default();
                IpAddr::V6(Ipv6Addr::from(b))
            }
            n => {
                return Err(PacketError::Invalid(format!(
                    "route address has length {n}"
                )))
            }
        },
        other => {
            return Err(PacketError::Invalid(format!(
                "unexpected route address {other:?}"
            )))
        }
    };

    let width = match ip {
        IpAddr::V4(_) => 4,
        IpAddr::V6(_) => 16,
    };
    match crate::addr_len(family) {
        Some(w) if w == width => Ok(ip),
        Some(w) => Err(PacketError::Invalid(format!(
            "{width}-byte address in a family {family} route, expected {w}"
        ))),
        None => Err(PacketError::Invalid(format!(
            "no addresses for family {family}"
        ))),
    }
}

fn to_route_addr(family: u8, ip: IpAddr) -> RouteAddress {
    match (AddressFamily::from(family), ip) {
        (AddressFamily::Inet, IpAddr::V4(a)) => RouteAddress::Inet(a),
        (AddressFamily::Inet6, IpAddr::V6(a)) => RouteAddress::Inet6(a),
        (_, IpAddr::V4(a)) => RouteAddress::Other(a.octets().to_vec()),
        (_, IpAddr::V6(a)) => RouteAddress::Other(a.octets().to_vec()),
    }
}

impl TryFrom<&RouteMessage> for RouteMsg {
    type Error = PacketError;

    fn try_from(msg: &RouteMessage) -> PacketResult<RouteMsg> {
        let hdr = &msg.header;
        let family = u8::from(hdr.address_family);
        let mut r = RouteMsg {
            family,
            dst_len: hdr.destination_prefix_length,
            src_len: hdr.source_prefix_length,
            table: hdr.table as u32,
            kind: u8::from(hdr.kind),
            ..Default::default()
        };

        for attr in &msg.attributes {
            match attr {
                RouteAttribute::Destination(a) => {
                    r.dst = Some(route_addr(family, a)?)
                }
                RouteAttribute::Source(a) => {
                    r.src = Some(route_addr(family, a)?)
                }
                RouteAttribute::Gateway(a) => {
                    r.gateway = Some(route_addr(family, a)?)
                }
                RouteAttribute::PrefSource(a) => {
                    r.prefsrc = Some(route_addr(family, a)?)
                }
                RouteAttribute::Iif(idx) => r.iif = Some(*idx),
                RouteAttribute::Oif(idx) => r.oif = Some(*idx),
                RouteAttribute::Table(t) => r.table = *t,
                // metrics, multipath, cache info, expiry, ...
                _ => {}
            }
        }
        Ok(r)
    }
}

impl From<&RouteMsg> for RouteMessage {
    fn from(r: &RouteMsg) -> RouteMessage {
        let mut msg = RouteMessage::default();
        msg.header.address_family = AddressFamily::from(r.family);
        msg.header.destination_prefix_length = r.dst_len;
        msg.header.source_prefix_length = r.src_len;
        msg.header.table = r.table.min(u8::MAX as u32) as u8;
        msg.header.kind = RouteType::from(r.kind);

        let attrs = &mut msg.attributes;
        if r.table > u8::MAX as u32 {
            attrs.push(RouteAttribute::Table(r.table));
        }
        if let Some(a) = r.dst {
            attrs.push(RouteAttribute::Destination(to_route_addr(r.family, a)));
        }
        if let Some(a) = r.src {
            attrs.push(RouteAttribute::Source(to_route_addr(r.family, a)));
        }
        if let Some(a) = r.gateway {
            attrs.push(RouteAttribute::Gateway(to_route_addr(r.family, a)));
        }
        if let Some(a) = r.prefsrc {
            attrs.push(RouteAttribute::PrefSource(to_route_addr(r.family, a)));
        }
        if let Some(idx) = r.iif {
            attrs.push(RouteAttribute::Iif(idx));
        }
        if let Some(idx) = r.oif {
            attrs.push(RouteAttribute::Oif(idx));
        }
        msg
    }
}
