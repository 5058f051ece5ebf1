// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Just enough of the rtnetlink wire format to follow bridge multicast
//! database and route notifications, and to ask the kernel for dumps of both.
//! Framing and route bodies go through the netlink-packet crates; the bridge
//! MDB body, which they don't cover, is decoded here.

use bytes::{BufMut, BytesMut};
use netlink_packet_core::{
    NetlinkBuffer, NetlinkHeader, NetlinkMessage, NetlinkPayload,
};
use netlink_packet_route::route::RouteMessage;
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};

pub mod attr;
pub mod mdb;
pub mod pbuf;
pub mod route;

pub use mdb::{MdbEntry, MdbMsg};
pub use route::RouteMsg;

use pbuf::ParseBuffer;

pub type PacketResult<T> = Result<T, PacketError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PacketError {
    /// Ran out of data, or found a length that doesn't fit
    #[error("parse error at byte {offset}: {msg}")]
    Parse { offset: usize, msg: String },
    /// The data was all there, but made no sense
    #[error("invalid message: {0}")]
    Invalid(String),
}

pub(crate) fn parse_error(
    pb: &ParseBuffer,
    msg: impl ToString,
) -> PacketError {
    PacketError::Parse {
        offset: pb.offset(),
        msg: msg.to_string(),
    }
}

pub const AF_INET: u8 = 2;
pub const AF_BRIDGE: u8 = 7;
pub const AF_INET6: u8 = 10;
pub const RTNL_FAMILY_IPMR: u8 = 128;
pub const RTNL_FAMILY_IP6MR: u8 = 129;

pub const NLMSG_NOOP: u16 = 1;
pub const NLMSG_ERROR: u16 = 2;
pub const NLMSG_DONE: u16 = 3;
pub const NLMSG_OVERRUN: u16 = 4;
pub const RTM_NEWROUTE: u16 = 24;
pub const RTM_DELROUTE: u16 = 25;
pub const RTM_GETROUTE: u16 = 26;
pub const RTM_NEWMDB: u16 = 84;
pub const RTM_DELMDB: u16 = 85;
pub const RTM_GETMDB: u16 = 86;

pub const NLM_F_REQUEST: u16 = 0x1;
pub const NLM_F_MULTI: u16 = 0x2;
pub const NLM_F_ROOT: u16 = 0x100;
pub const NLM_F_MATCH: u16 = 0x200;
pub const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;

pub const RTNLGRP_IPV4_MROUTE: u32 = 5;
pub const RTNLGRP_IPV4_ROUTE: u32 = 7;
pub const RTNLGRP_MDB: u32 = 26;

pub const NLMSG_HDRLEN: usize = 16;
const NLMSG_ALIGNTO: usize = 4;

/// Round `len` up to the netlink alignment boundary.
pub const fn align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

/// The `nl_groups` bitmask for the given multicast groups.
pub fn group_mask(groups: &[u32]) -> u32 {
    groups
        .iter()
        .filter(|g| (1..=32).contains(*g))
        .fold(0, |mask, g| mask | (1 << (g - 1)))
}

/// Width of the addresses carried by messages of this family.
pub fn addr_len(family: u8) -> Option<usize> {
    match family {
        AF_INET | RTNL_FAMILY_IPMR => Some(4),
        AF_INET6 | RTNL_FAMILY_IP6MR => Some(16),
        _ => None,
    }
}

/// Decoding knobs that depend on the running kernel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// MDB entries carry the subscriber-MAC block
    pub src_mac_ext: bool,
}

/// The fixed part of `struct nlmsghdr`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NlHeader {
    pub len: u32,
    pub kind: u16,
    pub flags: u16,
    pub seq: u32,
    pub pid: u32,
}

impl<T: AsRef<[u8]>> From<&NetlinkBuffer<T>> for NlHeader {
    fn from(nl: &NetlinkBuffer<T>) -> NlHeader {
        NlHeader {
            len: nl.length(),
            kind: nl.message_type(),
            flags: nl.flags(),
            seq: nl.sequence_number(),
            pid: nl.port_number(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Noop,
    Done,
    /// A negative errno, or 0 for an acknowledgement
    Error(i32),
    /// The socket's receive buffer overflowed; notifications were lost
    Overrun,
    NewRoute(RouteMsg),
    DelRoute(RouteMsg),
    NewMdb(MdbMsg),
    DelMdb(MdbMsg),
    Unknown(u16),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub hdr: NlHeader,
    pub msg: Message,
}

impl Message {
    /// Decode one complete message.  `frame` holds the header as well as
    /// the body.
    fn parse(
        kind: u16,
        frame: &[u8],
        opts: &ParseOptions,
    ) -> PacketResult<Message> {
        let body = frame.get(NLMSG_HDRLEN..).unwrap_or_default();
        let mut pb = ParseBuffer::new_from_slice(body);
        Ok(match kind {
            NLMSG_NOOP => Message::Noop,
            NLMSG_DONE => Message::Done,
            NLMSG_OVERRUN => Message::Overrun,
            NLMSG_ERROR => Message::Error(pb.get_i32()?),
            RTM_NEWROUTE | RTM_DELROUTE => parse_route(frame)?,
            // dump replies are tagged RTM_GETMDB
            RTM_NEWMDB | RTM_GETMDB => {
                Message::NewMdb(MdbMsg::parse(&mut pb, opts)?)
            }
            RTM_DELMDB => Message::DelMdb(MdbMsg::parse(&mut pb, opts)?),
            x => Message::Unknown(x),
        })
    }
}

fn parse_route(frame: &[u8]) -> PacketResult<Message> {
    let nl = NetlinkMessage::<RouteNetlinkMessage>::deserialize(frame)
        .map_err(|e| PacketError::Invalid(format!("route message: {e:?}")))?;
    match nl.payload {
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewRoute(r)) => {
            Ok(Message::NewRoute(RouteMsg::try_from(&r)?))
        }
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::DelRoute(r)) => {
            Ok(Message::DelRoute(RouteMsg::try_from(&r)?))
        }
        other => Err(PacketError::Invalid(format!(
            "expected a route message, got {other:?}"
        ))),
    }
}

/// Walks the messages packed into one datagram.  A message whose body doesn't
/// decode is yielded as an error and the walk moves on to the next one; a
/// broken header ends the walk, since the framing can't be trusted after it.
pub struct Messages<'a> {
    buf: &'a [u8],
    offset: usize,
    opts: ParseOptions,
    failed: bool,
}

pub fn messages<'a>(buf: &'a [u8], opts: &ParseOptions) -> Messages<'a> {
    Messages {
        buf,
        offset: 0,
        opts: *opts,
        failed: false,
    }
}

impl<'a> Messages<'a> {
    fn next_message(&mut self) -> PacketResult<Envelope> {
        let start = self.offset;
        let rest = &self.buf[start..];
        let nl = match NetlinkBuffer::new_checked(rest) {
            Ok(nl) => nl,
            Err(e) => {
                self.failed = true;
                return Err(PacketError::Parse {
                    offset: start,
                    msg: format!("{e:?}"),
                });
            }
        };
        let hdr = NlHeader::from(&nl);
        let len = hdr.len as usize;
        self.offset = (start + align(len)).min(self.buf.len());

        let msg = Message::parse(hdr.kind, &rest[..len], &self.opts)?;
        Ok(Envelope { hdr, msg })
    }
}

impl Iterator for Messages<'_> {
    type Item = PacketResult<Envelope>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            None
        } else {
            Some(self.next_message())
        }
    }
}

/// Wrap `body` in a netlink header.
pub fn encode(kind: u16, flags: u16, seq: u32, body: &[u8]) -> BytesMut {
    let len = NLMSG_HDRLEN + body.len();
    let mut v = BytesMut::with_capacity(align(len));
    v.put_u32_ne(len as u32);
    v.put_u16_ne(kind);
    v.put_u16_ne(flags);
    v.put_u32_ne(seq);
    v.put_u32_ne(0);
    v.put_slice(body);
    v.put_bytes(0, align(len) - len);
    v
}

fn encode_route(inner: RouteNetlinkMessage, flags: u16, seq: u32) -> BytesMut {
    let mut header = NetlinkHeader::default();
    header.flags = flags;
    header.sequence_number = seq;
    let mut nl =
        NetlinkMessage::new(header, NetlinkPayload::InnerMessage(inner));
    nl.finalize();
    let mut v = BytesMut::zeroed(nl.buffer_len());
    nl.serialize(&mut v);
    v
}

/// Encode a notification the way the kernel would send it.
pub fn encode_message(
    msg: &Message,
    seq: u32,
    opts: &ParseOptions,
) -> BytesMut {
    let (kind, body) = match msg {
        Message::Noop => (NLMSG_NOOP, BytesMut::new()),
        Message::Done => (NLMSG_DONE, BytesMut::from(&0i32.to_ne_bytes()[..])),
        Message::Overrun => (NLMSG_OVERRUN, BytesMut::new()),
        Message::Error(e) => {
            // the errno, then the header of the offending request
            let mut b = BytesMut::from(&e.to_ne_bytes()[..]);
            b.put_bytes(0, NLMSG_HDRLEN);
            (NLMSG_ERROR, b)
        }
        Message::NewRoute(r) => {
            let inner = RouteNetlinkMessage::NewRoute(r.into());
            return encode_route(inner, 0, seq);
        }
        Message::DelRoute(r) => {
            let inner = RouteNetlinkMessage::DelRoute(r.into());
            return encode_route(inner, 0, seq);
        }
        Message::NewMdb(m) => (RTM_NEWMDB, m.deparse(opts)),
        Message::DelMdb(m) => (RTM_DELMDB, m.deparse(opts)),
        Message::Unknown(kind) => (*kind, BytesMut::new()),
    };
    encode(kind, 0, seq, &body)
}

/// A request to dump the route table of `family` (`AF_INET` for unicast,
/// `RTNL_FAMILY_IPMR` for the multicast routing cache).
pub fn route_dump_request(family: u8, seq: u32) -> BytesMut {
    let mut msg = RouteMessage::default();
    msg.header.address_family = AddressFamily::from(family);
    encode_route(
        RouteNetlinkMessage::GetRoute(msg),
        NLM_F_REQUEST | NLM_F_DUMP,
        seq,
    )
}

/// A request to dump every bridge's multicast database.
pub fn mdb_dump_request(seq: u32) -> BytesMut {
    let mut body = BytesMut::with_capacity(mdb::BR_PORT_MSG_LEN);
    body.put_u8(AF_BRIDGE);
    body.put_bytes(0, mdb::BR_PORT_MSG_LEN - 1);
    encode(RTM_GETMDB, NLM_F_REQUEST | NLM_F_DUMP, seq, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::IpAddr;

    #[test]
    fn test_group_mask() {
        assert_eq!(
            group_mask(&[RTNLGRP_IPV4_ROUTE, RTNLGRP_IPV4_MROUTE, RTNLGRP_MDB]),
            (1 << 6) | (1 << 4) | (1 << 25)
        );
        assert_eq!(group_mask(&[0, 33]), 0);
    }

    #[test]
    fn test_dump_requests() {
        let req = route_dump_request(RTNL_FAMILY_IPMR, 7);
        assert_eq!(req.len(), NLMSG_HDRLEN + route::RTMSG_LEN);
        let nl = NetlinkBuffer::new_checked(&req[..]).unwrap();
        let hdr = NlHeader::from(&nl);
        assert_eq!(hdr.len as usize, req.len());
        assert_eq!(hdr.kind, RTM_GETROUTE);
        assert_eq!(hdr.flags, NLM_F_REQUEST | NLM_F_DUMP);
        assert_eq!(hdr.seq, 7);
        assert_eq!(nl.payload()[0], RTNL_FAMILY_IPMR);

        let req = mdb_dump_request(8);
        assert_eq!(req.len(), NLMSG_HDRLEN + mdb::BR_PORT_MSG_LEN);
        assert_eq!(req[NLMSG_HDRLEN], AF_BRIDGE);
        let nl = NetlinkBuffer::new_checked(&req[..]).unwrap();
        assert_eq!(nl.message_type(), RTM_GETMDB);
    }

    #[test]
    fn test_multi_message_datagram() {
        let opts = ParseOptions::default();
        let route = RouteMsg {
            family: RTNL_FAMILY_IPMR,
            kind: route::RTN_MULTICAST,
            src: Some(IpAddr::V4("10.0.0.5".parse().unwrap())),
            dst: Some(IpAddr::V4("224.0.18.100".parse().unwrap())),
            iif: Some(3),
            ..Default::default()
        };
        let mut dgram = BytesMut::new();
        dgram.extend_from_slice(&encode_message(
            &Message::NewRoute(route.clone()),
            1,
            &opts,
        ));
        dgram.extend_from_slice(&encode_message(
            &Message::Unknown(16),
            2,
            &opts,
        ));
        dgram.extend_from_slice(&encode_message(&Message::Done, 3, &opts));

        let msgs: Vec<Envelope> = messages(&dgram, &opts)
            .collect::<PacketResult<_>>()
            .unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].msg, Message::NewRoute(route));
        assert_eq!(msgs[0].hdr.seq, 1);
        assert_eq!(msgs[1].msg, Message::Unknown(16));
        assert_eq!(msgs[2].msg, Message::Done);
    }

    #[test]
    fn test_bad_body_is_skipped() {
        let opts = ParseOptions::default();
        let mut dgram = BytesMut::new();
        // an RTM_NEWROUTE too short to hold an rtmsg
        dgram.extend_from_slice(&encode(RTM_NEWROUTE, 0, 1, &[0u8; 4]));
        dgram.extend_from_slice(&encode_message(&Message::Done, 2, &opts));

        let msgs: Vec<PacketResult<Envelope>> =
            messages(&dgram, &opts).collect();
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].is_err());
        assert_eq!(msgs[1].as_ref().unwrap().msg, Message::Done);
    }

    #[test]
    fn test_bad_length_ends_walk() {
        let opts = ParseOptions::default();
        let mut dgram = encode_message(&Message::Done, 1, &opts);
        // claim more than the datagram holds
        dgram[0..4].copy_from_slice(&64u32.to_ne_bytes());
        dgram.extend_from_slice(&encode_message(&Message::Done, 2, &opts));

        let msgs: Vec<PacketResult<Envelope>> =
            messages(&dgram, &opts).collect();
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].is_err());
    }

    #[test]
    fn test_error_message() {
        let opts = ParseOptions::default();
        // ENOBUFS
        let raw = encode_message(&Message::Error(-105), 9, &opts);
        let msgs: Vec<Envelope> =
            messages(&raw, &opts).collect::<PacketResult<_>>().unwrap();
        assert_eq!(msgs[0].msg, Message::Error(-105));
    }
}
