// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Bridge multicast database messages (`RTM_NEWMDB`, `RTM_DELMDB`, and the
//! `RTM_GETMDB` dump replies).
//!
//! The body is a `struct br_port_msg` naming the bridge, followed by
//! `MDBA_MDB` > `MDBA_MDB_ENTRY` > `MDBA_MDB_ENTRY_INFO`, where each info
//! attribute starts with a `struct br_mdb_entry`:
//!
//! ```text
//!  0  ifindex   u32        port the member was learned on
//!  4  state     u8         MDB_TEMPORARY / MDB_PERMANENT
//!  5  flags     u8
//!  6  vid       u16
//!  8  addr.u    [u8; 16]   group address (v4 in the first 4 bytes)
//! 24  proto     be16       ETH_P_IP / ETH_P_IPV6
//! 26  pad       [u8; 2]
//! ```
//!
//! Kernels carrying the subscriber-MAC extension append a second block at
//! offset 28:
//!
//! ```text
//! 28  src.u     [u8; 16]   subscriber IP
//! 44  src.proto be16
//! 46  eth_addr  [u8; 6]    subscriber MAC
//! ```

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};

use common::network::MacAddr;

use crate::attr::{put_attr, put_nested, Attrs};
use crate::pbuf::ParseBuffer;
use crate::{parse_error, PacketResult, ParseOptions};

/// sizeof(struct br_port_msg)
pub const BR_PORT_MSG_LEN: usize = 8;
/// sizeof(struct br_mdb_entry)
pub const BR_MDB_ENTRY_LEN: usize = 28;
/// Length of the subscriber-MAC block appended to each entry.
pub const SRC_MAC_EXT_LEN: usize = 24;

pub const MDBA_MDB: u16 = 1;
pub const MDBA_ROUTER: u16 = 2;
pub const MDBA_MDB_ENTRY: u16 = 1;
pub const MDBA_MDB_ENTRY_INFO: u16 = 1;

pub const MDB_TEMPORARY: u8 = 0;
pub const MDB_PERMANENT: u8 = 1;

pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_IPV6: u16 = 0x86dd;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MdbEntry {
    /// The bridge port the membership was learned on
    pub port_ifindex: u32,
    pub state: u8,
    pub flags: u8,
    pub vid: u16,
    pub group: IpAddr,
    /// The subscribing device, if the kernel reports it
    pub src_mac: Option<MacAddr>,
}

impl MdbEntry {
    pub fn is_permanent(&self) -> bool {
        self.state == MDB_PERMANENT
    }

    // Returns None for entries that aren't IP groups (e.g. L2 entries).
    fn parse(
        data: &[u8],
        opts: &ParseOptions,
    ) -> PacketResult<Option<MdbEntry>> {
        let mut pb = ParseBuffer::new_from_slice(data);
        if pb.bytes_left() < BR_MDB_ENTRY_LEN - 2 {
            return Err(parse_error(&pb, "br_mdb_entry too short"));
        }
        let port_ifindex = pb.get_u32()?;
        let state = pb.get_u8()?;
        let flags = pb.get_u8()?;
        let vid = pb.get_u16()?;
        let addr = pb.get_slice(16)?;
        let proto = pb.get_be16()?;

        let group = match proto {
            ETH_P_IP => IpAddr::V4(Ipv4Addr::new(
                addr[0], addr[1], addr[2], addr[3],
            )),
            ETH_P_IPV6 => {
                let mut a = [0u8; 16];
                a.copy_from_slice(addr);
                IpAddr::V6(Ipv6Addr::from(a))
            }
            _ => return Ok(None),
        };

        let src_mac = if opts.src_mac_ext
            && data.len() >= BR_MDB_ENTRY_LEN + SRC_MAC_EXT_LEN
        {
            MacAddr::from_slice(&data[BR_MDB_ENTRY_LEN + 18..])
                .filter(|m| !m.is_null())
        } else {
            None
        };

        Ok(Some(MdbEntry {
            port_ifindex,
            state,
            flags,
            vid,
            group,
            src_mac,
        }))
    }

    fn deparse_into(&self, v: &mut BytesMut, opts: &ParseOptions) {
        v.put_u32_ne(self.port_ifindex);
        v.put_u8(self.state);
        v.put_u8(self.flags);
        v.put_u16_ne(self.vid);
        let proto = match self.group {
            IpAddr::V4(a) => {
                v.put_slice(&a.octets());
                v.put_bytes(0, 12);
                ETH_P_IP
            }
            IpAddr::V6(a) => {
                v.put_slice(&a.octets());
                ETH_P_IPV6
            }
        };
        v.put_u16(proto);
        v.put_bytes(0, 2);
        if opts.src_mac_ext {
            v.put_bytes(0, 18);
            v.put_slice(&self.src_mac.unwrap_or(MacAddr::ZERO).octets());
        }
    }
}

/// A decoded MDB notification: every entry belongs to the bridge named by
/// `bridge_ifindex`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MdbMsg {
    pub family: u8,
    pub bridge_ifindex: u32,
    pub entries: Vec<MdbEntry>,
}

impl MdbMsg {
    pub fn parse(
        pb: &mut ParseBuffer,
        opts: &ParseOptions,
    ) -> PacketResult<MdbMsg> {
        if pb.bytes_left() < BR_PORT_MSG_LEN {
            return Err(parse_error(pb, "br_port_msg too short"));
        }
        let family = pb.get_u8()?;
        pb.advance_bytes(3)?;
        let bridge_ifindex = pb.get_u32()?;

        let mut entries = Vec::new();
        let rest = pb.get_slice(pb.bytes_left())?;
        for attr in Attrs::new(rest) {
            let attr = attr?;
            // MDBA_ROUTER lists multicast router ports, which we don't track
            if attr.kind != MDBA_MDB {
                continue;
            }
            for entry in attr.nested() {
                let entry = entry?;
                if entry.kind != MDBA_MDB_ENTRY {
                    continue;
                }
                for info in entry.nested() {
                    let info = info?;
                    if info.kind != MDBA_MDB_ENTRY_INFO {
                        continue;
                    }
                    if let Some(e) = MdbEntry::parse(info.data, opts)? {
                        entries.push(e);
                    }
                }
            }
        }

        Ok(MdbMsg {
            family,
            bridge_ifindex,
            entries,
        })
    }

    pub fn deparse(&self, opts: &ParseOptions) -> BytesMut {
        let mut v = BytesMut::with_capacity(BR_PORT_MSG_LEN + 64);
        v.put_u8(self.family);
        v.put_bytes(0, 3);
        v.put_u32_ne(self.bridge_ifindex);
        put_nested(&mut v, MDBA_MDB, |mdb| {
            put_nested(mdb, MDBA_MDB_ENTRY, |ent| {
                for e in &self.entries {
                    let mut info = BytesMut::new();
                    e.deparse_into(&mut info, opts);
                    put_attr(ent, MDBA_MDB_ENTRY_INFO, &info);
                }
            })
        });
        v
    }
}
