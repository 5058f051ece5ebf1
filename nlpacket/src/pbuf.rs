// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::net::{Ipv4Addr, Ipv6Addr};

use common::network::MacAddr;

use crate::parse_error;
use crate::PacketResult;

/// A cursor over a netlink buffer.  Netlink headers and most attribute
/// payloads are in host byte order; addresses and the MDB protocol field are
/// in network byte order, and have their own readers.
pub struct ParseBuffer<'a> {
    data: &'a [u8],
    byte: usize,
}

impl<'a> ParseBuffer<'a> {
    pub fn new_from_slice(d: &'a [u8]) -> ParseBuffer<'a> {
        ParseBuffer { data: d, byte: 0 }
    }

    pub fn offset(&self) -> usize {
        self.byte
    }

    pub fn bytes_left(&self) -> usize {
        self.data.len().saturating_sub(self.byte)
    }

    pub fn advance_bytes(&mut self, bytes: usize) -> PacketResult<()> {
        if self.bytes_left() < bytes {
            Err(parse_error(self, "buffer overrun"))
        } else {
            self.byte += bytes;
            Ok(())
        }
    }

    /// Skip the padding up to the next `NLMSG_ALIGNTO` boundary.  Trailing
    /// padding may be omitted at the end of a buffer, so running out of data
    /// here is not an error.
    pub fn align(&mut self) {
        self.byte = crate::align(self.byte).min(self.data.len());
    }

    /// Borrow the next `bytes` bytes without copying them.
    pub fn get_slice(&mut self, bytes: usize) -> PacketResult<&'a [u8]> {
        if self.bytes_left() < bytes {
            Err(parse_error(self, "buffer overrun"))
        } else {
            let s = &self.data[self.byte..self.byte + bytes];
            self.byte += bytes;
            Ok(s)
        }
    }

    pub fn get_bytes(&mut self, bytes: usize) -> PacketResult<Vec<u8>> {
        self.get_slice(bytes).map(|s| s.to_vec())
    }

    fn get_array<const N: usize>(&mut self) -> PacketResult<[u8; N]> {
        let mut a = [0u8; N];
        a.copy_from_slice(self.get_slice(N)?);
        Ok(a)
    }

    pub fn get_u8(&mut self) -> PacketResult<u8> {
        Ok(self.get_array::<1>()?[0])
    }

    pub fn get_u16(&mut self) -> PacketResult<u16> {
        Ok(u16::from_ne_bytes(self.get_array()?))
    }

    /// Read a 16-bit value in network byte order.
    pub fn get_be16(&mut self) -> PacketResult<u16> {
        Ok(u16::from_be_bytes(self.get_array()?))
    }

    pub fn get_u32(&mut self) -> PacketResult<u32> {
        Ok(u32::from_ne_bytes(self.get_array()?))
    }

    pub fn get_i32(&mut self) -> PacketResult<i32> {
        Ok(i32::from_ne_bytes(self.get_array()?))
    }

    pub fn get_mac(&mut self) -> PacketResult<MacAddr> {
        Ok(MacAddr::from(self.get_array::<6>()?))
    }

    pub fn get_ipv4(&mut self) -> PacketResult<Ipv4Addr> {
        Ok(Ipv4Addr::from(self.get_array::<4>()?))
    }

    pub fn get_ipv6(&mut self) -> PacketResult<Ipv6Addr> {
        Ok(Ipv6Addr::from(self.get_array::<16>()?))
    }
}

#[test]
fn test_byte() {
    let raw: [u8; 4] = [0x11, 0x22, 0x33, 0x44];
    let mut tbuf = ParseBuffer::new_from_slice(&raw);

    assert_eq!(tbuf.get_u8().unwrap(), 0x11);
    assert_eq!(tbuf.get_u8().unwrap(), 0x22);
    assert_eq!(tbuf.get_u8().unwrap(), 0x33);
    assert_eq!(tbuf.get_u8().unwrap(), 0x44);
}

#[test]
fn test_short() {
    let raw = 0x1122u16.to_ne_bytes();
    let mut tbuf = ParseBuffer::new_from_slice(&raw);
    assert_eq!(tbuf.get_u16().unwrap(), 0x1122);

    let raw: [u8; 2] = [0x86, 0xdd];
    let mut tbuf = ParseBuffer::new_from_slice(&raw);
    assert_eq!(tbuf.get_be16().unwrap(), 0x86dd);
}

#[test]
fn test_word() {
    let raw = 0x11223344u32.to_ne_bytes();
    let mut tbuf = ParseBuffer::new_from_slice(&raw);

    assert_eq!(tbuf.get_u32().unwrap(), 0x11223344);
}

#[test]
fn test_addrs() {
    let raw: [u8; 10] = [224, 0, 18, 100, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
    let mut tbuf = ParseBuffer::new_from_slice(&raw);

    assert_eq!(tbuf.get_ipv4().unwrap(), Ipv4Addr::new(224, 0, 18, 100));
    assert_eq!(
        tbuf.get_mac().unwrap(),
        MacAddr::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff)
    );
    assert_eq!(tbuf.bytes_left(), 0);
}

#[test]
fn test_align() {
    let raw = [0u8; 6];
    let mut tbuf = ParseBuffer::new_from_slice(&raw);

    tbuf.get_u8().unwrap();
    tbuf.align();
    assert_eq!(tbuf.offset(), 4);
    tbuf.get_u8().unwrap();
    tbuf.align();
    assert_eq!(tbuf.offset(), 6);
}

#[test]
fn test_overflow() {
    let raw: [u8; 4] = [0x11, 0x22, 0x33, 0x44];
    let mut tbuf = ParseBuffer::new_from_slice(&raw);

    assert!(tbuf.get_u32().is_ok());
    assert!(tbuf.get_u32().is_err());
    assert!(tbuf.advance_bytes(1).is_err());
}
