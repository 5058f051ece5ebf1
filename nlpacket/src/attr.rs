// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! MDB attributes (`struct nlattr`): a 4-byte length and type header
//! followed by the payload, padded to 4 bytes.

use bytes::{BufMut, BytesMut};

use crate::pbuf::ParseBuffer;
use crate::{align, parse_error, PacketResult};

pub const NLA_HDRLEN: usize = 4;
const NLA_F_NESTED: u16 = 0x8000;
const NLA_TYPE_MASK: u16 = 0x3fff;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attr<'a> {
    pub kind: u16,
    pub data: &'a [u8],
}

impl<'a> Attr<'a> {
    /// Walk the attributes nested inside this one.
    pub fn nested(&self) -> Attrs<'a> {
        Attrs::new(self.data)
    }
}

/// An iterator over a run of attributes.  A malformed header ends the walk
/// after yielding the error.
pub struct Attrs<'a> {
    pb: ParseBuffer<'a>,
    failed: bool,
}

impl<'a> Attrs<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Attrs {
            pb: ParseBuffer::new_from_slice(buf),
            failed: false,
        }
    }

    fn next_attr(&mut self) -> PacketResult<Attr<'a>> {
        let len = self.pb.get_u16()? as usize;
        let kind = self.pb.get_u16()? & NLA_TYPE_MASK;
        if len < NLA_HDRLEN {
            return Err(parse_error(&self.pb, "attribute shorter than header"));
        }
        let data = self.pb.get_slice(len - NLA_HDRLEN)?;
        self.pb.align();
        Ok(Attr { kind, data })
    }
}

impl<'a> Iterator for Attrs<'a> {
    type Item = PacketResult<Attr<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        // Anything shorter than a header is trailing padding.
        if self.failed || self.pb.bytes_left() < NLA_HDRLEN {
            return None;
        }
        let attr = self.next_attr();
        self.failed = attr.is_err();
        Some(attr)
    }
}

/// Append an attribute, with padding.
pub fn put_attr(buf: &mut BytesMut, kind: u16, data: &[u8]) {
    let len = NLA_HDRLEN + data.len();
    buf.put_u16_ne(len as u16);
    buf.put_u16_ne(kind);
    buf.put_slice(data);
    buf.put_bytes(0, align(len) - len);
}

/// Append a nested attribute whose payload is written by `fill`.
pub fn put_nested(
    buf: &mut BytesMut,
    kind: u16,
    fill: impl FnOnce(&mut BytesMut),
) {
    let mut inner = BytesMut::new();
    fill(&mut inner);
    put_attr(buf, kind | NLA_F_NESTED, &inner);
}
