// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The kernel side: a routing socket subscribed to notifications, and a
//! second one used to request table dumps.

use std::io;
use std::thread::JoinHandle;

use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};
use slog::{debug, error, info, warn, Logger};
use tokio::sync::mpsc::UnboundedSender;

use nlpacket::{Message, ParseOptions};
use nlpacket::{AF_INET, RTNL_FAMILY_IPMR};

use crate::bootstrap::{DumpKind, KernelDump};
use crate::types::{McastError, McastResult};

const RCVBUF_SIZE: libc::c_int = 1024 * 1024;
const RECV_BUF_LEN: usize = 64 * 1024;

pub struct NetlinkSocket {
    sock: Socket,
}

impl NetlinkSocket {
    /// Open a NETLINK_ROUTE socket subscribed to the multicast groups in
    /// `groups`, a mask built with `nlpacket::group_mask`.
    pub fn open(groups: u32) -> io::Result<Self> {
        let mut sock = Socket::new(NETLINK_ROUTE)?;
        sock.set_rx_buf_sz(RCVBUF_SIZE)?;
        sock.bind(&SocketAddr::new(0, groups))?;
        Ok(NetlinkSocket { sock })
    }

    pub fn send(&self, buf: &[u8]) -> io::Result<()> {
        self.sock.send(buf, 0).map(|_| ())
    }

    /// Replace the contents of `buf` with the next datagram.
    pub fn recv(&self, buf: &mut Vec<u8>) -> io::Result<usize> {
        buf.clear();
        self.sock.recv(buf, 0)
    }
}

/// Fold one datagram of a dump reply into `out`.  Returns true once the
/// kernel has signalled the end of the dump.
pub fn collect_dump(
    log: &Logger,
    buf: &[u8],
    seq: u32,
    opts: &ParseOptions,
    out: &mut Vec<Message>,
) -> McastResult<bool> {
    for env in nlpacket::messages(buf, opts) {
        let env = match env {
            Ok(env) => env,
            Err(e) => {
                warn!(log, "malformed dump message: {e}");
                continue;
            }
        };
        if env.hdr.seq != seq {
            debug!(log, "stray message in dump";
                "seq" => env.hdr.seq, "expected" => seq);
            continue;
        }
        match env.msg {
            Message::Done => return Ok(true),
            Message::Error(0) => {}
            Message::Error(errno) => return Err(McastError::Netlink(errno)),
            Message::Noop => {}
            msg => out.push(msg),
        }
    }
    Ok(false)
}

/// Requests complete tables from the kernel, one at a time.
pub struct DumpSocket {
    log: Logger,
    sock: NetlinkSocket,
    seq: u32,
    opts: ParseOptions,
}

impl DumpSocket {
    pub fn new(log: &Logger, opts: ParseOptions) -> io::Result<Self> {
        Ok(DumpSocket {
            log: log.new(slog::o!("unit" => "dump")),
            sock: NetlinkSocket::open(0)?,
            seq: 0,
            opts,
        })
    }
}

impl KernelDump for DumpSocket {
    fn dump(&mut self, kind: DumpKind) -> McastResult<Vec<Message>> {
        self.seq = self.seq.wrapping_add(1);
        let req = match kind {
            DumpKind::Routes => nlpacket::route_dump_request(AF_INET, self.seq),
            DumpKind::Memberships => nlpacket::mdb_dump_request(self.seq),
            DumpKind::Mroutes => {
                nlpacket::route_dump_request(RTNL_FAMILY_IPMR, self.seq)
            }
        };
        self.sock.send(&req)?;

        let mut buf = Vec::with_capacity(RECV_BUF_LEN);
        let mut out = Vec::new();
        loop {
            match self.sock.recv(&mut buf) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
            if collect_dump(&self.log, &buf, self.seq, &self.opts, &mut out)? {
                break;
            }
        }
        debug!(self.log, "dumped {kind}"; "messages" => out.len());
        Ok(out)
    }
}

#[derive(Debug)]
pub enum NlEvent {
    Datagram(Vec<u8>),
    /// The kernel dropped notifications for lack of buffer space
    Overrun,
    Failed(io::Error),
}

/// Receive notifications on a dedicated thread, handing each datagram to the
/// daemon's task.  The thread exits when the socket fails or the receiving
/// side goes away.
pub fn spawn_reader(
    log: &Logger,
    sock: NetlinkSocket,
    tx: UnboundedSender<NlEvent>,
) -> io::Result<JoinHandle<()>> {
    let log = log.new(slog::o!("unit" => "netlink"));
    std::thread::Builder::new()
        .name("netlink".to_string())
        .spawn(move || {
            info!(log, "listening for notifications");
            let mut buf = Vec::with_capacity(RECV_BUF_LEN);
            loop {
                let event = match sock.recv(&mut buf) {
                    Ok(_) => NlEvent::Datagram(buf.clone()),
                    Err(e) if e.raw_os_error() == Some(libc::ENOBUFS) => {
                        warn!(log, "receive queue overran");
                        NlEvent::Overrun
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                        continue
                    }
                    Err(e) => {
                        error!(log, "netlink receive failed: {e}");
                        let _ = tx.send(NlEvent::Failed(e));
                        break;
                    }
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
            debug!(log, "reader exiting");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use bytes::BytesMut;
    use common::logging::test_logger;
    use nlpacket::encode_message;
    use pretty_assertions::assert_eq;

    fn datagram(msgs: &[(Message, u32)]) -> BytesMut {
        let opts = ParseOptions::default();
        let mut dgram = BytesMut::new();
        for (msg, seq) in msgs {
            dgram.extend_from_slice(&encode_message(msg, *seq, &opts));
        }
        dgram
    }

    #[test]
    fn test_collect_dump() {
        let log = test_logger();
        let opts = ParseOptions::default();
        let r1 = Message::NewRoute(mroute("10.0.0.5", "239.1.1.1", IF_WAN));
        let r2 = Message::NewRoute(mroute("10.0.0.6", "239.1.1.2", IF_WAN));
        let m = Message::NewMdb(mdb(IF_BR_LAN, IF_LAN1, "239.1.1.1"));

        let mut out = Vec::new();
        let first = datagram(&[(r1.clone(), 4), (m, 3)]);
        assert!(!collect_dump(&log, &first, 4, &opts, &mut out).unwrap());
        let second = datagram(&[(r2.clone(), 4), (Message::Done, 4)]);
        assert!(collect_dump(&log, &second, 4, &opts, &mut out).unwrap());
        assert_eq!(out, [r1, r2]);
    }

    #[test]
    fn test_collect_dump_error() {
        let log = test_logger();
        let opts = ParseOptions::default();
        let mut out = Vec::new();

        let ack = datagram(&[(Message::Error(0), 1)]);
        assert!(!collect_dump(&log, &ack, 1, &opts, &mut out).unwrap());

        let nak = datagram(&[(Message::Error(-libc::EOPNOTSUPP), 1)]);
        let err = collect_dump(&log, &nak, 1, &opts, &mut out).unwrap_err();
        assert!(
            matches!(err, McastError::Netlink(e) if e == -libc::EOPNOTSUPP)
        );
        assert!(out.is_empty());
    }

    // Talks to the running kernel; any network namespace has a route table
    // to dump, even if it's empty.
    #[test]
    fn test_route_dump() {
        let log = test_logger();
        let mut dumper = DumpSocket::new(&log, ParseOptions::default())
            .expect("opening dump socket");
        for _ in 0..2 {
            let msgs = dumper.dump(DumpKind::Routes).unwrap();
            assert!(msgs.iter().all(|m| matches!(m, Message::NewRoute(_))));
        }
        assert_eq!(dumper.seq, 2);
    }
}
