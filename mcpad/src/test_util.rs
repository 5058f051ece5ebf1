// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Fixtures shared by the unit tests: a small router with one WAN, a LAN
//! bridge with two wired ports and a wireless one, and a video bridge.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use aal::AccelOps;
use accel::stub::StubHandle;
use common::logging::test_logger;
use common::network::MacAddr;
use slog::{Drain, Level, Logger, OwnedKVList, Record};
use nlpacket::mdb::MDB_TEMPORARY;
use nlpacket::route::{RTN_LOCAL, RTN_MULTICAST};
use nlpacket::{MdbEntry, MdbMsg, Message, RouteMsg};
use nlpacket::{AF_BRIDGE, AF_INET, RTNL_FAMILY_IPMR};

use crate::bootstrap::{DumpKind, KernelDump};
use crate::config::Config;
use crate::daemon::{Context, Daemon};
use crate::ifname::StaticIfNames;
use crate::types::{McastError, McastResult, SourceMode};

pub const IF_LO: u32 = 1;
pub const IF_WAN: u32 = 2;
pub const IF_PTM: u32 = 3;
pub const IF_BR_LAN: u32 = 5;
pub const IF_BR_VIDEO: u32 = 6;
pub const IF_LAN1: u32 = 7;
pub const IF_LAN2: u32 = 8;
pub const IF_WLAN: u32 = 9;

pub type TestDaemon = Daemon<Arc<StubHandle>, StaticIfNames>;

pub fn test_ifnames() -> StaticIfNames {
    StaticIfNames::new(&[
        (IF_LO, "lo"),
        (IF_WAN, "wan"),
        (IF_PTM, "ptm0"),
        (IF_BR_LAN, "br-lan"),
        (IF_BR_VIDEO, "br-video"),
        (IF_LAN1, "lan1"),
        (IF_LAN2, "lan2"),
        (IF_WLAN, "wlan0"),
    ])
}

pub fn test_config() -> Config {
    Config {
        wan: vec!["wan".to_string()],
        max_groups: 8,
        max_members: 4,
        ..Config::default()
    }
}

fn test_accel() -> Arc<StubHandle> {
    let accel = Arc::new(StubHandle::new(&test_logger()));
    accel.init().unwrap();
    accel
}

/// A context in the given mode, with an initialized stub accelerator.
pub fn test_context(
    mode: SourceMode,
) -> Context<Arc<StubHandle>, StaticIfNames> {
    logged_context(&test_logger(), mode)
}

pub fn logged_context(
    log: &Logger,
    mode: SourceMode,
) -> Context<Arc<StubHandle>, StaticIfNames> {
    let mut ctx =
        Context::new(log, test_config(), test_accel(), test_ifnames());
    ctx.mode = mode;
    ctx
}

/// A started daemon.
pub fn test_daemon(config: Config) -> TestDaemon {
    logged_daemon(&test_logger(), config)
}

pub fn logged_daemon(log: &Logger, config: Config) -> TestDaemon {
    let d = Daemon::new(
        log,
        config,
        Arc::new(StubHandle::new(&test_logger())),
        test_ifnames(),
    );
    d.start();
    d
}

/// A drain that keeps the level and message of every record.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<(Level, String)>>>);

impl Drain for LogCapture {
    type Ok = ();
    type Err = slog::Never;

    fn log(
        &self,
        record: &Record,
        _values: &OwnedKVList,
    ) -> Result<(), slog::Never> {
        let msg = record.msg().to_string();
        self.0.lock().unwrap().push((record.level(), msg));
        Ok(())
    }
}

impl LogCapture {
    pub fn logger(&self) -> Logger {
        Logger::root(self.clone(), slog::o!())
    }

    /// The messages logged at `level`.
    pub fn at(&self, level: Level) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

pub fn mdb_mac(
    bridge: u32,
    port: u32,
    group: &str,
    mac: Option<MacAddr>,
) -> MdbMsg {
    MdbMsg {
        family: AF_BRIDGE,
        bridge_ifindex: bridge,
        entries: vec![MdbEntry {
            port_ifindex: port,
            state: MDB_TEMPORARY,
            flags: 0,
            vid: 0,
            group: ip(group),
            src_mac: mac,
        }],
    }
}

pub fn mdb(bridge: u32, port: u32, group: &str) -> MdbMsg {
    mdb_mac(bridge, port, group, None)
}

/// An (S, G) entry from the multicast routing cache.
pub fn mroute(src: &str, group: &str, iif: u32) -> RouteMsg {
    RouteMsg {
        family: RTNL_FAMILY_IPMR,
        dst_len: 32,
        src_len: 32,
        table: 254,
        kind: RTN_MULTICAST,
        src: Some(ip(src)),
        dst: Some(ip(group)),
        iif: Some(iif),
        ..Default::default()
    }
}

/// A local-table route naming one of the router's addresses.
pub fn local_route(prefsrc: &str, oif: u32) -> RouteMsg {
    RouteMsg {
        family: AF_INET,
        dst_len: 32,
        table: 255,
        kind: RTN_LOCAL,
        dst: Some(ip(prefsrc)),
        prefsrc: Some(ip(prefsrc)),
        oif: Some(oif),
        ..Default::default()
    }
}

/// Canned dump replies; a kind without one fails.
#[derive(Default)]
pub struct FakeDump {
    pub replies: BTreeMap<DumpKind, Vec<Message>>,
    pub asked: Vec<DumpKind>,
}

impl FakeDump {
    pub fn reply(&mut self, kind: DumpKind, msgs: Vec<Message>) {
        self.replies.insert(kind, msgs);
    }
}

impl KernelDump for FakeDump {
    fn dump(&mut self, kind: DumpKind) -> McastResult<Vec<Message>> {
        self.asked.push(kind);
        self.replies
            .get(&kind)
            .cloned()
            .ok_or(McastError::Netlink(-libc::EPERM))
    }
}
