// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use chrono::{DateTime, Utc};
use slog::{error, info, o, Logger};

use aal::AccelOps;
use nlpacket::ParseOptions;

use crate::config::Config;
use crate::group::GroupTable;
use crate::hosts::HostRegistry;
use crate::ifname::IfResolver;
use crate::types::{CallStats, SourceMode};

/// Everything the event handlers consult besides the group table itself.
pub struct Context<H, R> {
    pub(crate) log: Logger,
    pub(crate) config: Config,
    pub(crate) mode: SourceMode,
    pub(crate) accel: H,
    pub(crate) ifnames: R,
    pub(crate) hosts: HostRegistry,
}

impl<H, R> Context<H, R> {
    pub fn new(log: &Logger, config: Config, accel: H, ifnames: R) -> Self {
        let hosts =
            HostRegistry::new(&config.wan, config.video2lan.as_deref());
        Context {
            log: log.clone(),
            mode: config.mode(),
            config,
            accel,
            ifnames,
            hosts,
        }
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            src_mac_ext: self.config.mdb_src_mac,
        }
    }
}

/// The daemon's state: the group table, and the context it is reconciled
/// against.  All handling happens on one task, so nothing here is locked.
pub struct Daemon<H, R> {
    pub(crate) groups: GroupTable,
    pub(crate) ctx: Context<H, R>,
    pub(crate) started: DateTime<Utc>,
}

impl<H: AccelOps, R: IfResolver> Daemon<H, R> {
    pub fn new(log: &Logger, config: Config, accel: H, ifnames: R) -> Self {
        let log = log.new(o!("unit" => "mcast"));
        let groups = GroupTable::new(config.max_groups, config.max_members);
        let ctx = Context::new(&log, config, accel, ifnames);
        info!(ctx.log, "tracking multicast groups";
            "mode" => %ctx.mode,
            "wan" => ctx.hosts.default_wan(),
            "max_groups" => ctx.config.max_groups);
        Daemon {
            groups,
            ctx,
            started: Utc::now(),
        }
    }

    pub fn log(&self) -> &Logger {
        &self.ctx.log
    }

    pub fn mode(&self) -> SourceMode {
        self.ctx.mode
    }

    pub fn groups(&self) -> &GroupTable {
        &self.groups
    }

    /// Bring up the accelerator.  A failure is logged; joins will fail (and
    /// be retried) until the backend recovers.
    pub fn start(&self) {
        match self.ctx.accel.init() {
            Ok(()) => info!(self.ctx.log, "accelerator initialized"),
            Err(e) => error!(self.ctx.log, "accelerator init failed: {e}"),
        }
    }

    /// Forget cached interface names, for after interfaces are renamed or
    /// recreated.
    pub fn flush_ifnames(&self) {
        info!(self.ctx.log, "flushing interface name cache");
        self.ctx.ifnames.flush();
    }

    /// Leave every joined member and release the accelerator.
    pub fn shutdown(mut self) -> CallStats {
        info!(self.ctx.log, "shutting down"; "groups" => self.groups.len());
        let stats = self.groups.flush_all(&self.ctx);
        if let Err(e) = self.ctx.accel.deinit() {
            error!(self.ctx.log, "accelerator deinit failed: {e}");
        }
        info!(self.ctx.log, "shutdown complete";
            "left" => stats.left,
            "failed" => stats.failed);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use accel::stub::AccelCall;
    use nlpacket::Message;
    use std::sync::Arc;

    #[test]
    fn test_shutdown_flushes() {
        let mut d = test_daemon(Config {
            source: Some("10.1.1.1".parse().unwrap()),
            ..test_config()
        });
        d.handle_message(&Message::NewMdb(mdb(
            IF_BR_LAN,
            IF_LAN1,
            "239.1.1.1",
        )));
        d.handle_message(&Message::NewMdb(mdb(
            IF_BR_LAN,
            IF_LAN2,
            "239.1.1.1",
        )));
        d.handle_message(&Message::NewMdb(mdb(
            IF_BR_LAN,
            IF_LAN1,
            "239.1.1.2",
        )));
        assert_eq!(d.ctx.accel.joins().len(), 3);

        let accel = Arc::clone(&d.ctx.accel);
        let stats = d.shutdown();
        assert_eq!(stats.left, 3);
        assert_eq!(accel.leaves().len(), 3);
        assert_eq!(accel.flow_count(), 0);
        assert_eq!(accel.calls().last(), Some(&AccelCall::Deinit));
    }

    #[test]
    fn test_start_inits() {
        let d = test_daemon(test_config());
        // the fixture starts the daemon already
        assert_eq!(d.ctx.accel.calls(), vec![AccelCall::Init]);
        assert_eq!(d.mode(), SourceMode::Routed);
    }
}
