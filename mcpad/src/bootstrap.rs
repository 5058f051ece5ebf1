// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Seeding the group table from the kernel's current state, at startup and
//! again whenever notifications may have been lost.

use slog::{error, info, warn};

use aal::AccelOps;
use nlpacket::Message;

use crate::daemon::Daemon;
use crate::ifname::IfResolver;
use crate::types::McastResult;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum DumpKind {
    /// The unicast routing table, for the router's own addresses
    Routes,
    /// Every bridge's multicast database
    Memberships,
    /// The multicast routing cache
    Mroutes,
}

/// Something that can ask the kernel for a complete table.
pub trait KernelDump {
    fn dump(&mut self, kind: DumpKind) -> McastResult<Vec<Message>>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub messages: usize,
    pub failed_steps: usize,
}

impl<H: AccelOps, R: IfResolver> Daemon<H, R> {
    /// Replay the kernel's tables, in an order that lets each step build on
    /// the last: addresses before memberships, memberships before the routes
    /// that give them a source.  Then apply any pending override.
    pub fn bootstrap(&mut self, dumper: &mut impl KernelDump) -> ReplayStats {
        let stats = self.replay(
            dumper,
            &[DumpKind::Routes, DumpKind::Memberships, DumpKind::Mroutes],
        );
        self.check_override();
        info!(self.ctx.log, "bootstrap complete";
            "messages" => stats.messages,
            "failed_steps" => stats.failed_steps,
            "groups" => self.groups.len());
        stats
    }

    /// Catch up after the event socket overran.
    pub fn resync(&mut self, dumper: &mut impl KernelDump) -> ReplayStats {
        warn!(self.ctx.log, "notifications lost; resynchronizing");
        self.replay(dumper, &[DumpKind::Memberships, DumpKind::Mroutes])
    }

    fn replay(
        &mut self,
        dumper: &mut impl KernelDump,
        kinds: &[DumpKind],
    ) -> ReplayStats {
        let mut stats = ReplayStats::default();
        for kind in kinds {
            match dumper.dump(*kind) {
                Ok(msgs) => {
                    for msg in &msgs {
                        self.handle_message(msg);
                    }
                    info!(self.ctx.log, "replayed {kind}";
                        "messages" => msgs.len());
                    stats.messages += msgs.len();
                }
                Err(e) => {
                    error!(self.ctx.log, "{kind} dump failed: {e}");
                    stats.failed_steps += 1;
                }
            }
        }
        stats
    }
}
