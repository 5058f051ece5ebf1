// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The operator-readable state dump, written on request.

use std::fmt::Write;
use std::net::IpAddr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use slog::{error, info};

use aal::AccelOps;
use common::network::MacAddr;

use crate::daemon::Daemon;
use crate::ifname::IfResolver;
use crate::types::{McastError, McastResult, SourceMode};

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Serialize,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DumpFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Serialize)]
pub struct StateDump {
    pub time: String,
    pub started: String,
    pub mode: SourceMode,
    pub wan: Vec<String>,
    pub video2lan: Option<String>,
    pub host_addrs: Vec<IpAddr>,
    pub groups: Vec<GroupDump>,
}

#[derive(Debug, Serialize)]
pub struct GroupDump {
    pub group: IpAddr,
    pub bridge: Option<String>,
    pub wan: String,
    pub source: Option<IpAddr>,
    pub joined: bool,
    pub members: Vec<MemberDump>,
}

#[derive(Debug, Serialize)]
pub struct MemberDump {
    pub interface: String,
    pub ifindex: u32,
    pub mac: Option<MacAddr>,
    pub joined: bool,
}

impl StateDump {
    pub fn render(&self, format: DumpFormat) -> McastResult<String> {
        match format {
            DumpFormat::Text => Ok(self.to_text()),
            DumpFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| McastError::Other(e.to_string())),
        }
    }

    fn to_text(&self) -> String {
        let mut s = String::new();
        // Writing to a String can't fail.
        let _ = self.write_text(&mut s);
        s
    }

    fn write_text(&self, s: &mut String) -> std::fmt::Result {
        writeln!(s, "mcpad state at {}", self.time)?;
        writeln!(s, "running since: {}", self.started)?;
        writeln!(s, "mode: {}", self.mode)?;
        writeln!(s, "wan: {}", self.wan.join(" "))?;
        writeln!(s, "video2lan: {}", self.video2lan.as_deref().unwrap_or("-"))?;
        let addrs: Vec<String> =
            self.host_addrs.iter().map(|a| a.to_string()).collect();
        writeln!(s, "host addresses: {}", addrs.join(" "))?;
        writeln!(s, "groups: {}", self.groups.len())?;

        for g in &self.groups {
            writeln!(s)?;
            writeln!(s, "==== group {} ====", g.group)?;
            writeln!(s, "bridge: {}", g.bridge.as_deref().unwrap_or("-"))?;
            writeln!(s, "wan: {}", g.wan)?;
            match g.source {
                Some(src) => writeln!(s, "source: {src}")?,
                None => writeln!(s, "source: -")?,
            }
            if g.joined {
                writeln!(s, "bridged join: yes")?;
            }
            for m in &g.members {
                let mac = m.mac.map(|m| m.to_string());
                writeln!(
                    s,
                    "  {} (ifindex {}) mac {} {}",
                    m.interface,
                    m.ifindex,
                    mac.as_deref().unwrap_or("-"),
                    if m.joined { "joined" } else { "pending" }
                )?;
            }
        }
        Ok(())
    }
}

impl<H: AccelOps, R: IfResolver> Daemon<H, R> {
    pub fn snapshot(&self) -> StateDump {
        let ctx = &self.ctx;
        let groups = self
            .groups
            .iter()
            .map(|g| GroupDump {
                group: g.addr,
                bridge: match g.bridge_ifindex {
                    0 => None,
                    idx => Some(ctx.ifnames.display_name(idx)),
                },
                wan: match g.ingress {
                    Some(idx) => ctx.ifnames.display_name(idx),
                    None => ctx.hosts.default_wan().to_string(),
                },
                source: g.source,
                joined: g.joined,
                members: g
                    .members()
                    .map(|m| MemberDump {
                        interface: ctx.ifnames.display_name(m.key.ifindex),
                        ifindex: m.key.ifindex,
                        mac: m.key.mac,
                        joined: m.joined,
                    })
                    .collect(),
            })
            .collect();

        StateDump {
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            started: self.started.to_rfc3339_opts(SecondsFormat::Secs, true),
            mode: ctx.mode,
            wan: ctx.hosts.wans().to_vec(),
            video2lan: ctx.hosts.video2lan().map(str::to_string),
            host_addrs: ctx.hosts.host_addrs().copied().collect(),
            groups,
        }
    }

    /// Write the dump file.  Failures are logged and otherwise ignored.
    pub fn write_dump(&self) -> McastResult<()> {
        let path = &self.ctx.config.dump_file;
        let res = self
            .snapshot()
            .render(self.ctx.config.dump_format)
            .and_then(|txt| std::fs::write(path, txt).map_err(McastError::Io));
        match &res {
            Ok(()) => info!(self.ctx.log, "wrote state dump";
                "path" => path, "groups" => self.groups.len()),
            Err(e) => error!(self.ctx.log, "failed to write state dump: {e}";
                "path" => path),
        }
        res
    }
}
