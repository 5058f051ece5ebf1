// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::collections::BTreeSet;
use std::net::IpAddr;

/// WAN used when none has been configured.
pub const DEFAULT_WAN: &str = "wan";

/// The router's own addresses, and which interfaces face upstream.
#[derive(Debug, Default)]
pub struct HostRegistry {
    addrs: BTreeSet<IpAddr>,
    // in configuration order; the first one is the default
    wans: Vec<String>,
    video2lan: Option<String>,
}

impl HostRegistry {
    pub fn new(wans: &[String], video2lan: Option<&str>) -> Self {
        let mut reg = HostRegistry {
            video2lan: video2lan.map(str::to_string),
            ..Default::default()
        };
        for wan in wans {
            reg.add_wan(wan);
        }
        reg
    }

    /// Record one of our addresses.  Returns `false` if it was already known.
    pub fn add_host_addr(&mut self, addr: IpAddr) -> bool {
        self.addrs.insert(addr)
    }

    pub fn is_local(&self, addr: &IpAddr) -> bool {
        self.addrs.contains(addr)
    }

    pub fn host_addrs(&self) -> impl Iterator<Item = &IpAddr> {
        self.addrs.iter()
    }

    fn add_wan(&mut self, name: &str) -> bool {
        if self.wans.iter().any(|w| w == name) {
            return false;
        }
        self.wans.push(name.to_string());
        true
    }

    /// Does traffic on `name` come from upstream?  The video-to-LAN device
    /// counts as one.
    pub fn is_wan(&self, name: &str) -> bool {
        self.wans.iter().any(|w| w == name)
            || self.video2lan.as_deref() == Some(name)
    }

    pub fn wans(&self) -> &[String] {
        &self.wans
    }

    pub fn default_wan(&self) -> &str {
        self.wans.first().map(String::as_str).unwrap_or(DEFAULT_WAN)
    }

    pub fn video2lan(&self) -> Option<&str> {
        self.video2lan.as_deref()
    }
}
