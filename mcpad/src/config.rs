// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Configuration for `mcpad`.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use accel::AccelConfig;
use common::logging::LogFormat;

use crate::dump::DumpFormat;
use crate::types::{McastResult, SourceMode};

/// The Config structure captures all of the run-time settings, which come
/// from an optional TOML file and are then overridden by command-line
/// options.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// If set, where the log should be written.  If not set, the log goes to
    /// stdout.
    pub log_file: Option<String>,

    /// Output log info in unstructured text or json?
    pub log_format: LogFormat,

    /// Log at debug level.
    pub verbose: bool,

    /// Stay attached to the controlling terminal.
    pub foreground: bool,

    /// Upstream interfaces, in order of preference.
    pub wan: Vec<String>,

    /// Only track memberships learned on this bridge, and join its groups
    /// without a source.
    pub bridge: Option<String>,

    /// A device carrying video from upstream, treated like a WAN.
    pub video2lan: Option<String>,

    /// Use this source for every group instead of learning one.
    pub source: Option<Ipv4Addr>,

    /// Ignore memberships learned on wireless ports.
    pub nowifi: bool,

    /// Interface name prefix identifying wireless ports.
    pub wifi_prefix: String,

    /// Wait at startup until the first WAN interface exists.
    pub wait_for_wan: bool,

    /// MDB notifications carry the subscriber's MAC address.
    pub mdb_src_mac: bool,

    pub pid_file: String,
    pub dump_file: String,
    pub dump_format: DumpFormat,
    pub override_file: String,

    /// Most groups tracked at once.
    pub max_groups: usize,

    /// Most members tracked for any one group.
    pub max_members: usize,

    /// Accelerator backend settings.
    pub accel: AccelConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_file: None,
            log_format: LogFormat::Human,
            verbose: false,
            foreground: false,
            wan: Vec::new(),
            bridge: None,
            video2lan: None,
            source: None,
            nowifi: false,
            wifi_prefix: "wlan".to_string(),
            wait_for_wan: false,
            mdb_src_mac: false,
            pid_file: common::DEFAULT_PID_FILE.to_string(),
            dump_file: common::DEFAULT_DUMP_FILE.to_string(),
            dump_format: DumpFormat::Text,
            override_file: common::DEFAULT_OVERRIDE_FILE.to_string(),
            max_groups: 1024,
            max_members: 64,
            accel: AccelConfig::default(),
        }
    }
}

impl Config {
    /// An explicit bridge wins over an explicit source; with neither, each
    /// group's source is learned from its route.
    pub fn mode(&self) -> SourceMode {
        match (&self.bridge, self.source) {
            (Some(_), _) => SourceMode::Bridged,
            (None, Some(src)) => SourceMode::Fixed(src),
            (None, None) => SourceMode::Routed,
        }
    }

    pub fn level(&self) -> slog::Level {
        match self.verbose {
            true => slog::Level::Debug,
            false => slog::Level::Info,
        }
    }
}

fn update_from_file(path: &str, config: &mut Config) -> McastResult<()> {
    let txt = std::fs::read_to_string(path)?;
    *config = toml::from_str(&txt)?;
    Ok(())
}

// Use the command-line arguments to update the run-time config.
fn update_from_cli(opts: &crate::Opt, config: &mut Config) -> McastResult<()> {
    if let Some(log_file) = &opts.log_file {
        config.log_file = Some(log_file.to_string());
    }

    if let Some(log_format) = opts.log_format {
        config.log_format = log_format;
    }

    // WANs named on the command line are expected to show up.
    if !opts.wan.is_empty() {
        config.wan = opts.wan.clone();
        config.wait_for_wan = true;
    }

    if let Some(bridge) = &opts.bridge {
        config.bridge = Some(bridge.to_string());
    }

    if let Some(video2lan) = &opts.video2lan {
        config.video2lan = Some(video2lan.to_string());
    }

    if let Some(src) = opts.src {
        config.source = Some(src);
    }

    if let Some(backend) = opts.accel {
        config.accel.backend = backend;
    }

    if let Some(pid_file) = &opts.pid_file {
        config.pid_file = pid_file.to_string();
    }

    if let Some(dump_file) = &opts.dump_file {
        config.dump_file = dump_file.to_string();
    }

    if let Some(override_file) = &opts.override_file {
        config.override_file = override_file.to_string();
    }

    // Flags can only turn things on.
    config.verbose |= opts.verbose;
    config.foreground |= opts.foreground;
    config.nowifi |= opts.nowifi;
    config.mdb_src_mac |= opts.mdb_src_mac;
    config.wait_for_wan |= opts.wait_wan;

    Ok(())
}

/// This builds a Config struct containing the tunable settings used to
/// adjust the daemon's behavior: the defaults, then the config file if one
/// was named, then the command line.
pub(crate) fn build_config(opts: &crate::Opt) -> McastResult<Config> {
    let mut config = Config::default();
    if let Some(path) = &opts.config {
        update_from_file(path, &mut config)?;
    }
    update_from_cli(opts, &mut config)?;
    config.accel.chaos.validate()?;
    Ok(config)
}
