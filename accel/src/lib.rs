// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use serde::{Deserialize, Serialize};
use slog::{info, o, Logger};

use aal::{AccelOps, AccelResult, FlowRequest};

pub mod chaos;
mod cmd;
pub mod mcast_cli;
pub mod pacer;
pub mod ppa;
pub mod stub;

use chaos::{ChaosConfig, ChaosHandle};
use mcast_cli::McastCliHandle;
use pacer::{Pacer, PacingConfig};
use ppa::PpaHandle;
use stub::StubHandle;

/// The accelerator implementations this daemon can drive.
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
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BackendKind {
    /// In-memory flow table, for development and tests
    #[default]
    Stub,
    /// The stub, with randomly injected failures
    Chaos,
    /// Intel PPA via `ppacmd`
    Ppa,
    /// Intel mcast helper via `mcast_cli`
    McastCli,
}

impl BackendKind {
    fn default_pacing(&self) -> PacingConfig {
        match self {
            BackendKind::Stub | BackendKind::Chaos => PacingConfig::DISABLED,
            BackendKind::Ppa | BackendKind::McastCli => PacingConfig::INTEL,
        }
    }
}

/// Accelerator settings, from the `[accel]` table of the daemon's config.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AccelConfig {
    pub backend: BackendKind,
    /// Path to the backend's command-line tool, if not the standard one
    pub command: Option<String>,
    /// Tear down the backend's subsystem at exit (mcast-cli only)
    pub uninit_on_exit: bool,
    /// Overrides the backend's default join pacing
    pub pacing: Option<PacingConfig>,
    pub chaos: ChaosConfig,
}

pub enum Backend {
    Stub(StubHandle),
    Chaos(ChaosHandle),
    Ppa(PpaHandle),
    McastCli(McastCliHandle),
}

/// The accelerator selected at startup, plus the join pacing it needs.
pub struct Handle {
    kind: BackendKind,
    backend: Backend,
    pacer: Pacer,
}

impl Handle {
    pub fn new(log: &Logger, config: &AccelConfig) -> AccelResult<Self> {
        let log = log.new(o!("unit" => "accel"));
        let cmd = config.command.as_deref();
        let backend = match config.backend {
            BackendKind::Stub => Backend::Stub(StubHandle::new(&log)),
            BackendKind::Chaos => {
                Backend::Chaos(ChaosHandle::new(&log, &config.chaos)?)
            }
            BackendKind::Ppa => Backend::Ppa(PpaHandle::new(&log, cmd)),
            BackendKind::McastCli => Backend::McastCli(McastCliHandle::new(
                &log,
                cmd,
                config.uninit_on_exit,
            )),
        };
        let pacing = config
            .pacing
            .unwrap_or_else(|| config.backend.default_pacing());
        info!(log, "accelerator backend {}", config.backend;
            "paced_joins" => pacing.joins,
            "pace_ms" => pacing.delay_ms);

        Ok(Handle {
            kind: config.backend,
            backend,
            pacer: Pacer::new(&log, pacing),
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    fn ops(&self) -> &dyn AccelOps {
        match &self.backend {
            Backend::Stub(h) => h,
            Backend::Chaos(h) => h,
            Backend::Ppa(h) => h,
            Backend::McastCli(h) => h,
        }
    }
}

impl AccelOps for Handle {
    fn init(&self) -> AccelResult<()> {
        self.ops().init()
    }

    fn join(&self, req: &FlowRequest) -> AccelResult<()> {
        let res = self.ops().join(req);
        self.pacer.after_join(req);
        res
    }

    fn leave(&self, req: &FlowRequest) -> AccelResult<()> {
        self.ops().leave(req)
    }

    fn deinit(&self) -> AccelResult<()> {
        self.ops().deinit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::logging::test_logger;
    use std::str::FromStr;

    #[test]
    fn test_backend_names() {
        assert_eq!(
            BackendKind::from_str("mcast-cli").unwrap(),
            BackendKind::McastCli
        );
        assert_eq!(BackendKind::Ppa.to_string(), "ppa");
        assert!(BackendKind::from_str("fapi").is_err());
    }

    #[test]
    fn test_config() {
        let config: AccelConfig = toml::from_str(
            r#"
            backend = "mcast-cli"
            command = "/usr/sbin/mcast_cli"

            [pacing]
            joins = 3
            delay_ms = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendKind::McastCli);
        assert_eq!(config.command.as_deref(), Some("/usr/sbin/mcast_cli"));
        assert_eq!(
            config.pacing,
            Some(PacingConfig {
                joins: 3,
                delay_ms: 10
            })
        );
        assert!(!config.uninit_on_exit);
    }

    #[test]
    fn test_stub_handle() {
        let hdl = Handle::new(&test_logger(), &AccelConfig::default()).unwrap();
        assert_eq!(hdl.kind(), BackendKind::Stub);
        hdl.init().unwrap();
        assert!(matches!(hdl.backend(), Backend::Stub(_)));
    }
}
