// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use rand::random;
use serde::{Deserialize, Serialize};
use slog::Logger;

use aal::{AccelError, AccelOps, AccelResult, FlowRequest};

use crate::stub::StubHandle;

/// Chaos that happens according to a probability.
#[derive(Default, Debug, Serialize, Deserialize, Copy, Clone, PartialEq)]
#[serde(transparent)]
pub struct Chaos {
    /// A probability between 0.0 and 1.0
    pub value: f64,
}

impl Chaos {
    /// Create a new chaos value.
    pub fn new(value: f64) -> Self {
        let mut c = Self::default();
        c.set(value);
        c
    }

    /// Set the chaos value. Panics if value is outside the range [0.0, 1.0].
    pub fn set(&mut self, value: f64) {
        if !(0.0..=1.0).contains(&value) {
            panic!("probability out of range");
        }
        self.value = value;
    }

    /// Get the underlying chaos value.
    pub fn get(&self) -> f64 {
        self.value
    }

    fn valid(&self) -> bool {
        (0.0..=1.0).contains(&self.value)
    }

    /// Return a chaos error according to the underlying probability value.
    pub fn unfurled(&self, log: &Logger, message: &str) -> AccelResult<()> {
        if self.value >= random() {
            slog::error!(log, "chaos error: {}", message);
            return Err(AccelError::Synthetic(message.into()));
        }
        Ok(())
    }
}

/// Failure probabilities for each accelerator operation.
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ChaosConfig {
    pub init: Chaos,
    pub join: Chaos,
    pub leave: Chaos,
    pub deinit: Chaos,
}

impl ChaosConfig {
    /// The uniform chaos config applies a uniform underlying probability to
    /// each operation.
    pub fn uniform(v: f64) -> Self {
        Self {
            init: Chaos::new(v),
            join: Chaos::new(v),
            leave: Chaos::new(v),
            deinit: Chaos::new(v),
        }
    }

    /// Values read from a config file bypass `Chaos::set()`, so they are
    /// checked here instead.
    pub fn validate(&self) -> AccelResult<()> {
        for (name, c) in [
            ("init", self.init),
            ("join", self.join),
            ("leave", self.leave),
            ("deinit", self.deinit),
        ] {
            if !c.valid() {
                return Err(AccelError::InvalidArg(format!(
                    "chaos probability for {name} out of range: {}",
                    c.value
                )));
            }
        }
        Ok(())
    }
}

/// A stub accelerator whose operations fail at random.  Failures are decided
/// before the stub sees the call, so a failed operation leaves the stub's
/// flow table untouched.
pub struct ChaosHandle {
    log: Logger,
    config: ChaosConfig,
    stub: StubHandle,
}

impl ChaosHandle {
    pub fn new(log: &Logger, config: &ChaosConfig) -> AccelResult<Self> {
        config.validate()?;
        Ok(ChaosHandle {
            log: log.new(slog::o!("accel" => "chaos")),
            config: config.clone(),
            stub: StubHandle::new(log),
        })
    }

    /// The stub carrying the flows that survived the chaos.
    pub fn stub(&self) -> &StubHandle {
        &self.stub
    }
}

impl AccelOps for ChaosHandle {
    fn init(&self) -> AccelResult<()> {
        self.config.init.unfurled(&self.log, "init")?;
        self.stub.init()
    }

    fn join(&self, req: &FlowRequest) -> AccelResult<()> {
        self.config
            .join
            .unfurled(&self.log, &format!("join {req}"))?;
        self.stub.join(req)
    }

    fn leave(&self, req: &FlowRequest) -> AccelResult<()> {
        self.config
            .leave
            .unfurled(&self.log, &format!("leave {req}"))?;
        self.stub.leave(req)
    }

    fn deinit(&self) -> AccelResult<()> {
        self.config.deinit.unfurled(&self.log, "deinit")?;
        self.stub.deinit()
    }
}
