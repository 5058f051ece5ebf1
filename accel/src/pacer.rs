// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use slog::{debug, Logger};

use aal::FlowRequest;

/// The Intel backends cannot absorb back-to-back bridged joins right after
/// startup.  After each of the first `joins` bridged-mode join calls, the
/// caller is held for `delay_ms`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PacingConfig {
    pub joins: usize,
    pub delay_ms: u64,
}

impl PacingConfig {
    pub const DISABLED: PacingConfig = PacingConfig {
        joins: 0,
        delay_ms: 0,
    };

    pub const INTEL: PacingConfig = PacingConfig {
        joins: 11,
        delay_ms: 1000,
    };
}

pub struct Pacer {
    log: Logger,
    config: PacingConfig,
    paced: Mutex<usize>,
}

impl Pacer {
    pub fn new(log: &Logger, config: PacingConfig) -> Self {
        Pacer {
            log: log.clone(),
            config,
            paced: Mutex::new(0),
        }
    }

    /// Returns the delay that should follow this join, counting it against
    /// the budget.
    fn claim(&self, req: &FlowRequest) -> Option<Duration> {
        if !req.source.is_bridged() {
            return None;
        }
        let mut paced = self.paced.lock().unwrap();
        if *paced >= self.config.joins {
            return None;
        }
        *paced += 1;
        Some(Duration::from_millis(self.config.delay_ms))
    }

    pub fn after_join(&self, req: &FlowRequest) {
        if let Some(delay) = self.claim(req) {
            debug!(self.log, "pacing after bridged join";
                "group" => %req.group,
                "delay_ms" => self.config.delay_ms);
            std::thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aal::FlowSource;
    use common::logging::test_logger;
    use std::net::Ipv4Addr;

    fn req(source: FlowSource) -> FlowRequest {
        FlowRequest {
            group: Ipv4Addr::new(239, 1, 1, 1),
            source,
            wan: "wan".to_string(),
            lan: vec![],
            lan_dev: "lan1".to_string(),
            src_mac: None,
            update: false,
        }
    }

    #[test]
    fn test_budget() {
        let pacer = Pacer::new(
            &test_logger(),
            PacingConfig {
                joins: 2,
                delay_ms: 5,
            },
        );
        let routed = req(FlowSource::Address(Ipv4Addr::new(10, 0, 0, 5)));
        let bridged = req(FlowSource::Bridged);

        assert_eq!(pacer.claim(&routed), None);
        assert_eq!(pacer.claim(&bridged), Some(Duration::from_millis(5)));
        assert_eq!(pacer.claim(&bridged), Some(Duration::from_millis(5)));
        assert_eq!(pacer.claim(&bridged), None);
    }

    #[test]
    fn test_disabled() {
        let pacer = Pacer::new(&test_logger(), PacingConfig::DISABLED);
        assert_eq!(pacer.claim(&req(FlowSource::Bridged)), None);
    }
}
