// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Manual joins and leaves, requested through the override file.

use std::net::IpAddr;

use slog::{error, info};

use aal::AccelOps;
use common::vsa::{self, VsaOp, VsaRequest};

use crate::daemon::Daemon;
use crate::group::MemberKey;
use crate::ifname::IfResolver;
use crate::types::Outcome;

impl<H: AccelOps, R: IfResolver> Daemon<H, R> {
    /// Read the override file and apply whatever it asks for.  Returns
    /// `None` if there was no request.
    pub fn check_override(&mut self) -> Option<Outcome> {
        let path = self.ctx.config.override_file.clone();
        match vsa::read_request(&path) {
            Ok(Some(req)) => {
                let out = self.apply_override(&req);
                info!(self.ctx.log, "override {req}: {out}");
                Some(out)
            }
            Ok(None) => None,
            Err(e) => {
                error!(self.ctx.log, "bad override request: {e}";
                    "path" => path);
                None
            }
        }
    }

    /// Override members are keyed by interface alone, and belong to no
    /// bridge.
    pub fn apply_override(&mut self, req: &VsaRequest) -> Outcome {
        let group = IpAddr::V4(req.group);
        let Some(ifindex) = self.ctx.ifnames.index(&req.device) else {
            return Outcome::LookupMiss(format!("interface {}", req.device));
        };
        let key = MemberKey::new(ifindex, None);

        match req.op {
            VsaOp::Join => {
                let created = match self.groups.find_or_create(group, 0) {
                    Ok((_, created)) => created,
                    Err(e) => return Outcome::Abandoned(e.to_string()),
                };
                if let Err(e) = self.groups.add_member(&group, key) {
                    if created {
                        self.groups.remove_if_empty(&group);
                    }
                    return Outcome::Abandoned(e.to_string());
                }
                self.groups.reconcile_join(&group, &self.ctx)
            }
            VsaOp::Leave => {
                self.groups.reconcile_leave(&group, Some(key), &self.ctx)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::test_util::*;
    use crate::types::{CallStats, Outcome};
    use common::vsa::VsaRequest;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn req(s: &str) -> VsaRequest {
        s.parse().unwrap()
    }

    fn fixed_config() -> Config {
        Config {
            source: Some("10.1.1.1".parse().unwrap()),
            ..test_config()
        }
    }

    #[test]
    fn test_join_leave() {
        let mut d = test_daemon(fixed_config());
        let out = d.apply_override(&req("join 239.1.1.1 lan1"));
        assert_eq!(
            out,
            Outcome::Applied(CallStats {
                joined: 1,
                ..Default::default()
            })
        );
        let rec = d.groups.find(&ip("239.1.1.1")).unwrap();
        assert_eq!(rec.bridge_ifindex, 0);
        assert_eq!(d.ctx.accel.joins()[0].src_mac, None);

        let out = d.apply_override(&req("leave 239.1.1.1 lan1"));
        assert_eq!(
            out,
            Outcome::Applied(CallStats {
                left: 1,
                ..Default::default()
            })
        );
        assert!(d.groups.is_empty());
    }

    #[test]
    fn test_unknown_targets() {
        let mut d = test_daemon(fixed_config());
        let out = d.apply_override(&req("join 239.1.1.1 nosuch0"));
        assert!(matches!(out, Outcome::LookupMiss(_)));
        let out = d.apply_override(&req("leave 239.1.1.1 lan1"));
        assert!(matches!(out, Outcome::LookupMiss(_)));
        assert!(d.groups.is_empty());
        assert_eq!(d.ctx.accel.calls().len(), 1);
    }

    #[test]
    fn test_routed_override_waits() {
        let mut d = test_daemon(test_config());
        let out = d.apply_override(&req("join 224.0.18.100 lan1"));
        assert_eq!(out, Outcome::NotReady);
        let out = d.mroute_add(&mroute("10.0.0.5", "224.0.18.100", IF_WAN));
        assert!(matches!(out, Outcome::Applied(s) if s.joined == 1));
    }

    #[test]
    fn test_check_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut d = test_daemon(Config {
            override_file: file.path().display().to_string(),
            ..fixed_config()
        });
        // empty file
        assert_eq!(d.check_override(), None);

        writeln!(file, "bogus").unwrap();
        assert_eq!(d.check_override(), None);

        let mut file = std::fs::File::create(file.path()).unwrap();
        writeln!(file, "join 239.1.1.1 lan2").unwrap();
        assert!(matches!(d.check_override(), Some(Outcome::Applied(_))));
        assert_eq!(d.ctx.accel.joins()[0].lan_dev, "lan2");
    }
}
