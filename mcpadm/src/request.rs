// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::net::Ipv4Addr;

use anyhow::Context;
use structopt::*;

use common::vsa::{VsaOp, VsaRequest};

#[derive(Debug, StructOpt)]
pub struct Request {
    /// IPv4 multicast group
    group: Ipv4Addr,
    /// LAN device the group should be delivered to
    device: String,
    #[structopt(long, default_value = common::DEFAULT_OVERRIDE_FILE)]
    override_file: String,
}

impl Request {
    fn to_vsa(&self, op: VsaOp) -> anyhow::Result<VsaRequest> {
        if !self.group.is_multicast() {
            anyhow::bail!("{} is not a multicast group", self.group);
        }
        Ok(VsaRequest {
            op,
            group: self.group,
            device: self.device.clone(),
        })
    }
}

pub fn write_request(path: &str, req: &VsaRequest) -> anyhow::Result<()> {
    std::fs::write(path, format!("{req}\n"))
        .with_context(|| format!("failed to write {path}"))
}

/// Leave the request where the daemon looks for it, then tell the daemon.
pub fn send(pid_file: &str, op: VsaOp, r: Request) -> anyhow::Result<()> {
    let req = r.to_vsa(op)?;
    write_request(&r.override_file, &req)?;
    crate::signal_daemon(pid_file, libc::SIGUSR2)?;
    println!("sent: {req}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().display().to_string();
        let r = Request {
            group: "239.1.1.1".parse().unwrap(),
            device: "lan1".to_string(),
            override_file: path.clone(),
        };
        let req = r.to_vsa(VsaOp::Leave).unwrap();
        write_request(&path, &req).unwrap();
        assert_eq!(common::vsa::read_request(&path).unwrap(), Some(req));
    }

    #[test]
    fn test_unicast_rejected() {
        let r = Request {
            group: "10.0.0.1".parse().unwrap(),
            device: "lan1".to_string(),
            override_file: String::new(),
        };
        assert!(r.to_vsa(VsaOp::Join).is_err());
    }
}
