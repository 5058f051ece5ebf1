// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The manual override request: a file holding `<op> <group> <device>`, read
//! by the daemon at startup and whenever it is signalled.

use std::fmt;
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VsaError {
    #[error("expected \"<join|leave> <group> <device>\", found {0:?}")]
    Malformed(String),
    #[error("unknown operation {0:?}")]
    BadOp(String),
    #[error("invalid IPv4 group {0:?}")]
    BadGroup(String),
    #[error("failed to read {path}: {err}")]
    Io { path: String, err: std::io::Error },
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, strum::EnumString, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum VsaOp {
    Join,
    Leave,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VsaRequest {
    pub op: VsaOp,
    pub group: Ipv4Addr,
    pub device: String,
}

impl FromStr for VsaRequest {
    type Err = VsaError;

    // Anything after the third token is ignored.
    fn from_str(s: &str) -> Result<Self, VsaError> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        if tokens.len() < 3 {
            return Err(VsaError::Malformed(s.trim().to_string()));
        }
        let op = VsaOp::from_str(tokens[0])
            .map_err(|_| VsaError::BadOp(tokens[0].to_string()))?;
        let group = Ipv4Addr::from_str(tokens[1])
            .map_err(|_| VsaError::BadGroup(tokens[1].to_string()))?;
        Ok(VsaRequest {
            op,
            group,
            device: tokens[2].to_string(),
        })
    }
}

impl fmt::Display for VsaRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.op, self.group, self.device)
    }
}

/// Read the pending request.  A missing or blank file means there is nothing
/// to do.
pub fn read_request(path: &str) -> Result<Option<VsaRequest>, VsaError> {
    let txt = match std::fs::read_to_string(path) {
        Ok(txt) => txt,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(VsaError::Io {
                path: path.to_string(),
                err,
            })
        }
    };
    if txt.trim().is_empty() {
        return Ok(None);
    }
    txt.parse().map(Some)
}
