// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Accelerator Abstraction Layer: the capability the multicast daemon drives
//! to program forwarding flows into a packet accelerator.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use common::network::MacAddr;

/// A specialized Result type for accelerator operations
pub type AccelResult<T> = Result<T, AccelError>;

/// Error type conveying additional information about accelerator errors
#[derive(Error, Debug)]
pub enum AccelError {
    /// The external tool used to program the accelerator could not be run at
    /// all.
    #[error("failed to run {cmd}: {err}")]
    Command { cmd: String, err: std::io::Error },
    /// The external tool ran, but reported a failure.
    #[error("{cmd} exited with {status}: {stderr}")]
    Failed {
        cmd: String,
        status: String,
        stderr: String,
    },
    /// An argument passed to the accelerator layer is invalid or
    /// inappropriate.  This indicates misbehavior from the caller.
    #[error("Invalid argument: {}", .0)]
    InvalidArg(String),
    /// An accelerator function was called before the layer was initialized.
    #[error("accelerator uninitialized: {}", .0)]
    Uninitialized(String),
    /// The accelerator encountered an error when interacting with the local
    /// file system.
    #[error("IO error: {ctx}: {err}")]
    Io { ctx: String, err: std::io::Error },
    /// An error derived from a purposely triggered synthetic fault for testing
    /// purposes.
    #[error("Synthetic accelerator error: {}", .0)]
    Synthetic(String),
    /// A flow the caller is trying to create already exists.
    #[error("Already exists: {}", .0)]
    Exists(String),
    /// A flow the caller is trying to remove is not present.
    #[error("Missing: {}", .0)]
    Missing(String),
}

/// Where the traffic for a flow comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowSource {
    /// Pure snooping: the accelerator forwards the group regardless of the
    /// sender.
    Bridged,
    /// Routed video: traffic from this sender only.
    Address(Ipv4Addr),
}

impl FlowSource {
    pub fn is_bridged(&self) -> bool {
        matches!(self, FlowSource::Bridged)
    }

    pub fn address(&self) -> Option<Ipv4Addr> {
        match self {
            FlowSource::Bridged => None,
            FlowSource::Address(a) => Some(*a),
        }
    }
}

impl fmt::Display for FlowSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FlowSource::Bridged => write!(f, "bridged"),
            FlowSource::Address(a) => write!(f, "{a}"),
        }
    }
}

/// One join or leave request.  Each call is scoped to a single downstream
/// interface (`lan_dev`), but carries the group's complete member list in
/// `lan` for backends that program the whole group at once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRequest {
    pub group: Ipv4Addr,
    pub source: FlowSource,
    /// Upstream interface the group's traffic arrives on
    pub wan: String,
    /// All downstream member interfaces of the group
    pub lan: Vec<String>,
    /// The downstream interface this request is about
    pub lan_dev: String,
    /// The subscribing device, when the kernel reported one
    pub src_mac: Option<MacAddr>,
    /// Set when another member of the group is already being forwarded
    pub update: bool,
}

impl fmt::Display for FlowRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "group {} src {} wan {} lan_dev {}",
            self.group, self.source, self.wan, self.lan_dev
        )?;
        if let Some(mac) = self.src_mac {
            write!(f, " mac {mac}")?;
        }
        if self.update {
            write!(f, " (update)")?;
        }
        Ok(())
    }
}

/// The `AccelOps` trait contains the operations the multicast daemon needs
/// from an accelerator.  All calls are synchronous and may block for as long
/// as the backend needs.
pub trait AccelOps {
    /// Prepare the backend.  Called once, before any join.
    fn init(&self) -> AccelResult<()>;

    /// Start forwarding `req.group` to `req.lan_dev`.
    fn join(&self, req: &FlowRequest) -> AccelResult<()>;

    /// Stop forwarding `req.group` to `req.lan_dev`.
    fn leave(&self, req: &FlowRequest) -> AccelResult<()>;

    /// Release the backend.  Called once, at shutdown.
    fn deinit(&self) -> AccelResult<()>;
}

impl<T: AccelOps + ?Sized> AccelOps for Arc<T> {
    fn init(&self) -> AccelResult<()> {
        (**self).init()
    }

    fn join(&self, req: &FlowRequest) -> AccelResult<()> {
        (**self).join(req)
    }

    fn leave(&self, req: &FlowRequest) -> AccelResult<()> {
        (**self).leave(req)
    }

    fn deinit(&self) -> AccelResult<()> {
        (**self).deinit()
    }
}
