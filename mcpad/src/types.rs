// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! General types used throughout the daemon.

use std::convert;
use std::fmt;
use std::net::Ipv4Addr;

use aal::AccelError;
use common::vsa::VsaError;
use nlpacket::PacketError;
use serde::Serialize;

pub type McastResult<T> = Result<T, McastError>;

#[derive(Debug, thiserror::Error)]
pub enum McastError {
    #[error("I/O error: {0:?}")]
    Io(std::io::Error),
    #[error("Accelerator error: {0:?}")]
    Accel(AccelError),
    #[error("Malformed message: {0}")]
    Malformed(PacketError),
    #[error("Resource already exists: {0}")]
    Exists(String),
    #[error("Resource is missing: {0}")]
    Missing(String),
    #[error("Invalid argument: {0}")]
    Invalid(String),
    #[error("Table {0} is full")]
    TableFull(String),
    #[error("Netlink request failed: errno {0}")]
    Netlink(i32),
    #[error("Error: {0}")]
    Other(String),
}

impl convert::From<std::io::Error> for McastError {
    fn from(err: std::io::Error) -> Self {
        McastError::Io(err)
    }
}

impl convert::From<AccelError> for McastError {
    fn from(err: AccelError) -> Self {
        McastError::Accel(err)
    }
}

impl convert::From<PacketError> for McastError {
    fn from(err: PacketError) -> Self {
        McastError::Malformed(err)
    }
}

impl convert::From<VsaError> for McastError {
    fn from(err: VsaError) -> Self {
        match err {
            VsaError::Io { err, .. } => McastError::Io(err),
            e => McastError::Invalid(e.to_string()),
        }
    }
}

impl convert::From<toml::de::Error> for McastError {
    fn from(err: toml::de::Error) -> Self {
        McastError::Invalid(err.to_string())
    }
}

/// Where the source address handed to the accelerator comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "mode", content = "source")]
pub enum SourceMode {
    /// Each group's source is learned from its multicast route
    Routed,
    /// Every group uses the configured source
    Fixed(Ipv4Addr),
    /// Groups are joined without a source, from the configured bridge
    Bridged,
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SourceMode::Routed => write!(f, "routed"),
            SourceMode::Fixed(src) => write!(f, "fixed source {src}"),
            SourceMode::Bridged => write!(f, "bridged"),
        }
    }
}

/// Accelerator calls made while reconciling a group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallStats {
    pub joined: usize,
    pub left: usize,
    pub failed: usize,
}

impl CallStats {
    pub fn absorb(&mut self, other: CallStats) {
        self.joined += other.joined;
        self.left += other.left;
        self.failed += other.failed;
    }
}

/// What handling one event (or one entry of an MDB event) amounted to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The table changed, and these accelerator calls were made
    Applied(CallStats),
    /// The table changed, but the group has no usable source yet
    NotReady,
    /// Dropped by one of the event filters
    Filtered(&'static str),
    /// The event names a group or member we aren't tracking
    LookupMiss(String),
    /// Understood, and deliberately not acted on
    Ignored(String),
    /// Couldn't be applied for lack of room
    Abandoned(String),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outcome::Applied(s) => write!(
                f,
                "applied ({} joined, {} left, {} failed)",
                s.joined, s.left, s.failed
            ),
            Outcome::NotReady => write!(f, "waiting for a source"),
            Outcome::Filtered(why) => write!(f, "filtered: {why}"),
            Outcome::LookupMiss(what) => write!(f, "no such {what}"),
            Outcome::Ignored(why) => write!(f, "ignored: {why}"),
            Outcome::Abandoned(why) => write!(f, "abandoned: {why}"),
        }
    }
}
