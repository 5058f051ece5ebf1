// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

pub mod logging;
pub mod network;
pub mod vsa;

/// Name of the daemon, used for log records and default file names.
pub const DAEMON_NAME: &str = "mcpad";

/// Where the daemon records its pid unless told otherwise.
pub const DEFAULT_PID_FILE: &str = "/var/run/mcpad.pid";

/// Where the daemon writes its state dump on request.
pub const DEFAULT_DUMP_FILE: &str = "/tmp/mcpad-dump";

/// Where the daemon looks for a manual join/leave request.
pub const DEFAULT_OVERRIDE_FILE: &str = "/tmp/vsapa.cfg";
