// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::fs::OpenOptions;

use serde::Deserialize;
use serde::Serialize;
use slog::Drain;
use slog::Level;
use slog::Logger;

/// How log records are rendered.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Serialize,
    PartialEq,
    strum::EnumString,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    /// Unstructured text, intended for a terminal or a human with `less`
    #[default]
    Human,
    /// Bunyan-style json, one record per line
    Json,
}

fn async_root<D>(drain: D, level: Level, name: &'static str) -> Logger
where
    D: Drain<Ok = (), Err = slog::Never> + Send + 'static,
{
    let drain = slog::LevelFilter::new(drain, level).fuse();
    let drain = slog_async::Async::new(drain)
        .chan_size(0x2000)
        .build()
        .fuse();
    Logger::root(drain, slog::o!("name" => name))
}

/// Build the root logger at the default (info) level.
pub fn init(
    name: &'static str,
    log_file: &Option<String>,
    log_format: LogFormat,
) -> anyhow::Result<Logger> {
    init_with_level(name, log_file, log_format, Level::Info)
}

/// Build the root logger.  If `log_file` is set, records are appended to
/// that file, otherwise they are written to stdout.
pub fn init_with_level(
    name: &'static str,
    log_file: &Option<String>,
    log_format: LogFormat,
    level: Level,
) -> anyhow::Result<Logger> {
    let log = match (log_file, log_format) {
        (Some(path), LogFormat::Human) => {
            let file =
                OpenOptions::new().create(true).append(true).open(path)?;
            let decorator = slog_term::PlainDecorator::new(file);
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            async_root(drain, level, name)
        }
        (Some(path), LogFormat::Json) => {
            let file =
                OpenOptions::new().create(true).append(true).open(path)?;
            let drain = slog_bunyan::with_name(name, file).build().fuse();
            async_root(drain, level, name)
        }
        (None, LogFormat::Human) => {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            async_root(drain, level, name)
        }
        (None, LogFormat::Json) => {
            let drain =
                slog_bunyan::with_name(name, std::io::stdout()).build().fuse();
            async_root(drain, level, name)
        }
    };

    Ok(log)
}

/// A synchronous logger that writes through the test harness's captured
/// stdout.
pub fn test_logger() -> Logger {
    let dec = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(dec).build().fuse();
    Logger::root(drain, slog::o!())
}
