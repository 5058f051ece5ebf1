// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Main application entry point for `mcpad`, which follows the kernel's
//! multicast memberships and routes and programs matching flows into the
//! packet accelerator.

use std::net::Ipv4Addr;

use anyhow::Context as _;
use futures::stream::{Stream, StreamExt};
use libc::c_int;
use signal_hook::consts::SIGHUP;
use signal_hook::consts::SIGINT;
use signal_hook::consts::SIGQUIT;
use signal_hook::consts::SIGTERM;
use signal_hook::consts::SIGUSR1;
use signal_hook::consts::SIGUSR2;
use signal_hook_tokio::Signals;
use slog::{debug, error, info, warn, Logger};
use structopt::StructOpt;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, Duration};

use aal::AccelOps;
use accel::BackendKind;
use common::logging::LogFormat;
use nlpacket::{RTNLGRP_IPV4_MROUTE, RTNLGRP_IPV4_ROUTE, RTNLGRP_MDB};

use crate::bootstrap::KernelDump;
use crate::config::Config;
use crate::daemon::Daemon;
use crate::ifname::{IfResolver, SystemIfNames};
use crate::netlink::{DumpSocket, NetlinkSocket, NlEvent};

mod bootstrap;
mod config;
mod daemon;
mod dispatch;
mod dump;
mod group;
mod hosts;
mod ifname;
mod membership;
mod netlink;
mod route;
#[cfg(test)]
mod test_util;
mod types;
mod vsa;

#[derive(Debug, Default, StructOpt)]
#[structopt(
    name = "mcpad",
    about = "multicast acceleration daemon for home gateways"
)]
pub(crate) struct Opt {
    #[structopt(
        long,
        about = "send log data to the named file rather than stdout"
    )]
    log_file: Option<String>,

    #[structopt(
        long,
        short = "l",
        about = "log format",
        help = "format logs for 'human' or 'json' consumption"
    )]
    log_format: Option<LogFormat>,

    #[structopt(long, short = "v", help = "log at debug level")]
    verbose: bool,

    #[structopt(long, short = "f", help = "stay in the foreground")]
    foreground: bool,

    #[structopt(
        long,
        short = "w",
        number_of_values = 1,
        help = "upstream interface; may be given more than once"
    )]
    wan: Vec<String>,

    #[structopt(
        long,
        short = "b",
        help = "only follow memberships on this bridge, joining sourceless"
    )]
    bridge: Option<String>,

    #[structopt(long, help = "device carrying video from upstream")]
    video2lan: Option<String>,

    #[structopt(
        long,
        short = "s",
        help = "use this source address for every group"
    )]
    src: Option<Ipv4Addr>,

    #[structopt(long, short = "n", help = "ignore wireless ports")]
    nowifi: bool,

    #[structopt(long, help = "MDB notifications carry the host's MAC")]
    mdb_src_mac: bool,

    #[structopt(long, help = "wait for the first WAN to appear at startup")]
    wait_wan: bool,

    #[structopt(
        long,
        help = "accelerator backend: stub, chaos, ppa or mcast-cli"
    )]
    accel: Option<BackendKind>,

    #[structopt(long, help = "where to record the daemon's pid")]
    pid_file: Option<String>,

    #[structopt(long, help = "where SIGUSR1 writes the state dump")]
    dump_file: Option<String>,

    #[structopt(long, help = "file read for manual requests on SIGUSR2")]
    override_file: Option<String>,

    #[structopt(long, help = "TOML file with the daemon's settings")]
    config: Option<String>,
}

const SIGNALS: &[c_int] =
    &[SIGTERM, SIGQUIT, SIGINT, SIGHUP, SIGUSR1, SIGUSR2];

fn write_pid_file(path: &str) -> anyhow::Result<()> {
    std::fs::write(path, format!("{}\n", std::process::id()))
        .with_context(|| format!("writing pid file {path}"))
}

// Leave the controlling session, so a hangup on the launching terminal isn't
// delivered to us.
fn detach(log: &Logger) {
    if unsafe { libc::setsid() } < 0 {
        warn!(log, "setsid failed: {}", std::io::Error::last_os_error());
    }
}

async fn wait_for_wan(log: &Logger, ifnames: &SystemIfNames, wan: &str) {
    if ifnames.index(wan).is_some() {
        return;
    }
    info!(log, "waiting for upstream interface"; "wan" => wan);
    while ifnames.index(wan).is_none() {
        sleep(Duration::from_secs(1)).await;
    }
    info!(log, "upstream interface is up"; "wan" => wan);
}

/// Handle kernel notifications and signals until asked to stop.  Pending
/// notifications are drained before a signal is acted on.
async fn event_loop<H, R, D, S>(
    daemon: &mut Daemon<H, R>,
    dumper: &mut D,
    mut events: UnboundedReceiver<NlEvent>,
    mut signals: S,
) -> anyhow::Result<()>
where
    H: AccelOps,
    R: IfResolver,
    D: KernelDump,
    S: Stream<Item = c_int> + Unpin,
{
    let log = daemon.log().new(slog::o!("unit" => "event_loop"));

    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(NlEvent::Datagram(buf)) => {
                    let n = daemon.handle_datagram(&buf);
                    debug!(log, "handled datagram"; "messages" => n);
                }
                Some(NlEvent::Overrun) => {
                    daemon.resync(dumper);
                }
                Some(NlEvent::Failed(e)) => {
                    return Err(e).context("netlink event socket failed");
                }
                None => anyhow::bail!("netlink reader exited"),
            },
            signal = signals.next() => match signal {
                Some(sig @ (SIGTERM | SIGQUIT | SIGINT)) => {
                    info!(log, "received signal"; "sig" => sig);
                    return Ok(());
                }
                Some(SIGUSR1) => {
                    let _ = daemon.write_dump();
                }
                Some(SIGUSR2) => {
                    if daemon.check_override().is_none() {
                        info!(log, "no override request pending");
                    }
                }
                Some(SIGHUP) => daemon.flush_ifnames(),
                Some(sig) => warn!(log, "ignoring signal"; "sig" => sig),
                None => return Ok(()),
            },
        }
    }
}

/// Replay the kernel's tables, then follow its notifications.
async fn serve(
    log: &Logger,
    daemon: &mut Daemon<accel::Handle, SystemIfNames>,
    dumper: &mut DumpSocket,
    events: NetlinkSocket,
) -> anyhow::Result<()> {
    // Install the handlers before the replay, so a request sent during it
    // is queued rather than fatal.
    let signals = Signals::new(SIGNALS).context("installing signal handlers")?;
    let handle = signals.handle();

    daemon.bootstrap(dumper);

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let res = match netlink::spawn_reader(log, events, tx) {
        Ok(_) => event_loop(daemon, dumper, rx, signals).await,
        Err(e) => Err(e).context("starting netlink reader"),
    };
    handle.close();
    res
}

/// Tear down a started daemon, then hand back how its run ended.
fn shutdown_after<H: AccelOps, R: IfResolver>(
    log: &Logger,
    daemon: Daemon<H, R>,
    res: anyhow::Result<()>,
) -> anyhow::Result<()> {
    if let Err(e) = &res {
        error!(log, "event loop failed: {e:#}");
    }
    daemon.shutdown();
    res
}

async fn run_mcpad(config: Config, log: Logger) -> anyhow::Result<()> {
    if !config.foreground {
        detach(&log);
    }

    let ifnames = SystemIfNames::new(&log);
    if config.wait_for_wan && !config.foreground {
        if let Some(wan) = config.wan.first() {
            wait_for_wan(&log, &ifnames, wan).await;
        }
    }

    let groups = nlpacket::group_mask(&[
        RTNLGRP_IPV4_ROUTE,
        RTNLGRP_IPV4_MROUTE,
        RTNLGRP_MDB,
    ]);
    let events =
        NetlinkSocket::open(groups).context("opening netlink event socket")?;

    let accel = accel::Handle::new(&log, &config.accel)
        .context("configuring accelerator")?;
    let mut daemon = Daemon::new(&log, config, accel, ifnames);
    let mut dumper = DumpSocket::new(&log, daemon.ctx.parse_options())
        .context("opening netlink dump socket")?;

    daemon.start();
    let res = serve(&log, &mut daemon, &mut dumper, events).await;
    shutdown_after(&log, daemon, res)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();
    let config = config::build_config(&opt)?;

    let log = common::logging::init_with_level(
        common::DAEMON_NAME,
        &config.log_file,
        config.log_format,
        config.level(),
    )?;
    info!(log, "mcpad config: {config:#?}");

    let pid_file = config.pid_file.clone();
    write_pid_file(&pid_file)?;
    let res = run_mcpad(config, log.clone()).await;
    if let Err(e) = std::fs::remove_file(&pid_file) {
        warn!(log, "failed to remove pid file: {e}"; "path" => &pid_file);
    }
    info!(log, "done");
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::DumpKind;
    use crate::test_util::*;
    use accel::stub::AccelCall;
    use nlpacket::{encode_message, Message, ParseOptions};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn sourced() -> Config {
        Config {
            source: Some("10.1.1.1".parse().unwrap()),
            ..test_config()
        }
    }

    fn join(port: u32, group: &str) -> NlEvent {
        let msg = Message::NewMdb(mdb(IF_BR_LAN, port, group));
        let raw = encode_message(&msg, 0, &ParseOptions::default());
        NlEvent::Datagram(raw.to_vec())
    }

    fn deinits(calls: &[AccelCall]) -> usize {
        calls.iter().filter(|c| **c == AccelCall::Deinit).count()
    }

    #[tokio::test]
    async fn test_repeated_term_flushes_once() {
        let mut d = test_daemon(sourced());
        let accel = Arc::clone(&d.ctx.accel);
        let mut dumper = FakeDump::default();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(join(IF_LAN1, "239.1.1.1")).unwrap();
        tx.send(join(IF_LAN2, "239.1.1.1")).unwrap();
        let (sig_tx, sig_rx) = futures::channel::mpsc::unbounded();
        sig_tx.unbounded_send(SIGTERM).unwrap();
        sig_tx.unbounded_send(SIGTERM).unwrap();

        let res = event_loop(&mut d, &mut dumper, rx, sig_rx).await;
        assert!(res.is_ok());
        assert_eq!(accel.joins().len(), 2);

        let log = d.log().clone();
        shutdown_after(&log, d, res).unwrap();
        assert_eq!(accel.leaves().len(), 2);
        assert_eq!(accel.flow_count(), 0);
        assert_eq!(deinits(&accel.calls()), 1);
        assert!(dumper.asked.is_empty());
    }

    #[tokio::test]
    async fn test_overrun_resyncs() {
        let mut d = test_daemon(sourced());
        let accel = Arc::clone(&d.ctx.accel);
        let mut dumper = FakeDump::default();
        dumper.reply(
            DumpKind::Memberships,
            vec![Message::NewMdb(mdb(IF_BR_LAN, IF_LAN1, "239.1.1.1"))],
        );
        dumper.reply(DumpKind::Mroutes, Vec::new());

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(NlEvent::Overrun).unwrap();
        let (sig_tx, sig_rx) = futures::channel::mpsc::unbounded();
        sig_tx.unbounded_send(SIGINT).unwrap();

        event_loop(&mut d, &mut dumper, rx, sig_rx).await.unwrap();
        assert_eq!(dumper.asked, [DumpKind::Memberships, DumpKind::Mroutes]);
        assert_eq!(d.groups().len(), 1);
        assert_eq!(accel.joins().len(), 1);
    }

    #[tokio::test]
    async fn test_socket_failure() {
        let mut d = test_daemon(sourced());
        let accel = Arc::clone(&d.ctx.accel);
        let mut dumper = FakeDump::default();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(join(IF_LAN1, "239.1.1.1")).unwrap();
        let err = std::io::Error::from_raw_os_error(libc::EBADF);
        tx.send(NlEvent::Failed(err)).unwrap();
        let (_sig_tx, sig_rx) = futures::channel::mpsc::unbounded();

        let res = event_loop(&mut d, &mut dumper, rx, sig_rx).await;
        let msg = format!("{:#}", res.as_ref().unwrap_err());
        assert!(msg.contains("netlink event socket failed"), "{msg}");

        // the member joined before the failure is still left
        let log = d.log().clone();
        assert!(shutdown_after(&log, d, res).is_err());
        assert_eq!(accel.leaves().len(), 1);
        assert_eq!(accel.calls().last(), Some(&AccelCall::Deinit));
    }

    #[tokio::test]
    async fn test_reader_exit() {
        let mut d = test_daemon(test_config());
        let mut dumper = FakeDump::default();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<NlEvent>();
        drop(tx);
        let (_sig_tx, sig_rx) = futures::channel::mpsc::unbounded();

        let res = event_loop(&mut d, &mut dumper, rx, sig_rx).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_dump_signal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcpad-dump");
        let mut d = test_daemon(Config {
            dump_file: path.display().to_string(),
            ..sourced()
        });
        let mut dumper = FakeDump::default();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(join(IF_LAN1, "239.1.1.1")).unwrap();
        let (sig_tx, sig_rx) = futures::channel::mpsc::unbounded();
        for sig in [SIGHUP, SIGUSR1, SIGQUIT] {
            sig_tx.unbounded_send(sig).unwrap();
        }

        event_loop(&mut d, &mut dumper, rx, sig_rx).await.unwrap();
        let txt = std::fs::read_to_string(&path).unwrap();
        assert!(txt.contains("==== group 239.1.1.1 ===="));
    }
}
