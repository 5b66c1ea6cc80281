//! garakd: keeps the active MPRIS player mirrored into a JSON state file for
//! status bars, and accepts play-pause/next/previous/set-position over a Unix socket.
//!
//! Notes:
//! - The controller owns one OS thread and applies events strictly in order.
//! - Bus I/O, timers and signal handling live on the tokio runtime.

#![deny(unsafe_code)]

use std::{sync::Arc, thread};

use anyhow::{Context, Result};
use garak::{
    config::{self, Config},
    controller::PlayerController,
    dbus::{Bus, DbusDirectory},
    ipc,
    output::{StateView, StateWriter},
    remote::ControllerEvent,
    schedule::TokioScheduler,
};
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::mpsc,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if std::env::var_os("GARAK_DEBUG").is_some() {
            EnvFilter::new("debug")
        } else {
            EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn wait_for_shutdown() -> Result<()> {
    let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut hup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("waiting for SIGINT")?;
                return Ok(());
            }
            _ = term.recv() => return Ok(()),
            _ = hup.recv() => info!("SIGHUP received, ignoring"),
        }
    }
}

fn main() -> Result<()> {
    let path = config::default_path();
    let cfg = Config::load(&path).with_context(|| format!("loading {}", path.display()))?;
    init_logging(&cfg.logging.level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let handle = runtime.handle().clone();

    let (event_tx, event_rx) = mpsc::unbounded_channel::<ControllerEvent>();

    // An unreachable bus is not fatal: the controller just stays empty.
    let bus = match runtime.block_on(Bus::session(handle.clone(), cfg.timing.call_timeout())) {
        Ok(bus) => Some(bus),
        Err(err) => {
            warn!(%err, "session bus unavailable");
            None
        }
    };

    let writer = StateWriter::new(
        cfg.output.snapshot_path(),
        cfg.output.events_path(),
        cfg.output.pretty_snapshot,
    );
    writer
        .ensure_dirs()
        .context("creating output directories")?;

    let controller = PlayerController::new(
        Box::new(DbusDirectory::new(bus)),
        Arc::new(TokioScheduler::new(handle.clone(), event_tx.clone())),
        event_tx.clone(),
        cfg.timing.timing(),
    );
    if let Err(err) = writer.write_snapshot(&StateView::capture(&controller)) {
        warn!(%err, "failed to write initial snapshot");
    }

    let controller_thread = thread::Builder::new()
        .name("garak-controller".into())
        .spawn(move || {
            controller.run(event_rx, |controller, note| {
                if let Err(err) = writer.write(note, &StateView::capture(controller)) {
                    warn!(%err, "failed to write state");
                }
            });
        })
        .context("spawning controller thread")?;

    let ipc_tx = event_tx.clone();
    thread::Builder::new()
        .name("garak-ipc".into())
        .spawn(move || {
            if let Err(err) = ipc::serve(&ipc::socket_path(), &ipc_tx) {
                warn!(%err, "ipc server stopped");
            }
        })
        .context("spawning ipc thread")?;

    info!("garakd running");
    runtime.block_on(wait_for_shutdown())?;
    info!("shutting down");

    let _ = event_tx.send(ControllerEvent::Shutdown);
    if controller_thread.join().is_err() {
        warn!("controller thread panicked");
    }
    let _ = std::fs::remove_file(ipc::socket_path());
    runtime.shutdown_background();
    Ok(())
}
