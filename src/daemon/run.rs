// Author: Dustin Pilgrim
// License: MIT

use anyhow::{Context, Result};
use std::fs;
use std::net::TcpListener;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use crate::host::ProcessFactory;
use crate::logrotate::{self, LogPolicy};
use crate::model::RuntimeEvent;
use crate::orchestrator::Orchestrator;
use crate::path::paths;
use crate::platform;
use crate::policy::{PolicyEngine, PolicyGate};
use crate::settings::Settings;
use crate::watchdog::{NullWatchdog, ProcessWatchdog, Watchdog};

use super::client::handle_client;
use super::lock::{lock_path, try_acquire_single_instance_lock};
use super::logging::init_eventline;
use super::watcher::spawn_watcher;

const REAP_INTERVAL: Duration = Duration::from_secs(1);

pub fn run_daemon() -> Result<()> {
    let p = paths()?;

    fs::create_dir_all(&p.state_dir).context("create state dir")?;
    fs::create_dir_all(&p.runtime_dir).context("create runtime dir")?;

    // ─────────────────────────────────────────────────────────────────────────
    // SINGLE INSTANCE ENFORCEMENT
    // ─────────────────────────────────────────────────────────────────────────
    // Acquire lock BEFORE touching the port file so we never clobber a live
    // daemon's control endpoint.
    let lock_file_path = lock_path(&p.runtime_dir);
    let _lock = match try_acquire_single_instance_lock(&lock_file_path)? {
        Some(f) => f, // keep alive for lifetime
        None => {
            // eventline console is disabled, so print directly.
            eprintln!("fresco: another instance is already running.");
            return Ok(());
        }
    };
    // ─────────────────────────────────────────────────────────────────────────

    // Rotate/prepare the SINGLE canonical log file *before* eventline opens it.
    let had_existing = logrotate::prepare_log_file(&p.log_path, LogPolicy::default())
        .with_context(|| format!("prepare_log_file: {}", p.log_path.display()))?;

    // If the log already existed and wasn't rotated, insert ONE literal blank line
    // between daemon runs. This is intentionally raw, not an eventline record.
    if had_existing {
        logrotate::write_raw_blank_line(&p.log_path)
            .with_context(|| format!("write blank line: {}", p.log_path.display()))?;
    }

    init_eventline(&p.log_path)?;

    // Write a run header using eventline (eventline is the ONLY logging).
    eventline::info!("{}", logrotate::run_header());

    // Shared shutdown flag for the watcher, the policy engine and host
    // readiness waits.
    let shutdown_flag = Arc::new(AtomicBool::new(false));

    // The single-consumer runtime channel. Everything asynchronous (policy
    // decisions, host exits, surface loss, topology polls) lands here and is
    // drained on this thread only.
    let (events_tx, events_rx) = mpsc::channel::<RuntimeEvent>();

    eventline::scope!(
        "fresco.daemon",
        success = "exiting",
        failure = "crashed",
        aborted = "aborted",
        {
            eventline::info!(
                "startup port_file={} settings={} layout={} runtime_dir={} state_dir={} log={}",
                p.port_path.display(),
                p.settings_path.display(),
                p.layout_path.display(),
                p.runtime_dir.display(),
                p.state_dir.display(),
                p.log_path.display(),
            );

            // Remove stale port file (safe: we hold the lock)
            if p.port_path.exists() {
                let _ = fs::remove_file(&p.port_path);
            }

            let listener =
                TcpListener::bind(("127.0.0.1", 0)).context("bind control listener")?;
            let port = listener.local_addr().context("control listener addr")?.port();
            fs::write(&p.port_path, port.to_string()).context("write ctl.port")?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(&p.port_path, fs::Permissions::from_mode(0o600));
            }

            // Make accept loop stoppable and interleavable with the event
            // channel.
            listener
                .set_nonblocking(true)
                .context("set_nonblocking on control listener")?;

            let providers = platform::native(events_tx.clone());
            let displays = providers.displays.clone();
            let gate = PolicyGate::new();

            let watchdog: Box<dyn Watchdog> =
                match Settings::load(&p.settings_path).players.watchdog {
                    Some(cmd) => Box::new(ProcessWatchdog::new(cmd)),
                    None => Box::new(NullWatchdog),
                };

            let mut orch = Orchestrator::new(
                providers.surface,
                displays.clone(),
                Box::new(ProcessFactory::default()),
                watchdog,
                gate.clone(),
                events_tx.clone(),
                shutdown_flag.clone(),
                p.settings_path.clone(),
                p.layout_path.clone(),
            );

            // Resolve the desktop surface up front so the first set is not
            // the first discovery.
            let _ = eventline::scope!(
                "fresco.surface.warmup",
                success = "ready",
                failure = "skipped",
                aborted = "aborted",
                {
                    if !orch.warm_surface() {
                        eventline::warn!("no desktop surface yet; running degraded");
                    }
                    Ok::<(), anyhow::Error>(())
                }
            );

            // Try to restore the cached layout
            let _ = eventline::scope!(
                "fresco.daemon.restore_cached",
                success = "done",
                failure = "failed",
                aborted = "aborted",
                {
                    orch.restore_wallpaper();
                    Ok::<(), anyhow::Error>(())
                }
            );

            let _policy = PolicyEngine::new(
                p.settings_path.clone(),
                displays.clone(),
                providers.windows,
                providers.system,
                gate.clone(),
                events_tx.clone(),
                shutdown_flag.clone(),
            )
            .spawn();

            spawn_watcher(displays.clone(), events_tx.clone(), shutdown_flag.clone());

            let mut last_reap = Instant::now();

            loop {
                if shutdown_flag.load(Ordering::Relaxed) {
                    eventline::info!("shutdown flagged; exiting daemon loop");
                    break;
                }

                // Serialized drain: every mutation funnels through here.
                while let Ok(ev) = events_rx.try_recv() {
                    orch.handle_event(ev);
                }

                if last_reap.elapsed() >= REAP_INTERVAL {
                    orch.reap_exited();
                    last_reap = Instant::now();
                }

                match listener.accept() {
                    Ok((mut stream, addr)) => {
                        let peer = addr.to_string();

                        // Allow long-running set operations.
                        let _ = stream.set_read_timeout(Some(Duration::from_secs(120)));
                        let _ = stream.set_write_timeout(Some(Duration::from_secs(120)));

                        let res: Result<bool> = eventline::scope!(
                            "fresco.daemon.client",
                            success = "done",
                            failure = "error",
                            aborted = "aborted",
                            {
                                eventline::debug!("client connected peer={}", peer);
                                let should_exit =
                                    handle_client(&mut stream, &mut orch, &displays, &p)?;
                                Ok::<bool, anyhow::Error>(should_exit)
                            }
                        );

                        match res {
                            Ok(true) => {
                                eventline::info!("shutdown requested; exiting daemon loop");
                                shutdown_flag.store(true, Ordering::Relaxed);
                                break;
                            }
                            Ok(false) => {}
                            Err(e) => {
                                if super::utils::is_client_disconnect(&e) {
                                    eventline::warn!(
                                        "client disconnected peer={} err={}",
                                        peer,
                                        super::utils::root_io_msg(&e)
                                    );
                                } else {
                                    eventline::error!("client error peer={} err={:#}", peer, e);
                                }
                            }
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        // Nothing to accept; block briefly on the event
                        // channel so the loop stays responsive both ways.
                        match events_rx.recv_timeout(Duration::from_millis(100)) {
                            Ok(ev) => orch.handle_event(ev),
                            Err(RecvTimeoutError::Timeout) => {}
                            Err(RecvTimeoutError::Disconnected) => {
                                eventline::error!("runtime channel closed; exiting");
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        eventline::error!("accept error err={}", e);
                        std::thread::sleep(Duration::from_millis(200));
                    }
                }
            }

            // Best effort: stop wallpapers when we exit.
            shutdown_flag.store(true, Ordering::Relaxed);
            let _ = orch.close_all();

            let _ = fs::remove_file(&p.port_path);
            eventline::info!("daemon exiting");

            Ok::<(), anyhow::Error>(())
        }
    )?;

    Ok(())
}
