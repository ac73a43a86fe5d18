// Author: Dustin Pilgrim
// License: MIT

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader};
use std::net::TcpStream;
use std::sync::Arc;

use crate::display::DisplayProvider;
use crate::orchestrator::Orchestrator;
use crate::path::Paths;
use crate::platform;
use crate::protocol::{DoctorCheck, InstanceStatus, Request, Response, RuntimeStatus};
use crate::settings::Settings;

use super::utils::write_resp;

/// Handle one control client: a single JSON line request, a single JSON line
/// response. Returns true when the daemon should exit.
pub fn handle_client(
    stream: &mut TcpStream,
    orch: &mut Orchestrator,
    displays: &Arc<dyn DisplayProvider>,
    paths: &Paths,
) -> Result<bool> {
    // Read exactly one JSON line request, then drop the reader before writing.
    let req: Request = {
        let mut line = String::new();
        let n = {
            let mut reader = BufReader::new(&mut *stream);
            reader.read_line(&mut line).context("read request line")?
        };

        // EOF: client connected but sent nothing (or closed immediately). Not an error.
        if n == 0 {
            return Ok(false);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(false);
        }

        serde_json::from_str(trimmed).context("parse request json")?
    };

    match req {
        Request::Set { content, display } => {
            eventline::scope!(
                "fresco.request.set",
                success = "ok",
                failure = "failed",
                aborted = "aborted",
                {
                    eventline::info!(
                        "set request content={} display={:?}",
                        content.display(),
                        display
                    );

                    match orch.set_wallpaper(&content, display.as_deref()) {
                        Ok(_) => {
                            write_resp(stream, Response::Ok)?;
                        }
                        Err(e) => {
                            write_resp(stream, Response::Error { message: e.to_string() })?;
                        }
                    }

                    Ok::<(), anyhow::Error>(())
                }
            )?;
        }

        Request::Close { display } => {
            let target = display.clone().unwrap_or_else(|| "(all)".into());

            eventline::scope!(
                "fresco.request.close",
                success = "ok",
                failure = "failed",
                aborted = "aborted",
                {
                    eventline::info!("close request display={}", target);

                    let closed = match display.as_deref() {
                        Some(dev) => orch.close_display(dev),
                        None => orch.close_all(),
                    };
                    eventline::info!("close done display={} closed={}", target, closed);

                    write_resp(stream, Response::Ok)?;
                    Ok::<(), anyhow::Error>(())
                }
            )?;
        }

        Request::Restart { display } => {
            eventline::scope!(
                "fresco.request.restart",
                success = "ok",
                failure = "failed",
                aborted = "aborted",
                {
                    match orch.restart_wallpaper(display.as_deref()) {
                        Ok(_) => write_resp(stream, Response::Ok)?,
                        Err(e) => {
                            write_resp(stream, Response::Error { message: e.to_string() })?
                        }
                    }
                    Ok::<(), anyhow::Error>(())
                }
            )?;
        }

        Request::Reset => {
            eventline::scope!(
                "fresco.request.reset",
                success = "ok",
                failure = "failed",
                aborted = "aborted",
                {
                    match orch.reset_wallpaper() {
                        Ok(_) => write_resp(stream, Response::Ok)?,
                        Err(e) => {
                            write_resp(stream, Response::Error { message: e.to_string() })?
                        }
                    }
                    Ok::<(), anyhow::Error>(())
                }
            )?;
        }

        Request::Send { content, display, message } => {
            let sent = orch.send_message(&content, display.as_deref(), &message);
            eventline::debug!(
                "send request content={} sent_to={}",
                content.display(),
                sent
            );
            if sent > 0 {
                write_resp(stream, Response::Ok)?;
            } else {
                write_resp(
                    stream,
                    Response::Error { message: "no matching instance".into() },
                )?;
            }
        }

        Request::Capture { content, path } => {
            eventline::scope!(
                "fresco.request.capture",
                success = "ok",
                failure = "failed",
                aborted = "aborted",
                {
                    match orch.screen_capture(&content, &path) {
                        Ok(_) => write_resp(stream, Response::Ok)?,
                        Err(e) => {
                            write_resp(stream, Response::Error { message: e.to_string() })?
                        }
                    }
                    Ok::<(), anyhow::Error>(())
                }
            )?;
        }

        Request::Status => {
            let settings = Settings::load(&paths.settings_path);
            let instances = orch
                .instances()
                .iter()
                .map(|i| InstanceStatus {
                    id: i.id,
                    content: i.host.descriptor().origin.clone(),
                    kind: i.host.descriptor().kind,
                    title: i.host.descriptor().title.clone(),
                    display: i.display.as_ref().map(|d| d.device_id.clone()),
                    state: i.state,
                    pid: i.host.pid(),
                })
                .collect::<Vec<_>>();

            eventline::debug!("status request instances={}", instances.len());

            write_resp(
                stream,
                Response::Status {
                    status: RuntimeStatus {
                        arrangement: settings.arrangement,
                        playback: settings.playback,
                        instances,
                        disconnected: orch
                            .disconnected()
                            .iter()
                            .map(|e| e.device_id.clone())
                            .collect(),
                    },
                },
            )?;
        }

        Request::Doctor => {
            eventline::scope!(
                "fresco.request.doctor",
                success = "ok",
                failure = "failed",
                aborted = "aborted",
                {
                    let checks = doctor_checks(displays, paths);
                    write_resp(stream, Response::Doctor { checks })?;
                    Ok::<(), anyhow::Error>(())
                }
            )?;
        }

        Request::Stop => {
            eventline::scope!(
                "fresco.request.stop",
                success = "stopped",
                failure = "failed",
                aborted = "aborted",
                {
                    eventline::info!("stop request");

                    // Best effort: close wallpapers, keep the layout for the
                    // next run's restore.
                    let _ = orch.close_all();

                    // Reply first so client doesn't see connection reset.
                    write_resp(stream, Response::Ok)?;

                    Ok::<(), anyhow::Error>(())
                }
            )?;

            return Ok(true);
        }
    }

    Ok(false)
}

fn doctor_checks(displays: &Arc<dyn DisplayProvider>, paths: &Paths) -> Vec<DoctorCheck> {
    let settings = Settings::load(&paths.settings_path);
    let display_count = displays.displays().len();
    let shell = platform::shell_alive();

    let mut checks = Vec::new();
    checks.push(DoctorCheck {
        name: "desktop shell".into(),
        ok: shell.unwrap_or(false),
        detail: match shell {
            Some(true) => "found".into(),
            Some(false) => "not found".into(),
            None => "no shell backend on this platform".into(),
        },
    });
    checks.push(DoctorCheck {
        name: "display count".into(),
        ok: display_count > 0,
        detail: format!("seen: {display_count}"),
    });
    checks.push(DoctorCheck {
        name: "video player configured".into(),
        ok: settings
            .players
            .video
            .as_ref()
            .map(|p| p.program.exists())
            .unwrap_or(false),
        detail: settings
            .players
            .video
            .as_ref()
            .map(|p| p.program.display().to_string())
            .unwrap_or_else(|| "unset".into()),
    });
    checks.push(DoctorCheck {
        name: "web player configured".into(),
        ok: settings
            .players
            .web
            .as_ref()
            .map(|p| p.program.exists())
            .unwrap_or(false),
        detail: settings
            .players
            .web
            .as_ref()
            .map(|p| p.program.display().to_string())
            .unwrap_or_else(|| "unset".into()),
    });
    checks.push(DoctorCheck {
        name: "state dir writable".into(),
        ok: std::fs::create_dir_all(&paths.state_dir).is_ok(),
        detail: paths.state_dir.display().to_string(),
    });
    checks
}
