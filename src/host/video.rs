// Author: Dustin Pilgrim
// License: MIT

//! Video player host. The player connects back over a localhost socket and
//! speaks the same line protocol as the stdio hosts.

use std::io::BufReader;
use std::net::TcpListener;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eventline as el;

use crate::display::WindowId;
use crate::error::RuntimeError;
use crate::host::process::ProcessHost;
use crate::host::{Wallpaper, CAPTURE_TIMEOUT};
use crate::ipc::{HostMessage, SeekKind};
use crate::library::{ContentKind, Descriptor};
use crate::model::RuntimeEvent;
use crate::settings::PlayerCommand;

pub struct VideoHost {
    descriptor: Descriptor,
    player: PlayerCommand,
    proc: ProcessHost,
}

impl VideoHost {
    pub fn new(
        id: u64,
        descriptor: Descriptor,
        player: PlayerCommand,
        events: Sender<RuntimeEvent>,
    ) -> VideoHost {
        VideoHost {
            descriptor,
            player,
            proc: ProcessHost::new(id, "video", events),
        }
    }
}

impl Wallpaper for VideoHost {
    fn id(&self) -> u64 {
        self.proc.id()
    }

    fn kind(&self) -> ContentKind {
        self.descriptor.kind
    }

    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn show(
        &mut self,
        timeout: Duration,
        shutdown: &Arc<AtomicBool>,
    ) -> Result<(), RuntimeError> {
        let deadline = Instant::now() + timeout;

        // Bind first so the port can go on the command line.
        let listener = TcpListener::bind(("127.0.0.1", 0)).map_err(|e| {
            RuntimeError::PluginStartFailure { reason: format!("ipc listener: {e}") }
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| RuntimeError::PluginStartFailure { reason: e.to_string() })?
            .port();
        listener.set_nonblocking(true).map_err(|e| {
            RuntimeError::PluginStartFailure { reason: format!("ipc listener: {e}") }
        })?;

        let mut extra = vec![
            "--ipc-port".to_string(),
            port.to_string(),
            "--file".to_string(),
            self.descriptor.source.clone(),
        ];
        extra.extend(self.descriptor.args.iter().cloned());
        if let Some(props) = &self.descriptor.properties_path {
            extra.push("--properties".into());
            extra.push(props.to_string_lossy().into_owned());
        }

        self.proc.spawn(&self.player, &extra, false)?;

        // Wait for the player to connect back.
        let stream = loop {
            if shutdown.load(std::sync::atomic::Ordering::Relaxed) {
                self.proc.terminate();
                return Err(RuntimeError::PluginStartFailure {
                    reason: "cancelled during startup".into(),
                });
            }
            if self.proc.exited_now() {
                return Err(RuntimeError::PluginStartFailure {
                    reason: "player exited before connecting".into(),
                });
            }
            match listener.accept() {
                Ok((stream, _)) => break stream,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        self.proc.terminate();
                        return Err(RuntimeError::PluginStartFailure {
                            reason: format!("player did not connect within {timeout:?}"),
                        });
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    self.proc.terminate();
                    return Err(RuntimeError::PluginStartFailure {
                        reason: format!("ipc accept: {e}"),
                    });
                }
            }
        };

        let _ = stream.set_nodelay(true);
        let writer = stream.try_clone().map_err(|e| {
            RuntimeError::PluginStartFailure { reason: format!("ipc stream: {e}") }
        })?;
        self.proc
            .adopt_transport(Box::new(writer), Box::new(BufReader::new(stream)));

        let remaining = deadline.saturating_duration_since(Instant::now());
        let window = self.proc.wait_ready(remaining, shutdown)?;
        el::debug!("video host ready instance={} wnd={:#x}", self.proc.id(), window);
        Ok(())
    }

    fn pause(&mut self) {
        self.proc.send(&HostMessage::Suspend);
    }

    fn play(&mut self) {
        self.proc.send(&HostMessage::Resume);
    }

    fn set_volume(&mut self, volume: i32) {
        self.proc.send(&HostMessage::Volume { value: volume.clamp(0, 100) });
    }

    fn set_mute(&mut self, mute: bool) {
        self.proc.send(&HostMessage::Mute { value: mute });
    }

    fn set_playback_pos(&mut self, value: f32, kind: SeekKind) {
        self.proc.send(&HostMessage::PlaybackPos { value, kind });
    }

    fn screen_capture(&mut self, path: &Path) -> Result<(), RuntimeError> {
        self.proc.capture(path, CAPTURE_TIMEOUT)
    }

    fn send(&mut self, msg: &HostMessage) {
        self.proc.send(msg);
    }

    fn close(&mut self) {
        self.proc.close();
    }

    fn terminate(&mut self) {
        self.proc.terminate();
    }

    fn window(&self) -> Option<WindowId> {
        self.proc.window()
    }

    fn input_window(&self) -> Option<WindowId> {
        self.proc.input_window()
    }

    fn pid(&self) -> Option<u32> {
        self.proc.pid()
    }

    fn is_exited(&mut self) -> bool {
        self.proc.exited_now()
    }
}
