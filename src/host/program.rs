// Author: Dustin Pilgrim
// License: MIT

//! Arbitrary native program as wallpaper. No IPC: readiness is a visible
//! window appearing for the spawned pid, playback control is best-effort
//! nothing.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eventline as el;

use crate::display::WindowId;
use crate::error::RuntimeError;
use crate::host::process::ProcessHost;
use crate::host::Wallpaper;
use crate::ipc::{HostMessage, SeekKind};
use crate::library::{ContentKind, Descriptor};
use crate::model::RuntimeEvent;
use crate::platform;
use crate::settings::PlayerCommand;

pub struct ProgramHost {
    descriptor: Descriptor,
    proc: ProcessHost,
}

impl ProgramHost {
    pub fn new(id: u64, descriptor: Descriptor, events: Sender<RuntimeEvent>) -> ProgramHost {
        ProgramHost {
            descriptor,
            proc: ProcessHost::new(id, "program", events),
        }
    }
}

impl Wallpaper for ProgramHost {
    fn id(&self) -> u64 {
        self.proc.id()
    }

    fn kind(&self) -> ContentKind {
        ContentKind::Program
    }

    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn show(
        &mut self,
        timeout: Duration,
        shutdown: &Arc<AtomicBool>,
    ) -> Result<(), RuntimeError> {
        let command = PlayerCommand {
            program: PathBuf::from(&self.descriptor.source),
            args: self.descriptor.args.clone(),
        };
        self.proc.spawn(&command, &[], false)?;

        let Some(pid) = self.proc.pid() else {
            return Err(RuntimeError::PluginStartFailure { reason: "no pid after spawn".into() });
        };
        let deadline = Instant::now() + timeout;
        loop {
            if shutdown.load(Ordering::Relaxed) {
                self.proc.terminate();
                return Err(RuntimeError::PluginStartFailure {
                    reason: "cancelled during startup".into(),
                });
            }
            if self.proc.exited_now() {
                return Err(RuntimeError::PluginStartFailure {
                    reason: "program exited before showing a window".into(),
                });
            }
            if let Some(window) = platform::find_window_by_pid(pid) {
                self.proc.set_window(window);
                el::debug!(
                    "program host ready instance={} wnd={:#x}",
                    self.proc.id(),
                    window
                );
                return Ok(());
            }
            if Instant::now() >= deadline {
                self.proc.terminate();
                return Err(RuntimeError::PluginStartFailure {
                    reason: format!("no window within {timeout:?}"),
                });
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    // No channel into a foreign program; suspend/volume are no-ops.
    fn pause(&mut self) {}

    fn play(&mut self) {}

    fn set_volume(&mut self, _volume: i32) {}

    fn set_mute(&mut self, _mute: bool) {}

    fn set_playback_pos(&mut self, _value: f32, _kind: SeekKind) {}

    fn screen_capture(&mut self, _path: &Path) -> Result<(), RuntimeError> {
        Err(RuntimeError::HostProtocolError(
            "program hosts do not support capture".into(),
        ))
    }

    fn send(&mut self, _msg: &HostMessage) {}

    fn close(&mut self) {
        // Nothing listens for a protocol close.
        self.proc.terminate();
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
