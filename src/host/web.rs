// Author: Dustin Pilgrim
// License: MIT

//! Web/browser player host over stdio. Also carries Picture content (the
//! player renders a static page around the image); captures of passive
//! pictures bypass IPC entirely.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use eventline as el;

use crate::display::WindowId;
use crate::error::RuntimeError;
use crate::host::process::ProcessHost;
use crate::host::{Wallpaper, CAPTURE_TIMEOUT};
use crate::ipc::{HostMessage, SeekKind};
use crate::library::{ContentKind, Descriptor};
use crate::model::RuntimeEvent;
use crate::settings::PlayerCommand;

pub struct WebHost {
    descriptor: Descriptor,
    player: PlayerCommand,
    proc: ProcessHost,
}

impl WebHost {
    pub fn new(
        id: u64,
        descriptor: Descriptor,
        player: PlayerCommand,
        events: Sender<RuntimeEvent>,
    ) -> WebHost {
        WebHost {
            descriptor,
            player,
            proc: ProcessHost::new(id, "web", events),
        }
    }

    /// Direct frame read for passive content: decode the source image and
    /// re-encode it at the capture path. No host round-trip.
    fn capture_direct(&self, path: &Path) -> Result<(), RuntimeError> {
        let img = image::open(Path::new(&self.descriptor.source)).map_err(|e| {
            RuntimeError::HostProtocolError(format!("read source image: {e}"))
        })?;
        img.save(path)
            .map_err(|e| RuntimeError::HostProtocolError(format!("write capture: {e}")))
    }
}

impl Wallpaper for WebHost {
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
        let mut extra = vec!["--url".to_string(), self.descriptor.source.clone()];
        extra.extend(self.descriptor.args.iter().cloned());
        if let Some(props) = &self.descriptor.properties_path {
            extra.push("--properties".into());
            extra.push(props.to_string_lossy().into_owned());
        }

        self.proc.spawn(&self.player, &extra, true)?;
        let window = self.proc.wait_ready(timeout, shutdown)?;
        el::debug!(
            "web host ready instance={} wnd={:#x} input={:#x}",
            self.proc.id(),
            window,
            self.proc.input_window().unwrap_or(0)
        );
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
        if self.descriptor.kind == ContentKind::Picture {
            return self.capture_direct(path);
        }
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
