// Author: Dustin Pilgrim
// License: MIT

//! The contract every wallpaper host implements, plus the factory that
//! builds concrete hosts from a descriptor.

pub mod process;
pub mod program;
pub mod video;
pub mod web;

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use crate::display::WindowId;
use crate::error::RuntimeError;
use crate::ipc::{HostMessage, SeekKind};
use crate::library::{ContentKind, Descriptor};
use crate::model::RuntimeEvent;
use crate::settings::Settings;

pub const SHOW_TIMEOUT: Duration = Duration::from_secs(30);
pub const CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// One running wallpaper host. Control methods are fire-and-forget; only
/// `show`, `screen_capture` and `close` block, each with its own deadline.
pub trait Wallpaper: Send {
    fn id(&self) -> u64;
    fn kind(&self) -> ContentKind;
    fn descriptor(&self) -> &Descriptor;

    /// Start the host and wait for readiness (a discoverable window or an
    /// explicit window_handle message). `shutdown` is observed before any
    /// forced termination so cancellation never orphans the process.
    fn show(&mut self, timeout: Duration, shutdown: &Arc<AtomicBool>)
        -> Result<(), RuntimeError>;

    fn pause(&mut self);
    fn play(&mut self);
    fn set_volume(&mut self, volume: i32);
    fn set_mute(&mut self, mute: bool);
    fn set_playback_pos(&mut self, value: f32, kind: SeekKind);

    fn screen_capture(&mut self, path: &Path) -> Result<(), RuntimeError>;

    /// Forward an arbitrary protocol message (property changes etc).
    fn send(&mut self, msg: &HostMessage);

    /// Graceful shutdown, falling back to termination after a grace period.
    fn close(&mut self);
    /// Forced termination. Safe to call repeatedly; a dead host is not an
    /// error.
    fn terminate(&mut self);

    fn window(&self) -> Option<WindowId>;
    /// Input-forwarding target; differs from `window` for browser hosts.
    fn input_window(&self) -> Option<WindowId>;
    fn pid(&self) -> Option<u32>;
    fn is_exited(&mut self) -> bool;
}

/// Builds hosts. The orchestrator owns one factory; the incrementing id is
/// the per-instance log correlation handle.
pub trait WallpaperFactory: Send {
    fn create(
        &mut self,
        descriptor: &Descriptor,
        settings: &Settings,
        events: Sender<RuntimeEvent>,
    ) -> Result<Box<dyn Wallpaper>, RuntimeError>;
}

#[derive(Default)]
pub struct ProcessFactory {
    counter: u64,
}

impl WallpaperFactory for ProcessFactory {
    fn create(
        &mut self,
        descriptor: &Descriptor,
        settings: &Settings,
        events: Sender<RuntimeEvent>,
    ) -> Result<Box<dyn Wallpaper>, RuntimeError> {
        self.counter += 1;
        let id = self.counter;

        match descriptor.kind {
            ContentKind::Video | ContentKind::Stream => {
                let player = settings
                    .player_for(descriptor.kind)
                    .ok_or(RuntimeError::PluginNotFound { kind: descriptor.kind })?;
                Ok(Box::new(video::VideoHost::new(
                    id,
                    descriptor.clone(),
                    player.clone(),
                    events,
                )))
            }
            ContentKind::Web | ContentKind::Picture => {
                let player = settings
                    .player_for(descriptor.kind)
                    .ok_or(RuntimeError::PluginNotFound { kind: descriptor.kind })?;
                Ok(Box::new(web::WebHost::new(
                    id,
                    descriptor.clone(),
                    player.clone(),
                    events,
                )))
            }
            ContentKind::Program => Ok(Box::new(program::ProgramHost::new(
                id,
                descriptor.clone(),
                events,
            ))),
        }
    }
}
