// Author: Dustin Pilgrim
// License: MIT

//! OS probe seams. One real backend (the Windows shell); every other
//! platform gets inert stubs and the daemon runs degraded (no wallpaper,
//! control plane still up).

use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::coverage::WindowSnapshot;
use crate::display::{DisplayProvider, WindowId};
use crate::model::RuntimeEvent;
use crate::surface::DesktopSurfaceProvider;

#[cfg(windows)]
pub mod windows;

/// Point-in-time system conditions consulted by the policy engine.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemState {
    pub session_locked: bool,
    pub remote_session: bool,
    pub on_battery: bool,
    pub power_save: bool,
    pub exclusive_screensaver: bool,
    /// An exclusive full-screen 3D application holds the display.
    pub exclusive_fullscreen: bool,
}

pub trait SystemProbe: Send {
    fn state(&self) -> SystemState;
}

pub trait WindowProbe: Send {
    fn foreground(&self) -> Option<WindowSnapshot>;
    /// Visible top-level application windows; shell/desktop windows are
    /// filtered out.
    fn visible_windows(&self) -> Vec<WindowSnapshot>;
    /// Whether a window is the desktop itself (shell root, worker layer,
    /// icon view).
    fn is_desktop(&self, w: &WindowSnapshot) -> bool;
}

pub struct NativeProviders {
    pub surface: Box<dyn DesktopSurfaceProvider>,
    pub displays: Arc<dyn DisplayProvider>,
    pub windows: Box<dyn WindowProbe>,
    pub system: Box<dyn SystemProbe>,
}

#[cfg(windows)]
pub fn native(events: Sender<RuntimeEvent>) -> NativeProviders {
    NativeProviders {
        surface: Box::new(windows::ShellSurfaceProvider::new(events)),
        displays: Arc::new(windows::NativeDisplays),
        windows: Box::new(windows::NativeWindowProbe::new()),
        system: Box::new(windows::NativeSystemProbe),
    }
}

#[cfg(not(windows))]
pub fn native(_events: Sender<RuntimeEvent>) -> NativeProviders {
    NativeProviders {
        surface: Box::new(crate::surface::NullSurfaceProvider),
        displays: Arc::new(NullDisplays),
        windows: Box::new(NullWindowProbe),
        system: Box::new(NullSystemProbe),
    }
}

/// Shell process liveness; None where the probe is meaningless.
pub fn shell_alive() -> Option<bool> {
    #[cfg(windows)]
    {
        Some(windows::shell_alive())
    }
    #[cfg(not(windows))]
    {
        None
    }
}

/// First visible top-level window owned by `pid` (program hosts announce no
/// handle of their own).
pub fn find_window_by_pid(pid: u32) -> Option<WindowId> {
    #[cfg(windows)]
    {
        windows::find_window_by_pid(pid)
    }
    #[cfg(not(windows))]
    {
        let _ = pid;
        None
    }
}

/// Ask the shell to repaint the desktop (after a host dies under it).
pub fn refresh_desktop() {
    #[cfg(windows)]
    windows::refresh_desktop();
}

pub struct NullDisplays;

impl DisplayProvider for NullDisplays {
    fn displays(&self) -> Vec<crate::display::DisplayMonitor> {
        Vec::new()
    }
}

pub struct NullWindowProbe;

impl WindowProbe for NullWindowProbe {
    fn foreground(&self) -> Option<WindowSnapshot> {
        None
    }

    fn visible_windows(&self) -> Vec<WindowSnapshot> {
        Vec::new()
    }

    fn is_desktop(&self, _w: &WindowSnapshot) -> bool {
        false
    }
}

pub struct NullSystemProbe;

impl SystemProbe for NullSystemProbe {
    fn state(&self) -> SystemState {
        SystemState::default()
    }
}
