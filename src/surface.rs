// Author: Dustin Pilgrim
// License: MIT

use crate::display::{Rect, WindowId};
use crate::error::RuntimeError;

/// Native handles of the desktop hosting surface. Rebuilt on every recovery,
/// never persisted.
#[derive(Clone, Copy, Debug, Default)]
pub struct DesktopSurfaceHandle {
    /// Shell root ("program manager" window).
    pub progman: WindowId,
    /// Worker surface wallpaper windows are parented under.
    pub worker: WindowId,
    /// Icon-layer window (shell view). Parent target in layered-shell mode.
    pub shell_view: WindowId,
    /// True when the shell draws icons in a transparent child over a
    /// non-redirected root; changes the parenting target and recovery path.
    pub layered_shell: bool,
    /// Foreground-window baseline meaning "cursor is over the bare desktop".
    pub desktop_foreground: WindowId,
}

/// Access to the OS desktop hosting surface. One concrete backend per
/// platform; surface loss is delivered as RuntimeEvent::SurfaceLost on the
/// runtime channel, not through this trait.
pub trait DesktopSurfaceProvider: Send {
    /// Run the discovery sequence and install the destroy hook. Idempotent;
    /// returns the resolved handle set.
    fn resolve(&mut self) -> Result<DesktopSurfaceHandle, RuntimeError>;

    fn current(&self) -> Option<DesktopSurfaceHandle>;

    /// Liveness check of the resolved worker surface. Never assume validity
    /// across operations without calling this.
    fn is_valid(&self) -> bool;

    /// Drop the cached handles so the next resolve starts from scratch.
    fn invalidate(&mut self);

    /// Reparent `window` under the hosting surface and place it at `rect`
    /// (global display coordinates; the backend maps into surface space and
    /// re-applies the rectangle after reparenting).
    fn attach(&mut self, window: WindowId, rect: Rect) -> Result<(), RuntimeError>;

    /// Re-place an already attached window.
    fn reposition(&mut self, window: WindowId, rect: Rect) -> Result<(), RuntimeError>;

    /// Return a window to the normal desktop, best effort.
    fn detach(&mut self, window: WindowId);
}

/// Backend for platforms without a shell surface: resolution always fails
/// and the daemon runs in the degraded no-wallpaper state.
pub struct NullSurfaceProvider;

impl DesktopSurfaceProvider for NullSurfaceProvider {
    fn resolve(&mut self) -> Result<DesktopSurfaceHandle, RuntimeError> {
        Err(RuntimeError::SurfaceUnavailable)
    }

    fn current(&self) -> Option<DesktopSurfaceHandle> {
        None
    }

    fn is_valid(&self) -> bool {
        false
    }

    fn invalidate(&mut self) {}

    fn attach(&mut self, _window: WindowId, _rect: Rect) -> Result<(), RuntimeError> {
        Err(RuntimeError::SurfaceUnavailable)
    }

    fn reposition(&mut self, _window: WindowId, _rect: Rect) -> Result<(), RuntimeError> {
        Err(RuntimeError::SurfaceUnavailable)
    }

    fn detach(&mut self, _window: WindowId) {}
}
