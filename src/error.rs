// Author: Dustin Pilgrim
// License: MIT

use std::path::PathBuf;

use crate::library::ContentKind;

/// Typed failures surfaced by the runtime. Daemon boundaries wrap these in
/// anyhow; orchestrator entry points catch them, log, and emit notices
/// instead of propagating.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The desktop hosting surface could not be resolved (or was lost and
    /// could not be re-acquired).
    #[error("desktop surface unavailable")]
    SurfaceUnavailable,

    /// No player is configured for the requested content kind.
    #[error("no player configured for {kind:?} content")]
    PluginNotFound { kind: ContentKind },

    /// The player process exited before readiness or sent malformed
    /// readiness data.
    #[error("player failed to start: {reason}")]
    PluginStartFailure { reason: String },

    /// The descriptor's folder or file does not exist.
    #[error("content not found: {path}")]
    ContentNotFound { path: PathBuf },

    /// The target display vanished mid-operation.
    #[error("display not found: {device}")]
    ScreenNotFound { device: String },

    /// A screen capture round-trip did not complete in time.
    #[error("screen capture timed out")]
    CaptureTimeout,

    /// Malformed or unexpected traffic on a host IPC channel.
    #[error("host protocol error: {0}")]
    HostProtocolError(String),
}
