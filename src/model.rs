// Author: Dustin Pilgrim
// License: MIT

use crate::display::WindowId;

/// How wallpapers map onto displays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arrangement {
    /// One instance per display, each possibly different content.
    #[default]
    PerDisplay,
    /// Exactly one instance stretched across the union of all displays.
    Span,
    /// One instance per display, all showing the same content.
    Duplicate,
}

/// Global playback override. Automatic delegates to the policy engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPolicy {
    #[default]
    Automatic,
    AlwaysPaused,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Pause,
    Play,
    SetVolume,
}

/// Ephemeral playback decision. `display` of None targets every instance.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ControlEvent {
    pub action: ControlAction,
    pub display: Option<String>,
    pub volume: Option<i32>,
}

impl ControlEvent {
    pub fn pause(display: Option<String>) -> ControlEvent {
        ControlEvent { action: ControlAction::Pause, display, volume: None }
    }

    pub fn play(display: Option<String>) -> ControlEvent {
        ControlEvent { action: ControlAction::Play, display, volume: None }
    }

    pub fn volume(display: Option<String>, volume: i32) -> ControlEvent {
        ControlEvent { action: ControlAction::SetVolume, display, volume: Some(volume) }
    }
}

/// Instance lifecycle as tracked by the orchestrator. Creating is never
/// re-entered; Exited and Disposed are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Creating,
    Showing,
    Attached,
    Playing,
    Paused,
    Exited,
    Disposed,
}

impl InstanceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceState::Exited | InstanceState::Disposed)
    }
}

/// Events produced by host readers, platform hooks, the policy engine and
/// the watcher; drained by the daemon control loop. Producers never touch
/// orchestrator state directly.
#[derive(Debug)]
pub enum RuntimeEvent {
    Control(ControlEvent),
    Host(HostEvent),
    SurfaceLost,
    DisplayChange,
}

#[derive(Debug)]
pub enum HostEvent {
    Loaded { id: u64, window: WindowId },
    Exited { id: u64 },
    Console { id: u64, level: String, message: String },
}

/// Observer notifications for external collaborators (UI, transport layer).
#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    Changed,
    Reset,
    Error { message: String },
}
