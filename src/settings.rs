// Author: Dustin Pilgrim
// License: MIT

use std::path::{Path, PathBuf};

use anyhow::Result;
use eventline as el;

use crate::library::ContentKind;
use crate::model::{Arrangement, PlaybackPolicy};

/// Occlusion strategy used by the policy engine when playback is Automatic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseStrategy {
    #[default]
    ForegroundWindow,
    AllWindows,
    Grid,
    GameMode,
}

/// Command line used to launch a player process.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlayerCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Players {
    pub video: Option<PlayerCommand>,
    pub web: Option<PlayerCommand>,
    /// Optional external watchdog helper fed instance pids.
    pub watchdog: Option<PlayerCommand>,
}

/// Runtime configuration, stored as JSON in the state dir. Callers reload it
/// on each decision; nothing caches it beyond one policy tick.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Settings {
    pub arrangement: Arrangement,
    pub playback: PlaybackPolicy,
    pub strategy: PauseStrategy,

    /// Foreground/all-windows full-screen ratio.
    pub fullscreen_threshold: f64,
    pub tile_size: u32,
    /// Grid strategy pauses once uncovered fraction <= this.
    pub grid_uncovered_threshold: f64,

    pub tick_ms: u64,
    /// Pause only the covered display instead of all displays.
    pub per_display_pause: bool,

    pub pause_on_battery: bool,
    pub pause_on_remote: bool,
    pub pause_on_power_save: bool,

    /// Mute everything while the desktop is not foreground.
    pub audio_only_on_desktop: bool,
    /// Global volume, 0..=100.
    pub volume: i32,

    /// Process names whose windows force play + full volume.
    pub excluded_apps: Vec<String>,

    pub players: Players,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            arrangement: Arrangement::default(),
            playback: PlaybackPolicy::default(),
            strategy: PauseStrategy::default(),
            fullscreen_threshold: 0.95,
            tile_size: 50,
            grid_uncovered_threshold: 0.05,
            tick_ms: 500,
            per_display_pause: true,
            pause_on_battery: false,
            pause_on_remote: true,
            pause_on_power_save: true,
            audio_only_on_desktop: true,
            volume: 100,
            excluded_apps: Vec::new(),
            players: Players::default(),
        }
    }
}

impl Settings {
    /// Load from `path`, falling back to defaults on a missing or corrupt
    /// file (a corrupt file is logged, never fatal).
    pub fn load(path: &Path) -> Settings {
        let raw = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(_) => return Settings::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(s) => s,
            Err(e) => {
                el::warn!("settings unreadable path={} err={}", path.display(), e);
                Settings::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let s = serde_json::to_string_pretty(self)?;
        std::fs::write(path, s)?;
        Ok(())
    }

    /// Player command for a content kind. Picture content rides the web
    /// player, streams ride the video player; programs launch themselves.
    pub fn player_for(&self, kind: ContentKind) -> Option<&PlayerCommand> {
        match kind {
            ContentKind::Video | ContentKind::Stream => self.players.video.as_ref(),
            ContentKind::Web | ContentKind::Picture => self.players.web.as_ref(),
            ContentKind::Program => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let s = Settings::default();
        assert_eq!(s.fullscreen_threshold, 0.95);
        assert_eq!(s.tile_size, 50);
        assert_eq!(s.grid_uncovered_threshold, 0.05);
        assert_eq!(s.tick_ms, 500);
        assert_eq!(s.playback, PlaybackPolicy::Automatic);
    }

    #[test]
    fn round_trip_and_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("settings.json");

        let mut s = Settings::default();
        s.strategy = PauseStrategy::Grid;
        s.excluded_apps.push("obs64.exe".into());
        s.save(&p).unwrap();
        assert_eq!(Settings::load(&p), s);

        // Unknown/missing fields fall back to defaults.
        std::fs::write(&p, r#"{"tick_ms": 250}"#).unwrap();
        let s = Settings::load(&p);
        assert_eq!(s.tick_ms, 250);
        assert_eq!(s.tile_size, 50);
    }

    #[test]
    fn missing_file_is_default() {
        assert_eq!(
            Settings::load(Path::new("/nonexistent/fresco/settings.json")),
            Settings::default()
        );
    }
}
