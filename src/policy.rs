// Author: Dustin Pilgrim
// License: MIT

//! Playback policy engine: a fixed-interval evaluator on its own thread that
//! turns system state and window occlusion into pause/play/volume events.
//! It only ever emits; the orchestrator applies.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use eventline as el;

use crate::coverage::{self, WindowSnapshot};
use crate::display::{DisplayMonitor, DisplayProvider};
use crate::model::{ControlEvent, PlaybackPolicy, RuntimeEvent};
use crate::platform::{SystemProbe, SystemState, WindowProbe};
use crate::settings::{PauseStrategy, Settings};

// ─────────────────────────────────────────────────────────────────────────────
// Deferral gate
// ─────────────────────────────────────────────────────────────────────────────

/// Scoped suspension of policy evaluation. Holding a deferral stops ticks;
/// callers force a play-all themselves on entry so nothing stays frozen
/// while topology is repaired.
pub struct PolicyGate {
    suspended: AtomicUsize,
}

impl PolicyGate {
    pub fn new() -> Arc<PolicyGate> {
        Arc::new(PolicyGate { suspended: AtomicUsize::new(0) })
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst) > 0
    }

    pub fn defer(self: &Arc<Self>) -> PolicyDeferral {
        self.suspended.fetch_add(1, Ordering::SeqCst);
        PolicyDeferral { gate: self.clone() }
    }
}

pub struct PolicyDeferral {
    gate: Arc<PolicyGate>,
}

impl Drop for PolicyDeferral {
    fn drop(&mut self) {
        self.gate.suspended.fetch_sub(1, Ordering::SeqCst);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

pub struct PolicyEngine {
    settings_path: PathBuf,
    displays: Arc<dyn DisplayProvider>,
    windows: Box<dyn WindowProbe>,
    system: Box<dyn SystemProbe>,
    gate: Arc<PolicyGate>,
    events: Sender<RuntimeEvent>,
    shutdown: Arc<AtomicBool>,
}

impl PolicyEngine {
    pub fn new(
        settings_path: PathBuf,
        displays: Arc<dyn DisplayProvider>,
        windows: Box<dyn WindowProbe>,
        system: Box<dyn SystemProbe>,
        gate: Arc<PolicyGate>,
        events: Sender<RuntimeEvent>,
        shutdown: Arc<AtomicBool>,
    ) -> PolicyEngine {
        PolicyEngine { settings_path, displays, windows, system, gate, events, shutdown }
    }

    /// One thread, one tick at a time; a tick can never overlap itself.
    pub fn spawn(self) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("policy".into())
            .spawn(move || self.run())
            .expect("spawn policy thread")
    }

    fn run(self) {
        el::info!("policy engine started");
        loop {
            let settings = Settings::load(&self.settings_path);
            std::thread::sleep(Duration::from_millis(settings.tick_ms.max(100)));

            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            if self.gate.is_suspended() {
                continue;
            }

            for ev in self.tick(&settings) {
                if self.events.send(RuntimeEvent::Control(ev)).is_err() {
                    return;
                }
            }
        }
        el::info!("policy engine stopped");
    }

    fn tick(&self, settings: &Settings) -> Vec<ControlEvent> {
        let sys = self.system.state();
        let displays = self.displays.displays();
        let windows = self.windows.visible_windows();
        let foreground = self.windows.foreground();
        let fg_is_desktop = foreground
            .as_ref()
            .map(|w| self.windows.is_desktop(w))
            .unwrap_or(false);

        evaluate(settings, &sys, &displays, &windows, foreground.as_ref(), fg_is_desktop)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Evaluation
// ─────────────────────────────────────────────────────────────────────────────

fn excluded(settings: &Settings, process: &str) -> bool {
    settings
        .excluded_apps
        .iter()
        .any(|p| p.eq_ignore_ascii_case(process))
}

fn volume_for(settings: &Settings, fg_is_desktop: bool) -> i32 {
    if fg_is_desktop {
        settings.volume
    } else if settings.audio_only_on_desktop {
        0
    } else {
        settings.volume
    }
}

/// One tick's decisions. Pure; every input is a snapshot.
pub fn evaluate(
    settings: &Settings,
    sys: &SystemState,
    displays: &[DisplayMonitor],
    windows: &[WindowSnapshot],
    foreground: Option<&WindowSnapshot>,
    fg_is_desktop: bool,
) -> Vec<ControlEvent> {
    // System-level pause conditions short-circuit window analysis entirely.
    let system_paused = settings.playback == PlaybackPolicy::AlwaysPaused
        || sys.exclusive_screensaver
        || sys.session_locked
        || (sys.remote_session && settings.pause_on_remote)
        || (sys.on_battery && settings.pause_on_battery)
        || (sys.power_save && settings.pause_on_power_save);
    if system_paused {
        return vec![ControlEvent::pause(None)];
    }

    // An excluded application anywhere on screen wins over every coverage
    // signal: play everything at full volume.
    let excluded_visible = windows.iter().any(|w| w.visible && excluded(settings, &w.process))
        || foreground.map(|w| excluded(settings, &w.process)).unwrap_or(false);
    if excluded_visible {
        return vec![
            ControlEvent::play(None),
            ControlEvent::volume(None, settings.volume),
        ];
    }

    let mut out = match settings.strategy {
        PauseStrategy::GameMode => {
            // Only a true exclusive full-screen 3D app pauses.
            if sys.exclusive_fullscreen {
                return vec![ControlEvent::pause(None)];
            }
            vec![ControlEvent::play(None)]
        }

        PauseStrategy::ForegroundWindow => {
            evaluate_foreground(settings, displays, foreground, fg_is_desktop)
        }

        PauseStrategy::AllWindows => displays
            .iter()
            .map(|d| {
                if coverage::any_window_covers(&d.work_area, windows, settings.fullscreen_threshold)
                {
                    ControlEvent::pause(Some(d.device_id.clone()))
                } else {
                    ControlEvent::play(Some(d.device_id.clone()))
                }
            })
            .collect(),

        PauseStrategy::Grid => displays
            .iter()
            .map(|d| {
                if coverage::grid_covered(
                    d,
                    windows,
                    settings.tile_size,
                    settings.grid_uncovered_threshold,
                ) {
                    ControlEvent::pause(Some(d.device_id.clone()))
                } else {
                    ControlEvent::play(Some(d.device_id.clone()))
                }
            })
            .collect(),
    };

    out.push(ControlEvent::volume(None, volume_for(settings, fg_is_desktop)));
    out
}

fn evaluate_foreground(
    settings: &Settings,
    displays: &[DisplayMonitor],
    foreground: Option<&WindowSnapshot>,
    fg_is_desktop: bool,
) -> Vec<ControlEvent> {
    let Some(fg) = foreground else {
        return vec![ControlEvent::play(None)];
    };
    if fg_is_desktop {
        return vec![ControlEvent::play(None)];
    }

    let Some(target) = coverage::dominant_display(&fg.rect, displays) else {
        return vec![ControlEvent::play(None)];
    };

    let covered = coverage::covers(&fg.rect, &target.work_area, settings.fullscreen_threshold);
    if !covered {
        return vec![ControlEvent::play(None)];
    }

    if settings.per_display_pause {
        let mut out = vec![ControlEvent::pause(Some(target.device_id.clone()))];
        out.extend(
            displays
                .iter()
                .filter(|d| d.device_id != target.device_id)
                .map(|d| ControlEvent::play(Some(d.device_id.clone()))),
        );
        out
    } else {
        vec![ControlEvent::pause(None)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::Rect;
    use crate::model::ControlAction;

    fn display(id: &str, x: i32) -> DisplayMonitor {
        DisplayMonitor {
            device_id: id.into(),
            index: 0,
            bounds: Rect::new(x, 0, 1920, 1080),
            work_area: Rect::new(x, 0, 1920, 1080),
            primary: x == 0,
            handle: 0,
        }
    }

    fn win(process: &str, rect: Rect, maximized: bool) -> WindowSnapshot {
        WindowSnapshot {
            id: 10,
            process: process.into(),
            class: "AppWindow".into(),
            rect,
            visible: true,
            maximized,
        }
    }

    fn grid_settings() -> Settings {
        Settings { strategy: PauseStrategy::Grid, ..Settings::default() }
    }

    #[test]
    fn fullscreen_app_pauses_grid_display_in_one_tick() {
        let settings = grid_settings();
        let d = display("DISPLAY1", 0);
        let w = win("game.exe", Rect::new(0, 0, 1920, 1080), true);

        let events = evaluate(
            &settings,
            &SystemState::default(),
            &[d],
            &[w.clone()],
            Some(&w),
            false,
        );
        assert!(events.iter().any(|e| e.action == ControlAction::Pause
            && e.display.as_deref() == Some("DISPLAY1")));
    }

    #[test]
    fn always_paused_skips_window_analysis() {
        let settings = Settings {
            playback: PlaybackPolicy::AlwaysPaused,
            ..grid_settings()
        };
        let events = evaluate(&settings, &SystemState::default(), &[], &[], None, false);
        assert_eq!(events, vec![ControlEvent::pause(None)]);
    }

    #[test]
    fn locked_session_pauses_all() {
        let sys = SystemState { session_locked: true, ..SystemState::default() };
        let events = evaluate(&Settings::default(), &sys, &[], &[], None, false);
        assert_eq!(events, vec![ControlEvent::pause(None)]);
    }

    #[test]
    fn excluded_app_overrides_full_coverage() {
        let mut settings = grid_settings();
        settings.excluded_apps.push("obs64.exe".into());
        let d = display("DISPLAY1", 0);
        let w = win("obs64.exe", Rect::new(0, 0, 1920, 1080), true);

        let events = evaluate(
            &settings,
            &SystemState::default(),
            &[d],
            &[w.clone()],
            Some(&w),
            false,
        );
        assert_eq!(
            events,
            vec![
                ControlEvent::play(None),
                ControlEvent::volume(None, settings.volume)
            ]
        );
    }

    #[test]
    fn foreground_strategy_scopes_pause_per_display() {
        let settings = Settings {
            strategy: PauseStrategy::ForegroundWindow,
            ..Settings::default()
        };
        let displays = [display("DISPLAY1", 0), display("DISPLAY2", 1920)];
        let fg = win("editor.exe", Rect::new(1920, 0, 1920, 1080), false);

        let events = evaluate(
            &settings,
            &SystemState::default(),
            &displays,
            &[fg.clone()],
            Some(&fg),
            false,
        );
        assert!(events.contains(&ControlEvent::pause(Some("DISPLAY2".into()))));
        assert!(events.contains(&ControlEvent::play(Some("DISPLAY1".into()))));
    }

    #[test]
    fn volume_follows_desktop_focus() {
        let settings = Settings::default(); // audio_only_on_desktop = true
        let d = display("DISPLAY1", 0);
        let fg = win("editor.exe", Rect::new(0, 0, 800, 600), false);

        let events = evaluate(
            &settings,
            &SystemState::default(),
            &[d.clone()],
            &[fg.clone()],
            Some(&fg),
            false,
        );
        assert!(events.contains(&ControlEvent::volume(None, 0)));

        let events = evaluate(&settings, &SystemState::default(), &[d], &[], None, true);
        assert!(events.contains(&ControlEvent::volume(None, settings.volume)));
    }

    #[test]
    fn game_mode_only_pauses_on_exclusive_fullscreen() {
        let settings = Settings { strategy: PauseStrategy::GameMode, ..Settings::default() };
        let d = display("DISPLAY1", 0);
        // A maximized window is not an exclusive fullscreen app.
        let w = win("video.exe", Rect::new(0, 0, 1920, 1080), true);

        let events = evaluate(
            &settings,
            &SystemState::default(),
            &[d.clone()],
            &[w.clone()],
            Some(&w),
            false,
        );
        assert!(events.contains(&ControlEvent::play(None)));

        let sys = SystemState { exclusive_fullscreen: true, ..SystemState::default() };
        let events = evaluate(&settings, &sys, &[d], &[w.clone()], Some(&w), false);
        assert_eq!(events, vec![ControlEvent::pause(None)]);
    }

    #[test]
    fn deferral_gate_suspends_and_releases() {
        let gate = PolicyGate::new();
        assert!(!gate.is_suspended());
        {
            let _outer = gate.defer();
            let _inner = gate.defer();
            assert!(gate.is_suspended());
        }
        assert!(!gate.is_suspended());
    }
}
