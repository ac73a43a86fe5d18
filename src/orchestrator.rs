// Author: Dustin Pilgrim
// License: MIT

//! Owns the set of running wallpaper instances. Every mutating operation
//! runs on the daemon control loop, so at most one is in flight at a time;
//! producers reach this code only through the runtime event channel.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eventline as el;

use crate::display::{DisplayMonitor, DisplayProvider, Rect};
use crate::error::RuntimeError;
use crate::host::{Wallpaper, WallpaperFactory, SHOW_TIMEOUT};
use crate::ipc::{HostMessage, SeekKind};
use crate::library::{self, ContentKind, Descriptor};
use crate::model::{
    Arrangement, ControlAction, ControlEvent, HostEvent, InstanceState, Notice, RuntimeEvent,
};
use crate::daemon::state::{self, Layout, LayoutEntry};
use crate::platform;
use crate::policy::PolicyGate;
use crate::settings::Settings;
use crate::surface::DesktopSurfaceProvider;
use crate::watchdog::Watchdog;

const SURFACE_RETRY_DELAY: Duration = Duration::from_millis(500);
/// Shell losses inside this window count toward a crash storm.
const CRASH_WINDOW: Duration = Duration::from_secs(30);
const CRASH_LIMIT: usize = 3;

pub struct Instance {
    pub id: u64,
    pub host: Box<dyn Wallpaper>,
    /// None binds the instance to the span (union) area.
    pub display: Option<DisplayMonitor>,
    pub state: InstanceState,
    pub muted: bool,
}

impl Instance {
    fn transition(&mut self, to: InstanceState) {
        // Terminal states stick; Creating is never re-entered.
        if self.state.is_terminal() || to == InstanceState::Creating {
            return;
        }
        el::debug!("instance {} {:?} -> {:?}", self.id, self.state, to);
        self.state = to;
    }

    fn matches_display(&self, device_id: &str) -> bool {
        match &self.display {
            Some(d) => d.device_id == device_id,
            // Span instances cover every display.
            None => true,
        }
    }
}

/// (display, content) pair kept while its display is unplugged.
#[derive(Clone, Debug, PartialEq)]
pub struct DisconnectedEntry {
    pub device_id: String,
    pub content: PathBuf,
}

pub struct Orchestrator {
    surface: Box<dyn DesktopSurfaceProvider>,
    displays: Arc<dyn DisplayProvider>,
    factory: Box<dyn WallpaperFactory>,
    watchdog: Box<dyn Watchdog>,
    gate: Arc<PolicyGate>,
    events: Sender<RuntimeEvent>,
    shutdown: Arc<AtomicBool>,
    settings_path: PathBuf,
    layout_path: PathBuf,

    instances: Vec<Instance>,
    disconnected: Vec<DisconnectedEntry>,
    surface_losses: VecDeque<Instant>,
    notices: Option<Sender<Notice>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        surface: Box<dyn DesktopSurfaceProvider>,
        displays: Arc<dyn DisplayProvider>,
        factory: Box<dyn WallpaperFactory>,
        watchdog: Box<dyn Watchdog>,
        gate: Arc<PolicyGate>,
        events: Sender<RuntimeEvent>,
        shutdown: Arc<AtomicBool>,
        settings_path: PathBuf,
        layout_path: PathBuf,
    ) -> Orchestrator {
        Orchestrator {
            surface,
            displays,
            factory,
            watchdog,
            gate,
            events,
            shutdown,
            settings_path,
            layout_path,
            instances: Vec::new(),
            disconnected: Vec::new(),
            surface_losses: VecDeque::new(),
            notices: None,
        }
    }

    /// Single observer for changed/error/reset notifications.
    pub fn set_notice_sink(&mut self, sink: Sender<Notice>) {
        self.notices = Some(sink);
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn disconnected(&self) -> &[DisconnectedEntry] {
        &self.disconnected
    }

    fn notify(&mut self, notice: Notice) {
        el::debug!("notice {:?}", notice);
        if let Some(sink) = &self.notices {
            let _ = sink.send(notice);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Set / close / restart / reset / restore
    // ─────────────────────────────────────────────────────────────────────

    /// Resolve content and apply it under the current arrangement. Errors
    /// are returned for the caller's response AND surfaced as notices; a
    /// "changed" notice follows even on failure so observers re-sync.
    pub fn set_wallpaper(
        &mut self,
        content: &Path,
        display: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let result = self.set_wallpaper_inner(content, display);
        if let Err(e) = &result {
            el::error!("set failed content={} err={}", content.display(), e);
            self.notify(Notice::Error { message: e.to_string() });
        }
        self.notify(Notice::Changed);
        result
    }

    fn set_wallpaper_inner(
        &mut self,
        content: &Path,
        display: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let settings = Settings::load(&self.settings_path);
        let descriptor = library::resolve(content)?;
        self.ensure_surface()?;

        el::info!(
            "set content={} kind={:?} display={} arrangement={:?}",
            content.display(),
            descriptor.kind,
            display.unwrap_or("(default)"),
            settings.arrangement
        );

        match settings.arrangement {
            Arrangement::PerDisplay => {
                let target = self.resolve_display(display)?;
                let device = target.device_id.clone();
                self.close_where(|i| i.matches_display(&device), false);

                let inst =
                    self.launch(&descriptor, Some(target.clone()), target.bounds, &settings)?;
                self.instances.push(inst);
            }

            Arrangement::Span => {
                self.close_where(|_| true, false);
                let rect = self.displays.virtual_bounds();
                let inst = self.launch(&descriptor, None, rect, &settings)?;
                self.instances.push(inst);
            }

            Arrangement::Duplicate => {
                self.close_where(|_| true, false);
                let displays = self.displays.displays();
                if displays.is_empty() {
                    return Err(RuntimeError::ScreenNotFound { device: "(any)".into() });
                }

                let mut created: Vec<Instance> = Vec::new();
                for d in &displays {
                    match self.launch(&descriptor, Some(d.clone()), d.bounds, &settings) {
                        Ok(inst) => created.push(inst),
                        Err(e) => {
                            for inst in &mut created {
                                self.dispose(inst);
                            }
                            return Err(e);
                        }
                    }
                }

                // Duplicates stay in sync: one audible copy, everyone
                // rewound to the start together.
                for inst in &mut created {
                    let primary = inst.display.as_ref().map(|d| d.primary).unwrap_or(false);
                    if !primary {
                        inst.host.set_mute(true);
                        inst.muted = true;
                    }
                    inst.host.set_playback_pos(0.0, SeekKind::AbsolutePercent);
                }
                self.instances.extend(created);
            }
        }

        self.save_layout(&settings);
        Ok(())
    }

    pub fn close_all(&mut self) -> usize {
        let n = self.close_where(|_| true, true);
        self.persist_current_layout();
        n
    }

    pub fn close_display(&mut self, device_id: &str) -> usize {
        let device = device_id.to_string();
        let n = self.close_where(|i| i.matches_display(&device), true);
        self.persist_current_layout();
        n
    }

    pub fn close_content(&mut self, content: &Path) -> usize {
        let content = content.to_path_buf();
        let n = self.close_where(|i| i.host.descriptor().origin == content, true);
        self.persist_current_layout();
        n
    }

    pub fn close_kind(&mut self, kind: ContentKind) -> usize {
        let n = self.close_where(|i| i.host.descriptor().kind == kind, true);
        self.persist_current_layout();
        n
    }

    /// Close matching instances. Notification can be suppressed when the
    /// close precedes a replacing operation.
    fn close_where<F: Fn(&Instance) -> bool>(&mut self, pred: F, notify: bool) -> usize {
        let mut closed = 0;
        let mut i = 0;
        while i < self.instances.len() {
            if pred(&self.instances[i]) {
                let mut inst = self.instances.remove(i);
                self.dispose(&mut inst);
                closed += 1;
            } else {
                i += 1;
            }
        }
        if closed > 0 {
            el::info!("closed {} instance(s)", closed);
            if notify {
                self.notify(Notice::Changed);
            }
        }
        closed
    }

    fn dispose(&mut self, inst: &mut Instance) {
        if let Some(pid) = inst.host.pid() {
            self.watchdog.unregister(pid);
        }
        if let Some(window) = inst.host.window() {
            self.surface.detach(window);
        }
        inst.host.close();
        inst.transition(InstanceState::Disposed);
    }

    /// Snapshot, close and re-set: the recoverable-failure path.
    pub fn restart_wallpaper(&mut self, display: Option<&str>) -> Result<(), RuntimeError> {
        let snapshot = self.snapshot_pairs(display);
        match display {
            Some(dev) => {
                let device = dev.to_string();
                self.close_where(|i| i.matches_display(&device), false);
            }
            None => {
                self.close_where(|_| true, false);
            }
        }

        let mut first_err = None;
        for (content, device) in snapshot {
            if let Err(e) = self.set_wallpaper_inner(&content, device.as_deref()) {
                el::error!("restart set failed content={} err={}", content.display(), e);
                first_err.get_or_insert(e);
            }
        }
        self.notify(Notice::Changed);
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Full recovery: tear everything down, rebuild the desktop surface,
    /// replay the snapshot.
    pub fn reset_wallpaper(&mut self) -> Result<(), RuntimeError> {
        let _defer = self.gate.defer();
        self.play_all();

        let snapshot = self.snapshot_pairs(None);
        self.close_where(|_| true, false);

        self.surface.invalidate();
        if let Err(e) = self.ensure_surface() {
            // Degraded: keep serving, no wallpaper until the shell returns.
            el::error!("surface rebuild failed err={}", e);
            self.notify(Notice::Error { message: e.to_string() });
            self.notify(Notice::Changed);
            return Err(e);
        }

        for (content, device) in snapshot {
            if let Err(e) = self.set_wallpaper_inner(&content, device.as_deref()) {
                el::error!("reset set failed content={} err={}", content.display(), e);
            }
        }

        self.notify(Notice::Reset);
        self.notify(Notice::Changed);
        Ok(())
    }

    /// Replay the persisted layout at startup. Span/Duplicate replay only
    /// the first entry; PerDisplay replays each pair, queueing entries whose
    /// display is missing.
    pub fn restore_wallpaper(&mut self) {
        let Some(layout) = state::load_layout(&self.layout_path) else {
            el::debug!("no layout to restore");
            return;
        };
        el::info!(
            "restoring layout arrangement={:?} entries={}",
            layout.arrangement,
            layout.entries.len()
        );

        match layout.arrangement {
            Arrangement::Span | Arrangement::Duplicate => {
                if let Some(first) = layout.entries.first() {
                    let _ = self.set_wallpaper(&first.content, None);
                }
            }
            Arrangement::PerDisplay => {
                let topology = self.displays.displays();
                for entry in layout.entries {
                    match entry.display {
                        Some(dev) => {
                            if topology.iter().any(|d| d.device_id == dev) {
                                let _ = self.set_wallpaper(&entry.content, Some(&dev));
                            } else {
                                el::info!(
                                    "display {} absent; queueing content={}",
                                    dev,
                                    entry.content.display()
                                );
                                self.disconnected.push(DisconnectedEntry {
                                    device_id: dev,
                                    content: entry.content,
                                });
                            }
                        }
                        None => {
                            let _ = self.set_wallpaper(&entry.content, None);
                        }
                    }
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Topology / surface events
    // ─────────────────────────────────────────────────────────────────────

    pub fn handle_display_change(&mut self) {
        let _defer = self.gate.defer();
        self.play_all();

        let settings = Settings::load(&self.settings_path);
        let topology = self.displays.displays();
        el::info!(
            "topology changed displays={} arrangement={:?}",
            topology.len(),
            settings.arrangement
        );

        match settings.arrangement {
            Arrangement::PerDisplay => {
                // Orphans are remembered for the display's return, then
                // disposed.
                let orphans: Vec<DisconnectedEntry> = self
                    .instances
                    .iter()
                    .filter(|i| Self::is_orphan(i, &topology))
                    .filter_map(|i| {
                        i.display.as_ref().map(|d| DisconnectedEntry {
                            device_id: d.device_id.clone(),
                            content: i.host.descriptor().origin.clone(),
                        })
                    })
                    .collect();
                self.disconnected.extend(orphans);
                let topo = topology.clone();
                self.close_where(move |i| Self::is_orphan(i, &topo), false);

                self.refresh_positions(&topology);

                // Returned displays pick their remembered content back up.
                let mut i = 0;
                while i < self.disconnected.len() {
                    let dev = self.disconnected[i].device_id.clone();
                    if topology.iter().any(|d| d.device_id == dev) {
                        let entry = self.disconnected.remove(i);
                        el::info!(
                            "display {} reconnected; restoring content={}",
                            entry.device_id,
                            entry.content.display()
                        );
                        let _ = self
                            .set_wallpaper_inner(&entry.content, Some(&entry.device_id));
                    } else {
                        i += 1;
                    }
                }
            }

            Arrangement::Duplicate => {
                let topo = topology.clone();
                self.close_where(move |i| Self::is_orphan(i, &topo), false);
                self.refresh_positions(&topology);

                // A new display clones instance 0's content.
                if let Some(origin) =
                    self.instances.first().map(|i| i.host.descriptor().origin.clone())
                {
                    let missing: Vec<DisplayMonitor> = topology
                        .iter()
                        .filter(|d| {
                            !self
                                .instances
                                .iter()
                                .any(|i| i.matches_display(&d.device_id))
                        })
                        .cloned()
                        .collect();

                    if let Ok(descriptor) = library::resolve(&origin) {
                        for d in missing {
                            match self.launch(&descriptor, Some(d.clone()), d.bounds, &settings)
                            {
                                Ok(mut inst) => {
                                    if !d.primary {
                                        inst.host.set_mute(true);
                                        inst.muted = true;
                                    }
                                    self.instances.push(inst);
                                }
                                Err(e) => {
                                    el::error!(
                                        "duplicate fill failed display={} err={}",
                                        d.device_id,
                                        e
                                    );
                                }
                            }
                        }
                    }
                }
            }

            Arrangement::Span => {
                // Geometry only.
                let rect = self.displays.virtual_bounds();
                for inst in &mut self.instances {
                    if let Some(window) = inst.host.window() {
                        if let Err(e) = self.surface.reposition(window, rect) {
                            el::warn!("span resize failed instance={} err={}", inst.id, e);
                        }
                    }
                }
            }
        }

        self.save_layout(&settings);
        self.notify(Notice::Changed);
    }

    fn is_orphan(inst: &Instance, topology: &[DisplayMonitor]) -> bool {
        match &inst.display {
            Some(d) => !topology.iter().any(|t| t.device_id == d.device_id),
            None => false,
        }
    }

    /// Re-bind surviving instances to the refreshed monitor snapshots and
    /// re-place their windows (bounds may have shifted).
    fn refresh_positions(&mut self, topology: &[DisplayMonitor]) {
        for idx in 0..self.instances.len() {
            let Some(old) = self.instances[idx].display.clone() else {
                continue;
            };
            let Some(fresh) = topology.iter().find(|d| d.device_id == old.device_id) else {
                continue;
            };
            self.instances[idx].display = Some(fresh.clone());
            if let Some(window) = self.instances[idx].host.window() {
                if let Err(e) = self.surface.reposition(window, fresh.bounds) {
                    el::warn!(
                        "reposition failed instance={} err={}",
                        self.instances[idx].id,
                        e
                    );
                }
            }
        }
    }

    /// Surface destruction. Layered-shell mode re-attaches in place; legacy
    /// mode needs the full reset. Repeated losses inside the crash window
    /// stop recovery and close everything instead of looping.
    pub fn handle_surface_lost(&mut self) {
        let now = Instant::now();
        self.surface_losses.push_back(now);
        while let Some(first) = self.surface_losses.front() {
            if now.duration_since(*first) > CRASH_WINDOW {
                self.surface_losses.pop_front();
            } else {
                break;
            }
        }

        el::warn!(
            "desktop surface lost (loss {} in window)",
            self.surface_losses.len()
        );

        if self.surface_losses.len() >= CRASH_LIMIT {
            el::error!("shell crash storm; closing all wallpapers");
            self.close_where(|_| true, false);
            self.surface_losses.clear();
            self.notify(Notice::Error {
                message: "desktop shell is restarting repeatedly; wallpapers closed".into(),
            });
            self.notify(Notice::Changed);
            return;
        }

        self.surface.invalidate();
        match self.ensure_surface() {
            Ok(handle) if handle.layered_shell => {
                el::info!("surface recovered; re-attaching {} instance(s)", self.instances.len());
                for idx in 0..self.instances.len() {
                    let rect = self.rect_for(idx);
                    let Some(window) = self.instances[idx].host.window() else {
                        continue;
                    };
                    if let Err(e) = self.surface.attach(window, rect) {
                        el::warn!(
                            "re-attach failed instance={} err={}",
                            self.instances[idx].id,
                            e
                        );
                    }
                }
            }
            Ok(_) => {
                let _ = self.reset_wallpaper();
            }
            Err(e) => {
                el::error!("surface re-acquisition failed err={}", e);
                self.notify(Notice::Error { message: e.to_string() });
            }
        }
    }

    fn rect_for(&self, idx: usize) -> Rect {
        match &self.instances[idx].display {
            Some(d) => d.bounds,
            None => self.displays.virtual_bounds(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Channel events
    // ─────────────────────────────────────────────────────────────────────

    pub fn handle_event(&mut self, event: RuntimeEvent) {
        match event {
            RuntimeEvent::Control(ev) => self.handle_control(&ev),
            RuntimeEvent::Host(ev) => self.handle_host_event(ev),
            RuntimeEvent::SurfaceLost => self.handle_surface_lost(),
            RuntimeEvent::DisplayChange => self.handle_display_change(),
        }
    }

    pub fn handle_control(&mut self, ev: &ControlEvent) {
        for inst in &mut self.instances {
            if inst.state.is_terminal() {
                continue;
            }
            if let Some(dev) = &ev.display {
                if !inst.matches_display(dev) {
                    continue;
                }
            }
            match ev.action {
                ControlAction::Pause => {
                    if matches!(inst.state, InstanceState::Playing | InstanceState::Attached) {
                        inst.host.pause();
                        inst.transition(InstanceState::Paused);
                    }
                }
                ControlAction::Play => {
                    if matches!(inst.state, InstanceState::Paused | InstanceState::Attached) {
                        inst.host.play();
                        inst.transition(InstanceState::Playing);
                    }
                }
                ControlAction::SetVolume => {
                    // Duplicate non-primaries stay muted.
                    if !inst.muted {
                        if let Some(v) = ev.volume {
                            inst.host.set_volume(v);
                        }
                    }
                }
            }
        }
    }

    pub fn handle_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Loaded { id, window } => {
                el::debug!("host loaded instance={} wnd={:#x}", id, window);
            }
            HostEvent::Console { id, level, message } => match level.as_str() {
                "error" => el::error!("[host {}] {}", id, message),
                "warn" => el::warn!("[host {}] {}", id, message),
                _ => el::debug!("[host {}] {}", id, message),
            },
            HostEvent::Exited { id } => {
                let Some(pos) = self.instances.iter().position(|i| i.id == id) else {
                    return;
                };
                let mut inst = self.instances.remove(pos);
                inst.transition(InstanceState::Exited);
                if let Some(pid) = inst.host.pid() {
                    self.watchdog.unregister(pid);
                }
                el::warn!(
                    "host died instance={} content={}",
                    id,
                    inst.host.descriptor().origin.display()
                );
                platform::refresh_desktop();
                self.notify(Notice::Changed);
            }
        }
    }

    /// Belt-and-braces exit sweep for hosts without a protocol channel.
    pub fn reap_exited(&mut self) {
        let dead: Vec<u64> = self
            .instances
            .iter_mut()
            .filter(|i| !i.state.is_terminal())
            .filter_map(|i| if i.host.is_exited() { Some(i.id) } else { None })
            .collect();
        for id in dead {
            self.handle_host_event(HostEvent::Exited { id });
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Message forwarding / queries
    // ─────────────────────────────────────────────────────────────────────

    pub fn send_message(
        &mut self,
        content: &Path,
        display: Option<&str>,
        msg: &HostMessage,
    ) -> usize {
        let mut sent = 0;
        for inst in &mut self.instances {
            if inst.host.descriptor().origin != content {
                continue;
            }
            if let Some(dev) = display {
                if !inst.matches_display(dev) {
                    continue;
                }
            }
            inst.host.send(msg);
            sent += 1;
        }
        sent
    }

    pub fn screen_capture(
        &mut self,
        content: &Path,
        path: &Path,
    ) -> Result<(), RuntimeError> {
        for inst in &mut self.instances {
            if inst.host.descriptor().origin == content {
                return inst.host.screen_capture(path);
            }
        }
        Err(RuntimeError::ContentNotFound { path: content.to_path_buf() })
    }

    pub fn play_all(&mut self) {
        self.handle_control(&ControlEvent::play(None));
    }

    /// Resolve the surface ahead of the first set so startup failures show
    /// up in the log immediately. Failure is not fatal (degraded mode).
    pub fn warm_surface(&mut self) -> bool {
        match self.ensure_surface() {
            Ok(_) => true,
            Err(e) => {
                el::warn!("surface warmup failed err={}", e);
                false
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn ensure_surface(
        &mut self,
    ) -> Result<crate::surface::DesktopSurfaceHandle, RuntimeError> {
        if self.surface.is_valid() {
            if let Some(h) = self.surface.current() {
                return Ok(h);
            }
        }
        match self.surface.resolve() {
            Ok(h) => Ok(h),
            Err(_) => {
                // One retry after a beat; the shell may still be spawning
                // its worker.
                std::thread::sleep(SURFACE_RETRY_DELAY);
                self.surface.resolve()
            }
        }
    }

    fn resolve_display(&self, device: Option<&str>) -> Result<DisplayMonitor, RuntimeError> {
        match device {
            Some(dev) => self
                .displays
                .by_device_id(dev)
                .ok_or_else(|| RuntimeError::ScreenNotFound { device: dev.to_string() }),
            None => self
                .displays
                .primary()
                .ok_or_else(|| RuntimeError::ScreenNotFound { device: "(primary)".into() }),
        }
    }

    fn launch(
        &mut self,
        descriptor: &Descriptor,
        display: Option<DisplayMonitor>,
        rect: Rect,
        settings: &Settings,
    ) -> Result<Instance, RuntimeError> {
        let host = self
            .factory
            .create(descriptor, settings, self.events.clone())?;
        let id = host.id();
        let mut inst = Instance {
            id,
            host,
            display,
            state: InstanceState::Creating,
            muted: false,
        };

        inst.transition(InstanceState::Showing);
        if let Err(e) = inst.host.show(SHOW_TIMEOUT, &self.shutdown) {
            // Partial instance: make sure the process is gone, then report.
            inst.host.terminate();
            inst.transition(InstanceState::Disposed);
            return Err(e);
        }

        let window = inst.host.window().ok_or_else(|| RuntimeError::PluginStartFailure {
            reason: "host ready without a window".into(),
        })?;
        if let Err(e) = self.surface.attach(window, rect) {
            inst.host.terminate();
            inst.transition(InstanceState::Disposed);
            return Err(e);
        }
        inst.transition(InstanceState::Attached);

        if let Some(pid) = inst.host.pid() {
            self.watchdog.register(pid);
        }

        inst.host.play();
        inst.transition(InstanceState::Playing);
        el::info!(
            "instance {} up content={} display={}",
            id,
            descriptor.origin.display(),
            inst.display
                .as_ref()
                .map(|d| d.device_id.as_str())
                .unwrap_or("(span)")
        );
        Ok(inst)
    }

    fn snapshot_pairs(&self, display: Option<&str>) -> Vec<(PathBuf, Option<String>)> {
        self.instances
            .iter()
            .filter(|i| match display {
                Some(dev) => i.matches_display(dev),
                None => true,
            })
            .map(|i| {
                (
                    i.host.descriptor().origin.clone(),
                    i.display.as_ref().map(|d| d.device_id.clone()),
                )
            })
            .collect()
    }

    fn save_layout(&self, settings: &Settings) {
        let entries = self
            .instances
            .iter()
            .map(|i| LayoutEntry {
                display: i.display.as_ref().map(|d| d.device_id.clone()),
                content: i.host.descriptor().origin.clone(),
            })
            .collect();
        let layout = Layout { arrangement: settings.arrangement, entries };
        if let Err(e) = state::save_layout(&self.layout_path, &layout) {
            el::warn!("save layout failed err={:#}", e);
        }
    }

    fn persist_current_layout(&self) {
        let settings = Settings::load(&self.settings_path);
        self.save_layout(&settings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::WindowId;
    use crate::surface::DesktopSurfaceHandle;
    use crate::watchdog::NullWatchdog;
    use std::sync::mpsc::{self, Receiver};
    use std::sync::Mutex;

    // ── fakes ────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct SurfaceLog {
        attached: Vec<(WindowId, Rect)>,
        resolves: usize,
    }

    struct FakeSurface {
        log: Arc<Mutex<SurfaceLog>>,
        layered: bool,
        valid: bool,
    }

    impl FakeSurface {
        fn handle(&self) -> DesktopSurfaceHandle {
            DesktopSurfaceHandle {
                progman: 1,
                worker: 2,
                shell_view: 3,
                layered_shell: self.layered,
                desktop_foreground: 1,
            }
        }
    }

    impl DesktopSurfaceProvider for FakeSurface {
        fn resolve(&mut self) -> Result<DesktopSurfaceHandle, RuntimeError> {
            self.log.lock().unwrap().resolves += 1;
            self.valid = true;
            Ok(self.handle())
        }

        fn current(&self) -> Option<DesktopSurfaceHandle> {
            self.valid.then(|| self.handle())
        }

        fn is_valid(&self) -> bool {
            self.valid
        }

        fn invalidate(&mut self) {
            self.valid = false;
        }

        fn attach(&mut self, window: WindowId, rect: Rect) -> Result<(), RuntimeError> {
            self.log.lock().unwrap().attached.push((window, rect));
            Ok(())
        }

        fn reposition(&mut self, _window: WindowId, _rect: Rect) -> Result<(), RuntimeError> {
            Ok(())
        }

        fn detach(&mut self, _window: WindowId) {}
    }

    struct FakeDisplays {
        list: Mutex<Vec<DisplayMonitor>>,
    }

    impl DisplayProvider for FakeDisplays {
        fn displays(&self) -> Vec<DisplayMonitor> {
            self.list.lock().unwrap().clone()
        }
    }

    fn monitor(device_id: &str, x: i32, primary: bool) -> DisplayMonitor {
        DisplayMonitor {
            device_id: device_id.into(),
            index: 0,
            bounds: Rect::new(x, 0, 1920, 1080),
            work_area: Rect::new(x, 0, 1920, 1040),
            primary,
            handle: 0,
        }
    }

    struct FakeHost {
        id: u64,
        descriptor: Descriptor,
        log: Arc<Mutex<Vec<String>>>,
        fail_show: bool,
    }

    impl FakeHost {
        fn record(&self, what: &str) {
            self.log.lock().unwrap().push(format!("{}:{}", self.id, what));
        }
    }

    impl Wallpaper for FakeHost {
        fn id(&self) -> u64 {
            self.id
        }

        fn kind(&self) -> ContentKind {
            self.descriptor.kind
        }

        fn descriptor(&self) -> &Descriptor {
            &self.descriptor
        }

        fn show(
            &mut self,
            _timeout: Duration,
            _shutdown: &Arc<AtomicBool>,
        ) -> Result<(), RuntimeError> {
            if self.fail_show {
                return Err(RuntimeError::PluginStartFailure { reason: "test".into() });
            }
            self.record("show");
            Ok(())
        }

        fn pause(&mut self) {
            self.record("pause");
        }

        fn play(&mut self) {
            self.record("play");
        }

        fn set_volume(&mut self, volume: i32) {
            self.record(&format!("volume={volume}"));
        }

        fn set_mute(&mut self, mute: bool) {
            self.record(&format!("mute={mute}"));
        }

        fn set_playback_pos(&mut self, value: f32, _kind: SeekKind) {
            self.record(&format!("seek={value}"));
        }

        fn screen_capture(&mut self, _path: &Path) -> Result<(), RuntimeError> {
            Ok(())
        }

        fn send(&mut self, _msg: &HostMessage) {
            self.record("send");
        }

        fn close(&mut self) {
            self.record("close");
        }

        fn terminate(&mut self) {
            self.record("terminate");
        }

        fn window(&self) -> Option<WindowId> {
            Some(1000 + self.id)
        }

        fn input_window(&self) -> Option<WindowId> {
            self.window()
        }

        fn pid(&self) -> Option<u32> {
            None
        }

        fn is_exited(&mut self) -> bool {
            false
        }
    }

    struct FakeFactory {
        counter: u64,
        log: Arc<Mutex<Vec<String>>>,
        fail_show: bool,
    }

    impl WallpaperFactory for FakeFactory {
        fn create(
            &mut self,
            descriptor: &Descriptor,
            _settings: &Settings,
            _events: Sender<RuntimeEvent>,
        ) -> Result<Box<dyn Wallpaper>, RuntimeError> {
            self.counter += 1;
            Ok(Box::new(FakeHost {
                id: self.counter,
                descriptor: descriptor.clone(),
                log: self.log.clone(),
                fail_show: self.fail_show,
            }))
        }
    }

    // ── fixture ──────────────────────────────────────────────────────────

    struct Fixture {
        dir: tempfile::TempDir,
        orch: Orchestrator,
        displays: Arc<FakeDisplays>,
        host_log: Arc<Mutex<Vec<String>>>,
        surface_log: Arc<Mutex<SurfaceLog>>,
        notices: Receiver<Notice>,
        _events_rx: Receiver<RuntimeEvent>,
    }

    impl Fixture {
        fn settings_path(&self) -> PathBuf {
            self.dir.path().join("settings.json")
        }

        fn layout_path(&self) -> PathBuf {
            self.dir.path().join("layout.json")
        }

        fn content(&self, name: &str) -> PathBuf {
            let folder = self.dir.path().join(name);
            std::fs::create_dir_all(&folder).unwrap();
            std::fs::write(folder.join("a.mp4"), b"x").unwrap();
            std::fs::write(
                folder.join("wallpaper.json"),
                r#"{"type":"video","file":"a.mp4"}"#,
            )
            .unwrap();
            folder
        }

        fn drain_notices(&self) -> Vec<Notice> {
            self.notices.try_iter().collect()
        }
    }

    fn fixture(arrangement: Arrangement, monitors: Vec<DisplayMonitor>) -> Fixture {
        fixture_with(arrangement, monitors, false)
    }

    fn fixture_with(
        arrangement: Arrangement,
        monitors: Vec<DisplayMonitor>,
        fail_show: bool,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let settings_path = dir.path().join("settings.json");
        let layout_path = dir.path().join("layout.json");

        let settings = Settings { arrangement, ..Settings::default() };
        settings.save(&settings_path).unwrap();

        let displays = Arc::new(FakeDisplays { list: Mutex::new(monitors) });
        let host_log = Arc::new(Mutex::new(Vec::new()));
        let surface_log = Arc::new(Mutex::new(SurfaceLog::default()));

        let (events_tx, events_rx) = mpsc::channel();
        let (notice_tx, notice_rx) = mpsc::channel();

        let mut orch = Orchestrator::new(
            Box::new(FakeSurface { log: surface_log.clone(), layered: true, valid: false }),
            displays.clone(),
            Box::new(FakeFactory { counter: 0, log: host_log.clone(), fail_show }),
            Box::new(NullWatchdog),
            PolicyGate::new(),
            events_tx,
            Arc::new(AtomicBool::new(false)),
            settings_path,
            layout_path,
        );
        orch.set_notice_sink(notice_tx);

        Fixture {
            dir,
            orch,
            displays,
            host_log,
            surface_log,
            notices: notice_rx,
            _events_rx: events_rx,
        }
    }

    fn calls(f: &Fixture) -> Vec<String> {
        f.host_log.lock().unwrap().clone()
    }

    // ── scenarios ────────────────────────────────────────────────────────

    #[test]
    fn per_display_keeps_one_instance_per_device() {
        let mut f = fixture(
            Arrangement::PerDisplay,
            vec![monitor("D1", 0, true), monitor("D2", 1920, false)],
        );
        let a = f.content("walls-a");
        let b = f.content("walls-b");

        f.orch.set_wallpaper(&a, Some("D1")).unwrap();
        f.orch.set_wallpaper(&b, Some("D2")).unwrap();
        assert_eq!(f.orch.instances().len(), 2);

        // Replacing D1 closes the old instance first.
        f.orch.set_wallpaper(&b, Some("D1")).unwrap();
        assert_eq!(f.orch.instances().len(), 2);
        let d1: Vec<_> = f
            .orch
            .instances()
            .iter()
            .filter(|i| i.matches_display("D1"))
            .collect();
        assert_eq!(d1.len(), 1);
        assert_eq!(d1[0].host.descriptor().origin, b);
        assert!(calls(&f).iter().any(|c| c == "1:close"));
    }

    #[test]
    fn span_creates_exactly_one_instance_over_the_union() {
        let mut f = fixture(
            Arrangement::Span,
            vec![monitor("D1", 0, true), monitor("D2", 1920, false)],
        );
        let a = f.content("walls-a");

        f.orch.set_wallpaper(&a, None).unwrap();
        assert_eq!(f.orch.instances().len(), 1);
        assert!(f.orch.instances()[0].display.is_none());

        let attached = f.surface_log.lock().unwrap().attached.clone();
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].1, Rect::new(0, 0, 3840, 1080));
    }

    #[test]
    fn duplicate_mutes_non_primary_and_rewinds_everyone() {
        let mut f = fixture(
            Arrangement::Duplicate,
            vec![monitor("D1", 0, true), monitor("D2", 1920, false)],
        );
        let a = f.content("walls-a");

        f.orch.set_wallpaper(&a, Some("D1")).unwrap();
        assert_eq!(f.orch.instances().len(), 2);
        assert!(f
            .orch
            .instances()
            .iter()
            .all(|i| i.host.descriptor().origin == a));

        let log = calls(&f);
        assert!(log.iter().any(|c| c == "2:mute=true"));
        assert!(!log.iter().any(|c| c == "1:mute=true"));
        assert_eq!(log.iter().filter(|c| c.ends_with(":seek=0")).count(), 2);
    }

    #[test]
    fn close_is_idempotent() {
        let mut f = fixture(Arrangement::PerDisplay, vec![monitor("D1", 0, true)]);
        let a = f.content("walls-a");

        f.orch.set_wallpaper(&a, Some("D1")).unwrap();
        assert_eq!(f.orch.close_all(), 1);
        assert_eq!(f.orch.close_all(), 0);
        assert_eq!(f.orch.close_display("D1"), 0);
    }

    #[test]
    fn content_not_found_errors_and_still_notifies_changed() {
        let mut f = fixture(Arrangement::PerDisplay, vec![monitor("D1", 0, true)]);

        let missing = f.dir.path().join("nope");
        match f.orch.set_wallpaper(&missing, Some("D1")) {
            Err(RuntimeError::ContentNotFound { .. }) => {}
            other => panic!("expected ContentNotFound, got {other:?}"),
        }

        let notices = f.drain_notices();
        assert!(notices.iter().any(|n| matches!(n, Notice::Error { .. })));
        assert!(notices.contains(&Notice::Changed));
    }

    #[test]
    fn start_failure_disposes_the_partial_instance() {
        let mut f = fixture_with(
            Arrangement::PerDisplay,
            vec![monitor("D1", 0, true)],
            true,
        );
        let a = f.content("walls-a");

        match f.orch.set_wallpaper(&a, Some("D1")) {
            Err(RuntimeError::PluginStartFailure { .. }) => {}
            other => panic!("expected PluginStartFailure, got {other:?}"),
        }
        assert!(f.orch.instances().is_empty());
        assert!(calls(&f).iter().any(|c| c == "1:terminate"));
        assert!(f.drain_notices().contains(&Notice::Changed));
    }

    #[test]
    fn restore_replays_per_display_pairs() {
        let mut f = fixture(
            Arrangement::PerDisplay,
            vec![monitor("D1", 0, true), monitor("D2", 1920, false)],
        );
        let a = f.content("walls-a");
        let b = f.content("walls-b");
        f.orch.set_wallpaper(&a, Some("D1")).unwrap();
        f.orch.set_wallpaper(&b, Some("D2")).unwrap();

        // Fresh orchestrator over the same state files.
        let (events_tx, _events_rx) = mpsc::channel();
        let mut orch2 = Orchestrator::new(
            Box::new(FakeSurface {
                log: Arc::new(Mutex::new(SurfaceLog::default())),
                layered: true,
                valid: false,
            }),
            f.displays.clone(),
            Box::new(FakeFactory {
                counter: 100,
                log: Arc::new(Mutex::new(Vec::new())),
                fail_show: false,
            }),
            Box::new(NullWatchdog),
            PolicyGate::new(),
            events_tx,
            Arc::new(AtomicBool::new(false)),
            f.settings_path(),
            f.layout_path(),
        );
        orch2.restore_wallpaper();

        assert_eq!(orch2.instances().len(), 2);
        let mut pairs: Vec<(PathBuf, Option<String>)> = orch2.snapshot_pairs(None);
        pairs.sort();
        assert_eq!(
            pairs,
            vec![(a, Some("D1".to_string())), (b, Some("D2".to_string()))]
        );
    }

    #[test]
    fn disconnect_queues_and_reconnect_restores() {
        let mut f = fixture(
            Arrangement::PerDisplay,
            vec![monitor("D1", 0, true), monitor("D2", 1920, false)],
        );
        let a = f.content("walls-a");
        let b = f.content("walls-b");
        f.orch.set_wallpaper(&a, Some("D1")).unwrap();
        f.orch.set_wallpaper(&b, Some("D2")).unwrap();

        // D2 unplugged.
        *f.displays.list.lock().unwrap() = vec![monitor("D1", 0, true)];
        f.orch.handle_display_change();

        assert_eq!(f.orch.instances().len(), 1);
        assert_eq!(
            f.orch.disconnected(),
            &[DisconnectedEntry { device_id: "D2".into(), content: b.clone() }]
        );

        // D2 back.
        *f.displays.list.lock().unwrap() =
            vec![monitor("D1", 0, true), monitor("D2", 1920, false)];
        f.orch.handle_display_change();

        assert_eq!(f.orch.instances().len(), 2);
        assert!(f.orch.disconnected().is_empty());
        assert!(f
            .orch
            .instances()
            .iter()
            .any(|i| i.matches_display("D2") && i.host.descriptor().origin == b));
    }

    #[test]
    fn duplicate_fills_a_new_display_from_instance_zero() {
        let mut f = fixture(Arrangement::Duplicate, vec![monitor("D1", 0, true)]);
        let a = f.content("walls-a");
        f.orch.set_wallpaper(&a, Some("D1")).unwrap();
        assert_eq!(f.orch.instances().len(), 1);

        *f.displays.list.lock().unwrap() =
            vec![monitor("D1", 0, true), monitor("D2", 1920, false)];
        f.orch.handle_display_change();

        assert_eq!(f.orch.instances().len(), 2);
        assert!(f
            .orch
            .instances()
            .iter()
            .all(|i| i.host.descriptor().origin == a));
        assert!(f.orch.disconnected().is_empty());
    }

    #[test]
    fn control_events_scope_by_display_and_reach_span() {
        let mut f = fixture(Arrangement::Span, vec![monitor("D1", 0, true)]);
        let a = f.content("walls-a");
        f.orch.set_wallpaper(&a, None).unwrap();

        f.orch.handle_control(&ControlEvent::pause(Some("D1".into())));
        assert_eq!(f.orch.instances()[0].state, InstanceState::Paused);

        f.orch.handle_control(&ControlEvent::play(None));
        assert_eq!(f.orch.instances()[0].state, InstanceState::Playing);
    }

    #[test]
    fn crash_storm_trips_on_third_loss_only() {
        let mut f = fixture(Arrangement::PerDisplay, vec![monitor("D1", 0, true)]);
        let a = f.content("walls-a");
        f.orch.set_wallpaper(&a, Some("D1")).unwrap();
        f.drain_notices();

        f.orch.handle_surface_lost();
        f.orch.handle_surface_lost();
        assert_eq!(f.orch.instances().len(), 1, "recovery keeps instances");

        f.orch.handle_surface_lost();
        assert!(f.orch.instances().is_empty(), "storm closes everything");
        assert!(f
            .drain_notices()
            .iter()
            .any(|n| matches!(n, Notice::Error { .. })));
    }

    #[test]
    fn host_exit_removes_instance_and_notifies() {
        let mut f = fixture(Arrangement::PerDisplay, vec![monitor("D1", 0, true)]);
        let a = f.content("walls-a");
        f.orch.set_wallpaper(&a, Some("D1")).unwrap();
        f.drain_notices();

        f.orch.handle_host_event(HostEvent::Exited { id: 1 });
        assert!(f.orch.instances().is_empty());
        assert!(f.drain_notices().contains(&Notice::Changed));

        // Unknown id is a no-op.
        f.orch.handle_host_event(HostEvent::Exited { id: 99 });
    }
}
