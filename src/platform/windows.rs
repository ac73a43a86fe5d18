// Author: Dustin Pilgrim
// License: MIT

//! Windows shell backend: WorkerW/Progman discovery, window reparenting,
//! display/window/system probes, and the surface-destroy hook.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Mutex, OnceLock};

use eventline as el;

use windows::core::{w, PCWSTR};
use windows::Win32::Foundation::{BOOL, HANDLE, HWND, LPARAM, POINT, RECT, WPARAM};
use windows::Win32::Graphics::Gdi::{
    EnumDisplayMonitors, GetMonitorInfoW, HDC, HMONITOR, MONITORINFO, MONITORINFOEXW,
    MONITORINFOF_PRIMARY,
};
use windows::Win32::System::Power::{GetSystemPowerStatus, SYSTEM_POWER_STATUS};
use windows::Win32::System::StationsAndDesktops::{
    CloseDesktop, OpenInputDesktop, DESKTOP_CONTROL_FLAGS, DESKTOP_READOBJECTS,
};
use windows::Win32::System::SystemInformation::{GetVersionExW, OSVERSIONINFOW};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::Accessibility::{SetWinEventHook, HWINEVENTHOOK};
use windows::Win32::UI::Shell::{
    SHQueryUserNotificationState, QUNS_BUSY, QUNS_RUNNING_D3D_FULL_SCREEN,
};
use windows::Win32::UI::WindowsAndMessaging::{
    DispatchMessageW, EnumWindows, FindWindowExW, FindWindowW, GetClassNameW,
    GetForegroundWindow, GetMessageW, GetShellWindow, GetSystemMetrics,
    GetWindowLongPtrW, GetWindowRect, GetWindowThreadProcessId, IsWindow, IsWindowVisible,
    IsZoomed, MapWindowPoints, SendMessageTimeoutW, SetLayeredWindowAttributes, SetParent,
    SetWindowLongPtrW, SetWindowPos, SystemParametersInfoW, TranslateMessage,
    EVENT_OBJECT_DESTROY, GWL_EXSTYLE, GWL_STYLE, LWA_ALPHA, MSG, OBJID_WINDOW,
    SM_REMOTESESSION, SPIF_SENDCHANGE, SPIF_UPDATEINIFILE, SPI_SETDESKWALLPAPER,
    SWP_NOACTIVATE, SWP_NOZORDER, SWP_SHOWWINDOW, SEND_MESSAGE_TIMEOUT_FLAGS,
    WINEVENT_OUTOFCONTEXT, WS_CAPTION, WS_CHILD, WS_EX_LAYERED, WS_EX_NOREDIRECTIONBITMAP,
    WS_MAXIMIZEBOX, WS_MINIMIZEBOX, WS_OVERLAPPED, WS_POPUP, WS_SYSMENU, WS_THICKFRAME,
};

use crate::coverage::WindowSnapshot;
use crate::display::{DisplayMonitor, DisplayProvider, Rect, WindowId};
use crate::error::RuntimeError;
use crate::model::RuntimeEvent;
use crate::platform::{SystemProbe, SystemState, WindowProbe};
use crate::surface::{DesktopSurfaceHandle, DesktopSurfaceProvider};

/// Private shell message asking Progman to spawn the wallpaper WorkerW.
const WM_SPAWN_WORKER: u32 = 0x052C;

fn hwnd_id(h: HWND) -> WindowId {
    h.0 as usize as u64
}

fn id_hwnd(id: WindowId) -> HWND {
    HWND(id as usize as *mut core::ffi::c_void)
}

// ─────────────────────────────────────────────────────────────────────────────
// Surface provider
// ─────────────────────────────────────────────────────────────────────────────

pub struct ShellSurfaceProvider {
    handle: Option<DesktopSurfaceHandle>,
    events: Sender<RuntimeEvent>,
}

impl ShellSurfaceProvider {
    pub fn new(events: Sender<RuntimeEvent>) -> ShellSurfaceProvider {
        ShellSurfaceProvider { handle: None, events }
    }

    fn parent_target(&self) -> Option<HWND> {
        self.handle.map(|h| {
            if h.layered_shell {
                id_hwnd(h.shell_view)
            } else {
                id_hwnd(h.worker)
            }
        })
    }

    /// Map `rect` (global coordinates) into the parent's client space.
    fn map_rect(&self, parent: HWND, rect: Rect) -> Rect {
        let mut pts = [
            POINT { x: rect.x, y: rect.y },
            POINT { x: rect.right(), y: rect.bottom() },
        ];
        unsafe {
            MapWindowPoints(None, Some(parent), &mut pts);
        }
        Rect::new(pts[0].x, pts[0].y, pts[1].x - pts[0].x, pts[1].y - pts[0].y)
    }

    fn place(&self, window: HWND, rect: Rect) -> Result<(), RuntimeError> {
        unsafe {
            SetWindowPos(
                window,
                None,
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                SWP_NOZORDER | SWP_NOACTIVATE | SWP_SHOWWINDOW,
            )
            .map_err(|e| RuntimeError::HostProtocolError(format!("SetWindowPos: {e}")))
        }
    }
}

impl DesktopSurfaceProvider for ShellSurfaceProvider {
    fn resolve(&mut self) -> Result<DesktopSurfaceHandle, RuntimeError> {
        let handle = resolve_surface()?;
        watch_destroy(handle.worker, self.events.clone());
        el::info!(
            "surface resolved progman={:#x} worker={:#x} shell_view={:#x} layered={}",
            handle.progman,
            handle.worker,
            handle.shell_view,
            handle.layered_shell
        );
        self.handle = Some(handle);
        Ok(handle)
    }

    fn current(&self) -> Option<DesktopSurfaceHandle> {
        self.handle
    }

    fn is_valid(&self) -> bool {
        match self.handle {
            Some(h) => unsafe { IsWindow(Some(id_hwnd(h.worker))).as_bool() },
            None => false,
        }
    }

    fn invalidate(&mut self) {
        self.handle = None;
    }

    fn attach(&mut self, window: WindowId, rect: Rect) -> Result<(), RuntimeError> {
        let handle = self.handle.ok_or(RuntimeError::SurfaceUnavailable)?;
        let parent = self.parent_target().ok_or(RuntimeError::SurfaceUnavailable)?;
        let hwnd = id_hwnd(window);

        unsafe {
            // Child style before reparenting; the shell rejects popup children.
            let style = GetWindowLongPtrW(hwnd, GWL_STYLE) as u32;
            let style = (style
                & !(WS_POPUP.0
                    | WS_OVERLAPPED.0
                    | WS_CAPTION.0
                    | WS_THICKFRAME.0
                    | WS_SYSMENU.0
                    | WS_MAXIMIZEBOX.0
                    | WS_MINIMIZEBOX.0))
                | WS_CHILD.0;
            SetWindowLongPtrW(hwnd, GWL_STYLE, style as isize);

            if handle.layered_shell {
                // Icon view is a layered sibling; the child must be layered
                // too or it renders opaque black.
                let ex = GetWindowLongPtrW(hwnd, GWL_EXSTYLE) as u32 | WS_EX_LAYERED.0;
                SetWindowLongPtrW(hwnd, GWL_EXSTYLE, ex as isize);
                let _ = SetLayeredWindowAttributes(
                    hwnd,
                    windows::Win32::Foundation::COLORREF(0),
                    255,
                    LWA_ALPHA,
                );
            }

            SetParent(hwnd, Some(parent))
                .map_err(|_| RuntimeError::SurfaceUnavailable)?;
        }

        // Reparenting invalidates coordinates; re-apply the rectangle after.
        let local = self.map_rect(parent, rect);
        self.place(hwnd, local)
    }

    fn reposition(&mut self, window: WindowId, rect: Rect) -> Result<(), RuntimeError> {
        let parent = self.parent_target().ok_or(RuntimeError::SurfaceUnavailable)?;
        let local = self.map_rect(parent, rect);
        self.place(id_hwnd(window), local)
    }

    fn detach(&mut self, window: WindowId) {
        unsafe {
            let _ = SetParent(id_hwnd(window), None);
        }
    }
}

fn resolve_surface() -> Result<DesktopSurfaceHandle, RuntimeError> {
    unsafe {
        let progman =
            FindWindowW(w!("Progman"), PCWSTR::null()).map_err(|_| RuntimeError::SurfaceUnavailable)?;

        // Layered shell view: icons drawn in a transparent child over a
        // non-redirected root.
        let ex = GetWindowLongPtrW(progman, GWL_EXSTYLE) as u32;
        let layered_shell = ex & WS_EX_NOREDIRECTIONBITMAP.0 != 0;

        // Ask the shell to spawn the hosting child surface. Safe to repeat.
        let mut result = 0usize;
        for lparam in [0isize, 1] {
            let _ = SendMessageTimeoutW(
                progman,
                WM_SPAWN_WORKER,
                WPARAM(0xD),
                LPARAM(lparam),
                SEND_MESSAGE_TIMEOUT_FLAGS(0),
                1000,
                Some(&mut result),
            );
        }

        // Find the top-level window holding the icon view.
        let mut found = DefViewScan::default();
        let _ = EnumWindows(
            Some(defview_scan_cb),
            LPARAM(&mut found as *mut DefViewScan as isize),
        );

        let shell_view = found.shell_view;

        let worker = if layered_shell {
            // Hosting surface is a direct child of the root.
            FindWindowExW(Some(progman), None, w!("WorkerW"), PCWSTR::null()).ok()
        } else {
            // Hosting surface is the icon-view window's next sibling.
            found
                .defview_parent
                .and_then(|p| FindWindowExW(None, Some(p), w!("WorkerW"), PCWSTR::null()).ok())
        };

        let worker = match worker {
            Some(w) if !w.is_invalid() => w,
            // Pre-8 shells never split the worker out of the root.
            _ if is_legacy_shell() => progman,
            _ => return Err(RuntimeError::SurfaceUnavailable),
        };

        // Baseline for "foreground is the bare desktop".
        let desktop_foreground = {
            let shell = GetShellWindow();
            if shell.is_invalid() { progman } else { shell }
        };

        Ok(DesktopSurfaceHandle {
            progman: hwnd_id(progman),
            worker: hwnd_id(worker),
            shell_view: shell_view.map(hwnd_id).unwrap_or(0),
            layered_shell,
            desktop_foreground: hwnd_id(desktop_foreground),
        })
    }
}

#[derive(Default)]
struct DefViewScan {
    defview_parent: Option<HWND>,
    shell_view: Option<HWND>,
}

unsafe extern "system" fn defview_scan_cb(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let scan = &mut *(lparam.0 as *mut DefViewScan);
    if let Ok(defview) = FindWindowExW(Some(hwnd), None, w!("SHELLDLL_DefView"), PCWSTR::null()) {
        if !defview.is_invalid() {
            scan.defview_parent = Some(hwnd);
            scan.shell_view = Some(defview);
            return BOOL(0);
        }
    }
    BOOL(1)
}

fn is_legacy_shell() -> bool {
    unsafe {
        let mut info = OSVERSIONINFOW {
            dwOSVersionInfoSize: std::mem::size_of::<OSVERSIONINFOW>() as u32,
            ..Default::default()
        };
        if GetVersionExW(&mut info).is_err() {
            return false;
        }
        info.dwMajorVersion == 6 && info.dwMinorVersion <= 1
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Surface destroy hook
// ─────────────────────────────────────────────────────────────────────────────

static WATCHED_WORKER: AtomicU64 = AtomicU64::new(0);
static HOOK_EVENTS: OnceLock<Mutex<Sender<RuntimeEvent>>> = OnceLock::new();

/// Watch the worker surface for destruction. The hook thread (with its own
/// message pump) is started once; subsequent calls only retarget it.
fn watch_destroy(worker: WindowId, events: Sender<RuntimeEvent>) {
    WATCHED_WORKER.store(worker, Ordering::SeqCst);

    let first = HOOK_EVENTS.set(Mutex::new(events.clone())).is_ok();
    if !first {
        if let Some(m) = HOOK_EVENTS.get() {
            if let Ok(mut guard) = m.lock() {
                *guard = events;
            }
        }
        return;
    }

    std::thread::Builder::new()
        .name("surface-hook".into())
        .spawn(|| unsafe {
            let hook = SetWinEventHook(
                EVENT_OBJECT_DESTROY,
                EVENT_OBJECT_DESTROY,
                None,
                Some(destroy_hook_cb),
                0,
                0,
                WINEVENT_OUTOFCONTEXT,
            );
            if hook.is_invalid() {
                el::warn!("SetWinEventHook failed; surface loss detection degraded");
                return;
            }

            let mut msg = MSG::default();
            while GetMessageW(&mut msg, None, 0, 0).as_bool() {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        })
        .expect("spawn surface-hook thread");
}

unsafe extern "system" fn destroy_hook_cb(
    _hook: HWINEVENTHOOK,
    _event: u32,
    hwnd: HWND,
    id_object: i32,
    _id_child: i32,
    _thread: u32,
    _time: u32,
) {
    if id_object != OBJID_WINDOW.0 {
        return;
    }
    if hwnd_id(hwnd) != WATCHED_WORKER.load(Ordering::SeqCst) {
        return;
    }
    if let Some(m) = HOOK_EVENTS.get() {
        if let Ok(guard) = m.lock() {
            let _ = guard.send(RuntimeEvent::SurfaceLost);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Displays
// ─────────────────────────────────────────────────────────────────────────────

pub struct NativeDisplays;

impl DisplayProvider for NativeDisplays {
    fn displays(&self) -> Vec<DisplayMonitor> {
        let mut out: Vec<DisplayMonitor> = Vec::new();
        unsafe {
            let _ = EnumDisplayMonitors(
                None,
                None,
                Some(monitor_cb),
                LPARAM(&mut out as *mut Vec<DisplayMonitor> as isize),
            );
        }
        out
    }
}

unsafe extern "system" fn monitor_cb(
    hmon: HMONITOR,
    _hdc: HDC,
    _rect: *mut RECT,
    lparam: LPARAM,
) -> BOOL {
    let out = &mut *(lparam.0 as *mut Vec<DisplayMonitor>);

    let mut info = MONITORINFOEXW {
        monitorInfo: MONITORINFO {
            cbSize: std::mem::size_of::<MONITORINFOEXW>() as u32,
            ..Default::default()
        },
        ..Default::default()
    };
    if !GetMonitorInfoW(hmon, &mut info.monitorInfo as *mut MONITORINFO).as_bool() {
        return BOOL(1);
    }

    let device_id = String::from_utf16_lossy(
        &info.szDevice[..info.szDevice.iter().position(|&c| c == 0).unwrap_or(0)],
    );

    out.push(DisplayMonitor {
        device_id,
        index: out.len(),
        bounds: rect_from(info.monitorInfo.rcMonitor),
        work_area: rect_from(info.monitorInfo.rcWork),
        primary: info.monitorInfo.dwFlags & MONITORINFOF_PRIMARY != 0,
        handle: hmon.0 as usize as u64,
    });
    BOOL(1)
}

fn rect_from(r: RECT) -> Rect {
    Rect::new(r.left, r.top, r.right - r.left, r.bottom - r.top)
}

// ─────────────────────────────────────────────────────────────────────────────
// Window probe
// ─────────────────────────────────────────────────────────────────────────────

const SHELL_CLASSES: &[&str] = &["Progman", "WorkerW", "SHELLDLL_DefView", "Shell_TrayWnd"];

pub struct NativeWindowProbe {
    desktop_baseline: WindowId,
}

impl NativeWindowProbe {
    pub fn new() -> NativeWindowProbe {
        let baseline = unsafe { GetShellWindow() };
        NativeWindowProbe { desktop_baseline: hwnd_id(baseline) }
    }
}

impl WindowProbe for NativeWindowProbe {
    fn foreground(&self) -> Option<WindowSnapshot> {
        let hwnd = unsafe { GetForegroundWindow() };
        if hwnd.is_invalid() {
            return None;
        }
        Some(snapshot_window(hwnd))
    }

    fn visible_windows(&self) -> Vec<WindowSnapshot> {
        let mut out: Vec<WindowSnapshot> = Vec::new();
        unsafe {
            let _ = EnumWindows(
                Some(visible_scan_cb),
                LPARAM(&mut out as *mut Vec<WindowSnapshot> as isize),
            );
        }
        out.retain(|w| !SHELL_CLASSES.contains(&w.class.as_str()));
        out
    }

    fn is_desktop(&self, w: &WindowSnapshot) -> bool {
        w.id == self.desktop_baseline || SHELL_CLASSES.contains(&w.class.as_str())
    }
}

unsafe extern "system" fn visible_scan_cb(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let out = &mut *(lparam.0 as *mut Vec<WindowSnapshot>);
    if IsWindowVisible(hwnd).as_bool() {
        out.push(snapshot_window(hwnd));
    }
    BOOL(1)
}

fn snapshot_window(hwnd: HWND) -> WindowSnapshot {
    unsafe {
        let mut rect = RECT::default();
        let _ = GetWindowRect(hwnd, &mut rect);

        let mut class_buf = [0u16; 128];
        let n = GetClassNameW(hwnd, &mut class_buf) as usize;
        let class = String::from_utf16_lossy(&class_buf[..n]);

        let mut pid = 0u32;
        GetWindowThreadProcessId(hwnd, Some(&mut pid));

        WindowSnapshot {
            id: hwnd_id(hwnd),
            process: process_image_name(pid).unwrap_or_default(),
            class,
            rect: rect_from(rect),
            visible: IsWindowVisible(hwnd).as_bool(),
            maximized: IsZoomed(hwnd).as_bool(),
        }
    }
}

fn process_image_name(pid: u32) -> Option<String> {
    unsafe {
        let handle: HANDLE =
            OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid).ok()?;
        let mut buf = [0u16; 1024];
        let mut len = buf.len() as u32;
        let res = QueryFullProcessImageNameW(
            handle,
            PROCESS_NAME_WIN32,
            windows::core::PWSTR(buf.as_mut_ptr()),
            &mut len,
        );
        let _ = windows::Win32::Foundation::CloseHandle(handle);
        res.ok()?;

        let full = String::from_utf16_lossy(&buf[..len as usize]);
        Some(
            full.rsplit(['\\', '/'])
                .next()
                .unwrap_or(&full)
                .to_ascii_lowercase(),
        )
    }
}

pub fn find_window_by_pid(pid: u32) -> Option<WindowId> {
    struct Scan {
        pid: u32,
        found: Option<WindowId>,
    }
    unsafe extern "system" fn cb(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let scan = &mut *(lparam.0 as *mut Scan);
        let mut pid = 0u32;
        GetWindowThreadProcessId(hwnd, Some(&mut pid));
        if pid == scan.pid && IsWindowVisible(hwnd).as_bool() {
            scan.found = Some(hwnd_id(hwnd));
            return BOOL(0);
        }
        BOOL(1)
    }

    let mut scan = Scan { pid, found: None };
    unsafe {
        let _ = EnumWindows(Some(cb), LPARAM(&mut scan as *mut Scan as isize));
    }
    scan.found
}

pub fn shell_alive() -> bool {
    unsafe { FindWindowW(w!("Progman"), PCWSTR::null()).is_ok() }
}

/// Re-apply the static wallpaper from the registry so the desktop is not
/// left black after a host dies.
pub fn refresh_desktop() {
    unsafe {
        let _ = SystemParametersInfoW(
            SPI_SETDESKWALLPAPER,
            0,
            None,
            SPIF_UPDATEINIFILE | SPIF_SENDCHANGE,
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// System probe
// ─────────────────────────────────────────────────────────────────────────────

pub struct NativeSystemProbe;

impl SystemProbe for NativeSystemProbe {
    fn state(&self) -> SystemState {
        let (on_battery, power_save) = power_status();
        let notification = user_notification_state();

        SystemState {
            session_locked: session_locked(),
            remote_session: unsafe { GetSystemMetrics(SM_REMOTESESSION) != 0 },
            on_battery,
            power_save,
            exclusive_screensaver: notification == Some(QUNS_BUSY),
            exclusive_fullscreen: notification == Some(QUNS_RUNNING_D3D_FULL_SCREEN),
        }
    }
}

fn power_status() -> (bool, bool) {
    unsafe {
        let mut status = SYSTEM_POWER_STATUS::default();
        if GetSystemPowerStatus(&mut status).is_err() {
            return (false, false);
        }
        // ACLineStatus 0 = battery; SystemStatusFlag 1 = battery saver.
        (status.ACLineStatus == 0, status.SystemStatusFlag == 1)
    }
}

fn session_locked() -> bool {
    unsafe {
        match OpenInputDesktop(DESKTOP_CONTROL_FLAGS(0), false, DESKTOP_READOBJECTS) {
            Ok(desk) => {
                let _ = CloseDesktop(desk);
                false
            }
            // Secure desktop (lock screen / UAC) denies access.
            Err(_) => true,
        }
    }
}

fn user_notification_state(
) -> Option<windows::Win32::UI::Shell::QUERY_USER_NOTIFICATION_STATE> {
    unsafe { SHQueryUserNotificationState().ok() }
}
