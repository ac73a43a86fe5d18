// Author: Dustin Pilgrim
// License: MIT

//! Shared behavior for process-backed hosts: spawn, line-protocol reader
//! loop, readiness wait, graceful close with kill fallback. Concrete hosts
//! own one of these instead of inheriting from it.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eventline as el;

use crate::display::WindowId;
use crate::error::RuntimeError;
use crate::host::CLOSE_GRACE;
use crate::ipc::HostMessage;
use crate::model::{HostEvent, RuntimeEvent};
use crate::settings::PlayerCommand;

pub(crate) struct Shared {
    pub window: AtomicU64,
    pub input_window: AtomicU64,
    pub loaded: AtomicBool,
    pub exited: AtomicBool,
}

impl Shared {
    fn new() -> Arc<Shared> {
        Arc::new(Shared {
            window: AtomicU64::new(0),
            input_window: AtomicU64::new(0),
            loaded: AtomicBool::new(false),
            exited: AtomicBool::new(false),
        })
    }
}

pub struct ProcessHost {
    id: u64,
    label: &'static str,
    child: Option<Child>,
    pid: Option<u32>,
    writer: Option<Box<dyn Write + Send>>,
    pub(crate) shared: Arc<Shared>,
    events: Sender<RuntimeEvent>,
    ready_tx: Sender<()>,
    ready_rx: Receiver<()>,
    capture_tx: Sender<bool>,
    capture_rx: Receiver<bool>,
}

impl ProcessHost {
    pub fn new(id: u64, label: &'static str, events: Sender<RuntimeEvent>) -> ProcessHost {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (capture_tx, capture_rx) = mpsc::channel();
        ProcessHost {
            id,
            label,
            child: None,
            pid: None,
            writer: None,
            shared: Shared::new(),
            events,
            ready_tx,
            ready_rx,
            capture_tx,
            capture_rx,
        }
    }

    /// Spawn the player. With `stdio_ipc` the child's stdin/stdout become
    /// the protocol channel and the reader starts immediately; otherwise the
    /// caller wires a transport later (socket hosts, plain programs).
    pub fn spawn(
        &mut self,
        player: &PlayerCommand,
        extra_args: &[String],
        stdio_ipc: bool,
    ) -> Result<(), RuntimeError> {
        let mut cmd = Command::new(&player.program);
        cmd.args(&player.args).args(extra_args);
        cmd.stderr(Stdio::null());
        if stdio_ipc {
            cmd.stdin(Stdio::piped()).stdout(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null()).stdout(Stdio::null());
        }

        let mut child = cmd.spawn().map_err(|e| RuntimeError::PluginStartFailure {
            reason: format!("spawn {}: {e}", player.program.display()),
        })?;

        self.pid = Some(child.id());
        el::info!(
            "host spawned label={} instance={} pid={} program={}",
            self.label,
            self.id,
            child.id(),
            player.program.display()
        );

        if stdio_ipc {
            let stdin = child.stdin.take().ok_or_else(|| RuntimeError::PluginStartFailure {
                reason: "no stdin pipe".into(),
            })?;
            let stdout = child.stdout.take().ok_or_else(|| RuntimeError::PluginStartFailure {
                reason: "no stdout pipe".into(),
            })?;
            self.writer = Some(Box::new(stdin));
            self.start_reader(Box::new(BufReader::new(stdout)));
        }

        self.child = Some(child);
        Ok(())
    }

    /// Wire an already-connected transport (the video socket).
    pub fn adopt_transport(
        &mut self,
        writer: Box<dyn Write + Send>,
        reader: Box<dyn BufRead + Send>,
    ) {
        self.writer = Some(writer);
        self.start_reader(reader);
    }

    fn start_reader(&self, reader: Box<dyn BufRead + Send>) {
        let shared = self.shared.clone();
        let events = self.events.clone();
        let ready_tx = self.ready_tx.clone();
        let capture_tx = self.capture_tx.clone();
        let id = self.id;
        let label = self.label;

        std::thread::Builder::new()
            .name(format!("{label}-host-{id}"))
            .spawn(move || {
                for line in reader.lines() {
                    let line = match line {
                        Ok(l) => l,
                        Err(_) => break,
                    };
                    if line.trim().is_empty() {
                        continue;
                    }

                    match HostMessage::parse(&line) {
                        Ok(HostMessage::WindowHandle { wnd, input_wnd }) => {
                            shared.window.store(wnd, Ordering::SeqCst);
                            shared
                                .input_window
                                .store(input_wnd.unwrap_or(wnd), Ordering::SeqCst);
                            let _ = ready_tx.send(());
                        }
                        Ok(HostMessage::Loaded) => {
                            shared.loaded.store(true, Ordering::SeqCst);
                            let window = shared.window.load(Ordering::SeqCst);
                            let _ = events
                                .send(RuntimeEvent::Host(HostEvent::Loaded { id, window }));
                        }
                        Ok(HostMessage::ScreenshotDone { ok, .. }) => {
                            let _ = capture_tx.send(ok);
                        }
                        Ok(HostMessage::Console { level, message }) => {
                            let _ = events.send(RuntimeEvent::Host(HostEvent::Console {
                                id,
                                level,
                                message,
                            }));
                        }
                        Ok(other) => {
                            el::debug!(
                                "unexpected host message instance={} msg={:?}",
                                id,
                                other
                            );
                        }
                        Err(e) => {
                            el::warn!(
                                "host protocol error instance={} err={} line={}",
                                id,
                                e,
                                line
                            );
                        }
                    }
                }

                shared.exited.store(true, Ordering::SeqCst);
                let _ = events.send(RuntimeEvent::Host(HostEvent::Exited { id }));
                el::debug!("host reader finished label={} instance={}", label, id);
            })
            .expect("spawn host reader thread");
    }

    /// Block until the host announces its window, it dies, the deadline
    /// passes, or shutdown is requested. Cancellation is observed before the
    /// process is killed.
    pub fn wait_ready(
        &mut self,
        timeout: Duration,
        shutdown: &AtomicBool,
    ) -> Result<WindowId, RuntimeError> {
        let deadline = Instant::now() + timeout;
        loop {
            if shutdown.load(Ordering::Relaxed) {
                self.terminate();
                return Err(RuntimeError::PluginStartFailure {
                    reason: "cancelled during startup".into(),
                });
            }
            if self.exited_now() {
                return Err(RuntimeError::PluginStartFailure {
                    reason: "host exited before readiness".into(),
                });
            }

            match self.ready_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(()) => return Ok(self.shared.window.load(Ordering::SeqCst)),
                Err(RecvTimeoutError::Timeout) => {
                    if Instant::now() >= deadline {
                        self.terminate();
                        return Err(RuntimeError::PluginStartFailure {
                            reason: format!("no window handle within {timeout:?}"),
                        });
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(RuntimeError::PluginStartFailure {
                        reason: "host exited before readiness".into(),
                    });
                }
            }
        }
    }

    pub fn send(&mut self, msg: &HostMessage) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let line = match msg.to_line() {
            Ok(l) => l,
            Err(e) => {
                el::warn!("encode host message instance={} err={}", self.id, e);
                return;
            }
        };
        if writeln!(writer, "{line}").and_then(|_| writer.flush()).is_err() {
            // A dying host drops the pipe; the reader loop reports the exit.
            el::debug!("host write failed instance={}", self.id);
        }
    }

    /// IPC screen capture round-trip with its own deadline. A host reply of
    /// ok=false is a protocol failure, distinct from the timeout.
    pub fn capture(&mut self, path: &Path, timeout: Duration) -> Result<(), RuntimeError> {
        while self.capture_rx.try_recv().is_ok() {}
        self.send(&HostMessage::Screenshot { path: path.to_path_buf() });
        match self.capture_rx.recv_timeout(timeout) {
            Ok(true) => Ok(()),
            Ok(false) => Err(RuntimeError::HostProtocolError(
                "capture reported failure".into(),
            )),
            Err(_) => Err(RuntimeError::CaptureTimeout),
        }
    }

    /// Graceful close: protocol request, grace period, then kill.
    pub fn close(&mut self) {
        if self.child.is_none() {
            return;
        }
        self.send(&HostMessage::Close);

        let deadline = Instant::now() + CLOSE_GRACE;
        while Instant::now() < deadline {
            if self.exited_now() {
                self.reap();
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        el::warn!(
            "host ignored close label={} instance={}; terminating",
            self.label,
            self.id
        );
        self.terminate();
    }

    /// Idempotent forced termination. A process already dead is not an
    /// error.
    pub fn terminate(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.child = None;
        self.shared.exited.store(true, Ordering::SeqCst);
    }

    fn reap(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.wait();
        }
    }

    pub fn exited_now(&mut self) -> bool {
        if self.shared.exited.load(Ordering::SeqCst) {
            return true;
        }
        match self.child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(Some(_))) => {
                self.shared.exited.store(true, Ordering::SeqCst);
                true
            }
            Some(Ok(None)) => false,
            Some(Err(_)) | None => true,
        }
    }

    pub fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn window(&self) -> Option<WindowId> {
        match self.shared.window.load(Ordering::SeqCst) {
            0 => None,
            w => Some(w),
        }
    }

    pub fn input_window(&self) -> Option<WindowId> {
        match self.shared.input_window.load(Ordering::SeqCst) {
            0 => self.window(),
            w => Some(w),
        }
    }

    pub fn set_window(&self, window: WindowId) {
        self.shared.window.store(window, Ordering::SeqCst);
        self.shared.input_window.store(window, Ordering::SeqCst);
    }
}

impl Drop for ProcessHost {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn terminate_is_idempotent_without_child() {
        let (tx, _rx) = mpsc::channel();
        let mut host = ProcessHost::new(1, "test", tx);
        host.terminate();
        host.terminate();
        assert!(host.exited_now());
    }

    #[cfg(unix)]
    #[test]
    fn readiness_from_announced_handle() {
        let (tx, _rx) = mpsc::channel();
        let mut host = ProcessHost::new(2, "test", tx);

        // A stand-in player that announces a handle and lingers.
        let player = PlayerCommand {
            program: "/bin/sh".into(),
            args: vec![
                "-c".into(),
                r#"echo '{"type":"window_handle","wnd":4242}'; sleep 5"#.into(),
            ],
        };
        host.spawn(&player, &[], true).unwrap();

        let shutdown = AtomicBool::new(false);
        let w = host.wait_ready(Duration::from_secs(5), &shutdown).unwrap();
        assert_eq!(w, 4242);
        assert_eq!(host.window(), Some(4242));

        host.terminate();
        host.terminate();
        assert!(host.exited_now());
    }

    #[cfg(unix)]
    #[test]
    fn early_exit_fails_readiness() {
        let (tx, _rx) = mpsc::channel();
        let mut host = ProcessHost::new(3, "test", tx);

        let player = PlayerCommand { program: "/bin/true".into(), args: vec![] };
        host.spawn(&player, &[], true).unwrap();

        let shutdown = AtomicBool::new(false);
        match host.wait_ready(Duration::from_secs(5), &shutdown) {
            Err(RuntimeError::PluginStartFailure { .. }) => {}
            other => panic!("expected PluginStartFailure, got {other:?}"),
        }
    }
}
