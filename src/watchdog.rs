// Author: Dustin Pilgrim
// License: MIT

use std::io::Write;
use std::process::{Child, Command, Stdio};

use eventline as el;

use crate::settings::PlayerCommand;

/// Registration boundary for an external process watchdog. The helper (if
/// configured) receives one line per event on stdin: `WP <pid>` to watch,
/// `RMV <pid>` to forget.
pub trait Watchdog: Send {
    fn register(&mut self, pid: u32);
    fn unregister(&mut self, pid: u32);
}

/// No helper configured: registrations are only logged.
pub struct NullWatchdog;

impl Watchdog for NullWatchdog {
    fn register(&mut self, pid: u32) {
        el::debug!("watchdog disabled; not tracking pid={}", pid);
    }

    fn unregister(&mut self, _pid: u32) {}
}

/// Spawns the configured helper lazily on first registration. A dead helper
/// is dropped and respawned on the next call; write failures are swallowed
/// (the watchdog is advisory).
pub struct ProcessWatchdog {
    command: PlayerCommand,
    child: Option<Child>,
}

impl ProcessWatchdog {
    pub fn new(command: PlayerCommand) -> ProcessWatchdog {
        ProcessWatchdog { command, child: None }
    }

    fn write_line(&mut self, line: &str) {
        if let Some(child) = self.child.as_mut() {
            if matches!(child.try_wait(), Ok(Some(_))) {
                el::warn!("watchdog helper exited; respawning");
                self.child = None;
            }
        }

        if self.child.is_none() {
            match Command::new(&self.command.program)
                .args(&self.command.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
            {
                Ok(c) => {
                    el::info!("watchdog helper started pid={}", c.id());
                    self.child = Some(c);
                }
                Err(e) => {
                    el::warn!(
                        "watchdog helper spawn failed program={} err={}",
                        self.command.program.display(),
                        e
                    );
                    return;
                }
            }
        }

        if let Some(stdin) = self.child.as_mut().and_then(|c| c.stdin.as_mut()) {
            let _ = writeln!(stdin, "{line}");
            let _ = stdin.flush();
        }
    }
}

impl Watchdog for ProcessWatchdog {
    fn register(&mut self, pid: u32) {
        self.write_line(&format!("WP {pid}"));
    }

    fn unregister(&mut self, pid: u32) {
        self.write_line(&format!("RMV {pid}"));
    }
}

impl Drop for ProcessWatchdog {
    fn drop(&mut self) {
        if let Some(mut c) = self.child.take() {
            let _ = c.kill();
            let _ = c.wait();
        }
    }
}
