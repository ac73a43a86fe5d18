// Author: Dustin Pilgrim
// License: MIT

//! Background watcher: polls desktop-shell liveness and display topology,
//! posting runtime events when either changes. The poll-based topology diff
//! doubles as a backstop for missed native notifications.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use crate::display::{DisplayProvider, Rect};
use crate::model::RuntimeEvent;
use crate::platform;

const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Consecutive failed probes before the shell is declared gone.
const FAILURE_TOLERANCE: u32 = 3;

pub fn spawn_watcher(
    displays: Arc<dyn DisplayProvider>,
    events: Sender<RuntimeEvent>,
    shutdown: Arc<AtomicBool>,
) {
    std::thread::Builder::new()
        .name("watcher".into())
        .spawn(move || {
            let mut shell_failures: u32 = 0;
            let mut last_topology = topology_key(displays.as_ref());

            loop {
                std::thread::sleep(POLL_INTERVAL);

                if shutdown.load(Ordering::Relaxed) {
                    break;
                }

                // 1) Shell liveness. A transiently missing shell is
                //    tolerated; a persistently missing one lost us the
                //    surface.
                match platform::shell_alive() {
                    Some(false) => {
                        shell_failures += 1;
                        if shell_failures >= FAILURE_TOLERANCE {
                            eventline::warn!(
                                "desktop shell not found after {} probes",
                                shell_failures
                            );
                            shell_failures = 0;
                            if events.send(RuntimeEvent::SurfaceLost).is_err() {
                                break;
                            }
                        }
                    }
                    Some(true) => {
                        shell_failures = 0;
                    }
                    // Probe not available on this platform.
                    None => {}
                }

                // 2) Topology diff.
                let topology = topology_key(displays.as_ref());
                if topology != last_topology {
                    eventline::info!(
                        "topology poll: {} -> {} display(s)",
                        last_topology.len(),
                        topology.len()
                    );
                    last_topology = topology;
                    if events.send(RuntimeEvent::DisplayChange).is_err() {
                        break;
                    }
                }
            }
        })
        .expect("spawn watcher thread");
}

fn topology_key(displays: &dyn DisplayProvider) -> Vec<(String, Rect)> {
    displays
        .displays()
        .into_iter()
        .map(|d| (d.device_id, d.bounds))
        .collect()
}
