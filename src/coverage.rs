// Author: Dustin Pilgrim
// License: MIT

//! Pure occlusion analysis. No OS calls; the platform layer supplies window
//! snapshots, the policy engine interprets the verdicts.

use crate::display::{DisplayMonitor, Rect, WindowId};

/// One visible top-level window as seen at a policy tick.
#[derive(Clone, Debug)]
pub struct WindowSnapshot {
    pub id: WindowId,
    /// Lower-case process image name, e.g. "game.exe".
    pub process: String,
    pub class: String,
    pub rect: Rect,
    pub visible: bool,
    pub maximized: bool,
}

/// Fraction of `area` obscured by `window`, in 0.0..=1.0.
pub fn occlusion_ratio(window: &Rect, area: &Rect) -> f64 {
    let total = area.area();
    if total <= 0 {
        return 0.0;
    }
    match window.intersect(area) {
        Some(i) => i.area() as f64 / total as f64,
        None => 0.0,
    }
}

pub fn covers(window: &Rect, area: &Rect, threshold: f64) -> bool {
    occlusion_ratio(window, area) >= threshold
}

/// Any-window check: some visible window obscures at least `threshold` of
/// the work area.
pub fn any_window_covers(area: &Rect, windows: &[WindowSnapshot], threshold: f64) -> bool {
    windows
        .iter()
        .filter(|w| w.visible)
        .any(|w| covers(&w.rect, area, threshold))
}

/// Tile-grid check: partition the display's work area into `tile_size`
/// squares and mark every tile overlapped by a visible window. Covered once
/// the uncovered fraction drops to or below `uncovered_threshold`.
///
/// A window maximized on this display short-circuits before any tile
/// accumulation; keep that ordering. The scan stops as soon as the threshold
/// is reached.
pub fn grid_covered(
    display: &DisplayMonitor,
    windows: &[WindowSnapshot],
    tile_size: u32,
    uncovered_threshold: f64,
) -> bool {
    let area = display.work_area;
    if area.width <= 0 || area.height <= 0 || tile_size == 0 {
        return false;
    }

    for w in windows {
        if w.visible && w.maximized && w.rect.intersect(&display.bounds).is_some() {
            return true;
        }
    }

    let tile = tile_size as i32;
    let cols = ((area.width + tile - 1) / tile) as usize;
    let rows = ((area.height + tile - 1) / tile) as usize;
    let total = cols * rows;
    if total == 0 {
        return false;
    }

    let mut marked = vec![false; total];
    let mut covered = 0usize;

    for w in windows.iter().filter(|w| w.visible) {
        let Some(overlap) = w.rect.intersect(&area) else {
            continue;
        };

        // Tile index range overlapped by this window's bounding rectangle.
        let c0 = ((overlap.x - area.x) / tile).max(0) as usize;
        let r0 = ((overlap.y - area.y) / tile).max(0) as usize;
        let c1 = (((overlap.right() - 1 - area.x) / tile) as usize).min(cols - 1);
        let r1 = (((overlap.bottom() - 1 - area.y) / tile) as usize).min(rows - 1);

        for r in r0..=r1 {
            for c in c0..=c1 {
                let i = r * cols + c;
                if !marked[i] {
                    marked[i] = true;
                    covered += 1;
                    let uncovered = (total - covered) as f64 / total as f64;
                    if uncovered <= uncovered_threshold {
                        return true;
                    }
                }
            }
        }
    }

    false
}

/// The display a window predominantly sits on (largest overlap wins).
pub fn dominant_display<'a>(
    rect: &Rect,
    displays: &'a [DisplayMonitor],
) -> Option<&'a DisplayMonitor> {
    displays
        .iter()
        .filter_map(|d| rect.intersect(&d.bounds).map(|i| (i.area(), d)))
        .max_by_key(|(a, _)| *a)
        .map(|(_, d)| d)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display() -> DisplayMonitor {
        DisplayMonitor {
            device_id: "DISPLAY1".into(),
            index: 0,
            bounds: Rect::new(0, 0, 1000, 1000),
            work_area: Rect::new(0, 0, 1000, 1000),
            primary: true,
            handle: 0,
        }
    }

    fn win(rect: Rect) -> WindowSnapshot {
        WindowSnapshot {
            id: 1,
            process: "app.exe".into(),
            class: "AppWindow".into(),
            rect,
            visible: true,
            maximized: false,
        }
    }

    #[test]
    fn ratio_against_work_area() {
        let area = Rect::new(0, 0, 1000, 1000);
        assert_eq!(occlusion_ratio(&Rect::new(0, 0, 500, 1000), &area), 0.5);
        assert_eq!(occlusion_ratio(&Rect::new(2000, 0, 100, 100), &area), 0.0);
        assert!(covers(&Rect::new(0, 0, 960, 1000), &area, 0.95));
        assert!(!covers(&Rect::new(0, 0, 940, 1000), &area, 0.95));
    }

    // 100 tiles of 100px on a 1000x1000 display: 96 covered tiles pause
    // (uncovered 0.04 <= 0.05), 94 do not (0.06 > 0.05).
    #[test]
    fn grid_threshold_boundary() {
        let d = display();

        // 96 tiles: a 1000x900 block (90 tiles) + a 600x100 strip (6 tiles).
        let windows = vec![
            win(Rect::new(0, 0, 1000, 900)),
            win(Rect::new(0, 900, 600, 100)),
        ];
        assert!(grid_covered(&d, &windows, 100, 0.05));

        // 94 tiles: 1000x900 block + 400x100 strip.
        let windows = vec![
            win(Rect::new(0, 0, 1000, 900)),
            win(Rect::new(0, 900, 400, 100)),
        ];
        assert!(!grid_covered(&d, &windows, 100, 0.05));
    }

    #[test]
    fn maximized_short_circuits_tile_math() {
        let d = display();
        let mut w = win(Rect::new(0, 0, 10, 10)); // covers almost nothing
        w.maximized = true;
        assert!(grid_covered(&d, &[w], 100, 0.05));
    }

    #[test]
    fn invisible_windows_are_ignored() {
        let d = display();
        let mut w = win(Rect::new(0, 0, 1000, 1000));
        w.visible = false;
        assert!(!grid_covered(&d, &[w.clone()], 100, 0.05));
        assert!(!any_window_covers(&d.work_area, &[w], 0.95));
    }

    #[test]
    fn dominant_display_by_overlap() {
        let d1 = display();
        let mut d2 = display();
        d2.device_id = "DISPLAY2".into();
        d2.bounds = Rect::new(1000, 0, 1000, 1000);
        let displays = [d1, d2];

        let r = Rect::new(800, 0, 400, 400); // 200px on d1, 200px on d2... equal
        let r2 = Rect::new(900, 0, 400, 400); // 100px on d1, 300px on d2
        assert!(dominant_display(&r, &displays).is_some());
        assert_eq!(
            dominant_display(&r2, &displays).unwrap().device_id,
            "DISPLAY2"
        );
    }
}
