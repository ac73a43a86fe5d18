// Author: Dustin Pilgrim
// License: MIT

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::model::Arrangement;

/// One persisted (display, content) pair. `display` of None means the span
/// area.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LayoutEntry {
    pub display: Option<String>,
    pub content: PathBuf,
}

/// The applied layout, written after every mutation and replayed at startup.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Layout {
    pub arrangement: Arrangement,
    pub entries: Vec<LayoutEntry>,
}

pub fn save_layout(path: &Path, layout: &Layout) -> Result<()> {
    let s = serde_json::to_string_pretty(layout)?;
    std::fs::write(path, s)?;
    Ok(())
}

pub fn load_layout(path: &Path) -> Option<Layout> {
    let s = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&s).ok()
}

pub fn clear_layout(path: &Path) {
    let _ = std::fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("layout.json");

        let layout = Layout {
            arrangement: Arrangement::PerDisplay,
            entries: vec![
                LayoutEntry { display: Some("DISPLAY1".into()), content: "/walls/a".into() },
                LayoutEntry { display: Some("DISPLAY2".into()), content: "/walls/b".into() },
            ],
        };
        save_layout(&p, &layout).unwrap();
        assert_eq!(load_layout(&p), Some(layout));

        clear_layout(&p);
        assert_eq!(load_layout(&p), None);
    }
}
