// Author: Dustin Pilgrim
// License: MIT

use std::path::{Path, PathBuf};

use eventline as el;

use crate::error::RuntimeError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Video,
    Web,
    Picture,
    Program,
    Stream,
}

/// Per-folder manifest (`wallpaper.json`).
#[derive(Debug, serde::Deserialize)]
struct Manifest {
    #[serde(rename = "type")]
    kind: ContentKind,
    file: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    properties: Option<String>,
}

/// A resolved content reference. Read-only to the runtime; created here.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Descriptor {
    /// The path resolve() was given; re-resolvable for restore.
    pub origin: PathBuf,
    pub dir: PathBuf,
    pub kind: ContentKind,
    /// Playable entry: an absolute path, or a URL for Stream content.
    pub source: String,
    pub title: String,
    pub args: Vec<String>,
    pub properties_path: Option<PathBuf>,
}

const MANIFEST_NAME: &str = "wallpaper.json";

/// Resolve a library folder (or a bare media file) into a Descriptor.
///
/// A folder must carry a `wallpaper.json` manifest. A bare file gets its kind
/// inferred from the extension. Missing paths and missing entries both map to
/// ContentNotFound.
pub fn resolve(path: &Path) -> Result<Descriptor, RuntimeError> {
    if !path.exists() {
        return Err(RuntimeError::ContentNotFound { path: path.to_path_buf() });
    }

    if path.is_dir() {
        return resolve_dir(path);
    }
    resolve_file(path)
}

fn resolve_dir(dir: &Path) -> Result<Descriptor, RuntimeError> {
    let manifest_path = dir.join(MANIFEST_NAME);
    let raw = std::fs::read_to_string(&manifest_path)
        .map_err(|_| RuntimeError::ContentNotFound { path: manifest_path.clone() })?;

    let m: Manifest = serde_json::from_str(&raw).map_err(|e| {
        el::warn!("bad manifest path={} err={}", manifest_path.display(), e);
        RuntimeError::ContentNotFound { path: manifest_path.clone() }
    })?;

    let source = match m.kind {
        // Streams reference a URL, nothing on disk to validate.
        ContentKind::Stream => m.file.clone(),
        _ => {
            let entry = dir.join(&m.file);
            if !entry.exists() {
                return Err(RuntimeError::ContentNotFound { path: entry });
            }
            entry.to_string_lossy().into_owned()
        }
    };

    let title = m
        .title
        .unwrap_or_else(|| folder_title(dir));

    Ok(Descriptor {
        origin: dir.to_path_buf(),
        dir: dir.to_path_buf(),
        kind: m.kind,
        source,
        title,
        args: m.args,
        properties_path: m.properties.map(|p| dir.join(p)),
    })
}

fn resolve_file(file: &Path) -> Result<Descriptor, RuntimeError> {
    let ext = file
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let kind = match ext.as_str() {
        "mp4" | "webm" | "mkv" | "avi" | "mov" => ContentKind::Video,
        "html" | "htm" => ContentKind::Web,
        "gif" | "png" | "jpg" | "jpeg" | "bmp" => ContentKind::Picture,
        "exe" => ContentKind::Program,
        _ => return Err(RuntimeError::ContentNotFound { path: file.to_path_buf() }),
    };

    Ok(Descriptor {
        origin: file.to_path_buf(),
        dir: file.parent().unwrap_or(Path::new(".")).to_path_buf(),
        kind,
        source: file.to_string_lossy().into_owned(),
        title: folder_title(file),
        args: Vec::new(),
        properties_path: None,
    })
}

fn folder_title(p: &Path) -> String {
    p.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "untitled".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_manifest_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clip.mp4"), b"x").unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_NAME),
            r#"{"type":"video","file":"clip.mp4","title":"Waves"}"#,
        )
        .unwrap();

        let d = resolve(dir.path()).unwrap();
        assert_eq!(d.kind, ContentKind::Video);
        assert_eq!(d.title, "Waves");
        assert!(d.source.ends_with("clip.mp4"));
    }

    #[test]
    fn missing_entry_is_content_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_NAME),
            r#"{"type":"video","file":"missing.mp4"}"#,
        )
        .unwrap();

        match resolve(dir.path()) {
            Err(RuntimeError::ContentNotFound { .. }) => {}
            other => panic!("expected ContentNotFound, got {other:?}"),
        }
    }

    #[test]
    fn bare_file_kind_inference() {
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("scene.html");
        std::fs::write(&f, b"<html>").unwrap();
        assert_eq!(resolve(&f).unwrap().kind, ContentKind::Web);

        let g = dir.path().join("noext");
        std::fs::write(&g, b"x").unwrap();
        assert!(resolve(&g).is_err());
    }

    #[test]
    fn stream_manifest_skips_disk_validation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_NAME),
            r#"{"type":"stream","file":"https://example.net/live.m3u8"}"#,
        )
        .unwrap();

        let d = resolve(dir.path()).unwrap();
        assert_eq!(d.kind, ContentKind::Stream);
        assert_eq!(d.source, "https://example.net/live.m3u8");
    }
}
