// Author: Dustin Pilgrim
// License: MIT

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "fresco",
    about = "Animated desktop wallpaper runtime and CLI",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Set a wallpaper (library folder with wallpaper.json, or a media file)
    ///
    /// Examples:
    ///   fresco set ~/walls/waves
    ///   fresco set ~/walls/waves -d \\.\DISPLAY2
    ///   fresco set ~/clips/rain.mp4
    Set {
        /// Content target (library folder or media file)
        content: String,

        /// Target a specific display by device id. Default is the primary
        /// display (PerDisplay) or all displays (Span/Duplicate).
        #[arg(long, short = 'd')]
        display: Option<String>,
    },

    /// Close the wallpaper on one display (by device id) or all (default).
    Close {
        /// Display device id to close (if omitted, closes all)
        #[arg(long, short = 'd')]
        display: Option<String>,
    },

    /// Close and re-set running wallpapers (one display, or all).
    Restart {
        #[arg(long, short = 'd')]
        display: Option<String>,
    },

    /// Full recovery: rebuild the desktop surface and replay the layout.
    Reset,

    /// Forward a raw protocol message to a running wallpaper.
    ///
    /// Example:
    ///   fresco send ~/walls/waves '{"type":"property_slider","name":"speed","value":0.5}'
    Send {
        /// Content whose instances receive the message
        content: String,

        /// One JSON protocol message
        message: String,

        /// Limit delivery to one display
        #[arg(long, short = 'd')]
        display: Option<String>,
    },

    /// Capture a frame of a running wallpaper to an image file.
    Capture {
        /// Content whose instance is captured
        content: String,

        /// Output image path (format from extension, e.g. .png)
        path: PathBuf,
    },

    /// Show running wallpaper state.
    Status,

    /// Run environment and shell diagnostics.
    Doctor,

    /// Stop the wallpaper daemon.
    Stop,
}

pub fn resolve_content(target: &str) -> anyhow::Result<PathBuf> {
    let expanded = crate::path::expand_user_path(target)?;
    if expanded.is_absolute() {
        return Ok(expanded);
    }

    // Search FRESCO_DIRS (path-separated), else CWD
    if let Some(dirs) = std::env::var_os("FRESCO_DIRS") {
        for dir in std::env::split_paths(&dirs) {
            let cand = dir.join(&expanded);
            if cand.exists() {
                return Ok(std::fs::canonicalize(cand)?);
            }
        }
    }

    Ok(std::fs::canonicalize(&expanded)?)
}
