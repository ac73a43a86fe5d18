// Author: Dustin Pilgrim
// License: MIT

//! Line protocol between the runtime and hosted player processes: one JSON
//! object per line, discriminated by `"type"`. The same messages travel over
//! stdio (web/program hosts) and the video player's local socket.

use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeekKind {
    AbsolutePercent,
    RelativePercent,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// Host announces its window once, before the readiness timeout.
    /// `input_wnd` differs from `wnd` for browser hosts.
    WindowHandle {
        wnd: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_wnd: Option<u64>,
    },
    /// Host finished loading its content.
    Loaded,

    Suspend,
    Resume,
    Volume { value: i32 },
    Mute { value: bool },
    PlaybackPos { value: f32, kind: SeekKind },

    Screenshot { path: PathBuf },
    ScreenshotDone { path: PathBuf, ok: bool },

    PropertySlider { name: String, value: f64 },
    PropertyCheckbox { name: String, value: bool },
    PropertyDropdown { name: String, value: i32 },
    PropertyColor { name: String, value: String },
    PropertyText { name: String, value: String },
    PropertyButton { name: String },

    /// Host log forwarding.
    Console { level: String, message: String },

    /// Graceful shutdown request.
    Close,
}

impl HostMessage {
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn parse(line: &str) -> serde_json::Result<HostMessage> {
        serde_json::from_str(line.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminators_are_stable() {
        let m = HostMessage::WindowHandle { wnd: 42, input_wnd: None };
        let s = m.to_line().unwrap();
        assert_eq!(s, r#"{"type":"window_handle","wnd":42}"#);

        let m = HostMessage::Suspend;
        assert_eq!(m.to_line().unwrap(), r#"{"type":"suspend"}"#);

        let m = HostMessage::PlaybackPos { value: 0.0, kind: SeekKind::AbsolutePercent };
        assert_eq!(
            m.to_line().unwrap(),
            r#"{"type":"playback_pos","value":0.0,"kind":"absolute_percent"}"#
        );
    }

    #[test]
    fn round_trip() {
        let msgs = vec![
            HostMessage::WindowHandle { wnd: 7, input_wnd: Some(8) },
            HostMessage::Loaded,
            HostMessage::Volume { value: 55 },
            HostMessage::Mute { value: true },
            HostMessage::Screenshot { path: "/tmp/cap.png".into() },
            HostMessage::ScreenshotDone { path: "/tmp/cap.png".into(), ok: true },
            HostMessage::PropertySlider { name: "speed".into(), value: 1.5 },
            HostMessage::PropertyButton { name: "reset".into() },
            HostMessage::Console { level: "warn".into(), message: "late frame".into() },
            HostMessage::Close,
        ];
        for m in msgs {
            let line = m.to_line().unwrap();
            assert_eq!(HostMessage::parse(&line).unwrap(), m, "line={line}");
        }
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(HostMessage::parse(r#"{"type":"detonate"}"#).is_err());
        assert!(HostMessage::parse("not json").is_err());
    }
}
