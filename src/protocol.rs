// Author: Dustin Pilgrim
// License: MIT

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ipc::HostMessage;
use crate::library::ContentKind;
use crate::model::{Arrangement, InstanceState, PlaybackPolicy};

#[derive(Debug, Serialize, Deserialize)]
pub enum Request {
    Set { content: PathBuf, display: Option<String> },
    Close { display: Option<String> },
    Restart { display: Option<String> },
    Reset,
    Send { content: PathBuf, display: Option<String>, message: HostMessage },
    Capture { content: PathBuf, path: PathBuf },
    Status,
    Doctor,
    Stop,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Status { status: RuntimeStatus },
    Doctor { checks: Vec<DoctorCheck> },
    Error { message: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub arrangement: Arrangement,
    pub playback: PlaybackPolicy,
    pub instances: Vec<InstanceStatus>,
    /// Device ids with content parked for their return.
    pub disconnected: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub id: u64,
    pub content: PathBuf,
    pub kind: ContentKind,
    pub title: String,
    pub display: Option<String>,
    pub state: InstanceState,
    pub pid: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DoctorCheck {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_round_trip() {
        let req = Request::Set { content: "/walls/waves".into(), display: Some("DISPLAY1".into()) };
        let line = serde_json::to_string(&req).unwrap();
        match serde_json::from_str::<Request>(&line).unwrap() {
            Request::Set { content, display } => {
                assert_eq!(content, PathBuf::from("/walls/waves"));
                assert_eq!(display.as_deref(), Some("DISPLAY1"));
            }
            other => panic!("round trip changed variant: {other:?}"),
        }
    }

    #[test]
    fn send_request_embeds_host_message() {
        let req = Request::Send {
            content: "/walls/waves".into(),
            display: None,
            message: HostMessage::PropertySlider { name: "speed".into(), value: 0.5 },
        };
        let line = serde_json::to_string(&req).unwrap();
        assert!(line.contains(r#""type":"property_slider""#));
    }
}
