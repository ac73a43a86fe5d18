// Author: Dustin Pilgrim
// License: MIT

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use fresco::cli::{resolve_content, Cli, Command};
use fresco::ipc::HostMessage;
use fresco::path::paths;
use fresco::protocol::{Request, Response};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let p = paths()?;

    let req = match cli.cmd {
        Command::Set { content, display } => Request::Set {
            content: resolve_content(&content)?,
            display,
        },

        Command::Close { display } => Request::Close { display },

        Command::Restart { display } => Request::Restart { display },

        Command::Reset => Request::Reset,

        Command::Send { content, message, display } => {
            let message: HostMessage = HostMessage::parse(&message)
                .context("parse protocol message (one JSON object)")?;
            Request::Send {
                content: resolve_content(&content)?,
                display,
                message,
            }
        }

        Command::Capture { content, path } => Request::Capture {
            content: resolve_content(&content)?,
            path,
        },

        Command::Status => Request::Status,
        Command::Doctor => Request::Doctor,
        Command::Stop => Request::Stop,
    };

    let port: u16 = std::fs::read_to_string(&p.port_path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "frescod not running (port file missing at {})",
                p.port_path.display()
            )
        })?;

    let mut stream = TcpStream::connect(("127.0.0.1", port))
        .map_err(|_| anyhow::anyhow!("frescod not running (port {port} refused)"))?;

    let msg = serde_json::to_string(&req)?;
    stream.write_all(msg.as_bytes())?;
    stream.write_all(b"\n")?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;

    let resp: Response = serde_json::from_str(line.trim())?;

    match resp {
        Response::Ok => Ok(()),
        Response::Status { status } => {
            println!(
                "arrangement: {:?}   playback: {:?}",
                status.arrangement, status.playback
            );
            if status.instances.is_empty() {
                println!("(no running wallpaper)");
            }
            for i in &status.instances {
                println!(
                    "  [{}] {} ({:?}) on {}: {:?}{}",
                    i.id,
                    i.title,
                    i.kind,
                    i.display.as_deref().unwrap_or("span"),
                    i.state,
                    i.pid.map(|p| format!(" pid={p}")).unwrap_or_default()
                );
            }
            for d in &status.disconnected {
                println!("  (waiting for display {d})");
            }
            Ok(())
        }
        Response::Doctor { checks } => {
            for c in checks {
                println!(
                    "{}: {} ({})",
                    c.name,
                    if c.ok { "ok" } else { "FAIL" },
                    c.detail
                );
            }
            Ok(())
        }
        Response::Error { message } => bail!(message),
    }
}
