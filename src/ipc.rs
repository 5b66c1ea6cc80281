//! Line-delimited JSON control socket. Each request line is answered with
//! `{"ok":true}` or `{"ok":false}`.

use std::{
    fs,
    io::{self, BufRead, BufReader, Write},
    os::unix::{
        fs::PermissionsExt,
        net::{UnixListener, UnixStream},
    },
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    config::runtime_dir,
    remote::{Command, ControllerEvent, EventSink},
};

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
enum IpcCmd {
    #[serde(rename = "play-pause")]
    PlayPause,
    #[serde(rename = "next")]
    Next,
    #[serde(rename = "previous")]
    Previous,
    #[serde(rename = "set-position")]
    SetPosition { position: f64 }, // seconds (absolute)
}

impl IpcCmd {
    #[allow(clippy::cast_possible_truncation)]
    fn command(&self) -> Command {
        match *self {
            Self::PlayPause => Command::PlayPause,
            Self::Next => Command::Next,
            Self::Previous => Command::Previous,
            Self::SetPosition { position } => Command::SetPosition((position * 1_000_000.0) as i64),
        }
    }
}

/// `$XDG_RUNTIME_DIR/garak/garak.sock`
#[must_use]
pub fn socket_path() -> PathBuf {
    PathBuf::from(format!("{}/garak/garak.sock", runtime_dir()))
}

fn parse_line(line: &str) -> Option<Command> {
    serde_json::from_str::<IpcCmd>(line)
        .ok()
        .map(|cmd| cmd.command())
}

fn handle_stream(sink: &EventSink, mut stream: UnixStream) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let txt = line.trim();
        if txt.is_empty() {
            continue;
        }
        let ok = match parse_line(txt) {
            Some(command) => sink.send(ControllerEvent::Command(command)).is_ok(),
            None => {
                debug!(request = txt, "rejecting malformed ipc request");
                false
            }
        };
        writeln!(stream, "{{\"ok\":{ok}}}")?;
        stream.flush()?;
    }
}

/// Binds the socket and serves it on the calling thread until the listener fails.
pub fn serve(path: &Path, sink: &EventSink) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let _ = fs::remove_file(path);
    let listener = UnixListener::bind(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    for conn in listener.incoming() {
        match conn {
            Ok(stream) => {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_stream(&sink, stream) {
                        debug!(%err, "ipc client dropped");
                    }
                });
            }
            Err(err) => warn!(%err, "ipc accept error"),
        }
    }
    Ok(())
}
