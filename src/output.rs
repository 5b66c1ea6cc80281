//! JSON state for status bar widgets: an atomically replaced snapshot file and
//! an append-only event log, one line per notification.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::PathBuf,
};

use serde::Serialize;

use crate::{
    controller::{Notification, PlayerController},
    model::fmt_time,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateView {
    pub active: bool,
    pub name: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub art_url: Option<String>,
    pub status: String,
    pub position: u64,
    pub position_str: String,
    pub length: u64,
    pub length_str: String,
    pub can_next: bool,
    pub can_prev: bool,
    pub can_play: bool,
    pub can_pause: bool,
}

impl StateView {
    #[must_use]
    pub fn capture(controller: &PlayerController) -> Self {
        let meta = controller.metadata();
        let playback = controller.playback();
        Self {
            active: controller.has_player(),
            name: controller.active_player_name().unwrap_or_default().to_string(),
            title: meta.title.clone(),
            artist: meta.artist.clone(),
            album: meta.album.clone(),
            art_url: meta.art_url.clone(),
            status: playback.status.as_str().to_string(),
            position: playback.position_us,
            position_str: fmt_time(playback.position_us),
            length: meta.length_us,
            length_str: fmt_time(meta.length_us),
            can_next: playback.can_go_next,
            can_prev: playback.can_go_previous,
            can_play: playback.can_play,
            can_pause: playback.can_pause,
        }
    }
}

#[derive(Serialize)]
struct EventLine<'a> {
    event: &'static str,
    #[serde(flatten)]
    state: &'a StateView,
}

pub struct StateWriter {
    snapshot_path: PathBuf,
    events_path: PathBuf,
    pretty: bool,
}

impl StateWriter {
    #[must_use]
    pub const fn new(snapshot_path: PathBuf, events_path: PathBuf, pretty: bool) -> Self {
        Self {
            snapshot_path,
            events_path,
            pretty,
        }
    }

    pub fn ensure_dirs(&self) -> io::Result<()> {
        for path in [&self.snapshot_path, &self.events_path] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Rewrites the snapshot without logging an event.
    pub fn write_snapshot(&self, state: &StateView) -> io::Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(state)?
        } else {
            serde_json::to_string(state)?
        };
        let tmp = self.snapshot_path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes())?;
        fs::rename(&tmp, &self.snapshot_path)
    }

    /// Rewrites the snapshot and logs `note`. Position ticks only touch the
    /// snapshot, the event log would otherwise grow once per poll.
    pub fn write(&self, note: Notification, state: &StateView) -> io::Result<()> {
        self.write_snapshot(state)?;
        if note == Notification::PositionChanged {
            return Ok(());
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)?;
        let line = serde_json::to_string(&EventLine {
            event: note.as_str(),
            state,
        })?;
        writeln!(f, "{line}")
    }
}
