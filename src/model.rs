//! Local snapshots of the active player and the decoding rules that build them
//! from a raw MPRIS metadata blob.

use std::collections::HashMap;

use serde::Serialize;

pub const KEY_TITLE: &str = "xesam:title";
pub const KEY_ARTIST: &str = "xesam:artist";
pub const KEY_ALBUM: &str = "xesam:album";
pub const KEY_ART_URL: &str = "mpris:artUrl";
pub const KEY_LENGTH: &str = "mpris:length";
pub const KEY_TRACK_ID: &str = "mpris:trackid";

const UNKNOWN_TITLE: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Playing,
    Paused,
    #[default]
    Stopped,
}

impl PlaybackStatus {
    /// Parses the MPRIS `PlaybackStatus` string. Anything unknown counts as stopped.
    #[must_use]
    pub fn from_mpris(s: &str) -> Self {
        match s {
            "Playing" => Self::Playing,
            "Paused" => Self::Paused,
            _ => Self::Stopped,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }
}

/// One decoded value of the metadata blob, keeping the wire encoding so the
/// per-field rules can accept or reject it.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    I64(i64),
    U64(u64),
    I32(i32),
    U32(u32),
    F64(f64),
    Bool(bool),
    Str(String),
    ObjectPath(String),
    StrList(Vec<String>),
    Other,
}

pub type MetadataMap = HashMap<String, MetaValue>;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataSnapshot {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub art_url: Option<String>,
    pub length_us: u64,
}

impl MetadataSnapshot {
    #[must_use]
    pub fn from_map(map: &MetadataMap) -> Self {
        Self {
            title: title(map),
            artist: artist(map),
            album: album(map),
            art_url: art_url(map),
            length_us: length_us(map),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub status: PlaybackStatus,
    pub position_us: u64,
    pub can_go_next: bool,
    pub can_go_previous: bool,
    pub can_play: bool,
    pub can_pause: bool,
}

fn string_value(map: &MetadataMap, key: &str) -> Option<String> {
    match map.get(key) {
        Some(MetaValue::Str(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

#[must_use]
pub fn title(map: &MetadataMap) -> String {
    string_value(map, KEY_TITLE).unwrap_or_else(|| UNKNOWN_TITLE.to_string())
}

/// `xesam:artist` is a string list in MPRIS, but some players send a bare string.
#[must_use]
pub fn artist(map: &MetadataMap) -> String {
    match map.get(KEY_ARTIST) {
        Some(MetaValue::StrList(list)) => list
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(", "),
        Some(MetaValue::Str(s)) => s.clone(),
        _ => String::new(),
    }
}

#[must_use]
pub fn album(map: &MetadataMap) -> String {
    string_value(map, KEY_ALBUM).unwrap_or_default()
}

/// Only a string-typed `mpris:artUrl` is accepted.
#[must_use]
pub fn art_url(map: &MetadataMap) -> Option<String> {
    string_value(map, KEY_ART_URL)
}

#[must_use]
pub fn track_id(map: &MetadataMap) -> Option<String> {
    match map.get(KEY_TRACK_ID) {
        Some(MetaValue::ObjectPath(p) | MetaValue::Str(p)) if !p.is_empty() => Some(p.clone()),
        _ => None,
    }
}

#[must_use]
pub fn length_us(map: &MetadataMap) -> u64 {
    map.get(KEY_LENGTH).map_or(0, normalize_length)
}

/// Normalizes any numeric duration encoding to a non-negative microsecond count.
/// Negative, non-finite and non-numeric values all become 0.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn normalize_length(value: &MetaValue) -> u64 {
    match *value {
        MetaValue::I64(v) => u64::try_from(v).unwrap_or(0),
        MetaValue::U64(v) => v,
        MetaValue::I32(v) => u64::try_from(v).unwrap_or(0),
        MetaValue::U32(v) => u64::from(v),
        MetaValue::F64(v) if v.is_finite() && v > 0.0 => v.floor() as u64,
        _ => 0,
    }
}

/// `m:ss` rendering of a microsecond count.
#[must_use]
pub fn fmt_time(us: u64) -> String {
    let secs = us / 1_000_000;
    let m = secs / 60;
    let r = secs % 60;
    format!("{m}:{r:02}")
}
