//! Interfaces the controller consumes: the bus-side player directory, one remote
//! player object, and the events both feed back into the controller loop.

use std::{fmt, sync::Arc};

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::model::{MetadataMap, PlaybackStatus};

/// Well-known bus name prefix of every MPRIS player.
pub const MPRIS_PREFIX: &str = "org.mpris.MediaPlayer2.";

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("D-Bus error: {0}")]
    ZBus(#[from] zbus::Error),
    #[error("D-Bus error: {0}")]
    Fdo(#[from] zbus::fdo::Error),
    #[error("remote call timed out")]
    Timeout,
    #[error("no connection to the session bus")]
    NoConnection,
    #[error("player {0} is gone")]
    Gone(String),
    #[error("unexpected value for {0}")]
    Decode(&'static str),
}

/// Identity the controller hands out when it starts managing a player.
/// Never reused within one controller, so an event tagged with a retired id
/// can always be recognised as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    PlayPause,
    Next,
    Previous,
    /// Absolute target in microseconds; may be out of range, the controller clamps.
    SetPosition(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// A full bus name (`org.mpris.MediaPlayer2.*`) gained an owner.
    NameAppeared(String),
    /// A full bus name lost its owner.
    NameVanished(String),
    PlaybackStatusChanged(PlayerId),
    MetadataChanged(PlayerId),
    /// Position in microseconds as carried by the `Seeked` signal.
    Seeked(PlayerId, i64),
    PositionTick,
    DurationRecheck,
    Command(Command),
    Shutdown,
}

pub type EventSink = UnboundedSender<ControllerEvent>;

/// Live subscription on a remote object or a timer. Cancelled on drop.
#[derive(Debug)]
pub struct Subscription {
    token: CancellationToken,
}

impl Subscription {
    #[must_use]
    pub const fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Typed access to one remote MPRIS player.
///
/// Reads are expected to be served from a property cache kept fresh by
/// signals, except for [`RemotePlayer::position`] and
/// [`RemotePlayer::metadata_uncached`], which always go to the player.
pub trait RemotePlayer: Send + Sync {
    /// Stable name, the bus name without the MPRIS prefix (`spotify`, `firefox.instance_1_42`).
    fn name(&self) -> &str;

    fn metadata(&self) -> Result<MetadataMap, RemoteError>;
    fn playback_status(&self) -> Result<PlaybackStatus, RemoteError>;
    fn can_go_next(&self) -> Result<bool, RemoteError>;
    fn can_go_previous(&self) -> Result<bool, RemoteError>;
    fn can_play(&self) -> Result<bool, RemoteError>;
    fn can_pause(&self) -> Result<bool, RemoteError>;
    fn position(&self) -> Result<i64, RemoteError>;

    /// `Properties.Get(Player, "Metadata")` straight from the player, bypassing any cache.
    fn metadata_uncached(&self) -> Result<MetadataMap, RemoteError>;

    fn play_pause(&self) -> Result<(), RemoteError>;
    fn next(&self) -> Result<(), RemoteError>;
    fn previous(&self) -> Result<(), RemoteError>;
    fn set_position(&self, position_us: u64) -> Result<(), RemoteError>;

    /// Starts forwarding `playback-status`, `metadata` and `seeked` to `sink`
    /// tagged with `id`.
    fn subscribe(&self, id: PlayerId, sink: EventSink) -> Vec<Subscription>;
}

/// Player discovery on the bus.
pub trait PlayerDirectory: Send {
    /// Every bus name currently owned, unfiltered.
    fn list_names(&self) -> Result<Vec<String>, RemoteError>;

    /// Opens a handle on the player with the given stable name.
    fn open(&self, name: &str) -> Result<Arc<dyn RemotePlayer>, RemoteError>;

    /// Starts delivering [`ControllerEvent::NameAppeared`] and
    /// [`ControllerEvent::NameVanished`] for MPRIS names.
    fn watch(&self, sink: EventSink) -> Result<Subscription, RemoteError>;
}

/// Stable player name for an MPRIS bus name, `None` outside the namespace.
#[must_use]
pub fn player_name(bus_name: &str) -> Option<&str> {
    bus_name
        .strip_prefix(MPRIS_PREFIX)
        .filter(|name| !name.is_empty())
}

/// `playerctld` multiplexes other players; managing it would show every track twice.
#[must_use]
pub fn is_proxy_player(name: &str) -> bool {
    name == "playerctld" || name.starts_with("playerctld.")
}
