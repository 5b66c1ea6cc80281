//! The player controller: tracks every MPRIS player on the bus, picks the one
//! to show and mirrors its state into local snapshots.
//!
//! Everything here runs on one thread. Bus signals, timers and UI commands all
//! arrive as [`ControllerEvent`]s and are applied one at a time, so a switch
//! between players is complete (active player, both snapshots, both
//! notifications) before the next event is looked at.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::{
    model::{length_us, MetadataSnapshot, PlaybackSnapshot, PlaybackStatus},
    remote::{
        is_proxy_player, player_name, Command, ControllerEvent, EventSink, PlayerDirectory,
        PlayerId, RemoteError, RemotePlayer, Subscription,
    },
    schedule::Scheduler,
    selection::select_best,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub poll_interval: Duration,
    pub seek_suppress: Duration,
    pub duration_recheck: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            seek_suppress: Duration::from_millis(500),
            duration_recheck: Duration::from_millis(500),
        }
    }
}

/// Zero-argument change notifications for the UI side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Notification {
    MetadataChanged,
    StateChanged,
    PositionChanged,
    /// The last player went away; show the empty state.
    PlayerVanished,
}

impl Notification {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MetadataChanged => "metadata-changed",
            Self::StateChanged => "state-changed",
            Self::PositionChanged => "position-changed",
            Self::PlayerVanished => "player-vanished",
        }
    }
}

struct ManagedPlayer {
    id: PlayerId,
    remote: Arc<dyn RemotePlayer>,
}

pub struct PlayerController {
    directory: Box<dyn PlayerDirectory>,
    scheduler: Arc<dyn Scheduler>,
    sink: EventSink,
    timing: Timing,

    // Discovery order.
    players: Vec<ManagedPlayer>,
    subscriptions: HashMap<PlayerId, Vec<Subscription>>,
    manager_subscription: Option<Subscription>,
    // Always an id present in `players`, `None` iff `players` is empty.
    active: Option<PlayerId>,

    metadata: MetadataSnapshot,
    playback: PlaybackSnapshot,

    position_poll: Option<Subscription>,
    duration_recheck: Option<Subscription>,
    suppress_until: Option<Instant>,

    listeners: Vec<UnboundedSender<Notification>>,
    next_id: u64,
    destroyed: bool,
}

impl PlayerController {
    pub fn new(
        directory: Box<dyn PlayerDirectory>,
        scheduler: Arc<dyn Scheduler>,
        sink: EventSink,
        timing: Timing,
    ) -> Self {
        Self {
            directory,
            scheduler,
            sink,
            timing,
            players: Vec::new(),
            subscriptions: HashMap::new(),
            manager_subscription: None,
            active: None,
            metadata: MetadataSnapshot::default(),
            playback: PlaybackSnapshot::default(),
            position_poll: None,
            duration_recheck: None,
            suppress_until: None,
            listeners: Vec::new(),
            next_id: 1,
            destroyed: false,
        }
    }

    /// Watches the bus for players coming and going, adopts the ones already
    /// there and selects the first active player.
    pub fn start(&mut self) {
        if self.destroyed {
            return;
        }
        match self.directory.watch(self.sink.clone()) {
            Ok(sub) => self.manager_subscription = Some(sub),
            Err(err) => warn!(%err, "failed to watch the bus for players"),
        }
        match self.directory.list_names() {
            Ok(names) => {
                for name in names {
                    self.name_appeared(&name, false);
                }
            }
            Err(err) => warn!(%err, "failed to enumerate players, starting empty"),
        }
        self.reselect();
    }

    /// Registers a new observer. Dropping the receiver unregisters it.
    pub fn subscribe(&mut self) -> UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.destroyed {
            self.listeners.push(tx);
        }
        rx
    }

    #[must_use]
    pub const fn metadata(&self) -> &MetadataSnapshot {
        &self.metadata
    }

    #[must_use]
    pub const fn playback(&self) -> &PlaybackSnapshot {
        &self.playback
    }

    #[must_use]
    pub const fn has_player(&self) -> bool {
        self.active.is_some()
    }

    #[must_use]
    pub fn active_player_name(&self) -> Option<&str> {
        let id = self.active?;
        self.players
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.remote.name())
    }

    /// Managed player names in discovery order.
    #[must_use]
    pub fn player_names(&self) -> Vec<&str> {
        self.players.iter().map(|p| p.remote.name()).collect()
    }

    /// Applies one event. Returns `false` once the controller is torn down.
    pub fn handle_event(&mut self, event: ControllerEvent) -> bool {
        if self.destroyed {
            debug!(?event, "dropping event after teardown");
            return false;
        }
        match event {
            ControllerEvent::NameAppeared(name) => self.name_appeared(&name, true),
            ControllerEvent::NameVanished(name) => self.name_vanished(&name),
            ControllerEvent::PlaybackStatusChanged(id) if self.is_managed(id) => {
                self.on_playback_status(id);
            }
            ControllerEvent::MetadataChanged(id) if self.is_managed(id) => self.on_metadata(id),
            ControllerEvent::Seeked(id, position) if self.is_managed(id) => {
                self.on_seeked(id, position);
            }
            ControllerEvent::PlaybackStatusChanged(id)
            | ControllerEvent::MetadataChanged(id)
            | ControllerEvent::Seeked(id, _) => {
                debug!(player = %id, "dropping signal from a player no longer managed");
            }
            ControllerEvent::PositionTick => self.on_position_tick(),
            ControllerEvent::DurationRecheck => self.on_duration_recheck(),
            ControllerEvent::Command(command) => self.execute(command),
            ControllerEvent::Shutdown => {
                self.destroy();
                return false;
            }
        }
        true
    }

    /// Event loop: starts the controller, then applies events until shutdown,
    /// handing every notification to `on_notify` once the event that caused it
    /// has been fully applied.
    pub fn run<F>(mut self, mut events: UnboundedReceiver<ControllerEvent>, mut on_notify: F)
    where
        F: FnMut(&Self, Notification),
    {
        let mut notes = self.subscribe();
        self.start();
        loop {
            while let Ok(note) = notes.try_recv() {
                on_notify(&self, note);
            }
            let Some(event) = events.blocking_recv() else {
                break;
            };
            if !self.handle_event(event) {
                break;
            }
        }
        self.destroy();
    }

    pub fn execute(&mut self, command: Command) {
        match command {
            Command::PlayPause => self.play_pause(),
            Command::Next => self.next(),
            Command::Previous => self.previous(),
            Command::SetPosition(us) => self.set_position(us),
        }
    }

    pub fn play_pause(&mut self) {
        if let Some(remote) = self.active_remote() {
            if let Err(err) = remote.play_pause() {
                warn!(player = remote.name(), %err, "play-pause failed");
            }
        }
    }

    pub fn next(&mut self) {
        if !self.playback.can_go_next {
            return;
        }
        if let Some(remote) = self.active_remote() {
            if let Err(err) = remote.next() {
                warn!(player = remote.name(), %err, "next failed");
            }
        }
    }

    pub fn previous(&mut self) {
        if !self.playback.can_go_previous {
            return;
        }
        if let Some(remote) = self.active_remote() {
            if let Err(err) = remote.previous() {
                warn!(player = remote.name(), %err, "previous failed");
            }
        }
    }

    /// Seeks to `target_us`, clamped to the track. The local position moves
    /// right away and remote position reports are ignored for the suppress
    /// window, so a late `Seeked` cannot drag the UI back.
    pub fn set_position(&mut self, target_us: i64) {
        let Some(remote) = self.active_remote() else {
            return;
        };
        let mut target = u64::try_from(target_us).unwrap_or(0);
        if self.metadata.length_us > 0 {
            target = target.min(self.metadata.length_us);
        }
        self.playback.position_us = target;
        self.suppress_until = Some(self.scheduler.now() + self.timing.seek_suppress);
        self.emit(Notification::PositionChanged);
        if let Err(err) = remote.set_position(target) {
            warn!(player = remote.name(), %err, target_us = target, "seek failed");
        }
    }

    /// Stops every timer and subscription and forgets all players.
    /// Nothing is emitted afterwards. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.stop_position_poll();
        self.cancel_duration_recheck();
        if let Some(sub) = self.manager_subscription.take() {
            sub.cancel();
        }
        for (_, subs) in self.subscriptions.drain() {
            for sub in subs {
                sub.cancel();
            }
        }
        self.players.clear();
        self.active = None;
        self.suppress_until = None;
        self.listeners.clear();
        self.metadata = MetadataSnapshot::default();
        self.playback = PlaybackSnapshot::default();
        info!("player controller torn down");
    }

    // ------------------------- Discovery -------------------------

    fn name_appeared(&mut self, bus_name: &str, reselect: bool) {
        let Some(name) = player_name(bus_name) else {
            return;
        };
        if is_proxy_player(name) || self.find(name).is_some() {
            return;
        }
        match self.directory.open(name) {
            Ok(remote) => self.attach(remote, reselect),
            // It may have left the bus between listing and opening.
            Err(err) => debug!(player = name, %err, "skipping player that failed to open"),
        }
    }

    fn name_vanished(&mut self, bus_name: &str) {
        let Some(name) = player_name(bus_name) else {
            return;
        };
        if let Some(id) = self.find(name) {
            self.detach(id);
        }
    }

    fn attach(&mut self, remote: Arc<dyn RemotePlayer>, reselect: bool) {
        let name = remote.name().to_string();
        if is_proxy_player(&name) || self.find(&name).is_some() {
            return;
        }
        let id = PlayerId(self.next_id);
        self.next_id += 1;
        let subs = remote.subscribe(id, self.sink.clone());
        self.subscriptions.insert(id, subs);
        self.players.push(ManagedPlayer { id, remote });
        info!(player = %name, %id, "player appeared");
        if reselect {
            self.reselect();
        }
    }

    fn detach(&mut self, id: PlayerId) {
        let Some(index) = self.players.iter().position(|p| p.id == id) else {
            return;
        };
        let player = self.players.remove(index);
        if let Some(subs) = self.subscriptions.remove(&id) {
            for sub in subs {
                sub.cancel();
            }
        }
        info!(player = player.remote.name(), %id, "player vanished");

        if self.active == Some(id) {
            self.active = None;
            self.stop_position_poll();
            self.cancel_duration_recheck();
            self.suppress_until = None;
            self.reselect();
            if self.active.is_none() {
                self.reset_state();
                self.emit(Notification::PlayerVanished);
            }
        } else {
            self.reselect();
        }
    }

    fn find(&self, name: &str) -> Option<PlayerId> {
        self.players
            .iter()
            .find(|p| p.remote.name() == name)
            .map(|p| p.id)
    }

    fn is_managed(&self, id: PlayerId) -> bool {
        self.players.iter().any(|p| p.id == id)
    }

    fn active_remote(&self) -> Option<Arc<dyn RemotePlayer>> {
        let id = self.active?;
        self.players
            .iter()
            .find(|p| p.id == id)
            .map(|p| Arc::clone(&p.remote))
    }

    // ------------------------- Selection -------------------------

    fn reselect(&mut self) {
        if self.players.is_empty() {
            if self.active.take().is_some() {
                self.stop_position_poll();
                self.cancel_duration_recheck();
                self.suppress_until = None;
                self.reset_state();
                self.emit(Notification::PlayerVanished);
            }
            return;
        }

        // A playing incumbent is never displaced by another player starting.
        if let Some(active) = self.active_remote() {
            if status_of(active.as_ref()) == PlaybackStatus::Playing {
                return;
            }
        }

        let statuses: Vec<_> = self
            .players
            .iter()
            .map(|p| status_of(p.remote.as_ref()))
            .collect();
        let Some(best) = select_best(&statuses) else {
            return;
        };
        let id = self.players[best].id;
        if self.active != Some(id) {
            self.switch_to(id);
        }
    }

    fn switch_to(&mut self, id: PlayerId) {
        self.stop_position_poll();
        self.cancel_duration_recheck();
        self.suppress_until = None;
        self.active = Some(id);
        if let Some(name) = self.active_player_name() {
            debug!(player = name, %id, "switching active player");
        }
        self.refresh_metadata();
        self.refresh_playback();
        self.emit(Notification::MetadataChanged);
        self.emit(Notification::StateChanged);
        if self.playback.status == PlaybackStatus::Playing {
            self.start_position_poll();
        }
    }

    // ------------------------- State mirror -------------------------

    fn on_playback_status(&mut self, id: PlayerId) {
        if self.active != Some(id) {
            let started = self
                .players
                .iter()
                .find(|p| p.id == id)
                .is_some_and(|p| status_of(p.remote.as_ref()) == PlaybackStatus::Playing);
            let active_playing = self
                .active_remote()
                .is_some_and(|r| status_of(r.as_ref()) == PlaybackStatus::Playing);
            // The player that just started wins, whatever its discovery rank.
            if started && !active_playing {
                self.switch_to(id);
            } else {
                self.reselect();
            }
            return;
        }
        self.refresh_playback();
        self.emit(Notification::StateChanged);
        if self.playback.status == PlaybackStatus::Playing {
            self.start_position_poll();
        } else {
            self.stop_position_poll();
        }
    }

    fn on_metadata(&mut self, id: PlayerId) {
        if self.active != Some(id) {
            return;
        }
        if !self.refresh_metadata() {
            return;
        }
        if self.metadata.length_us > 0 {
            self.cancel_duration_recheck();
        } else if !self.recover_duration() {
            self.schedule_duration_recheck();
        }
        self.emit(Notification::MetadataChanged);
    }

    fn on_seeked(&mut self, id: PlayerId, position_us: i64) {
        if self.active != Some(id) {
            return;
        }
        if self.position_suppressed() {
            debug!(position_us, "ignoring seeked inside the suppress window");
            return;
        }
        self.playback.position_us = u64::try_from(position_us).unwrap_or(0);
        self.emit(Notification::PositionChanged);
    }

    fn on_position_tick(&mut self) {
        if self.position_poll.is_none() {
            return;
        }
        let Some(remote) = self.active_remote() else {
            return;
        };
        if !self.position_suppressed() {
            match remote.position() {
                Ok(position) => {
                    self.playback.position_us = u64::try_from(position).unwrap_or(0);
                    self.emit(Notification::PositionChanged);
                }
                Err(err) => warn!(player = remote.name(), %err, "failed to read position"),
            }
        }
        if self.metadata.length_us == 0 && self.recover_duration() {
            self.emit(Notification::MetadataChanged);
        }
    }

    fn on_duration_recheck(&mut self) {
        if self.duration_recheck.take().is_none() {
            return;
        }
        if self.metadata.length_us == 0 && self.recover_duration() {
            self.emit(Notification::MetadataChanged);
        }
    }

    /// Re-reads the full metadata snapshot. On failure the last snapshot stays.
    fn refresh_metadata(&mut self) -> bool {
        let Some(remote) = self.active_remote() else {
            return false;
        };
        match remote.metadata() {
            Ok(map) => {
                self.metadata = MetadataSnapshot::from_map(&map);
                true
            }
            Err(err) => {
                warn!(player = remote.name(), %err, "failed to read metadata");
                false
            }
        }
    }

    fn refresh_playback(&mut self) {
        let Some(remote) = self.active_remote() else {
            return;
        };
        let remote = remote.as_ref();
        let status = match remote.playback_status() {
            Ok(status) => status,
            Err(err) => {
                warn!(player = remote.name(), %err, "failed to read playback status");
                return;
            }
        };
        let last = &self.playback;
        let position_us = if self.position_suppressed() {
            last.position_us
        } else {
            let position = remote.position().map(|p| u64::try_from(p).unwrap_or(0));
            read_or(remote, "position", position, last.position_us)
        };
        self.playback = PlaybackSnapshot {
            status,
            position_us,
            can_go_next: read_or(remote, "CanGoNext", remote.can_go_next(), last.can_go_next),
            can_go_previous: read_or(
                remote,
                "CanGoPrevious",
                remote.can_go_previous(),
                last.can_go_previous,
            ),
            can_play: read_or(remote, "CanPlay", remote.can_play(), last.can_play),
            can_pause: read_or(remote, "CanPause", remote.can_pause(), last.can_pause),
        };
    }

    /// Asks the player directly for its metadata when the cached length is 0.
    /// Returns `true` if a length was found.
    fn recover_duration(&mut self) -> bool {
        let Some(remote) = self.active_remote() else {
            return false;
        };
        match remote.metadata_uncached() {
            Ok(map) => {
                let length = length_us(&map);
                if length == 0 {
                    return false;
                }
                debug!(player = remote.name(), length, "recovered track length");
                self.metadata.length_us = length;
                self.cancel_duration_recheck();
                true
            }
            Err(err) => {
                warn!(player = remote.name(), %err, "direct metadata query failed");
                false
            }
        }
    }

    fn position_suppressed(&self) -> bool {
        self.suppress_until
            .is_some_and(|until| self.scheduler.now() < until)
    }

    fn reset_state(&mut self) {
        self.metadata = MetadataSnapshot::default();
        self.playback = PlaybackSnapshot::default();
    }

    fn emit(&mut self, note: Notification) {
        if self.destroyed {
            return;
        }
        self.listeners.retain(|tx| tx.send(note).is_ok());
    }

    // ------------------------- Timers -------------------------

    fn start_position_poll(&mut self) {
        if self.position_poll.is_some() {
            return;
        }
        self.position_poll = Some(
            self.scheduler
                .repeat(self.timing.poll_interval, ControllerEvent::PositionTick),
        );
    }

    fn stop_position_poll(&mut self) {
        if let Some(task) = self.position_poll.take() {
            task.cancel();
        }
    }

    fn schedule_duration_recheck(&mut self) {
        if self.duration_recheck.is_some() {
            return;
        }
        self.duration_recheck = Some(
            self.scheduler
                .once(self.timing.duration_recheck, ControllerEvent::DurationRecheck),
        );
    }

    fn cancel_duration_recheck(&mut self) {
        if let Some(task) = self.duration_recheck.take() {
            task.cancel();
        }
    }
}

impl Drop for PlayerController {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn status_of(remote: &dyn RemotePlayer) -> PlaybackStatus {
    remote.playback_status().unwrap_or_else(|err| {
        warn!(player = remote.name(), %err, "failed to read playback status");
        PlaybackStatus::Stopped
    })
}

fn read_or<T>(remote: &dyn RemotePlayer, what: &str, value: Result<T, RemoteError>, last: T) -> T {
    value.unwrap_or_else(|err| {
        warn!(player = remote.name(), %err, "failed to read {what}");
        last
    })
}
