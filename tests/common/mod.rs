#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use garak::{
    model::{KEY_ARTIST, KEY_LENGTH, KEY_TITLE},
    schedule::Scheduler,
    ControllerEvent, EventSink, MetaValue, MetadataMap, PlaybackStatus, PlayerDirectory, PlayerId,
    RemoteError, RemotePlayer, Subscription,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    PlayPause,
    Next,
    Previous,
    SetPosition(u64),
}

struct PlayerState {
    status: PlaybackStatus,
    metadata: MetadataMap,
    uncached: MetadataMap,
    can_go_next: bool,
    can_go_previous: bool,
    position: i64,
    failing: bool,
    calls: Vec<Call>,
    subscribed: Option<PlayerId>,
    tokens: Vec<CancellationToken>,
    uncached_reads: usize,
}

pub struct FakePlayer {
    name: String,
    state: Mutex<PlayerState>,
}

impl FakePlayer {
    pub fn new(name: &str, status: PlaybackStatus) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(PlayerState {
                status,
                metadata: track("Song", &["Band"], 200_000),
                uncached: MetadataMap::new(),
                can_go_next: true,
                can_go_previous: true,
                position: 0,
                failing: false,
                calls: Vec::new(),
                subscribed: None,
                tokens: Vec::new(),
                uncached_reads: 0,
            }),
        })
    }

    pub fn set_status(&self, status: PlaybackStatus) {
        self.state.lock().unwrap().status = status;
    }

    pub fn set_metadata(&self, metadata: MetadataMap) {
        self.state.lock().unwrap().metadata = metadata;
    }

    pub fn set_uncached(&self, metadata: MetadataMap) {
        self.state.lock().unwrap().uncached = metadata;
    }

    pub fn set_reported_position(&self, position: i64) {
        self.state.lock().unwrap().position = position;
    }

    pub fn set_can_go(&self, next: bool, previous: bool) {
        let mut state = self.state.lock().unwrap();
        state.can_go_next = next;
        state.can_go_previous = previous;
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn subscribed_id(&self) -> Option<PlayerId> {
        self.state.lock().unwrap().subscribed
    }

    pub fn all_unsubscribed(&self) -> bool {
        let state = self.state.lock().unwrap();
        !state.tokens.is_empty() && state.tokens.iter().all(CancellationToken::is_cancelled)
    }

    pub fn uncached_reads(&self) -> usize {
        self.state.lock().unwrap().uncached_reads
    }

    fn read<T>(&self, f: impl FnOnce(&PlayerState) -> T) -> Result<T, RemoteError> {
        let state = self.state.lock().unwrap();
        if state.failing {
            return Err(RemoteError::Gone(self.name.clone()));
        }
        Ok(f(&state))
    }

    fn call(&self, call: Call) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        if state.failing {
            return Err(RemoteError::Gone(self.name.clone()));
        }
        state.calls.push(call);
        Ok(())
    }
}

impl RemotePlayer for FakePlayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> Result<MetadataMap, RemoteError> {
        self.read(|s| s.metadata.clone())
    }

    fn playback_status(&self) -> Result<PlaybackStatus, RemoteError> {
        self.read(|s| s.status)
    }

    fn can_go_next(&self) -> Result<bool, RemoteError> {
        self.read(|s| s.can_go_next)
    }

    fn can_go_previous(&self) -> Result<bool, RemoteError> {
        self.read(|s| s.can_go_previous)
    }

    fn can_play(&self) -> Result<bool, RemoteError> {
        self.read(|_| true)
    }

    fn can_pause(&self) -> Result<bool, RemoteError> {
        self.read(|_| true)
    }

    fn position(&self) -> Result<i64, RemoteError> {
        self.read(|s| s.position)
    }

    fn metadata_uncached(&self) -> Result<MetadataMap, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.uncached_reads += 1;
        if state.failing {
            return Err(RemoteError::Gone(self.name.clone()));
        }
        Ok(state.uncached.clone())
    }

    fn play_pause(&self) -> Result<(), RemoteError> {
        self.call(Call::PlayPause)
    }

    fn next(&self) -> Result<(), RemoteError> {
        self.call(Call::Next)
    }

    fn previous(&self) -> Result<(), RemoteError> {
        self.call(Call::Previous)
    }

    fn set_position(&self, position_us: u64) -> Result<(), RemoteError> {
        self.call(Call::SetPosition(position_us))
    }

    fn subscribe(&self, id: PlayerId, _sink: EventSink) -> Vec<Subscription> {
        let mut state = self.state.lock().unwrap();
        state.subscribed = Some(id);
        (0..3)
            .map(|_| {
                let token = CancellationToken::new();
                state.tokens.push(token.clone());
                Subscription::new(token)
            })
            .collect()
    }
}

#[derive(Default)]
struct DirectoryState {
    names: Vec<String>,
    players: HashMap<String, Arc<FakePlayer>>,
    fail_list: bool,
    watch_token: Option<CancellationToken>,
    opened: Vec<String>,
    requests: Vec<&'static str>,
}

/// Shared handle; clone one into the controller and keep one for assertions.
#[derive(Clone, Default)]
pub struct FakeDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts a player on the bus. `list_names` reports it from now on.
    pub fn add(&self, player: &Arc<FakePlayer>) {
        let mut state = self.state.lock().unwrap();
        let name = player.name().to_string();
        state.names.push(bus_name(&name));
        state.players.insert(name, Arc::clone(player));
    }

    /// Lists a bus name without a player behind it.
    pub fn add_name(&self, name: &str) {
        self.state.lock().unwrap().names.push(name.to_string());
    }

    pub fn remove(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        let bus = bus_name(name);
        state.names.retain(|n| *n != bus);
        state.players.remove(name);
    }

    pub fn fail_list(&self) {
        self.state.lock().unwrap().fail_list = true;
    }

    pub fn watch_cancelled(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .watch_token
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    pub fn opened(&self) -> Vec<String> {
        self.state.lock().unwrap().opened.clone()
    }

    /// Order of `watch`/`list` calls seen so far.
    pub fn requests(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().requests.clone()
    }
}

impl PlayerDirectory for FakeDirectory {
    fn list_names(&self) -> Result<Vec<String>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push("list");
        if state.fail_list {
            return Err(RemoteError::NoConnection);
        }
        Ok(state.names.clone())
    }

    fn open(&self, name: &str) -> Result<Arc<dyn RemotePlayer>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.opened.push(name.to_string());
        state
            .players
            .get(name)
            .map(|p| Arc::clone(p) as Arc<dyn RemotePlayer>)
            .ok_or_else(|| RemoteError::Gone(name.to_string()))
    }

    fn watch(&self, _sink: EventSink) -> Result<Subscription, RemoteError> {
        let token = CancellationToken::new();
        let mut state = self.state.lock().unwrap();
        state.requests.push("watch");
        state.watch_token = Some(token.clone());
        Ok(Subscription::new(token))
    }
}

pub struct Task {
    pub period: Duration,
    pub event: ControllerEvent,
    pub repeating: bool,
    pub token: CancellationToken,
}

struct Clock {
    now: Instant,
    tasks: Vec<Task>,
}

/// Manual clock. Timers are only recorded, tests deliver their events by hand.
#[derive(Clone)]
pub struct FakeScheduler {
    clock: Arc<Mutex<Clock>>,
}

impl FakeScheduler {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(Mutex::new(Clock {
                now: Instant::now(),
                tasks: Vec::new(),
            })),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.clock.lock().unwrap().now += by;
    }

    /// Live (not cancelled) tasks delivering `event`.
    pub fn live(&self, event: &ControllerEvent) -> usize {
        self.clock
            .lock()
            .unwrap()
            .tasks
            .iter()
            .filter(|t| t.event == *event && !t.token.is_cancelled())
            .count()
    }

    /// Every task ever scheduled for `event`, cancelled or not.
    pub fn scheduled(&self, event: &ControllerEvent) -> usize {
        self.clock
            .lock()
            .unwrap()
            .tasks
            .iter()
            .filter(|t| t.event == *event)
            .count()
    }

    pub fn all_cancelled(&self) -> bool {
        self.clock
            .lock()
            .unwrap()
            .tasks
            .iter()
            .all(|t| t.token.is_cancelled())
    }

    fn push(&self, period: Duration, event: ControllerEvent, repeating: bool) -> Subscription {
        let token = CancellationToken::new();
        self.clock.lock().unwrap().tasks.push(Task {
            period,
            event,
            repeating,
            token: token.clone(),
        });
        Subscription::new(token)
    }
}

impl Scheduler for FakeScheduler {
    fn now(&self) -> Instant {
        self.clock.lock().unwrap().now
    }

    fn repeat(&self, period: Duration, event: ControllerEvent) -> Subscription {
        self.push(period, event, true)
    }

    fn once(&self, delay: Duration, event: ControllerEvent) -> Subscription {
        self.push(delay, event, false)
    }
}

pub fn bus_name(name: &str) -> String {
    format!("org.mpris.MediaPlayer2.{name}")
}

pub fn track(title: &str, artists: &[&str], length_us: i64) -> MetadataMap {
    let mut map = MetadataMap::new();
    map.insert(KEY_TITLE.into(), MetaValue::Str(title.into()));
    map.insert(
        KEY_ARTIST.into(),
        MetaValue::StrList(artists.iter().map(|a| (*a).to_string()).collect()),
    );
    map.insert(KEY_LENGTH.into(), MetaValue::I64(length_us));
    map
}

pub fn length_only(length_us: i64) -> MetadataMap {
    let mut map = MetadataMap::new();
    map.insert(KEY_LENGTH.into(), MetaValue::I64(length_us));
    map
}
