//! Session bus implementation of [`PlayerDirectory`] and [`RemotePlayer`] on zbus.
//!
//! The controller thread is not a runtime thread, so its short synchronous
//! calls are driven with `Handle::block_on` under a timeout. Signal forwarders
//! run as runtime tasks and stop when their token is cancelled.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use futures_util::{Stream, StreamExt};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use zbus::{
    fdo::DBusProxy,
    zvariant::{ObjectPath, OwnedValue, Value},
    CacheProperties, Connection, Proxy, ProxyBuilder,
};

use crate::{
    model::{track_id, MetaValue, MetadataMap, PlaybackStatus},
    remote::{
        player_name, ControllerEvent, EventSink, PlayerDirectory, PlayerId, RemoteError,
        RemotePlayer, Subscription, MPRIS_PREFIX,
    },
};

const MPRIS_PATH: &str = "/org/mpris/MediaPlayer2";
const PLAYER_IFACE: &str = "org.mpris.MediaPlayer2.Player";
const PROPERTIES_IFACE: &str = "org.freedesktop.DBus.Properties";

/// Session bus connection plus the runtime that drives it.
#[derive(Clone)]
pub struct Bus {
    conn: Connection,
    runtime: Handle,
    timeout: Duration,
}

impl Bus {
    pub async fn session(runtime: Handle, timeout: Duration) -> Result<Self, RemoteError> {
        let conn = Connection::session().await?;
        Ok(Self {
            conn,
            runtime,
            timeout,
        })
    }

    /// Runs `fut` to completion from outside the runtime, bounded by the call timeout.
    fn block_on<F, T, E>(&self, fut: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<RemoteError>,
    {
        let timeout = self.timeout;
        self.runtime
            .block_on(async move { tokio::time::timeout(timeout, fut).await })
            .map_err(|_| RemoteError::Timeout)?
            .map_err(Into::into)
    }
}

pub struct DbusDirectory {
    bus: Option<Bus>,
}

impl DbusDirectory {
    /// `None` means the bus was unreachable; every call then fails and the
    /// controller stays empty.
    #[must_use]
    pub const fn new(bus: Option<Bus>) -> Self {
        Self { bus }
    }

    fn bus(&self) -> Result<&Bus, RemoteError> {
        self.bus.as_ref().ok_or(RemoteError::NoConnection)
    }
}

impl PlayerDirectory for DbusDirectory {
    fn list_names(&self) -> Result<Vec<String>, RemoteError> {
        let bus = self.bus()?;
        let conn = bus.conn.clone();
        bus.block_on(async move {
            let dbus = DBusProxy::new(&conn).await?;
            let names = dbus.list_names().await?;
            Ok::<_, RemoteError>(names.iter().map(|name| name.as_str().to_owned()).collect())
        })
    }

    fn open(&self, name: &str) -> Result<Arc<dyn RemotePlayer>, RemoteError> {
        let bus = self.bus()?;
        let player = bus.block_on(DbusPlayer::connect(bus.clone(), name.to_owned()))?;
        Ok(Arc::new(player))
    }

    fn watch(&self, sink: EventSink) -> Result<Subscription, RemoteError> {
        let bus = self.bus()?;
        let conn = bus.conn.clone();
        // The match rule is registered before returning, so a player that
        // shows up right after the caller's ListNames is still reported.
        let mut owners = bus.block_on(async move {
            let dbus = DBusProxy::new(&conn).await?;
            dbus.receive_name_owner_changed().await
        })?;
        let token = CancellationToken::new();
        let cancelled = token.clone();
        bus.runtime.spawn(async move {
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    signal = owners.next() => {
                        let Some(signal) = signal else { break };
                        let Ok(args) = signal.args() else { continue };
                        let name = args.name().as_str().to_owned();
                        if player_name(&name).is_none() {
                            continue;
                        }
                        let event = if args.new_owner().is_some() {
                            ControllerEvent::NameAppeared(name)
                        } else {
                            ControllerEvent::NameVanished(name)
                        };
                        if sink.send(event).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("name owner watcher stopped");
        });
        Ok(Subscription::new(token))
    }
}

pub struct DbusPlayer {
    name: String,
    bus_name: String,
    proxy: Proxy<'static>,
    bus: Bus,
}

impl DbusPlayer {
    async fn connect(bus: Bus, name: String) -> Result<Self, RemoteError> {
        let bus_name = format!("{MPRIS_PREFIX}{name}");
        let proxy: Proxy<'static> = ProxyBuilder::new_bare(&bus.conn)
            .destination(bus_name.clone())?
            .path(MPRIS_PATH)?
            .interface(PLAYER_IFACE)?
            .cache_properties(CacheProperties::Yes)
            .build()
            .await?;
        Ok(Self {
            name,
            bus_name,
            proxy,
            bus,
        })
    }

    /// Cached property, falling back to a call when the cache has nothing.
    fn property<T>(&self, property: &'static str) -> Result<T, RemoteError>
    where
        T: TryFrom<OwnedValue>,
        T::Error: Into<zbus::Error>,
    {
        match self.proxy.cached_property::<T>(property) {
            Ok(Some(value)) => Ok(value),
            _ => self.bus.block_on(self.proxy.get_property::<T>(property)),
        }
    }

    /// `Properties.Get` sent straight to the player, skipping the proxy cache.
    fn get_uncached(&self, property: &'static str) -> Result<OwnedValue, RemoteError> {
        let conn = &self.bus.conn;
        let destination = self.bus_name.as_str();
        self.bus.block_on(async move {
            let reply = conn
                .call_method(
                    Some(destination),
                    MPRIS_PATH,
                    Some(PROPERTIES_IFACE),
                    "Get",
                    &(PLAYER_IFACE, property),
                )
                .await?;
            reply.body::<OwnedValue>()
        })
    }

    fn call(&self, method: &'static str) -> Result<(), RemoteError> {
        self.bus
            .block_on(self.proxy.call_method(method, &()))
            .map(drop)
    }

    /// Opens the signal stream on the calling thread, then forwards it from a
    /// runtime task. The stream is live by the time this returns.
    fn forward<S, Fut, M>(
        &self,
        what: &'static str,
        open: Fut,
        sink: EventSink,
        mut to_event: M,
    ) -> Subscription
    where
        Fut: Future<Output = zbus::Result<S>>,
        S: Stream + Send + 'static,
        M: FnMut(S::Item) -> Option<ControllerEvent> + Send + 'static,
    {
        let token = CancellationToken::new();
        let stream = match self.bus.block_on(open) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(
                    player = %self.name,
                    signal = what,
                    %err,
                    "failed to subscribe to player signal"
                );
                return Subscription::new(token);
            }
        };
        let cancelled = token.clone();
        self.bus.runtime.spawn(async move {
            futures_util::pin_mut!(stream);
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    item = stream.next() => {
                        let Some(item) = item else { break };
                        if let Some(event) = to_event(item) {
                            if sink.send(event).is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });
        Subscription::new(token)
    }
}

impl RemotePlayer for DbusPlayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> Result<MetadataMap, RemoteError> {
        let raw = self.property::<HashMap<String, OwnedValue>>("Metadata")?;
        Ok(decode_metadata(&raw))
    }

    fn playback_status(&self) -> Result<PlaybackStatus, RemoteError> {
        let status = self.property::<String>("PlaybackStatus")?;
        Ok(PlaybackStatus::from_mpris(&status))
    }

    fn can_go_next(&self) -> Result<bool, RemoteError> {
        self.property("CanGoNext")
    }

    fn can_go_previous(&self) -> Result<bool, RemoteError> {
        self.property("CanGoPrevious")
    }

    fn can_play(&self) -> Result<bool, RemoteError> {
        self.property("CanPlay")
    }

    fn can_pause(&self) -> Result<bool, RemoteError> {
        self.property("CanPause")
    }

    // Position is never announced through PropertiesChanged, so the cache is always stale.
    fn position(&self) -> Result<i64, RemoteError> {
        let value = self.get_uncached("Position")?;
        i64::try_from(value).map_err(|err| RemoteError::ZBus(err.into()))
    }

    fn metadata_uncached(&self) -> Result<MetadataMap, RemoteError> {
        let value = self.get_uncached("Metadata")?;
        let raw = HashMap::<String, OwnedValue>::try_from(value)
            .map_err(|err| RemoteError::ZBus(err.into()))?;
        Ok(decode_metadata(&raw))
    }

    fn play_pause(&self) -> Result<(), RemoteError> {
        self.call("PlayPause")
    }

    fn next(&self) -> Result<(), RemoteError> {
        self.call("Next")
    }

    fn previous(&self) -> Result<(), RemoteError> {
        self.call("Previous")
    }

    fn set_position(&self, position_us: u64) -> Result<(), RemoteError> {
        let position = i64::try_from(position_us).unwrap_or(i64::MAX);
        let track = self.metadata().ok().as_ref().and_then(track_id);
        if let Some(track) = track {
            let path = ObjectPath::try_from(track.as_str())
                .map_err(|err| RemoteError::ZBus(err.into()))?;
            return self
                .bus
                .block_on(self.proxy.call_method("SetPosition", &(path, position)))
                .map(drop);
        }
        // No track id to address: fall back to a relative seek.
        let offset = position.saturating_sub(self.position()?);
        self.bus
            .block_on(self.proxy.call_method("Seek", &offset))
            .map(drop)
    }

    fn subscribe(&self, id: PlayerId, sink: EventSink) -> Vec<Subscription> {
        let proxy = &self.proxy;
        let status = self.forward(
            "PlaybackStatus",
            async {
                Ok::<_, zbus::Error>(
                    proxy
                        .receive_property_changed::<String>("PlaybackStatus")
                        .await,
                )
            },
            sink.clone(),
            move |_| Some(ControllerEvent::PlaybackStatusChanged(id)),
        );
        let metadata = self.forward(
            "Metadata",
            async {
                Ok::<_, zbus::Error>(
                    proxy
                        .receive_property_changed::<HashMap<String, OwnedValue>>("Metadata")
                        .await,
                )
            },
            sink.clone(),
            move |_| Some(ControllerEvent::MetadataChanged(id)),
        );
        let seeked = self.forward(
            "Seeked",
            proxy.receive_signal("Seeked"),
            sink,
            move |msg: Arc<zbus::Message>| {
                msg.body::<i64>()
                    .ok()
                    .map(|position| ControllerEvent::Seeked(id, position))
            },
        );
        vec![status, metadata, seeked]
    }
}

fn decode_metadata(raw: &HashMap<String, OwnedValue>) -> MetadataMap {
    raw.iter()
        .map(|(key, value)| (key.clone(), meta_value(value)))
        .collect()
}

fn meta_value(value: &Value<'_>) -> MetaValue {
    match value {
        Value::I64(v) => MetaValue::I64(*v),
        Value::U64(v) => MetaValue::U64(*v),
        Value::I32(v) => MetaValue::I32(*v),
        Value::U32(v) => MetaValue::U32(*v),
        Value::F64(v) => MetaValue::F64(*v),
        Value::Bool(v) => MetaValue::Bool(*v),
        Value::Str(s) => MetaValue::Str(s.as_str().to_owned()),
        Value::ObjectPath(p) => MetaValue::ObjectPath(p.as_str().to_owned()),
        Value::Array(items) => MetaValue::StrList(
            items
                .get()
                .iter()
                .filter_map(|item| match item {
                    Value::Str(s) => Some(s.as_str().to_owned()),
                    _ => None,
                })
                .collect(),
        ),
        Value::Value(inner) => meta_value(inner),
        _ => MetaValue::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_encodings_are_kept() {
        assert_eq!(meta_value(&Value::from(180_000_000_i64)), MetaValue::I64(180_000_000));
        assert_eq!(meta_value(&Value::from(7_u64)), MetaValue::U64(7));
        assert_eq!(meta_value(&Value::from(-3_i32)), MetaValue::I32(-3));
        assert_eq!(meta_value(&Value::from(9_u32)), MetaValue::U32(9));
        assert_eq!(meta_value(&Value::from(1.5_f64)), MetaValue::F64(1.5));
    }

    #[test]
    fn strings_and_paths_are_distinguished() {
        assert_eq!(
            meta_value(&Value::from("https://example.org/cover.jpg")),
            MetaValue::Str("https://example.org/cover.jpg".into())
        );
        let path = ObjectPath::try_from("/org/mpris/MediaPlayer2/Track/1").unwrap();
        assert_eq!(
            meta_value(&Value::from(path)),
            MetaValue::ObjectPath("/org/mpris/MediaPlayer2/Track/1".into())
        );
    }

    #[test]
    fn string_arrays_become_lists() {
        let artists = Value::from(vec!["A", "B"]);
        assert_eq!(
            meta_value(&artists),
            MetaValue::StrList(vec!["A".into(), "B".into()])
        );
    }

    #[test]
    fn other_types_are_opaque() {
        assert_eq!(meta_value(&Value::from(3_u8)), MetaValue::Other);
    }
}
