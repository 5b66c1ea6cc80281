//! garak: picks the MPRIS player a status-bar popup should show and mirrors
//! its metadata and playback state.
//!
//! [`controller::PlayerController`] is the core. It consumes the bus through
//! the [`remote`] traits (implemented on zbus in [`dbus`]) and timers through
//! [`schedule::Scheduler`], so it can be driven entirely from tests.

#![deny(unsafe_code)]
#![deny(clippy::all, clippy::pedantic, clippy::nursery, clippy::perf)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::too_many_lines
)]

pub mod config;
pub mod controller;
pub mod dbus;
pub mod ipc;
pub mod model;
pub mod output;
pub mod remote;
pub mod schedule;
pub mod selection;

pub use controller::{Notification, PlayerController, Timing};
pub use model::{MetaValue, MetadataMap, MetadataSnapshot, PlaybackSnapshot, PlaybackStatus};
pub use remote::{
    Command, ControllerEvent, EventSink, PlayerDirectory, PlayerId, RemoteError, RemotePlayer,
    Subscription,
};
