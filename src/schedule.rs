//! Cancellable timers that deliver a [`ControllerEvent`] back into the controller loop.
//! A timer is a [`Subscription`] to the clock: dropping it stops the timer.

use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::remote::{ControllerEvent, EventSink, Subscription};

pub trait Scheduler: Send + Sync {
    fn now(&self) -> Instant;

    /// Delivers `event` every `period`, first delivery one period from now.
    fn repeat(&self, period: Duration, event: ControllerEvent) -> Subscription;

    /// Delivers `event` once after `delay`.
    fn once(&self, delay: Duration, event: ControllerEvent) -> Subscription;
}

pub struct TokioScheduler {
    runtime: Handle,
    sink: EventSink,
}

impl TokioScheduler {
    #[must_use]
    pub const fn new(runtime: Handle, sink: EventSink) -> Self {
        Self { runtime, sink }
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn repeat(&self, period: Duration, event: ControllerEvent) -> Subscription {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let sink = self.sink.clone();
        self.runtime.spawn(async move {
            let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    _ = tick.tick() => {
                        if sink.send(event.clone()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Subscription::new(token)
    }

    fn once(&self, delay: Duration, event: ControllerEvent) -> Subscription {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let sink = self.sink.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = sink.send(event);
                }
            }
        });
        Subscription::new(token)
    }
}
