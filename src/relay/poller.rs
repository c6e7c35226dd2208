//! Repeating per-topic timers.
//!
//! Each tick is spawned as its own task, so a slow tick never delays the
//! next one and ticks may overlap. Stopping a poller cancels future ticks
//! only; a tick already running finishes on its own.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use portrelay_common::Topic;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Default)]
pub struct PollerManager {
    pollers: HashMap<Topic, JoinHandle<()>>,
}

impl PollerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start calling `tick` every `period`, first after one full period.
    /// Returns false if `topic` already has a poller.
    pub fn start<F, Fut>(&mut self, topic: Topic, period: Duration, tick: F) -> bool
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.pollers.contains_key(&topic) {
            return false;
        }

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tokio::spawn(tick());
            }
        });
        self.pollers.insert(topic, handle);
        true
    }

    /// Returns false if nothing was running for `topic`.
    pub fn stop(&mut self, topic: Topic) -> bool {
        match self.pollers.remove(&topic) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, topic: Topic) -> bool {
        self.pollers.contains_key(&topic)
    }
}

impl Drop for PollerManager {
    fn drop(&mut self) {
        for handle in self.pollers.values() {
            handle.abort();
        }
    }
}
