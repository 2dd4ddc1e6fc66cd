//! timer - single shot timers whose expiries are delivered as events on a channel

use async_channel::Sender;
use atomic_counter::{AtomicCounter, RelaxedCounter};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use stop_token::StopSource;
use stop_token::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(usize);

/// Delivered to the timer's owner when a timer runs to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiry<T> {
    pub id: TimerId,
    pub arg: T,
}

#[derive(Clone)]
pub struct TimerService<T> {
    running: Arc<DashMap<TimerId, (StopSource, T)>>,
    next_id: Arc<RelaxedCounter>,
}

impl<T: Send + Sync + 'static> Default for TimerService<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> TimerService<T> {
    pub fn new() -> Self {
        TimerService {
            running: Arc::new(DashMap::new()),
            next_id: Arc::new(RelaxedCounter::new(1)),
        }
    }

    /// Start a timer.  On expiry, `arg` comes back to the caller as an `Expiry` sent on `sender`.
    pub fn start<E>(&self, duration: Duration, arg: T, sender: Sender<E>) -> TimerId
    where
        E: From<Expiry<T>> + Send + 'static,
    {
        let id = TimerId(self.next_id.inc());
        let source = StopSource::new();
        let token = source.token();
        self.running.insert(id, (source, arg));

        let running = self.running.clone();
        async_std::task::spawn(async move {
            if async_std::task::sleep(duration)
                .timeout_at(token)
                .await
                .is_err()
            {
                // Stopped.
                return;
            }
            // Whoever removes the entry owns the outcome, so a timer stopped just as it
            // fires yields exactly one of stop() returning Some or an expiry.
            if let Some((_, (_source, arg))) = running.remove(&id) {
                let _ = sender.send(Expiry { id, arg }.into()).await;
            }
        });
        id
    }

    /// Stop a timer, recovering its argument.  Returns None if the timer has already
    /// expired or been stopped.
    pub fn stop(&self, id: TimerId) -> Option<T> {
        self.running.remove(&id).map(|(_, (_source, arg))| arg)
    }

    pub fn is_running(&self, id: TimerId) -> bool {
        self.running.contains_key(&id)
    }
}
