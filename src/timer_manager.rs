use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use chrono::{DateTime, Local, Utc};
use tokio::{
    sync::mpsc::{self, Receiver, Sender},
    task::JoinHandle,
};

use crate::{model::TimerAction, settings::CHANNEL_CAPACITY};

/// Sent into the event loop when a scheduled timer reaches its finishing time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEvent {
    pub timer_id: String,
    pub action: TimerAction,
    pub generation: u64,
}

/// Cancellation handle of one scheduled callback. Consumed by [`TimerHandle::cancel`], so it can only be used once.
#[derive(Debug)]
pub struct TimerHandle {
    generation: u64,
    handle: JoinHandle<()>,
}

impl TimerHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(self) {
        self.handle.abort();
    }
}

/// Schedules callbacks at absolute points in time. Each callback is a tokio task sleeping until its deadline which
/// then reports a [`TimerEvent`] on the channel returned by [`TimerManager::new`].
#[derive(Debug, Clone)]
pub struct TimerManager {
    sender: Sender<TimerEvent>,
    generation: Arc<AtomicU64>,
}

impl TimerManager {
    pub fn new() -> (Self, Receiver<TimerEvent>) {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        (
            TimerManager {
                sender,
                generation: Arc::new(AtomicU64::new(0)),
            },
            receiver,
        )
    }

    /// Schedules `action` for `timer_id` at `at`. A deadline in the past fires on the next tick.
    pub fn schedule_at(&self, timer_id: &str, at: DateTime<Utc>, action: TimerAction) -> TimerHandle {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let delay = (at - Utc::now()).to_std().unwrap_or_default();
        let sender = self.sender.clone();
        let event = TimerEvent {
            timer_id: timer_id.to_string(),
            action,
            generation,
        };

        log::debug!(
            "Timer {} [{}] scheduled for {} (in {:?})",
            timer_id,
            generation,
            at.with_timezone(&Local),
            delay
        );

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let id = event.timer_id.clone();
            if let Err(err) = sender.send(event).await {
                log::warn!("Error sending timer trigger: [{}] - {}", id, err);
            }
        });

        TimerHandle { generation, handle }
    }
}
