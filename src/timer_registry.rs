use std::collections::HashMap;

use crate::{
    entity_mapper::{ShadowEntityMap, SourceDomain},
    model::TimerRecord,
    timer_manager::TimerHandle,
    timer_store::TimerSnapshot,
};

/// A timer taken out of the registry together with the handle of its scheduled callback.
#[derive(Debug)]
pub struct Disarmed {
    pub record: TimerRecord,
    pub handle: TimerHandle,
}

/// In-memory table of active timers, their cancellation handles and the known shadow entities.
///
/// A timer id is present in `timers` exactly when it is present in `handles`; both tables are only changed together.
#[derive(Debug, Default)]
pub struct TimerRegistry {
    timers: HashMap<String, TimerRecord>,
    handles: HashMap<String, TimerHandle>,
    shadows: ShadowEntityMap,
    // loaded from storage, waiting for their source entity to show up
    pending: TimerSnapshot,
}

impl TimerRegistry {
    pub fn new(pending: TimerSnapshot) -> Self {
        Self {
            pending,
            ..Default::default()
        }
    }

    /// Arms `timer_id`. An already armed timer is replaced and its scheduled callback cancelled.
    pub fn arm(&mut self, timer_id: &str, record: TimerRecord, handle: TimerHandle) {
        if let Some(previous) = self.handles.insert(timer_id.to_string(), handle) {
            log::debug!("Replacing scheduled timer {} [{}]", timer_id, previous.generation());
            previous.cancel();
        }
        self.timers.insert(timer_id.to_string(), record);
    }

    /// Removes `timer_id` from both tables. `None` if it was not armed.
    pub fn disarm(&mut self, timer_id: &str) -> Option<Disarmed> {
        let record = self.timers.remove(timer_id);
        let handle = self.handles.remove(timer_id);
        match (record, handle) {
            (Some(record), Some(handle)) => Some(Disarmed { record, handle }),
            _ => None,
        }
    }

    pub fn is_armed(&self, timer_id: &str) -> bool {
        self.timers.contains_key(timer_id)
    }

    pub fn armed_generation(&self, timer_id: &str) -> Option<u64> {
        self.handles.get(timer_id).map(|h| h.generation())
    }

    pub fn get(&self, timer_id: &str) -> Option<&TimerRecord> {
        self.timers.get(timer_id)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }

    pub fn shadows(&self) -> &ShadowEntityMap {
        &self.shadows
    }

    pub fn has_shadow(&self, timer_id: &str) -> bool {
        self.shadows.contains_key(timer_id)
    }

    pub fn add_shadow(&mut self, timer_id: &str, domain: SourceDomain) {
        self.shadows.insert(timer_id.to_string(), domain);
    }

    pub fn remove_shadow(&mut self, timer_id: &str) -> Option<SourceDomain> {
        self.shadows.remove(timer_id)
    }

    pub fn take_pending(&mut self, timer_id: &str) -> Option<TimerRecord> {
        self.pending.remove(timer_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Everything that has to survive a restart: armed timers plus records still waiting to be restored.
    pub fn snapshot(&self) -> TimerSnapshot {
        let mut snapshot = self.pending.clone();
        snapshot.extend(self.timers.iter().map(|(id, record)| (id.clone(), record.clone())));
        snapshot
    }

    /// Cancels every scheduled callback and moves the armed records back to the restorable ones, so they stay part
    /// of [`TimerRegistry::snapshot`].
    pub fn suspend(&mut self) {
        log::debug!("Suspending {} armed timer(s)", self.timers.len());
        for (_, handle) in self.handles.drain() {
            handle.cancel();
        }
        self.pending.extend(self.timers.drain());
    }
}
