//! Keeps shadow timer entities, the timer registry and the persisted snapshot consistent.
//!
//! Per shadow entity the engine moves between three states:
//!
//! * absent: no shadow entity, no mapping
//! * idle: shadow entity exists, nothing armed
//! * set: shadow entity exists, timer armed and its callback scheduled
//!
//! Source entities appearing create idle shadows (or set ones when a stored timer can be restored), source entities
//! disappearing tear everything down again. Every transition updates the registry first, then the visible state and
//! persists last.

use chrono::{DateTime, Local, Utc};
use serde_json::json;

use crate::{
    entity_mapper::{is_supported_source, source_to_timer_id, timer_to_source},
    error::TimerError,
    host::{Attributes, Host, StateChangedEvent, ATTR_FRIENDLY_NAME},
    model::{format_finishing_at, TimerAction, TimerRecord},
    timer_manager::{TimerEvent, TimerManager},
    timer_registry::TimerRegistry,
    timer_store::{TimerSnapshot, TimerStore},
};

pub const STATE_IDLE: &str = "idle";
pub const STATE_SET: &str = "set";

pub const ATTR_FINISHING_AT: &str = "finishing_at";
pub const ATTR_DURATION: &str = "duration";
pub const ATTR_ACTION: &str = "action";

pub(crate) fn idle_attributes(friendly_name: &str) -> Attributes {
    Attributes::from([(ATTR_FRIENDLY_NAME.to_string(), json!(friendly_name))])
}

pub(crate) fn set_attributes(friendly_name: &str, record: &TimerRecord) -> Attributes {
    Attributes::from([
        (ATTR_FRIENDLY_NAME.to_string(), json!(friendly_name)),
        (ATTR_FINISHING_AT.to_string(), json!(format_finishing_at(&record.finishing_at))),
        (ATTR_DURATION.to_string(), json!(record.duration.to_string())),
        (ATTR_ACTION.to_string(), json!(record.action.service())),
    ])
}

pub(crate) fn local_time(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M").to_string()
}

pub struct TimerEngine<H: Host> {
    pub(crate) host: H,
    pub(crate) timers: TimerManager,
    pub(crate) store: TimerStore,
    pub(crate) registry: TimerRegistry,
    store_diverged: bool,
    shut_down: bool,
}

impl<H: Host> TimerEngine<H> {
    pub fn new(host: H, timers: TimerManager, store: TimerStore) -> Self {
        Self {
            host,
            timers,
            store,
            registry: TimerRegistry::default(),
            store_diverged: false,
            shut_down: false,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn registry(&self) -> &TimerRegistry {
        &self.registry
    }

    pub fn store(&self) -> &TimerStore {
        &self.store
    }

    /// True while the last save failed and storage lags behind the in-memory registry.
    pub fn is_store_diverged(&self) -> bool {
        self.store_diverged
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Loads the stored snapshot and drops timers that finished while we were not running. The store is only
    /// rewritten when something was dropped, an empty load may also be a store that could not be read.
    /// Source entities the host already knows are adopted right away.
    pub async fn start(&mut self) -> Result<(), TimerError> {
        let stored = self.store.load().await?;
        let now = Utc::now();
        let (unfinished, expired): (TimerSnapshot, TimerSnapshot) =
            stored.into_iter().partition(|(_, record)| !record.is_expired(now));

        for (timer_id, record) in &expired {
            log::info!(
                "Discarding stored timer for {}: finished at {} while not running",
                timer_id,
                format_finishing_at(&record.finishing_at)
            );
        }

        self.registry = TimerRegistry::new(unfinished);
        if !expired.is_empty() {
            self.persist().await;
        }

        let existing: Vec<String> = self
            .host
            .entity_ids()
            .into_iter()
            .filter(|id| is_supported_source(id))
            .collect();
        for source in existing {
            self.source_added(&source).await;
        }
        log::debug!(
            "Timer engine started: {} timer(s) restorable, {} armed",
            self.registry.pending_count(),
            self.registry.armed_count()
        );
        Ok(())
    }

    pub async fn handle_state_changed(&mut self, event: StateChangedEvent) {
        if !is_supported_source(&event.entity_id) {
            return;
        }
        if self.shut_down {
            log::debug!("Ignoring state change of {} during shutdown", event.entity_id);
            return;
        }
        if event.is_added() {
            self.source_added(&event.entity_id).await;
        } else if event.is_removed() {
            self.source_removed(&event.entity_id).await;
        }
    }

    async fn source_added(&mut self, source: &str) {
        let Some((domain, timer_id)) = source_to_timer_id(source) else {
            return;
        };
        if self.registry.has_shadow(&timer_id) {
            log::trace!("Shadow entity {} already exists, ignoring {}", timer_id, source);
            return;
        }

        self.registry.add_shadow(&timer_id, domain);
        let friendly_name = self.source_friendly_name(source);
        self.host.set_state(&timer_id, STATE_IDLE, idle_attributes(&friendly_name));
        log::info!("Entity {} created for {}", timer_id, source);

        self.restore(&timer_id, source, &friendly_name).await;
    }

    async fn restore(&mut self, timer_id: &str, source: &str, friendly_name: &str) {
        let Some(record) = self.registry.take_pending(timer_id) else {
            return;
        };

        if record.corresponding_entity != source {
            log::warn!(
                "Stored timer for {} belongs to {}, not {}. Discarding it",
                timer_id,
                record.corresponding_entity,
                source
            );
            self.persist().await;
            return;
        }
        if record.is_expired(Utc::now()) {
            log::info!("Stored timer for {} elapsed before {} appeared. Discarding it", timer_id, source);
            self.persist().await;
            return;
        }

        self.host.set_state(timer_id, STATE_SET, set_attributes(friendly_name, &record));
        let handle = self.timers.schedule_at(timer_id, record.finishing_at, record.action);
        let (action, finishing_at) = (record.action, record.finishing_at);
        self.registry.arm(timer_id, record, handle);

        log::info!(
            "Ongoing timer restored for {} entity. Device will {} at {}",
            timer_id,
            action.describe(),
            local_time(&finishing_at)
        );
    }

    async fn source_removed(&mut self, source: &str) {
        let Some((domain, timer_id)) = source_to_timer_id(source) else {
            return;
        };
        if self.registry.shadows().get(&timer_id) != Some(&domain) {
            log::trace!("No shadow entity for {}, ignoring removal", source);
            return;
        }

        let had_timer = match self.registry.disarm(&timer_id) {
            Some(disarmed) => {
                log::debug!("Cancelling {} timer for removed entity {}", disarmed.record.action, source);
                disarmed.handle.cancel();
                true
            }
            None => false,
        };
        self.registry.remove_shadow(&timer_id);
        self.host.remove_state(&timer_id);
        if had_timer {
            self.persist().await;
        }

        log::info!("Entity {} removed. Source entity {} no longer present", timer_id, source);
    }

    /// Runs the action of an elapsed timer. Events of timers that were cancelled or re-armed in the meantime are
    /// recognised by their generation and ignored.
    pub async fn handle_timer_event(&mut self, event: TimerEvent) {
        let timer_id = event.timer_id.as_str();
        if self.shut_down {
            log::debug!("Ignoring timer event for {} during shutdown", timer_id);
            return;
        }
        if self.registry.armed_generation(timer_id) != Some(event.generation) {
            log::debug!("Ignoring stale timer event for {} [{}]", timer_id, event.generation);
            return;
        }

        let source = timer_to_source(timer_id, self.registry.shadows());
        // removed before the action runs so nothing can cancel or fire it a second time
        let Some(disarmed) = self.registry.disarm(timer_id) else {
            return;
        };
        let action = disarmed.record.action;

        let source = match source {
            Ok(source) => source,
            Err(err) => {
                log::error!("Cannot run elapsed timer {}: {}", timer_id, err);
                if self.host.contains(timer_id) {
                    let friendly_name = self.shadow_friendly_name(timer_id);
                    self.host.set_state(timer_id, STATE_IDLE, idle_attributes(&friendly_name));
                }
                self.persist().await;
                return;
            }
        };

        let result = self
            .host
            .call_service(source.domain.as_str(), action.service(), &source.entity_id)
            .await;

        // source or shadow may have been torn down while the service call was running
        if self.registry.has_shadow(timer_id) && self.host.contains(&source.entity_id) {
            let friendly_name = self.source_friendly_name(&source.entity_id);
            self.host.set_state(timer_id, STATE_IDLE, idle_attributes(&friendly_name));
        }
        self.persist().await;

        match result {
            Ok(()) => log::info!(
                "Timer duration over on {}. {}",
                timer_id,
                self.describe_outcome(action, &source.entity_id)
            ),
            Err(err) => log::error!("Timer duration over on {}, but the device action failed: {}", timer_id, err),
        }
    }

    fn describe_outcome(&self, action: TimerAction, source: &str) -> String {
        match action {
            TimerAction::TurnOn => "Device turned on".to_string(),
            TimerAction::TurnOff => "Device turned off".to_string(),
            TimerAction::Toggle => match self.host.get_state(source) {
                Some(state) => format!("Device turned {}", state.state),
                None => "Device toggled".to_string(),
            },
        }
    }

    /// `"<source friendly name> timer"`, falling back to the source entity id.
    pub(crate) fn source_friendly_name(&self, source: &str) -> String {
        let name = self
            .host
            .get_state(source)
            .and_then(|s| s.friendly_name().map(str::to_string))
            .unwrap_or_else(|| source.to_string());
        format!("{} timer", name)
    }

    /// The friendly name a shadow entity currently shows, falling back to its id.
    pub(crate) fn shadow_friendly_name(&self, timer_id: &str) -> String {
        self.host
            .get_state(timer_id)
            .and_then(|s| s.friendly_name().map(str::to_string))
            .unwrap_or_else(|| timer_id.to_string())
    }

    /// Writes the full snapshot. A failure leaves memory ahead of storage; it is logged and flagged so the next
    /// [`TimerEngine::retry_persist`] tries again.
    pub async fn persist(&mut self) -> bool {
        match self.store.save(&self.registry.snapshot()).await {
            Ok(()) => {
                if self.store_diverged {
                    log::info!("Timer store [{}] is in sync again", self.store.key());
                }
                self.store_diverged = false;
                true
            }
            Err(err) => {
                log::error!("Failed to persist timers, in-memory state is ahead of storage: {}", err);
                self.store_diverged = true;
                false
            }
        }
    }

    pub async fn retry_persist(&mut self) {
        if self.store_diverged {
            log::debug!("Retrying to persist timers to [{}]", self.store.key());
            self.persist().await;
        }
    }

    /// Cancels all scheduled callbacks. Their records stay in the snapshot, so the timers resume after a restart.
    /// Afterwards commands are rejected and state changes and timer events are ignored.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.registry.suspend();
        self.shut_down = true;
    }
}
