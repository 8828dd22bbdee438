use std::{fs, time::Duration};

use async_trait::async_trait;
use chrono::{SubsecRound, TimeDelta, Utc};
use serde_json::json;
use simple_kv_store::{InMemoryStore, KeyValueStore, SQLiteStore};
use switch_timer::{
    error::HostError,
    host::{Attributes, EntityState, ServiceCaller, StateChangedEvent, StateRegistry},
    memory_host::{MemoryHost, ServiceCall},
    model::{format_finishing_at, TimerAction, TimerRecord},
    timer_manager::{TimerEvent, TimerManager},
    timer_store::{TimerSnapshot, TimerStore},
    CancelTimerData, SetTimerData, TimerEngine, TimerError, ValidationError,
};
use tempfile::TempDir;
use tokio::sync::mpsc::Receiver;

const STORAGE_KEY: &str = "switch_timer";

struct Harness {
    engine: TimerEngine<MemoryHost>,
    host: MemoryHost,
    host_events: Receiver<StateChangedEvent>,
    timer_events: Receiver<TimerEvent>,
}

impl Harness {
    async fn start(stored: TimerSnapshot, sources: &[(&str, Option<&str>)]) -> Self {
        let kv = KeyValueStore::InMemory(InMemoryStore::new());
        TimerStore::new(kv.clone(), STORAGE_KEY).save(&stored).await.unwrap();
        Self::start_with(kv, sources).await
    }

    async fn start_with(kv: KeyValueStore, sources: &[(&str, Option<&str>)]) -> Self {
        let (host, host_events) = MemoryHost::new();
        for (entity_id, name) in sources {
            host.add_entity(entity_id, *name);
        }
        let (timers, timer_events) = TimerManager::new();
        let mut engine = TimerEngine::new(host.clone(), timers, TimerStore::new(kv, STORAGE_KEY));
        engine.start().await.unwrap();

        let mut harness = Self {
            engine,
            host,
            host_events,
            timer_events,
        };
        harness.pump().await;
        harness
    }

    /// Feeds every pending host event into the engine.
    async fn pump(&mut self) {
        while let Ok(event) = self.host_events.try_recv() {
            self.engine.handle_state_changed(event).await;
        }
    }

    async fn set_timer(&mut self, entity_id: &str, action: &str, duration: &str) -> Result<(), TimerError> {
        self.engine
            .set_timer(&SetTimerData {
                entity_id: entity_id.to_string(),
                action: action.to_string(),
                duration: duration.to_string(),
            })
            .await
    }

    async fn cancel_timer(&mut self, entity_id: &str) -> Result<(), TimerError> {
        self.engine
            .cancel_timer(&CancelTimerData {
                entity_id: entity_id.to_string(),
            })
            .await
    }

    /// Runs every timer callback that fires within `window`.
    async fn run_timers_for(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.timer_events.recv()).await {
            self.engine.handle_timer_event(event).await;
        }
    }

    async fn stored(&self) -> TimerSnapshot {
        self.engine.store().load().await.unwrap()
    }

    fn state(&self, entity_id: &str) -> Option<String> {
        self.host.get_state(entity_id).map(|s| s.state)
    }
}

fn record(source: &str, in_secs: i64, action: TimerAction) -> TimerRecord {
    TimerRecord {
        finishing_at: (Utc::now() + TimeDelta::seconds(in_secs)).trunc_subsecs(6),
        corresponding_entity: source.to_string(),
        duration: "01:00:00".parse().unwrap(),
        action,
    }
}

#[tokio::test]
async fn test_supported_sources_get_idle_shadow() {
    let mut h = Harness::start(TimerSnapshot::new(), &[]).await;
    h.host.add_entity("switch.lamp", Some("Desk Lamp"));
    h.host.add_entity("light.kitchen", None);
    h.host.add_entity("sensor.temperature", None);
    h.pump().await;

    let lamp = h.host.get_state("switch_timer.lamp").unwrap();
    assert_eq!(lamp.state, "idle");
    assert_eq!(lamp.attributes.len(), 1);
    assert_eq!(lamp.attributes["friendly_name"], json!("Desk Lamp timer"));

    let kitchen = h.host.get_state("switch_timer.kitchen").unwrap();
    assert_eq!(kitchen.attributes["friendly_name"], json!("light.kitchen timer"));

    assert!(h.host.get_state("switch_timer.temperature").is_none());
    assert_eq!(h.engine.registry().shadows().len(), 2);

    // removing and re-adding the source recreates the same shadow entity
    h.host.remove_state("switch.lamp");
    h.host.add_entity("switch.lamp", Some("Desk Lamp"));
    h.pump().await;
    assert_eq!(h.engine.registry().shadows().len(), 2);
    assert_eq!(h.state("switch_timer.lamp").as_deref(), Some("idle"));
}

#[tokio::test(start_paused = true)]
async fn test_set_timer_fires_action() {
    let mut h = Harness::start(TimerSnapshot::new(), &[("switch.lamp", Some("Lamp"))]).await;
    let started = tokio::time::Instant::now();

    h.set_timer("switch_timer.lamp", "Turn on", "00:00:05").await.unwrap();

    let shadow = h.host.get_state("switch_timer.lamp").unwrap();
    assert_eq!(shadow.state, "set");
    assert_eq!(shadow.attributes["action"], json!("turn_on"));
    assert_eq!(shadow.attributes["duration"], json!("00:00:05"));
    assert_eq!(shadow.attributes["friendly_name"], json!("Lamp timer"));
    let stored = h.stored().await;
    assert_eq!(
        shadow.attributes["finishing_at"],
        json!(format_finishing_at(&stored["switch_timer.lamp"].finishing_at))
    );
    assert_eq!(stored["switch_timer.lamp"].corresponding_entity, "switch.lamp");
    assert!(h.engine.registry().is_armed("switch_timer.lamp"));

    let event = h.timer_events.recv().await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(4));
    h.engine.handle_timer_event(event).await;

    assert_eq!(
        h.host.service_calls(),
        vec![ServiceCall {
            domain: "switch".to_string(),
            service: "turn_on".to_string(),
            entity_id: "switch.lamp".to_string(),
        }]
    );
    assert_eq!(h.state("switch.lamp").as_deref(), Some("on"));
    let shadow = h.host.get_state("switch_timer.lamp").unwrap();
    assert_eq!(shadow.state, "idle");
    assert_eq!(shadow.attributes.len(), 1);
    assert!(!h.engine.registry().is_armed("switch_timer.lamp"));
    assert!(h.stored().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_armed_timer() {
    let mut h = Harness::start(TimerSnapshot::new(), &[("switch.lamp", None)]).await;
    h.set_timer("switch_timer.lamp", "turn_off", "00:00:05").await.unwrap();

    h.cancel_timer("switch_timer.lamp").await.unwrap();
    assert_eq!(h.state("switch_timer.lamp").as_deref(), Some("idle"));
    assert!(h.stored().await.is_empty());

    h.run_timers_for(Duration::from_secs(30)).await;
    assert!(h.host.service_calls().is_empty());
    assert_eq!(h.state("switch_timer.lamp").as_deref(), Some("idle"));
}

#[tokio::test]
async fn test_cancel_without_timer_is_rejected() {
    let mut h = Harness::start(TimerSnapshot::new(), &[("switch.lamp", None)]).await;

    let err = h.cancel_timer("switch_timer.lamp").await.unwrap_err();
    assert_eq!(err.to_string(), "Timer not set for switch_timer.lamp entity");
    assert_eq!(h.state("switch_timer.lamp").as_deref(), Some("idle"));

    let err = h.cancel_timer("switch_timer.nothing").await.unwrap_err();
    assert_eq!(err.to_string(), "Entity switch_timer.nothing doesn't exist");
}

#[tokio::test(start_paused = true)]
async fn test_cancel_twice() {
    let mut h = Harness::start(TimerSnapshot::new(), &[("fan.attic", None)]).await;
    h.set_timer("switch_timer.attic", "Toggle", "00:10:00").await.unwrap();

    h.cancel_timer("switch_timer.attic").await.unwrap();
    let err = h.cancel_timer("switch_timer.attic").await.unwrap_err();
    assert!(matches!(
        err,
        TimerError::Validation(ValidationError::TimerNotSet(ref id)) if id == "switch_timer.attic"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_restore_after_restart() {
    let stored_record = record("light.kitchen", 3600, TimerAction::TurnOff);
    let stored = TimerSnapshot::from([("switch_timer.kitchen".to_string(), stored_record.clone())]);
    let mut h = Harness::start(stored, &[]).await;
    let started = tokio::time::Instant::now();

    assert!(h.host.get_state("switch_timer.kitchen").is_none());
    assert_eq!(h.engine.registry().pending_count(), 1);

    h.host.add_entity("light.kitchen", Some("Kitchen"));
    h.pump().await;

    let shadow = h.host.get_state("switch_timer.kitchen").unwrap();
    assert_eq!(shadow.state, "set");
    assert_eq!(
        shadow.attributes["finishing_at"],
        json!(format_finishing_at(&stored_record.finishing_at))
    );
    assert_eq!(shadow.attributes["action"], json!("turn_off"));
    assert_eq!(shadow.attributes["duration"], json!("01:00:00"));
    assert_eq!(h.engine.registry().get("switch_timer.kitchen"), Some(&stored_record));
    assert_eq!(h.stored().await["switch_timer.kitchen"], stored_record);

    let event = h.timer_events.recv().await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(3590));
    h.engine.handle_timer_event(event).await;
    assert_eq!(h.host.service_calls()[0].entity_id, "light.kitchen");
    assert_eq!(h.host.service_calls()[0].service, "turn_off");
    assert_eq!(h.state("switch_timer.kitchen").as_deref(), Some("idle"));
    assert!(h.stored().await.is_empty());
}

#[tokio::test]
async fn test_invalid_duration_is_rejected() {
    let mut h = Harness::start(TimerSnapshot::new(), &[("switch.lamp", None)]).await;

    let err = h.set_timer("switch_timer.lamp", "turn_on", "25:00:00").await.unwrap_err();
    assert!(matches!(err, TimerError::Validation(ValidationError::InvalidDuration)));
    assert_eq!(h.state("switch_timer.lamp").as_deref(), Some("idle"));
    assert!(!h.engine.registry().is_armed("switch_timer.lamp"));
    assert!(h.stored().await.is_empty());
}

#[tokio::test]
async fn test_set_timer_validation() {
    let mut h = Harness::start(TimerSnapshot::new(), &[("switch.lamp", None)]).await;

    let err = h.set_timer("switch.lamp", "turn_on", "00:01:00").await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid entity specified");
    let err = h.set_timer("switch_timer.ghost", "turn_on", "00:01:00").await.unwrap_err();
    assert_eq!(err.to_string(), "Entity switch_timer.ghost doesn't exist");
    let err = h.set_timer("switch_timer.lamp", "blink", "00:01:00").await.unwrap_err();
    assert!(matches!(err, TimerError::Validation(ValidationError::InvalidAction)));

    assert_eq!(h.engine.registry().armed_count(), 0);
    assert!(h.stored().await.is_empty());
}

#[tokio::test]
async fn test_expired_timers_dropped_on_start() {
    let stored = TimerSnapshot::from([
        ("switch_timer.lamp".to_string(), record("switch.lamp", -60, TimerAction::TurnOn)),
        ("switch_timer.kitchen".to_string(), record("light.kitchen", 600, TimerAction::TurnOn)),
    ]);
    let mut h = Harness::start(stored, &[]).await;

    let rewritten = h.stored().await;
    assert_eq!(rewritten.len(), 1);
    assert!(rewritten.contains_key("switch_timer.kitchen"));

    h.host.add_entity("switch.lamp", None);
    h.pump().await;
    assert_eq!(h.state("switch_timer.lamp").as_deref(), Some("idle"));
    assert!(!h.engine.registry().is_armed("switch_timer.lamp"));
}

#[tokio::test(start_paused = true)]
async fn test_existing_entities_adopted_on_start() {
    let stored = TimerSnapshot::from([(
        "switch_timer.lamp".to_string(),
        record("switch.lamp", 120, TimerAction::Toggle),
    )]);
    let h = Harness::start(stored, &[("switch.lamp", Some("Lamp")), ("fan.attic", None)]).await;

    assert_eq!(h.state("switch_timer.lamp").as_deref(), Some("set"));
    assert_eq!(h.state("switch_timer.attic").as_deref(), Some("idle"));
    assert!(h.engine.registry().is_armed("switch_timer.lamp"));
    assert_eq!(h.engine.registry().pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_source_removal_disarms() {
    let mut h = Harness::start(TimerSnapshot::new(), &[("switch.lamp", None)]).await;
    h.set_timer("switch_timer.lamp", "turn_on", "00:00:30").await.unwrap();

    h.host.remove_state("switch.lamp");
    h.pump().await;

    assert!(h.host.get_state("switch_timer.lamp").is_none());
    assert!(!h.engine.registry().has_shadow("switch_timer.lamp"));
    assert!(!h.engine.registry().is_armed("switch_timer.lamp"));
    assert!(h.stored().await.is_empty());

    h.run_timers_for(Duration::from_secs(60)).await;
    assert!(h.host.service_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rearm_replaces_previous_schedule() {
    let mut h = Harness::start(TimerSnapshot::new(), &[("switch.lamp", None)]).await;
    h.set_timer("switch_timer.lamp", "turn_on", "00:00:05").await.unwrap();
    h.set_timer("switch_timer.lamp", "turn_off", "00:00:10").await.unwrap();

    assert_eq!(h.stored().await["switch_timer.lamp"].action, TimerAction::TurnOff);
    h.run_timers_for(Duration::from_secs(30)).await;

    let calls = h.host.service_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].service, "turn_off");
}

#[tokio::test]
async fn test_mismatched_stored_timer_discarded() {
    let stored = TimerSnapshot::from([(
        "switch_timer.kitchen".to_string(),
        record("switch.kitchen", 600, TimerAction::TurnOn),
    )]);
    let mut h = Harness::start(stored, &[]).await;

    h.host.add_entity("light.kitchen", None);
    h.pump().await;

    assert_eq!(h.state("switch_timer.kitchen").as_deref(), Some("idle"));
    assert!(h.stored().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_pending_restore_survives_other_writes() {
    let pending = record("light.kitchen", 600, TimerAction::TurnOn);
    let stored = TimerSnapshot::from([("switch_timer.kitchen".to_string(), pending.clone())]);
    let mut h = Harness::start(stored, &[("switch.lamp", None)]).await;

    h.set_timer("switch_timer.lamp", "turn_on", "00:01:00").await.unwrap();
    let snapshot = h.stored().await;
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot["switch_timer.kitchen"], pending);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_keeps_stored_timers() {
    let kv = KeyValueStore::InMemory(InMemoryStore::new());
    let mut h = Harness::start_with(kv.clone(), &[("switch.lamp", None), ("switch.desk", None)]).await;
    h.set_timer("switch_timer.lamp", "turn_off", "01:00:00").await.unwrap();
    let armed = h.engine.registry().get("switch_timer.lamp").cloned().unwrap();

    h.engine.shutdown();
    assert!(h.engine.is_shut_down());
    assert!(!h.engine.registry().is_armed("switch_timer.lamp"));

    let err = h.set_timer("switch_timer.desk", "turn_on", "00:10:00").await.unwrap_err();
    assert!(matches!(err, TimerError::ShuttingDown));
    assert!(matches!(
        h.cancel_timer("switch_timer.lamp").await,
        Err(TimerError::ShuttingDown)
    ));
    h.host.remove_state("switch.lamp");
    h.pump().await;

    // a save after shutdown still carries the suspended timer
    assert!(h.engine.persist().await);
    assert_eq!(h.stored().await, TimerSnapshot::from([("switch_timer.lamp".to_string(), armed.clone())]));

    h.run_timers_for(Duration::from_secs(7200)).await;
    assert!(h.host.service_calls().is_empty());

    let restarted = Harness::start_with(kv, &[("switch.lamp", None)]).await;
    assert_eq!(restarted.state("switch_timer.lamp").as_deref(), Some("set"));
    assert_eq!(restarted.engine.registry().get("switch_timer.lamp"), Some(&armed));
}

#[tokio::test]
async fn test_failed_save_is_retried() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("timers.db");
    let kv = KeyValueStore::SQLite(SQLiteStore::new(db.to_str().unwrap()).await);
    let mut h = Harness::start_with(kv, &[("switch.lamp", None)]).await;
    assert!(!h.engine.is_store_diverged());

    // sqlite cannot create its rollback journal while a directory occupies the path
    let journal = dir.path().join("timers.db-journal");
    fs::create_dir(&journal).unwrap();

    h.set_timer("switch_timer.lamp", "turn_on", "00:30:00").await.unwrap();
    assert!(h.engine.is_store_diverged());
    assert!(h.engine.registry().is_armed("switch_timer.lamp"));
    h.engine.retry_persist().await;
    assert!(h.engine.is_store_diverged());

    fs::remove_dir(&journal).unwrap();
    h.engine.retry_persist().await;
    assert!(!h.engine.is_store_diverged());
    assert_eq!(h.stored().await["switch_timer.lamp"].corresponding_entity, "switch.lamp");
}

#[tokio::test]
async fn test_unreadable_store_not_overwritten_on_start() {
    let memory = InMemoryStore::new();
    memory.set(STORAGE_KEY, "{not json").await.unwrap();

    let h = Harness::start_with(KeyValueStore::InMemory(memory.clone()), &[("switch.lamp", None)]).await;
    assert_eq!(h.state("switch_timer.lamp").as_deref(), Some("idle"));
    assert_eq!(memory.get(STORAGE_KEY).await.as_deref(), Some("{not json"));
}

/// Host whose source entity disappears while its service call runs.
#[derive(Clone)]
struct VanishingHost(MemoryHost);

impl StateRegistry for VanishingHost {
    fn get_state(&self, entity_id: &str) -> Option<EntityState> {
        self.0.get_state(entity_id)
    }

    fn set_state(&self, entity_id: &str, state: &str, attributes: Attributes) {
        self.0.set_state(entity_id, state, attributes)
    }

    fn remove_state(&self, entity_id: &str) {
        self.0.remove_state(entity_id)
    }

    fn entity_ids(&self) -> Vec<String> {
        self.0.entity_ids()
    }
}

#[async_trait]
impl ServiceCaller for VanishingHost {
    async fn call_service(&self, domain: &str, service: &str, entity_id: &str) -> Result<(), HostError> {
        self.0.remove_state(entity_id);
        self.0.call_service(domain, service, entity_id).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_source_removed_while_action_runs() {
    let (memory, mut host_events) = MemoryHost::new();
    memory.add_entity("switch.lamp", Some("Lamp"));
    let (timers, mut timer_events) = TimerManager::new();
    let store = TimerStore::new(KeyValueStore::InMemory(InMemoryStore::new()), STORAGE_KEY);
    let mut engine = TimerEngine::new(VanishingHost(memory.clone()), timers, store);
    engine.start().await.unwrap();
    while let Ok(event) = host_events.try_recv() {
        engine.handle_state_changed(event).await;
    }

    engine
        .set_timer(&SetTimerData {
            entity_id: "switch_timer.lamp".to_string(),
            action: "turn_off".to_string(),
            duration: "00:00:05".to_string(),
        })
        .await
        .unwrap();
    let event = timer_events.recv().await.unwrap();
    engine.handle_timer_event(event).await;

    // no idle state written for a shadow whose source is already gone
    assert_eq!(memory.get_state("switch_timer.lamp").unwrap().state, "set");
    assert!(!engine.registry().is_armed("switch_timer.lamp"));
    assert!(engine.store().load().await.unwrap().is_empty());

    while let Ok(event) = host_events.try_recv() {
        engine.handle_state_changed(event).await;
    }
    assert!(memory.get_state("switch_timer.lamp").is_none());
    assert!(!engine.registry().has_shadow("switch_timer.lamp"));
    assert_eq!(memory.service_calls().len(), 1);
}
