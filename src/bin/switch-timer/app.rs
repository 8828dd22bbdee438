use color_eyre::eyre::Result;
use simple_kv_store::{InMemoryStore, KeyValueStore, KubernetesStore, SQLiteStore};
use tokio::sync::mpsc;

use switch_timer::{
    app_state::{AppEvent, AppState},
    memory_host::MemoryHost,
    settings::{ValueStoreConfig, CHANNEL_CAPACITY, SETTINGS},
    timer_manager::TimerManager,
    timer_store::TimerStore,
    TimerEngine,
};

use crate::{
    console::{run_console, ConsoleHandle},
    eventloop::EventMultiPlexer,
};

pub async fn initialize_app() -> Result<(EventMultiPlexer, ConsoleHandle, AppState)> {
    let settings = &SETTINGS;

    let (app_event_sender, app_event_receiver) = mpsc::channel::<AppEvent>(CHANNEL_CAPACITY);

    // Setup host
    // =====================================================
    let (host, state_changed_receiver) = MemoryHost::new();
    for seed in &settings.entities.0 {
        log::debug!("Registering source entity {}", seed.entity_id);
        host.add_entity(&seed.entity_id, seed.friendly_name.as_deref());
    }

    // Timer store
    // =====================================================
    let value_store = match &settings.value_store_config {
        ValueStoreConfig::InMemory => {
            log::warn!("Using in-memory timer store, active timers will not survive a restart");
            KeyValueStore::InMemory(InMemoryStore::new())
        }
        ValueStoreConfig::Kubernetes {
            name,
            namespace,
            ressource_type,
        } => KeyValueStore::Kubernetes(KubernetesStore::new(namespace, name, *ressource_type).await?),
        ValueStoreConfig::Sqlite { path } => KeyValueStore::SQLite(SQLiteStore::new(path).await),
    };
    let store = TimerStore::new(value_store, &settings.storage_key);

    // Setup timers
    // =====================================================
    let (timers, timers_receiver) = TimerManager::new();

    let mut engine = TimerEngine::new(host, timers, store);
    engine.start().await?;

    // Console
    // =====================================================
    let (console_handle, console_receiver) = run_console(CHANNEL_CAPACITY);

    let event_multiplexer = EventMultiPlexer::new(
        app_event_receiver,
        state_changed_receiver,
        timers_receiver,
        console_receiver,
    );

    Ok((
        event_multiplexer,
        console_handle,
        AppState {
            engine,
            app_event_sender,
            should_exit: false,
        },
    ))
}

pub async fn deinitialize_app(console_handle: ConsoleHandle) -> Result<()> {
    console_handle.stop().await;
    log::debug!("Deinitialized app...");
    Ok(())
}
