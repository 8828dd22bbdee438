use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};

use crate::{
    error::HostError,
    host::{Attributes, EntityState, ServiceCaller, StateChangedEvent, StateRegistry, ATTR_FRIENDLY_NAME},
    settings::CHANNEL_CAPACITY,
};

pub const STATE_ON: &str = "on";
pub const STATE_OFF: &str = "off";

/// A service call received by the [`MemoryHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub entity_id: String,
}

#[derive(Debug, Default)]
struct HostInner {
    states: BTreeMap<String, EntityState>,
    service_calls: Vec<ServiceCall>,
}

/// In-process host: a state registry that reports every change on a channel and applies on/off/toggle service
/// calls to the states it holds.
#[derive(Debug, Clone)]
pub struct MemoryHost {
    inner: Arc<Mutex<HostInner>>,
    sender: Sender<StateChangedEvent>,
}

impl MemoryHost {
    pub fn new() -> (Self, Receiver<StateChangedEvent>) {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                inner: Arc::new(Mutex::new(HostInner::default())),
                sender,
            },
            receiver,
        )
    }

    fn lock(&self) -> MutexGuard<'_, HostInner> {
        // a poisoned lock only means a panic happened elsewhere while holding it; the map itself is still usable
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, event: StateChangedEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::warn!("State change channel full, dropping event for [{}]", event.entity_id);
            }
            Err(TrySendError::Closed(event)) => {
                log::trace!("No state change listener for [{}]", event.entity_id);
            }
        }
    }

    /// Registers a source device in the `off` state.
    pub fn add_entity(&self, entity_id: &str, friendly_name: Option<&str>) {
        let mut attributes = Attributes::new();
        if let Some(name) = friendly_name {
            attributes.insert(ATTR_FRIENDLY_NAME.to_string(), name.into());
        }
        self.set_state(entity_id, STATE_OFF, attributes);
    }

    pub fn states(&self) -> Vec<EntityState> {
        self.lock().states.values().cloned().collect()
    }

    pub fn service_calls(&self) -> Vec<ServiceCall> {
        self.lock().service_calls.clone()
    }
}

impl StateRegistry for MemoryHost {
    fn get_state(&self, entity_id: &str) -> Option<EntityState> {
        self.lock().states.get(entity_id).cloned()
    }

    fn set_state(&self, entity_id: &str, state: &str, attributes: Attributes) {
        let new_state = EntityState::new(entity_id, state, attributes);
        let old_state = self.lock().states.insert(entity_id.to_string(), new_state.clone());
        self.publish(StateChangedEvent {
            entity_id: entity_id.to_string(),
            old_state,
            new_state: Some(new_state),
        });
    }

    fn remove_state(&self, entity_id: &str) {
        let old_state = self.lock().states.remove(entity_id);
        if old_state.is_some() {
            self.publish(StateChangedEvent {
                entity_id: entity_id.to_string(),
                old_state,
                new_state: None,
            });
        }
    }

    fn entity_ids(&self) -> Vec<String> {
        self.lock().states.keys().cloned().collect()
    }
}

#[async_trait]
impl ServiceCaller for MemoryHost {
    async fn call_service(&self, domain: &str, service: &str, entity_id: &str) -> Result<(), HostError> {
        let current = {
            let mut inner = self.lock();
            inner.service_calls.push(ServiceCall {
                domain: domain.to_string(),
                service: service.to_string(),
                entity_id: entity_id.to_string(),
            });
            inner.states.get(entity_id).cloned()
        };

        let Some(current) = current else {
            return Err(HostError::ServiceCall {
                domain: domain.to_string(),
                service: service.to_string(),
                entity_id: entity_id.to_string(),
                reason: "entity not found".to_string(),
            });
        };

        let target = match service {
            "turn_on" => STATE_ON,
            "turn_off" => STATE_OFF,
            "toggle" if current.state == STATE_ON => STATE_OFF,
            "toggle" => STATE_ON,
            _ => {
                return Err(HostError::ServiceCall {
                    domain: domain.to_string(),
                    service: service.to_string(),
                    entity_id: entity_id.to_string(),
                    reason: "unknown service".to_string(),
                })
            }
        };
        self.set_state(entity_id, target, current.attributes);
        Ok(())
    }
}
