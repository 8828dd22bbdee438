//! Interfaces of the host platform the timer engine runs in.
//!
//! The engine only needs a handful of things from its host: reading and writing entity states, being told when
//! entities appear or disappear, and invoking services on source entities.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HostError;

pub const ATTR_FRIENDLY_NAME: &str = "friendly_name";

pub type Attributes = HashMap<String, serde_json::Value>;

/// Visible state of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl EntityState {
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes,
        }
    }

    pub fn friendly_name(&self) -> Option<&str> {
        self.attributes.get(ATTR_FRIENDLY_NAME).and_then(|v| v.as_str())
    }
}

/// A state change reported by the host's event bus.
///
/// `old_state == None` means the entity was just added, `new_state == None` means it was removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangedEvent {
    pub entity_id: String,
    pub old_state: Option<EntityState>,
    pub new_state: Option<EntityState>,
}

impl StateChangedEvent {
    pub fn is_added(&self) -> bool {
        self.old_state.is_none() && self.new_state.is_some()
    }

    pub fn is_removed(&self) -> bool {
        self.new_state.is_none()
    }
}

/// Entity state registry of the host.
pub trait StateRegistry {
    fn get_state(&self, entity_id: &str) -> Option<EntityState>;

    fn set_state(&self, entity_id: &str, state: &str, attributes: Attributes);

    fn remove_state(&self, entity_id: &str);

    fn entity_ids(&self) -> Vec<String>;

    fn contains(&self, entity_id: &str) -> bool {
        self.get_state(entity_id).is_some()
    }
}

/// Service invocation on the host, e.g. `light.turn_on` for `light.kitchen`.
#[async_trait]
pub trait ServiceCaller {
    async fn call_service(&self, domain: &str, service: &str, entity_id: &str) -> Result<(), HostError>;
}

/// Everything the engine needs from the host.
pub trait Host: StateRegistry + ServiceCaller {}

impl<T: StateRegistry + ServiceCaller> Host for T {}
