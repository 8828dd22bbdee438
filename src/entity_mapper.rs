use std::{collections::HashMap, fmt};

use crate::error::TimerError;

/// Domain of every shadow timer entity.
pub const TIMER_DOMAIN: &str = "switch_timer";

/// Domains whose entities get a paired timer entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceDomain {
    Switch,
    Light,
    Fan,
}

impl SourceDomain {
    pub const ALL: [SourceDomain; 3] = [SourceDomain::Switch, SourceDomain::Light, SourceDomain::Fan];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceDomain::Switch => "switch",
            SourceDomain::Light => "light",
            SourceDomain::Fan => "fan",
        }
    }

    /// Returns the object id if `entity_id` belongs to this domain.
    fn strip<'a>(&self, entity_id: &'a str) -> Option<&'a str> {
        entity_id
            .strip_prefix(self.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .filter(|object_id| !object_id.is_empty())
    }
}

impl fmt::Display for SourceDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved source entity, e.g. `light.kitchen`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntityRef {
    pub domain: SourceDomain,
    pub entity_id: String,
}

/// Shadow timer entity id → domain of the source entity that created it.
pub type ShadowEntityMap = HashMap<String, SourceDomain>;

pub fn is_supported_source(entity_id: &str) -> bool {
    SourceDomain::ALL.iter().any(|d| d.strip(entity_id).is_some())
}

/// `light.kitchen` → (`Light`, `switch_timer.kitchen`); `None` for unsupported domains.
pub fn source_to_timer_id(source_entity: &str) -> Option<(SourceDomain, String)> {
    SourceDomain::ALL.iter().find_map(|domain| {
        domain
            .strip(source_entity)
            .map(|object_id| (*domain, format!("{}.{}", TIMER_DOMAIN, object_id)))
    })
}

pub fn timer_object_id(timer_id: &str) -> Option<&str> {
    timer_id
        .strip_prefix(TIMER_DOMAIN)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|object_id| !object_id.is_empty())
}

/// Reconstructs the source entity of a shadow entity from the domain recorded in `shadows`.
pub fn timer_to_source(timer_id: &str, shadows: &ShadowEntityMap) -> Result<SourceEntityRef, TimerError> {
    let unknown = || TimerError::UnknownTimerEntity(timer_id.to_string());
    let domain = shadows.get(timer_id).ok_or_else(unknown)?;
    let object_id = timer_object_id(timer_id).ok_or_else(unknown)?;
    Ok(SourceEntityRef {
        domain: *domain,
        entity_id: format!("{}.{}", domain, object_id),
    })
}
