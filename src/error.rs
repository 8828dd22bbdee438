use thiserror::Error;

/// Rejections of user supplied service data. Nothing is mutated when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid duration specified. Provide timer duration in HH:MM:SS format")]
    InvalidDuration,
    #[error("Invalid action value specified. Supported values: 'turn_on', 'turn_off', 'toggle'")]
    InvalidAction,
    #[error("Invalid entity specified")]
    InvalidEntity(String),
    #[error("Entity {0} doesn't exist")]
    EntityMissing(String),
    #[error("Timer not set for {0} entity")]
    TimerNotSet(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Error saving timer snapshot [{key}]: {reason}")]
    Save { key: String, reason: String },
    #[error("Stored timer snapshot [{key}] is malformed: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Stored timer snapshot [{key}] has unsupported version {found} (expected {expected})")]
    UnsupportedVersion { key: String, expected: u32, found: u32 },
}

#[derive(Debug, Clone, Error)]
pub enum HostError {
    #[error("Service call {domain}.{service} for [{entity_id}] failed: {reason}")]
    ServiceCall {
        domain: String,
        service: String,
        entity_id: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum TimerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Unsupported or unknown source type for {0}")]
    UnknownTimerEntity(String),
    #[error("Timer store error: {0}")]
    Store(#[from] StoreError),
    #[error("Host error: {0}")]
    Host(#[from] HostError),
    #[error("Timer engine is shutting down")]
    ShuttingDown,
}
