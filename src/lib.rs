//! Delayed on/off/toggle actions for switch-like entities.
//!
//! Every `switch`, `light` and `fan` entity gets a paired `switch_timer` shadow entity. Setting a timer on the shadow
//! entity schedules the action, persists it, and runs it on the source entity once the duration elapsed.

pub mod app_state;
pub mod commands;
pub mod entity_mapper;
pub mod error;
pub mod host;
pub mod memory_host;
pub mod model;
pub mod reconciler;
pub mod settings;
pub mod timer_manager;
pub mod timer_registry;
pub mod timer_store;

pub use commands::{CancelTimerData, SetTimerData, TimerService};
pub use error::{TimerError, ValidationError};
pub use reconciler::TimerEngine;
