use chrono::{SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    entity_mapper::{timer_object_id, timer_to_source},
    error::{TimerError, ValidationError},
    host::Host,
    model::{TimerAction, TimerDuration, TimerRecord},
    reconciler::{idle_attributes, local_time, set_attributes, TimerEngine, STATE_IDLE, STATE_SET},
};

/// Service data of `set_timer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetTimerData {
    pub entity_id: String,
    pub action: String,
    pub duration: String,
}

/// Service data of `cancel_timer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTimerData {
    pub entity_id: String,
}

/// The services exposed to the host's action invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "service", rename_all = "snake_case")]
pub enum TimerService {
    SetTimer(SetTimerData),
    CancelTimer(CancelTimerData),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ValidSetTimer<'a> {
    entity_id: &'a str,
    action: TimerAction,
    duration: TimerDuration,
}

impl<H: Host> TimerEngine<H> {
    pub async fn call(&mut self, service: TimerService) -> Result<(), TimerError> {
        match service {
            TimerService::SetTimer(data) => self.set_timer(&data).await,
            TimerService::CancelTimer(data) => self.cancel_timer(&data).await,
        }
    }

    fn validate_set_timer<'a>(&self, data: &'a SetTimerData) -> Result<ValidSetTimer<'a>, ValidationError> {
        if timer_object_id(&data.entity_id).is_none() {
            return Err(ValidationError::InvalidEntity(data.entity_id.clone()));
        }
        if !self.host.contains(&data.entity_id) {
            return Err(ValidationError::EntityMissing(data.entity_id.clone()));
        }
        Ok(ValidSetTimer {
            entity_id: &data.entity_id,
            action: data.action.parse()?,
            duration: data.duration.parse()?,
        })
    }

    /// Arms (or re-arms) the timer of a shadow entity. A timer that is already running is replaced.
    pub async fn set_timer(&mut self, data: &SetTimerData) -> Result<(), TimerError> {
        if self.is_shut_down() {
            return Err(TimerError::ShuttingDown);
        }
        let valid = self.validate_set_timer(data)?;
        let source = timer_to_source(valid.entity_id, self.registry.shadows())?;

        let record = TimerRecord {
            finishing_at: (Utc::now() + valid.duration.as_time_delta()).trunc_subsecs(6),
            corresponding_entity: source.entity_id.clone(),
            duration: valid.duration,
            action: valid.action,
        };
        let friendly_name = self.source_friendly_name(&source.entity_id);
        let finishing_at = record.finishing_at;

        let handle = self.timers.schedule_at(valid.entity_id, finishing_at, valid.action);
        self.registry.arm(valid.entity_id, record.clone(), handle);
        self.host.set_state(valid.entity_id, STATE_SET, set_attributes(&friendly_name, &record));
        self.persist().await;

        log::info!(
            "Timer set for {} entity. Device will {} at {}",
            valid.entity_id,
            valid.action.describe(),
            local_time(&finishing_at)
        );
        Ok(())
    }

    /// Disarms a running timer without performing its action.
    pub async fn cancel_timer(&mut self, data: &CancelTimerData) -> Result<(), TimerError> {
        let timer_id = data.entity_id.as_str();
        if self.is_shut_down() {
            return Err(TimerError::ShuttingDown);
        }
        if !self.host.contains(timer_id) {
            return Err(ValidationError::EntityMissing(timer_id.to_string()).into());
        }
        let Some(disarmed) = self.registry.disarm(timer_id) else {
            return Err(ValidationError::TimerNotSet(timer_id.to_string()).into());
        };
        disarmed.handle.cancel();

        let friendly_name = match timer_to_source(timer_id, self.registry.shadows()) {
            Ok(source) => self.source_friendly_name(&source.entity_id),
            Err(err) => {
                log::warn!("{}", err);
                self.shadow_friendly_name(timer_id)
            }
        };
        self.host.set_state(timer_id, STATE_IDLE, idle_attributes(&friendly_name));
        self.persist().await;

        log::info!("Timer canceled for {}", timer_id);
        Ok(())
    }
}
