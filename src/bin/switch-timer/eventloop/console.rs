use color_eyre::eyre::Result;
use serde_json::json;
use switch_timer::{
    app_state::{AppEvent, AppState},
    host::StateRegistry,
};

use crate::console::{reply_error, reply_ok, reply_value, ConsoleCommand};

pub async fn handle_console_command(command: ConsoleCommand, state: &mut AppState) -> Result<bool> {
    let command = match command.into_timer_service() {
        Ok(service) => {
            match state.engine.call(service).await {
                Ok(()) => reply_ok(),
                Err(err) => {
                    log::warn!("Service call failed: {}", err);
                    reply_error(err);
                }
            }
            return Ok(false);
        }
        Err(command) => command,
    };

    match command {
        ConsoleCommand::AddEntity {
            entity_id,
            friendly_name,
        } => {
            if state.host().contains(&entity_id) {
                reply_error(format!("Entity {} already exists", entity_id));
            } else {
                state.host().add_entity(&entity_id, friendly_name.as_deref());
                reply_ok();
            }
        }
        ConsoleCommand::RemoveEntity { entity_id } => {
            if state.host().contains(&entity_id) {
                state.host().remove_state(&entity_id);
                reply_ok();
            } else {
                reply_error(format!("Entity {} doesn't exist", entity_id));
            }
        }
        ConsoleCommand::States => {
            reply_value(json!(state.host().states()));
        }
        ConsoleCommand::Exit => {
            state.app_event_sender.send(AppEvent::Exit).await?;
            reply_ok();
        }
        ConsoleCommand::SetTimer(_) | ConsoleCommand::CancelTimer(_) => {}
    }
    Ok(false)
}
