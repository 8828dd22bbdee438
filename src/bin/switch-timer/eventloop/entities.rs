use color_eyre::eyre::Result;
use switch_timer::{app_state::AppState, host::StateChangedEvent};

pub async fn handle_state_changed_event(event: StateChangedEvent, state: &mut AppState) -> Result<bool> {
    log::trace!(
        "State changed: {} [{:?} -> {:?}]",
        event.entity_id,
        event.old_state.as_ref().map(|s| s.state.as_str()),
        event.new_state.as_ref().map(|s| s.state.as_str())
    );
    state.engine.handle_state_changed(event).await;
    Ok(false)
}
