use color_eyre::eyre::Result;
use switch_timer::{app_state::AppState, timer_manager::TimerEvent};

pub async fn handle_timer_event(event: TimerEvent, state: &mut AppState) -> Result<bool> {
    log::debug!("Timerevent: {:?}", event);
    state.engine.handle_timer_event(event).await;
    Ok(false)
}
