use color_eyre::eyre::Result;
use switch_timer::app_state::{AppEvent, AppState};

pub async fn handle_app_event(event: AppEvent, state: &mut AppState) -> Result<bool> {
    match event {
        AppEvent::Exit => {
            log::info!("Shutting down");
            // last chance to get storage in sync while the armed timers are still registered
            state.engine.retry_persist().await;
            state.engine.shutdown();
            state.should_exit = true;
        }
    }
    Ok(false)
}
