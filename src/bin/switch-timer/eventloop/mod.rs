use std::time::Duration;

use color_eyre::eyre::Result;
use switch_timer::{
    app_state::{AppEvent, AppState},
    host::StateChangedEvent,
    settings::SETTINGS,
    timer_manager::TimerEvent,
};
use tokio::sync::mpsc::Receiver;

use crate::console::ConsoleCommand;

mod app;
mod console;
mod entities;
mod timers;

use app::handle_app_event;
use console::handle_console_command;
use entities::handle_state_changed_event;
use timers::handle_timer_event;

#[derive(Debug)]
pub enum Event {
    App(AppEvent),
    StateChanged(StateChangedEvent),
    Timer(TimerEvent),
    Console(ConsoleCommand),
    Timeout,
    None,
}

/// Merges all event sources into one stream, so the handlers run strictly one after another.
pub struct EventMultiPlexer {
    app: Receiver<AppEvent>,
    state_changed: Receiver<StateChangedEvent>,
    timers: Receiver<TimerEvent>,
    console: Receiver<ConsoleCommand>,
}

impl EventMultiPlexer {
    pub fn new(
        app: Receiver<AppEvent>,
        state_changed: Receiver<StateChangedEvent>,
        timers: Receiver<TimerEvent>,
        console: Receiver<ConsoleCommand>,
    ) -> Self {
        Self {
            app,
            state_changed,
            timers,
            console,
        }
    }

    pub async fn next(&mut self, timeout: Duration) -> Event {
        tokio::select! {
            biased;
            Some(event) = self.app.recv() => Event::App(event),
            Some(event) = self.state_changed.recv() => Event::StateChanged(event),
            Some(event) = self.timers.recv() => Event::Timer(event),
            Some(command) = self.console.recv() => Event::Console(command),
            _ = tokio::time::sleep(timeout) => Event::Timeout,
            else => Event::None,
        }
    }
}

pub async fn run_event_loop(event_multiplexer: &mut EventMultiPlexer, state: &mut AppState) -> Result<()> {
    loop {
        // once exit was requested the loop only waits a second for outstanding events
        let timeout = if state.should_exit {
            Duration::from_secs(1)
        } else {
            SETTINGS.store_retry_interval
        };
        let exit = match event_multiplexer.next(timeout).await {
            Event::App(app_event) => handle_app_event(app_event, state).await?,
            Event::StateChanged(event) => handle_state_changed_event(event, state).await?,
            Event::Timer(timer_event) => handle_timer_event(timer_event, state).await?,
            Event::Console(command) => handle_console_command(command, state).await?,
            Event::Timeout => {
                state.engine.retry_persist().await;
                state.should_exit
            }
            Event::None => state.should_exit,
        };

        if exit {
            break;
        }
    }
    log::debug!("Exiting application event loop");
    Ok(())
}
