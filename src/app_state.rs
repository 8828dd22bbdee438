use tokio::sync::mpsc::Sender;

use crate::{memory_host::MemoryHost, reconciler::TimerEngine};

#[derive(Debug)]
pub enum AppEvent {
    Exit,
}

pub struct AppState {
    pub engine: TimerEngine<MemoryHost>,
    pub app_event_sender: Sender<AppEvent>,
    pub should_exit: bool,
}

impl AppState {
    pub fn host(&self) -> &MemoryHost {
        self.engine.host()
    }
}
