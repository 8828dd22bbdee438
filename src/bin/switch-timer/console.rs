use serde::Deserialize;
use serde_json::json;
use switch_timer::{CancelTimerData, SetTimerData, TimerService};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc::{self, Receiver},
    task::JoinHandle,
};

/// One JSON line read from stdin.
///
/// ```json
/// {"service": "set_timer", "entity_id": "switch_timer.lamp", "action": "Turn on", "duration": "00:00:05"}
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "service", rename_all = "snake_case")]
pub enum ConsoleCommand {
    SetTimer(SetTimerData),
    CancelTimer(CancelTimerData),
    AddEntity {
        entity_id: String,
        #[serde(default)]
        friendly_name: Option<String>,
    },
    RemoveEntity {
        entity_id: String,
    },
    States,
    Exit,
}

impl ConsoleCommand {
    /// The timer services, as opposed to the commands simulating host activity.
    pub fn into_timer_service(self) -> Result<TimerService, Self> {
        match self {
            ConsoleCommand::SetTimer(data) => Ok(TimerService::SetTimer(data)),
            ConsoleCommand::CancelTimer(data) => Ok(TimerService::CancelTimer(data)),
            other => Err(other),
        }
    }
}

pub struct ConsoleHandle {
    handle: JoinHandle<()>,
}

impl ConsoleHandle {
    pub async fn stop(self) {
        self.handle.abort();
        // an aborted task resolves to a cancellation error, nothing to report
        let _ = self.handle.await;
    }
}

pub fn reply_ok() {
    println!("{}", json!({ "ok": true }));
}

pub fn reply_error(message: impl std::fmt::Display) {
    println!("{}", json!({ "ok": false, "error": message.to_string() }));
}

pub fn reply_value(value: serde_json::Value) {
    println!("{}", value);
}

/// Reads commands from stdin until it is closed.
pub fn run_console(channel_size: usize) -> (ConsoleHandle, Receiver<ConsoleCommand>) {
    let (sender, receiver) = mpsc::channel(channel_size);

    let handle = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    log::debug!("Console input closed");
                    break;
                }
                Err(err) => {
                    log::error!("Error reading console input: {}", err);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ConsoleCommand>(&line) {
                Ok(command) => {
                    if sender.send(command).await.is_err() {
                        break;
                    }
                }
                Err(err) => reply_error(format!("Invalid command: {}", err)),
            }
        }
    });

    (ConsoleHandle { handle }, receiver)
}
