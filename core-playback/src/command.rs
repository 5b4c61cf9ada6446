//! # Command Queue
//!
//! Serializes playback intents. Commands run one at a time; submitting a
//! new command cancels the one that is running, so the newest intent wins
//! without two commands ever touching the engine concurrently.
//!
//! Play, pause, resume, seek and stop go to a [`PlaybackControl`]. Next and
//! previous need browsing context this crate does not have, so the host
//! installs handlers for them.

use crate::config::PlaybackConfig;
use crate::error::PlaybackError;
use crate::traits::PlaybackControl;
use crate::track::SharedTrack;
use core_async::sync::{broadcast, CancellationToken, Semaphore};
use core_async::run_until_cancelled;
use core_runtime::events::{CommandEvent, CoreEvent, EventBus};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const NOTIFICATION_BUFFER: usize = 64;
const SHUT_DOWN_MESSAGE: &str = "command queue shut down";

/// A playback intent.
#[derive(Debug, Clone)]
pub enum PlaybackCommand {
    Play(SharedTrack),
    /// `None` uses the configured fade.
    Pause { fade_ms: Option<u32> },
    Resume { fade_ms: Option<u32> },
    Seek { seconds: f64 },
    Stop,
    Next,
    Previous,
}

impl PlaybackCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            PlaybackCommand::Play(_) => CommandKind::Play,
            PlaybackCommand::Pause { .. } => CommandKind::Pause,
            PlaybackCommand::Resume { .. } => CommandKind::Resume,
            PlaybackCommand::Seek { .. } => CommandKind::Seek,
            PlaybackCommand::Stop => CommandKind::Stop,
            PlaybackCommand::Next => CommandKind::Next,
            PlaybackCommand::Previous => CommandKind::Previous,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Play,
    Pause,
    Resume,
    Seek,
    Stop,
    Next,
    Previous,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Play => "Play",
            CommandKind::Pause => "Pause",
            CommandKind::Resume => "Resume",
            CommandKind::Seek => "Seek",
            CommandKind::Stop => "Stop",
            CommandKind::Next => "Next",
            CommandKind::Previous => "Previous",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandState {
    Queued,
    Executing,
    Completed,
    Cancelled,
    Failed,
}

impl CommandState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandState::Queued => "Queued",
            CommandState::Executing => "Executing",
            CommandState::Completed => "Completed",
            CommandState::Cancelled => "Cancelled",
            CommandState::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandState::Completed | CommandState::Cancelled | CommandState::Failed
        )
    }
}

/// Outcome of one command. Cancellation is never reported as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Success,
    Cancelled,
    Error(String),
}

impl CommandResult {
    pub fn error(message: impl Into<String>) -> Self {
        CommandResult::Error(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommandResult::Success)
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            CommandResult::Error(message) => Some(message),
            _ => None,
        }
    }

    fn terminal_state(&self) -> CommandState {
        match self {
            CommandResult::Success => CommandState::Completed,
            CommandResult::Cancelled => CommandState::Cancelled,
            CommandResult::Error(_) => CommandState::Failed,
        }
    }

    fn from_control(result: crate::error::Result<bool>, declined: &str) -> Self {
        match result {
            Ok(true) => CommandResult::Success,
            Ok(false) => CommandResult::error(declined),
            Err(error) if error.is_cancelled() => CommandResult::Cancelled,
            Err(error) => CommandResult::Error(error.to_string()),
        }
    }
}

impl From<PlaybackError> for CommandResult {
    fn from(error: PlaybackError) -> Self {
        if error.is_cancelled() {
            CommandResult::Cancelled
        } else {
            CommandResult::Error(error.to_string())
        }
    }
}

/// Notification sent when a command changes state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStateChanged {
    pub id: u64,
    pub kind: CommandKind,
    pub state: CommandState,
    pub message: Option<String>,
}

/// Host-provided navigation step for next/previous.
pub type NavigationHandler =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, CommandResult> + Send + Sync>;

/// Single-lane executor for playback commands.
pub struct CommandQueue {
    control: Arc<dyn PlaybackControl>,
    fade_ms: u32,
    semaphore: Semaphore,
    /// Id and token of the running command.
    current: Mutex<Option<(u64, CancellationToken)>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
    next_handler: RwLock<Option<NavigationHandler>>,
    previous_handler: RwLock<Option<NavigationHandler>>,
    notifications: broadcast::Sender<CommandStateChanged>,
    event_bus: Option<EventBus>,
}

impl CommandQueue {
    pub fn new(control: Arc<dyn PlaybackControl>, config: &PlaybackConfig) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            control,
            fade_ms: config.command_fade_ms,
            semaphore: Semaphore::new(1),
            current: Mutex::new(None),
            next_id: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            next_handler: RwLock::new(None),
            previous_handler: RwLock::new(None),
            notifications,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn set_next_handler(&self, handler: NavigationHandler) {
        *self.next_handler.write() = Some(handler);
    }

    pub fn set_previous_handler(&self, handler: NavigationHandler) {
        *self.previous_handler.write() = Some(handler);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CommandStateChanged> {
        self.notifications.subscribe()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Runs `command` once every earlier command has finished. Submitting
    /// cancels whatever command is running at that moment.
    pub async fn enqueue(&self, command: PlaybackCommand) -> CommandResult {
        self.enqueue_with_token(command, CancellationToken::new()).await
    }

    /// Like [`enqueue`](Self::enqueue); cancelling `parent` cancels this
    /// command whether it is waiting or running.
    ///
    /// State notifications go out on a broadcast channel, which never runs
    /// subscriber code on the sender's task. `Executing` is therefore sent
    /// while the execution permit is held; a subscriber reacting to it with
    /// another `enqueue` preempts the command instead of waiting behind it.
    #[instrument(skip(self, command, parent), fields(kind = %command.kind()))]
    pub async fn enqueue_with_token(
        &self,
        command: PlaybackCommand,
        parent: CancellationToken,
    ) -> CommandResult {
        let kind = command.kind();
        if self.is_shut_down() {
            return CommandResult::error(SHUT_DOWN_MESSAGE);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.notify(id, kind, CommandState::Queued, None);
        self.cancel_all();

        let permit = match run_until_cancelled(&parent, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                let result = CommandResult::error(SHUT_DOWN_MESSAGE);
                self.notify(id, kind, CommandState::Failed, Some(SHUT_DOWN_MESSAGE.to_string()));
                return result;
            }
            Err(_) => {
                self.notify(id, kind, CommandState::Cancelled, None);
                return CommandResult::Cancelled;
            }
        };

        if self.is_shut_down() {
            drop(permit);
            self.notify(id, kind, CommandState::Failed, Some(SHUT_DOWN_MESSAGE.to_string()));
            return CommandResult::error(SHUT_DOWN_MESSAGE);
        }

        let token = parent.child_token();
        let previous = self.current.lock().replace((id, token.clone()));
        if let Some((_, previous)) = previous {
            previous.cancel();
        }

        self.notify(id, kind, CommandState::Executing, None);
        debug!(command_id = id, "Executing command");

        let mut result = self.execute(command, token.clone()).await;
        if token.is_cancelled() && !result.is_success() {
            result = CommandResult::Cancelled;
        }

        {
            let mut current = self.current.lock();
            if matches!(current.as_ref(), Some((running, _)) if *running == id) {
                *current = None;
            }
        }
        drop(permit);

        if let CommandResult::Error(message) = &result {
            warn!(command_id = id, error = %message, "Command failed");
        }
        self.notify(
            id,
            kind,
            result.terminal_state(),
            result.error_message().map(str::to_string),
        );
        result
    }

    async fn execute(&self, command: PlaybackCommand, token: CancellationToken) -> CommandResult {
        match command {
            PlaybackCommand::Play(track) => {
                CommandResult::from_control(self.control.play(track, token).await, "play failed")
            }
            PlaybackCommand::Pause { fade_ms } => CommandResult::from_control(
                self.control
                    .pause(fade_ms.unwrap_or(self.fade_ms), token)
                    .await,
                "pause failed",
            ),
            PlaybackCommand::Resume { fade_ms } => CommandResult::from_control(
                self.control
                    .resume(fade_ms.unwrap_or(self.fade_ms), token)
                    .await,
                "resume failed",
            ),
            PlaybackCommand::Seek { seconds } => CommandResult::from_control(
                self.control.seek(seconds, self.fade_ms, token).await,
                "seek failed",
            ),
            PlaybackCommand::Stop => {
                CommandResult::from_control(self.control.stop().await, "stop failed")
            }
            PlaybackCommand::Next => {
                let handler = self.next_handler.read().clone();
                match handler {
                    Some(handler) => handler(token).await,
                    None => CommandResult::error("next handler not set"),
                }
            }
            PlaybackCommand::Previous => {
                let handler = self.previous_handler.read().clone();
                match handler {
                    Some(handler) => handler(token).await,
                    None => CommandResult::error("previous handler not set"),
                }
            }
        }
    }

    /// Cancels the running command, if any. Waiting commands still run.
    pub fn cancel_all(&self) {
        let current = self.current.lock().clone();
        if let Some((_, token)) = current {
            token.cancel();
        }
    }

    /// Cancels the running command and rejects every later submission.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.cancel_all();
        self.semaphore.close();
    }

    fn notify(&self, id: u64, kind: CommandKind, state: CommandState, message: Option<String>) {
        let _ = self.notifications.send(CommandStateChanged {
            id,
            kind,
            state,
            message: message.clone(),
        });
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Command(CommandEvent::StateChanged {
                command_id: id,
                command: kind.as_str().to_string(),
                state: state.as_str().to_string(),
                message,
            }));
        }
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("issued", &self.next_id.load(Ordering::SeqCst))
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_terminal_states() {
        assert_eq!(CommandResult::Success.terminal_state(), CommandState::Completed);
        assert_eq!(CommandResult::Cancelled.terminal_state(), CommandState::Cancelled);
        assert_eq!(CommandResult::error("x").terminal_state(), CommandState::Failed);
        assert!(CommandState::Failed.is_terminal());
        assert!(!CommandState::Executing.is_terminal());
    }

    #[test]
    fn test_result_from_control() {
        assert_eq!(CommandResult::from_control(Ok(true), "nope"), CommandResult::Success);
        assert_eq!(
            CommandResult::from_control(Ok(false), "nope"),
            CommandResult::error("nope")
        );
        assert_eq!(
            CommandResult::from_control(Err(PlaybackError::Cancelled), "nope"),
            CommandResult::Cancelled
        );
        assert!(matches!(
            CommandResult::from_control(Err(PlaybackError::InvalidState("idle".into())), "nope"),
            CommandResult::Error(_)
        ));
    }

    #[test]
    fn test_command_kind_names() {
        assert_eq!(PlaybackCommand::Seek { seconds: 1.0 }.kind().as_str(), "Seek");
        assert_eq!(PlaybackCommand::Next.kind().to_string(), "Next");
    }
}
