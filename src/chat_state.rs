//! Typing notifications
//!
//! A small state machine over {gone, active, composing, paused, inactive}
//! driven by user input and timeouts. The controller runs as a tokio task and
//! pushes every state change through the [`Transport`].

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatState {
    Gone,
    Active,
    Composing,
    Paused,
    Inactive,
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatEvent {
    /// The message field became non-empty or changed
    TextEntered,
    /// User touched the chat view
    Touched,
    /// Chat window closed
    Closed,
    /// The current state's timer expired
    Timeout,
}

/// Delay before each state decays to the next one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub gone_to_active: Duration,
    pub composing_to_paused: Duration,
    pub paused_to_inactive: Duration,
    pub active_to_inactive: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            gone_to_active: Duration::from_millis(500),
            composing_to_paused: Duration::from_secs(10),
            paused_to_inactive: Duration::from_secs(15),
            active_to_inactive: Duration::from_secs(30),
        }
    }
}

pub fn transition(state: ChatState, event: ChatEvent) -> ChatState {
    use ChatState::*;
    match (state, event) {
        (_, ChatEvent::Closed) => Gone,
        (_, ChatEvent::TextEntered) => Composing,
        (Inactive, ChatEvent::Touched) => Active,
        (s, ChatEvent::Touched) => s,
        (Gone, ChatEvent::Timeout) => Active,
        (Composing, ChatEvent::Timeout) => Paused,
        (Paused | Active | Inactive, ChatEvent::Timeout) => Inactive,
    }
}

/// How long `state` lasts without input; `None` for states that never decay
pub fn timeout(state: ChatState, timings: &Timings) -> Option<Duration> {
    match state {
        ChatState::Gone => Some(timings.gone_to_active),
        ChatState::Composing => Some(timings.composing_to_paused),
        ChatState::Paused => Some(timings.paused_to_inactive),
        ChatState::Active => Some(timings.active_to_inactive),
        ChatState::Inactive => None,
    }
}

/// Outbound capability of a chat: whatever carries notifications to the peer
pub trait Transport: Send + Sync {
    fn send_chat_state(&self, chat_id: &str, state: ChatState) -> Result<()>;

    /// Peers that do not support chat states are never notified
    fn allows_chat_states(&self) -> bool {
        true
    }
}

#[derive(Debug)]
enum Command {
    TextChanged { empty: bool },
    Touch,
    Close,
}

/// Owner side of a running controller
pub struct ChatStateHandle {
    tx: mpsc::Sender<Command>,
    task: JoinHandle<ChatState>,
}

impl ChatStateHandle {
    pub async fn text_changed(&self, text: &str) {
        self.send(Command::TextChanged {
            empty: text.is_empty(),
        })
        .await;
    }

    pub async fn touch(&self) {
        self.send(Command::Touch).await;
    }

    /// Announce `gone` and stop the task; returns the final state
    pub async fn close(self) -> ChatState {
        self.send(Command::Close).await;
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "chat state task failed");
                ChatState::Gone
            }
        }
    }

    async fn send(&self, cmd: Command) {
        if self.tx.send(cmd).await.is_err() {
            debug!("chat state controller already stopped");
        }
    }
}

pub struct ChatStateController {
    chat_id: String,
    transport: Arc<dyn Transport>,
    timings: Timings,
    state: ChatState,
    deadline: Option<Instant>,
    rx: mpsc::Receiver<Command>,
}

impl ChatStateController {
    /// Start the controller in `gone`; it turns `active` after the first timeout
    pub fn spawn(chat_id: &str, transport: Arc<dyn Transport>, timings: Timings) -> ChatStateHandle {
        let (tx, rx) = mpsc::channel(16);
        let controller = Self {
            chat_id: chat_id.to_string(),
            transport,
            timings,
            state: ChatState::Gone,
            deadline: timeout(ChatState::Gone, &timings).map(|d| Instant::now() + d),
            rx,
        };
        let task = tokio::spawn(controller.run());
        ChatStateHandle { tx, task }
    }

    async fn run(mut self) -> ChatState {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(Command::TextChanged { empty: false }) => {
                            if self.state == ChatState::Gone {
                                // Peers expect active before composing
                                self.set_state(ChatState::Active);
                            }
                            self.apply(ChatEvent::TextEntered, true);
                        }
                        Some(Command::TextChanged { empty: true }) => {}
                        Some(Command::Touch) => self.apply(ChatEvent::Touched, false),
                        Some(Command::Close) | None => {
                            self.apply(ChatEvent::Closed, false);
                            break;
                        }
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.apply(ChatEvent::Timeout, true);
                }
            }
        }
        self.state
    }

    /// Feed one event; the decay timer restarts on a state change or when `rearm` is set
    fn apply(&mut self, event: ChatEvent, rearm: bool) {
        let next = transition(self.state, event);
        let changed = self.set_state(next);
        if changed || rearm {
            self.deadline = timeout(self.state, &self.timings).map(|d| Instant::now() + d);
        }
    }

    fn set_state(&mut self, next: ChatState) -> bool {
        if next == self.state {
            return false;
        }
        debug!(chat_id = %self.chat_id, from = ?self.state, to = ?next, "chat state");
        self.state = next;
        if self.transport.allows_chat_states() {
            if let Err(e) = self.transport.send_chat_state(&self.chat_id, next) {
                warn!(chat_id = %self.chat_id, error = %e, "failed to send chat state");
            }
        }
        true
    }
}
