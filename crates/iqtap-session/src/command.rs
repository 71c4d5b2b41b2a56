use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::message::Message;

/// Callback run when a wait elapses.
pub type WaitCallback = Arc<dyn Fn() + Send + Sync>;

/// One step of a session script.
#[derive(Clone)]
pub enum Command {
    /// Send these messages together and wait for all their replies.
    SendBatch(Vec<Message>),
    /// Pause queue advancement, then run the callback if any.
    Wait {
        delay: Duration,
        callback: Option<WaitCallback>,
    },
    /// Stay connected and deliver every inbound message.
    EnterListen,
}

impl Command {
    pub fn wait(delay: Duration) -> Self {
        Command::Wait {
            delay,
            callback: None,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SendBatch(batch) => f.debug_tuple("SendBatch").field(batch).finish(),
            Command::Wait { delay, callback } => f
                .debug_struct("Wait")
                .field("delay", delay)
                .field("callback", &callback.as_ref().map(|_| "<fn>"))
                .finish(),
            Command::EnterListen => f.write_str("EnterListen"),
        }
    }
}

/// Ordered command queue with replay.
///
/// The commands given at construction form the template. Once the queue
/// drains, the template is replayed `replays` more times. Commands pushed
/// at runtime (by hooks) run once and are not part of the template.
#[derive(Debug, Default)]
pub struct CommandQueue {
    template: Vec<Command>,
    current: VecDeque<Command>,
    replays_left: u32,
}

impl CommandQueue {
    pub fn new(commands: Vec<Command>, replays: u32) -> Self {
        Self {
            current: commands.iter().cloned().collect(),
            template: commands,
            replays_left: replays,
        }
    }

    /// Append a one-shot command.
    pub fn push(&mut self, command: Command) {
        self.current.push_back(command);
    }

    /// Take the next command, replaying the template when the queue is empty.
    pub fn next_command(&mut self) -> Option<Command> {
        if self.current.is_empty() && self.replays_left > 0 && !self.template.is_empty() {
            self.replays_left -= 1;
            tracing::debug!(remaining = self.replays_left, "replaying script");
            self.current.extend(self.template.iter().cloned());
        }
        self.current.pop_front()
    }

    pub fn replays_left(&self) -> u32 {
        self.replays_left
    }
}
