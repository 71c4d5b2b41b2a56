//! Automation hooks.
//!
//! Hooks observe a running session and may extend its script. They run on
//! the session task, so they must not block.

use std::time::Duration;

use iqtap_frame::BinaryEvent;

use crate::command::{Command, CommandQueue, WaitCallback};
use crate::message::{IdGenerator, Message, MessageId};

/// Handle given to hooks for queueing work.
pub struct HookContext<'a> {
    pub(crate) queue: &'a mut CommandQueue,
    pub(crate) ids: &'a mut IdGenerator,
}

impl HookContext<'_> {
    /// Queue `msg` as a one-message batch. Returns its correlation id.
    pub fn send(&mut self, mut msg: Message) -> MessageId {
        let id = match &msg.message_id {
            Some(id) => id.clone(),
            None => {
                let id = self.ids.next_id();
                msg.message_id = Some(id.clone());
                id
            }
        };
        self.queue.push(Command::SendBatch(vec![msg]));
        id
    }

    /// Queue a pause.
    pub fn wait(&mut self, delay: Duration, callback: Option<WaitCallback>) {
        self.queue.push(Command::Wait { delay, callback });
    }

    /// Queue entry into listen mode.
    pub fn listen(&mut self) {
        self.queue.push(Command::EnterListen);
    }
}

/// Observer of a session. Every method defaults to doing nothing.
pub trait SessionHooks: Send {
    /// Called once authentication completes, before the script starts.
    fn on_start(&mut self, _ctx: &mut HookContext<'_>) {}

    /// Called for every delivered message.
    fn on_message(&mut self, _msg: &Message, _ctx: &mut HookContext<'_>) {}

    /// Called for every decoded side-channel event.
    fn on_event(&mut self, _event: &BinaryEvent, _ctx: &mut HookContext<'_>) {}
}
