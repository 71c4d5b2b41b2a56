use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use iqtap_frame::{EventAssembler, EventCodec, EventSinks, DEFAULT_MAX_FRAME};
use iqtap_transport::{Inbound, Transport};
use serde::Serialize;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::auth::{self, AuthStep};
use crate::command::{Command, CommandQueue, WaitCallback};
use crate::error::{Result, SessionError};
use crate::hooks::{HookContext, SessionHooks};
use crate::message::{
    encode_batch, parse_inbound, ControlKind, IdGenerator, Message, MessageId,
};

/// Default reply timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Authenticating,
    Ready,
    Listening,
    Closed,
    Failed,
}

/// Session configuration.
#[derive(Clone)]
pub struct SessionConfig {
    /// Base reply timeout for every request.
    pub timeout: Duration,
    /// Budget for connecting and authenticating.
    pub connect_timeout: Duration,
    /// Password for challenge authentication.
    pub password: Option<String>,
    /// Report `error` replies instead of failing.
    pub no_error: bool,
    /// Let notifications resolve their request while listening.
    pub resolve_notifications: bool,
    /// Largest side-channel frame accepted.
    pub max_event_frame: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_TIMEOUT,
            password: None,
            no_error: false,
            resolve_notifications: false,
            max_event_frame: DEFAULT_MAX_FRAME,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field(
                "password",
                &if self.password.is_some() {
                    "[REDACTED]"
                } else {
                    "None"
                },
            )
            .field("no_error", &self.no_error)
            .field("resolve_notifications", &self.resolve_notifications)
            .field("max_event_frame", &self.max_event_frame)
            .finish()
    }
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub sent: u64,
    pub resolved: u64,
    pub delivered: u64,
    pub events: u64,
    pub dropped_events: u64,
    pub server_errors: u64,
    /// Requests still waiting when the connection closed.
    pub unresolved: u64,
}

#[derive(Debug)]
struct PendingRequest {
    message: String,
    batch: u64,
    deadline: Instant,
    budget: Duration,
}

struct ActiveWait {
    until: Instant,
    callback: Option<WaitCallback>,
}

enum Wake {
    Inbound(Option<Inbound>),
    Timer,
}

/// A scripted session over a transport.
///
/// The session authenticates, runs its command queue, and correlates
/// replies until the script completes, the server disconnects, or a fatal
/// error occurs.
pub struct Session<T: Transport> {
    transport: T,
    config: SessionConfig,
    state: SessionState,
    queue: CommandQueue,
    pending: HashMap<MessageId, PendingRequest>,
    ids: IdGenerator,
    batch_seq: u64,
    wait: Option<ActiveWait>,
    listening: bool,
    assembler: EventAssembler,
    sinks: EventSinks,
    hooks: Vec<Box<dyn SessionHooks>>,
    connect_deadline: Instant,
    summary: SessionSummary,
}

impl<T: Transport> Session<T> {
    /// Wrap a connected transport. The connect budget starts now.
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let connect_deadline = Instant::now() + config.connect_timeout;
        let assembler = EventAssembler::with_codec(EventCodec::new(config.max_event_frame));
        Self {
            transport,
            config,
            state: SessionState::Connecting,
            queue: CommandQueue::default(),
            pending: HashMap::new(),
            ids: IdGenerator::default(),
            batch_seq: 0,
            wait: None,
            listening: false,
            assembler,
            sinks: EventSinks::new(),
            hooks: Vec::new(),
            connect_deadline,
            summary: SessionSummary::default(),
        }
    }

    /// Use an earlier connect deadline (e.g. one that covered the transport connect).
    pub fn with_connect_deadline(mut self, deadline: Instant) -> Self {
        self.connect_deadline = deadline;
        self
    }

    pub fn with_script(mut self, queue: CommandQueue) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_hook(mut self, hook: impl SessionHooks + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn with_sinks(mut self, sinks: EventSinks) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run the session to completion.
    pub async fn run(&mut self) -> Result<SessionSummary> {
        let result = self.drive().await;
        if let Err(err) = &result {
            self.state = SessionState::Failed;
            debug!(error = %err, "session failed");
        }
        if let Err(err) = self.transport.close().await {
            debug!(error = %err, "transport close failed");
        }
        self.summary.unresolved = self.pending.len() as u64;
        result.map(|()| self.summary.clone())
    }

    async fn drive(&mut self) -> Result<()> {
        match timeout_at(self.connect_deadline, self.authenticate()).await {
            Ok(result) => result?,
            Err(_) => return Err(SessionError::ConnectTimeout(self.config.connect_timeout)),
        }
        self.state = SessionState::Ready;
        self.start_hooks();
        self.advance().await?;

        while self.state != SessionState::Closed {
            let deadline = self.next_deadline();
            let wake = tokio::select! {
                inbound = self.transport.recv() => Wake::Inbound(inbound?),
                _ = sleep_until_some(deadline) => Wake::Timer,
            };
            match wake {
                Wake::Inbound(Some(Inbound::Text(text))) => self.on_text(&text).await?,
                Wake::Inbound(Some(Inbound::Binary(chunk))) => self.on_binary(&chunk).await?,
                Wake::Inbound(None) => self.on_disconnect(),
                Wake::Timer => self.on_timer().await?,
            }
        }
        Ok(())
    }

    async fn authenticate(&mut self) -> Result<()> {
        self.state = SessionState::Authenticating;
        loop {
            let text = match self.transport.recv().await? {
                Some(Inbound::Text(text)) => text,
                Some(Inbound::Binary(chunk)) => {
                    debug!(len = chunk.len(), "ignoring binary data before ready");
                    continue;
                }
                None => return Err(SessionError::ConnectionClosed),
            };
            let Some(msg) = parse_inbound(&text) else {
                warn!(text = %text, "ignoring malformed message during authentication");
                continue;
            };
            match ControlKind::lookup(&msg.message) {
                Some(ControlKind::Authenticate) => {
                    match auth::respond(&msg, self.config.password.as_deref())? {
                        AuthStep::Ready => {
                            info!("authenticated");
                            return Ok(());
                        }
                        AuthStep::Reply(reply) => {
                            info!(
                                name = msg.str_field("name").unwrap_or_default(),
                                component = msg.str_field("type").unwrap_or_default(),
                                "authentication required"
                            );
                            self.transport.send_text(encode_batch(&[reply])?).await?;
                        }
                    }
                }
                Some(ControlKind::Ready) => {
                    info!(
                        name = msg.str_field("name").unwrap_or_default(),
                        component = msg.str_field("type").unwrap_or_default(),
                        version = msg.str_field("version").unwrap_or_default(),
                        product = msg.str_field("product"),
                        "ready"
                    );
                    return Ok(());
                }
                Some(ControlKind::Error) => {
                    warn!(error = %msg.error_text().unwrap_or_default(), "server error notice");
                }
                None => debug!(message = %msg.message, "ignoring message before ready"),
            }
        }
    }

    fn start_hooks(&mut self) {
        for hook in self.hooks.iter_mut() {
            let mut ctx = HookContext {
                queue: &mut self.queue,
                ids: &mut self.ids,
            };
            hook.on_start(&mut ctx);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let wait = self.wait.as_ref().map(|wait| wait.until);
        let pending = self.pending.values().map(|req| req.deadline).min();
        match (wait, pending) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run queued commands until one has to be waited on.
    async fn advance(&mut self) -> Result<()> {
        while self.pending.is_empty() && self.wait.is_none() {
            match self.queue.next_command() {
                Some(Command::SendBatch(batch)) => self.send_batch(batch).await?,
                Some(Command::Wait { delay, callback }) => {
                    info!(secs = delay.as_secs_f64(), "waiting");
                    self.wait = Some(ActiveWait {
                        until: Instant::now() + delay,
                        callback,
                    });
                }
                Some(Command::EnterListen) => {
                    if !self.listening {
                        info!("listening");
                    }
                    self.listening = true;
                    self.state = SessionState::Listening;
                }
                None => {
                    if !self.listening {
                        info!("script complete");
                        self.state = SessionState::Closed;
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    async fn send_batch(&mut self, mut batch: Vec<Message>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut seen = HashSet::new();
        for msg in batch.iter_mut() {
            let id = match &msg.message_id {
                Some(id) => id.clone(),
                None => {
                    let id = self.ids.next_id();
                    msg.message_id = Some(id.clone());
                    id
                }
            };
            if self.pending.contains_key(&id) || !seen.insert(id.clone()) {
                return Err(SessionError::Protocol(format!(
                    "duplicate message_id {id} in '{}'",
                    msg.message
                )));
            }
        }

        self.batch_seq += 1;
        let text = encode_batch(&batch)?;
        self.transport.send_text(text).await?;

        let now = Instant::now();
        for msg in batch {
            let budget = msg.timeout_budget(self.config.timeout);
            let Some(id) = msg.message_id else { continue };
            info!(message = %msg.message, id = %id, batch = self.batch_seq, "sent");
            self.pending.insert(
                id,
                PendingRequest {
                    message: msg.message,
                    batch: self.batch_seq,
                    deadline: now + budget,
                    budget,
                },
            );
            self.summary.sent += 1;
        }
        Ok(())
    }

    async fn on_text(&mut self, text: &str) -> Result<()> {
        let Some(msg) = parse_inbound(text) else {
            warn!(text = %text, "ignoring malformed message");
            return Ok(());
        };

        if msg.message_id.is_none() {
            match ControlKind::lookup(&msg.message) {
                Some(ControlKind::Error) => {
                    warn!(error = %msg.error_text().unwrap_or_default(), "server error notice");
                    return Ok(());
                }
                Some(kind) => {
                    debug!(?kind, "ignoring control message after ready");
                    return Ok(());
                }
                None => {}
            }
        }

        let correlated = msg
            .message_id
            .as_ref()
            .is_some_and(|id| self.pending.contains_key(id));
        if !correlated && !self.listening {
            debug!(message = %msg.message, id = ?msg.message_id, "ignoring uncorrelated message");
            return Ok(());
        }

        let exempt = msg.notification && self.listening && !self.config.resolve_notifications;
        if correlated && !exempt {
            if let Some(id) = &msg.message_id {
                if let Some(req) = self.pending.remove(id) {
                    debug!(message = %req.message, id = %id, batch = req.batch, "resolved");
                    self.summary.resolved += 1;
                }
            }
        }

        info!(message = %msg.message, id = ?msg.message_id, "received");
        self.summary.delivered += 1;
        for hook in self.hooks.iter_mut() {
            let mut ctx = HookContext {
                queue: &mut self.queue,
                ids: &mut self.ids,
            };
            hook.on_message(&msg, &mut ctx);
        }

        if let Some(error) = msg.error_text() {
            self.summary.server_errors += 1;
            if !self.config.no_error {
                return Err(SessionError::Server(error));
            }
            warn!(message = %msg.message, error = %error, "server reported an error");
        }

        self.advance().await
    }

    async fn on_binary(&mut self, chunk: &[u8]) -> Result<()> {
        self.assembler.push(chunk);
        while let Some(next) = self.assembler.next_event() {
            let event = match next {
                Ok(event) => event,
                Err(err) => {
                    self.summary.dropped_events += 1;
                    warn!(error = %err, "dropping invalid binary event");
                    continue;
                }
            };
            info!(
                label = event.label(),
                size = event.payload.len(),
                event_type = event.trailer.event_type,
                length = event.trailer.length,
                "binary event"
            );
            self.summary.events += 1;
            for hook in self.hooks.iter_mut() {
                let mut ctx = HookContext {
                    queue: &mut self.queue,
                    ids: &mut self.ids,
                };
                hook.on_event(&event, &mut ctx);
            }
            self.sinks.dispatch(&event)?;
        }
        self.advance().await
    }

    async fn on_timer(&mut self) -> Result<()> {
        let now = Instant::now();
        let expired = self
            .pending
            .iter()
            .filter(|(_, req)| req.deadline <= now)
            .min_by_key(|(_, req)| req.deadline);
        if let Some((id, req)) = expired {
            return Err(SessionError::MessageTimeout {
                id: id.clone(),
                message: req.message.clone(),
                budget: req.budget,
            });
        }

        if self.wait.as_ref().is_some_and(|wait| wait.until <= now) {
            if let Some(ActiveWait {
                callback: Some(callback),
                ..
            }) = self.wait.take()
            {
                callback();
            }
            return self.advance().await;
        }
        Ok(())
    }

    fn on_disconnect(&mut self) {
        info!("disconnected");
        for (id, req) in &self.pending {
            warn!(message = %req.message, id = %id, "request outstanding at disconnect");
        }
        self.state = SessionState::Closed;
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
