//! Command submission types.
//!
//! A submission pairs an outbound frame with its delivery policy and the
//! caller's completion handlers. The runtime entry the engine tracks per
//! in-flight command lives here as well.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use aerolink_core::{CommandAck, CommandFrame, ComponentId, MessageId};

/// Terminal outcome of one accepted submission, delivered to the result
/// handler exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// An ack arrived; its result code is authoritative, success or not.
    Acked(CommandAck),
    /// Retries exhausted without any reply.
    NoResponse,
    /// Rejected at submission: an entry for this slot already exists.
    Duplicate,
}

impl CommandOutcome {
    /// Whether the command was acknowledged as accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, CommandOutcome::Acked(ack) if ack.result.is_success())
    }
}

/// Callback invoked with the terminal outcome. The closure carries whatever
/// caller context it needs; nothing beyond the invocation is assumed about
/// its lifetime.
pub type CommandResultHandler = Box<dyn FnOnce(ComponentId, CommandOutcome) + Send + 'static>;

/// Callback invoked for each `InProgress` ack while the command stays in
/// flight.
pub type CommandProgressHandler = Box<dyn FnMut(ComponentId, &CommandAck) + Send + 'static>;

/// Optional handler pair attached to a submission.
#[derive(Default)]
pub struct CommandHandlers {
    pub result: Option<CommandResultHandler>,
    pub progress: Option<CommandProgressHandler>,
}

impl CommandHandlers {
    /// No handlers; outcome is logged and published on the event bus only.
    pub fn none() -> Self {
        Self::default()
    }

    /// Handler pair with a result callback.
    pub fn on_result(handler: impl FnOnce(ComponentId, CommandOutcome) + Send + 'static) -> Self {
        Self {
            result: Some(Box::new(handler)),
            progress: None,
        }
    }

    /// Attach a progress callback.
    pub fn with_progress(
        mut self,
        handler: impl FnMut(ComponentId, &CommandAck) + Send + 'static,
    ) -> Self {
        self.progress = Some(Box::new(handler));
        self
    }
}

impl fmt::Debug for CommandHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHandlers")
            .field("result", &self.result.is_some())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Per-submission delivery policy. Unset fields fall back to the dispatcher
/// configuration; the policy table can still override (non-retryable codes
/// are forced to a single try).
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandOptions {
    /// Surface a user-visible error event if the command fails.
    pub show_error: bool,
    /// Total send attempts before giving up.
    pub max_tries: Option<u32>,
    /// Silence interval after which a send is considered unanswered.
    pub ack_timeout: Option<Duration>,
    /// Slot disambiguator for duplicable codes (e.g. a battery index).
    pub dedup_index: Option<u16>,
}

impl CommandOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_show_error(mut self, show_error: bool) -> Self {
        self.show_error = show_error;
        self
    }

    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = Some(max_tries);
        self
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = Some(ack_timeout);
        self
    }

    pub fn with_dedup_index(mut self, index: u16) -> Self {
        self.dedup_index = Some(index);
        self
    }
}

/// One command submission as handed to the engine.
#[derive(Debug)]
pub struct CommandRequest {
    pub frame: CommandFrame,
    pub options: CommandOptions,
    pub handlers: CommandHandlers,
}

impl CommandRequest {
    pub fn new(frame: CommandFrame) -> Self {
        Self {
            frame,
            options: CommandOptions::default(),
            handlers: CommandHandlers::none(),
        }
    }

    pub fn with_options(mut self, options: CommandOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_handlers(mut self, handlers: CommandHandlers) -> Self {
        self.handlers = handlers;
        self
    }
}

/// Engine-internal completion hook, resolved before the caller handlers.
/// Replaces the caller handlers for commands the layer submits on its own
/// behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InternalHook {
    /// This entry is the REQUEST_MESSAGE command of a message-request flow.
    RequestMessage {
        component: ComponentId,
        message_id: MessageId,
    },
}

/// Runtime state of one queued or in-flight command.
#[derive(Debug)]
pub struct PendingCommand {
    pub frame: CommandFrame,
    pub show_error: bool,
    pub max_tries: u32,
    pub ack_timeout: Duration,
    pub handlers: CommandHandlers,
    pub(crate) hook: Option<InternalHook>,
    /// Send attempts so far. 0 until the first send.
    pub try_count: u32,
    /// Instant of the most recent send; reset on retry and on progress acks.
    pub sent_at: Instant,
}

impl PendingCommand {
    pub(crate) fn new(
        frame: CommandFrame,
        show_error: bool,
        max_tries: u32,
        ack_timeout: Duration,
        handlers: CommandHandlers,
        hook: Option<InternalHook>,
    ) -> Self {
        Self {
            frame,
            show_error,
            max_tries,
            ack_timeout,
            handlers,
            hook,
            try_count: 0,
            sent_at: Instant::now(),
        }
    }

    /// Whether the current attempt has gone unanswered past its timeout.
    pub fn is_overdue(&self, now: Instant) -> bool {
        now.duration_since(self.sent_at) >= self.ack_timeout
    }

    /// Whether another send attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.try_count < self.max_tries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aerolink_core::{AckResult, CommandCode, CommandPayload};

    fn frame(code: u16) -> CommandFrame {
        CommandFrame::new(
            ComponentId::AUTOPILOT,
            CommandCode(code),
            CommandPayload::empty(),
        )
    }

    #[test]
    fn test_options_builder() {
        let options = CommandOptions::new()
            .with_show_error(true)
            .with_max_tries(5)
            .with_ack_timeout(Duration::from_secs(1))
            .with_dedup_index(2);
        assert!(options.show_error);
        assert_eq!(options.max_tries, Some(5));
        assert_eq!(options.ack_timeout, Some(Duration::from_secs(1)));
        assert_eq!(options.dedup_index, Some(2));
    }

    #[test]
    fn test_outcome_accepted() {
        let acked = CommandOutcome::Acked(CommandAck::new(CommandCode(22), AckResult::Accepted));
        assert!(acked.is_accepted());

        let denied = CommandOutcome::Acked(CommandAck::new(CommandCode(22), AckResult::Denied));
        assert!(!denied.is_accepted());
        assert!(!CommandOutcome::NoResponse.is_accepted());
        assert!(!CommandOutcome::Duplicate.is_accepted());
    }

    #[tokio::test]
    async fn test_pending_command_overdue() {
        let mut cmd = PendingCommand::new(
            frame(22),
            false,
            3,
            Duration::from_millis(100),
            CommandHandlers::none(),
            None,
        );
        assert!(!cmd.is_overdue(Instant::now()));
        assert!(cmd.is_overdue(Instant::now() + Duration::from_millis(150)));

        cmd.try_count = 3;
        assert!(!cmd.can_retry());
    }

    #[test]
    fn test_handlers_debug_reports_presence() {
        let handlers = CommandHandlers::on_result(|_, _| {});
        let rendered = format!("{:?}", handlers);
        assert!(rendered.contains("result: true"));
        assert!(rendered.contains("progress: false"));
    }
}
