//! Single-timeline command engine.
//!
//! All engine state (command slots, message-request table) is owned by one
//! spawned task. Caller submissions are marshaled onto that task through a
//! channel, and the periodic response-check tick and inbound-message dispatch
//! run on the same task, so an entry can never be concurrently timed out and
//! acknowledged; whichever event is processed first wins and the other finds
//! the entry already gone.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use aerolink_core::{
    CommandAck, CommandCode, CommandFrame, CommandPayload, ComponentId, Downlink, InboundMessage,
    LinkClass, MessageBody, MessageId, SendOutcome,
};

use crate::api::CommandClient;
use crate::command::{CommandOutcome, CommandRequest, InternalHook, PendingCommand};
use crate::events::{CommandEvent, CommandEventBus, CommandEventKind};
use crate::intervals::IntervalRegistry;
use crate::policy;
use crate::queue::{CommandSlots, SlotKey, SubmitResult};
use crate::request::{
    RequestMessageFailure, RequestMessageHandler, RequestMessageInfo, RequestMessageOutcome,
    RequestTable,
};

/// Capacity of the caller-op hand-off channel.
const OP_CHANNEL_CAPACITY: usize = 256;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Total send attempts per command before giving up.
    pub max_tries: u32,
    /// Default silence interval after which a send is considered unanswered.
    pub ack_timeout_ms: u64,
    /// Ack timeout used instead when the link is high-latency.
    pub high_latency_ack_timeout_ms: u64,
    /// Period of the timeout scan. Retry timing jitters by up to one period.
    pub response_check_interval_ms: u64,
    /// How long a message request waits for its message after the ack.
    pub message_wait_timeout_ms: u64,
    /// Latency class of the underlying link.
    pub link_class: LinkClass,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_tries: 3,
            ack_timeout_ms: 3_000,
            high_latency_ack_timeout_ms: 120_000,
            response_check_interval_ms: 500,
            message_wait_timeout_ms: 5_000,
            link_class: LinkClass::Normal,
        }
    }
}

impl DispatcherConfig {
    /// Defaults for a high-latency (e.g. satellite) link.
    pub fn high_latency() -> Self {
        Self {
            link_class: LinkClass::HighLatency,
            ..Default::default()
        }
    }

    /// Ack timeout applied to commands that do not override it.
    pub fn default_ack_timeout(&self) -> Duration {
        match self.link_class {
            LinkClass::Normal => Duration::from_millis(self.ack_timeout_ms),
            LinkClass::HighLatency => Duration::from_millis(self.high_latency_ack_timeout_ms),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.response_check_interval_ms)
    }

    pub fn message_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.message_wait_timeout_ms)
    }
}

/// Caller operation marshaled onto the engine timeline.
pub(crate) enum EngineOp {
    Submit(CommandRequest),
    RequestMessage {
        component: ComponentId,
        message_id: MessageId,
        params: [f32; 5],
        handler: RequestMessageHandler,
    },
    IsPending {
        component: ComponentId,
        code: CommandCode,
        reply: oneshot::Sender<bool>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Spawns the engine task for one endpoint and hands out its client.
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Start the engine for the endpoint behind `link`. Inbound messages
    /// arrive on `inbound`; the broadcast means this layer is one consumer
    /// among many and never swallows a message for others.
    pub fn spawn(
        link: Arc<dyn Downlink>,
        inbound: broadcast::Receiver<InboundMessage>,
        config: DispatcherConfig,
    ) -> CommandClient {
        let (ops_tx, ops_rx) = mpsc::channel(OP_CHANNEL_CAPACITY);
        let intervals = Arc::new(IntervalRegistry::new());
        let events = CommandEventBus::new();

        let engine = Engine {
            link,
            config,
            slots: CommandSlots::new(),
            requests: RequestTable::new(),
            events: events.clone(),
        };
        tokio::spawn(engine.run(ops_rx, inbound));

        CommandClient::new(ops_tx, intervals, events)
    }
}

struct Engine {
    link: Arc<dyn Downlink>,
    config: DispatcherConfig,
    slots: CommandSlots,
    requests: RequestTable,
    events: CommandEventBus,
}

impl Engine {
    async fn run(
        mut self,
        mut ops: mpsc::Receiver<EngineOp>,
        mut inbound: broadcast::Receiver<InboundMessage>,
    ) {
        let mut tick = tokio::time::interval(self.config.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut inbound_open = true;

        loop {
            tokio::select! {
                op = ops.recv() => match op {
                    Some(op) => self.handle_op(op).await,
                    None => break,
                },
                msg = inbound.recv(), if inbound_open => match msg {
                    Ok(msg) => self.handle_inbound(msg).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "inbound message receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("inbound message stream closed");
                        inbound_open = false;
                    }
                },
                _ = tick.tick() => self.check_timeouts().await,
            }
        }

        // All clients gone. Accepted entries still resolve exactly once.
        self.fail_all_outstanding();
    }

    async fn handle_op(&mut self, op: EngineOp) {
        match op {
            EngineOp::Submit(request) => self.submit(request, None).await,
            EngineOp::RequestMessage {
                component,
                message_id,
                params,
                handler,
            } => {
                self.submit_request_message(component, message_id, params, handler)
                    .await
            }
            EngineOp::IsPending {
                component,
                code,
                reply,
            } => {
                let _ = reply.send(self.slots.is_pending(component, code));
            }
            EngineOp::Disconnect { reply } => {
                info!("endpoint disconnected, force-failing outstanding commands");
                self.fail_all_outstanding();
                let _ = reply.send(());
            }
        }
    }

    async fn submit(&mut self, request: CommandRequest, hook: Option<InternalHook>) {
        let code = request.frame.code;
        let max_tries = policy::effective_max_tries(
            code,
            request.options.max_tries.unwrap_or(self.config.max_tries),
        );
        let ack_timeout = request
            .options
            .ack_timeout
            .unwrap_or_else(|| self.config.default_ack_timeout());

        let pending = PendingCommand::new(
            request.frame,
            request.options.show_error,
            max_tries,
            ack_timeout,
            request.handlers,
            hook,
        );

        match self.slots.submit(pending, request.options.dedup_index) {
            SubmitResult::SendNow(key) => self.send_in_flight(key).await,
            SubmitResult::Queued(key) => {
                debug!(
                    component = %key.component,
                    code = %key.code,
                    "command queued behind in-flight entry"
                );
            }
            SubmitResult::Rejected(cmd) => self.resolve(cmd, CommandOutcome::Duplicate, true),
        }
    }

    async fn submit_request_message(
        &mut self,
        component: ComponentId,
        message_id: MessageId,
        params: [f32; 5],
        handler: RequestMessageHandler,
    ) {
        if self.requests.contains(component, message_id) {
            debug!(
                component = %component,
                message_id = %message_id,
                "message request already outstanding, rejecting"
            );
            handler(
                component,
                RequestMessageOutcome::Failed(RequestMessageFailure::DuplicateCommand),
            );
            return;
        }

        self.requests
            .insert(component, message_id, RequestMessageInfo::new(handler));

        // param1 selects the requested message; param7 = 0 routes the reply
        // to the requester.
        let payload = CommandPayload::Float {
            params: [
                f32::from(message_id.0),
                params[0],
                params[1],
                params[2],
                params[3],
                params[4],
                0.0,
            ],
        };
        let request = CommandRequest::new(CommandFrame::new(
            component,
            CommandCode::REQUEST_MESSAGE,
            payload,
        ));
        self.submit(
            request,
            Some(InternalHook::RequestMessage {
                component,
                message_id,
            }),
        )
        .await;
    }

    /// Send (or resend) the in-flight entry of a slot and restart its clock.
    async fn send_in_flight(&mut self, key: SlotKey) {
        let (frame, try_count) = match self.slots.in_flight_mut(&key) {
            Some(cmd) => {
                cmd.try_count += 1;
                cmd.sent_at = Instant::now();
                (cmd.frame, cmd.try_count)
            }
            None => return,
        };

        let kind = if try_count == 1 {
            debug!(component = %frame.target, code = %frame.code, "sending command");
            CommandEventKind::Sent { try_count }
        } else {
            info!(
                component = %frame.target,
                code = %frame.code,
                try_count,
                "resending unanswered command"
            );
            CommandEventKind::Retry { try_count }
        };
        self.events
            .publish(CommandEvent::new(frame.target, frame.code, kind));

        match self.link.send(&frame).await {
            Ok(SendOutcome::Sent) => {}
            Ok(SendOutcome::LinkUnavailable) => {
                // Stays on the normal retry/timeout path; the link may
                // recover within the retry window.
                warn!(
                    component = %frame.target,
                    code = %frame.code,
                    "link unavailable, command left on retry path"
                );
            }
            Err(err) => {
                warn!(
                    component = %frame.target,
                    code = %frame.code,
                    error = %err,
                    "link send failed, command left on retry path"
                );
            }
        }
    }

    async fn handle_inbound(&mut self, msg: InboundMessage) {
        match msg.body {
            MessageBody::Ack(ack) => self.handle_ack(msg.source, ack).await,
            MessageBody::Data(payload) => self.handle_data(msg.source, msg.id, payload),
        }
    }

    /// Acknowledgment correlator: match the ack to an in-flight entry by
    /// (source component, acked command code).
    async fn handle_ack(&mut self, source: ComponentId, ack: CommandAck) {
        let Some(key) = self.slots.find_in_flight(source, ack.command) else {
            // Expected under retry: duplicate or late acks, or acks for
            // commands another consumer sent.
            debug!(
                component = %source,
                code = %ack.command,
                result = %ack.result,
                "ack for unknown command, discarding"
            );
            return;
        };

        if ack.result.is_in_progress() {
            if let Some(cmd) = self.slots.in_flight_mut(&key) {
                // A further ack will follow; hold the slot and restart the
                // clock without consuming a try.
                cmd.sent_at = Instant::now();
                if let Some(progress) = cmd.handlers.progress.as_mut() {
                    progress(source, &ack);
                }
            }
            self.events.publish(CommandEvent::new(
                source,
                ack.command,
                CommandEventKind::Progress {
                    progress: ack.progress,
                },
            ));
            return;
        }

        if let Some((cmd, promoted)) = self.slots.complete_in_flight(&key) {
            self.resolve(cmd, CommandOutcome::Acked(ack), true);
            if promoted {
                self.send_in_flight(key).await;
            }
        }
    }

    /// Message-interest dispatch: a data message closes a waiting request;
    /// with no request waiting it passes through untouched (other broadcast
    /// subscribers see it regardless).
    fn handle_data(&mut self, source: ComponentId, id: MessageId, payload: serde_json::Value) {
        let complete = {
            let Some(info) = self.requests.get_mut(source, id) else {
                return;
            };
            if info.message_received {
                return;
            }
            info.message_received = true;
            info.message = Some(payload);
            debug!(component = %source, message_id = %id, "requested message arrived");
            info.is_complete()
        };
        if complete {
            self.finalize_request_success(source, id);
        }
    }

    /// Periodic scan over in-flight entries and message-wait windows.
    async fn check_timeouts(&mut self) {
        let now = Instant::now();

        for key in self.slots.overdue_keys(now) {
            let can_retry = match self.slots.in_flight_mut(&key) {
                Some(cmd) => cmd.can_retry(),
                None => continue,
            };
            if can_retry {
                self.send_in_flight(key).await;
            } else if let Some((cmd, promoted)) = self.slots.complete_in_flight(&key) {
                self.resolve(cmd, CommandOutcome::NoResponse, true);
                if promoted {
                    self.send_in_flight(key).await;
                }
            }
        }

        let wait_timeout = self.config.message_wait_timeout();
        for (component, message_id) in self.requests.overdue(now, wait_timeout) {
            warn!(
                component = %component,
                message_id = %message_id,
                "requested message never arrived"
            );
            self.finalize_request(
                component,
                message_id,
                RequestMessageOutcome::Failed(RequestMessageFailure::MessageNotReceived),
            );
        }
    }

    /// Deliver a terminal outcome: events, user-visible surfacing, internal
    /// hook, then the caller's result handler, exactly once.
    fn resolve(&mut self, mut cmd: PendingCommand, outcome: CommandOutcome, surface_errors: bool) {
        let component = cmd.frame.target;
        let code = cmd.frame.code;

        match &outcome {
            CommandOutcome::Acked(ack) => {
                debug!(
                    component = %component,
                    code = %code,
                    result = %ack.result,
                    "command acknowledged"
                );
                self.events.publish(CommandEvent::new(
                    component,
                    code,
                    CommandEventKind::Acknowledged { result: ack.result },
                ));
            }
            CommandOutcome::NoResponse => {
                warn!(
                    component = %component,
                    code = %code,
                    tries = cmd.try_count,
                    "no response to command"
                );
                self.events
                    .publish(CommandEvent::new(component, code, CommandEventKind::NoResponse));
            }
            CommandOutcome::Duplicate => {
                debug!(component = %component, code = %code, "duplicate command rejected");
            }
        }

        if surface_errors && cmd.show_error {
            if let Some(message) = user_error_message(component, code, &outcome) {
                self.events.publish(CommandEvent::new(
                    component,
                    code,
                    CommandEventKind::UserError { message },
                ));
            }
        }

        if let Some(hook) = cmd.hook.take() {
            match hook {
                InternalHook::RequestMessage {
                    component,
                    message_id,
                } => self.on_request_command_outcome(component, message_id, &outcome),
            }
        }

        if let Some(handler) = cmd.handlers.result.take() {
            handler(component, outcome);
        }
    }

    /// Outcome of the REQUEST_MESSAGE command underlying a message request.
    fn on_request_command_outcome(
        &mut self,
        component: ComponentId,
        message_id: MessageId,
        outcome: &CommandOutcome,
    ) {
        match outcome {
            CommandOutcome::Acked(ack) if ack.result.is_success() => {
                let complete = {
                    let Some(info) = self.requests.get_mut(component, message_id) else {
                        return;
                    };
                    info.ack_received = true;
                    // The message-wait window opens once the ack is in.
                    if info.wait_started.is_none() {
                        info.wait_started = Some(Instant::now());
                    }
                    info.is_complete()
                };
                if complete {
                    self.finalize_request_success(component, message_id);
                }
            }
            CommandOutcome::Acked(ack) => self.finalize_request(
                component,
                message_id,
                RequestMessageOutcome::Failed(RequestMessageFailure::CommandError(ack.result)),
            ),
            CommandOutcome::NoResponse => self.finalize_request(
                component,
                message_id,
                RequestMessageOutcome::Failed(RequestMessageFailure::CommandNotAcked),
            ),
            CommandOutcome::Duplicate => self.finalize_request(
                component,
                message_id,
                RequestMessageOutcome::Failed(RequestMessageFailure::DuplicateCommand),
            ),
        }
    }

    fn finalize_request_success(&mut self, component: ComponentId, message_id: MessageId) {
        if let Some(mut info) = self.requests.remove(component, message_id) {
            let payload = info.message.take().unwrap_or(serde_json::Value::Null);
            if let Some(handler) = info.handler.take() {
                handler(component, RequestMessageOutcome::Received(payload));
            }
        }
    }

    fn finalize_request(
        &mut self,
        component: ComponentId,
        message_id: MessageId,
        outcome: RequestMessageOutcome,
    ) {
        if let Some(mut info) = self.requests.remove(component, message_id) {
            if let Some(handler) = info.handler.take() {
                handler(component, outcome);
            }
        }
    }

    /// Force-finalize everything. Used on endpoint disconnect and engine
    /// shutdown: a departed endpoint will never answer, so waiting out the
    /// timers would only delay the inevitable.
    fn fail_all_outstanding(&mut self) {
        let drained = self.slots.drain_all();
        if !drained.is_empty() {
            info!(count = drained.len(), "force-failing outstanding commands");
        }
        for cmd in drained {
            self.resolve(cmd, CommandOutcome::NoResponse, false);
        }

        for ((component, _), mut info) in self.requests.drain_all() {
            let failure = if info.ack_received {
                RequestMessageFailure::MessageNotReceived
            } else {
                RequestMessageFailure::CommandNotAcked
            };
            if let Some(handler) = info.handler.take() {
                handler(component, RequestMessageOutcome::Failed(failure));
            }
        }
    }
}

fn user_error_message(
    component: ComponentId,
    code: CommandCode,
    outcome: &CommandOutcome,
) -> Option<String> {
    match outcome {
        CommandOutcome::Acked(ack) if ack.result.is_success() => None,
        CommandOutcome::Acked(ack) => Some(format!(
            "command {} to component {}: {}",
            code, component, ack.result
        )),
        CommandOutcome::NoResponse => Some(format!(
            "no response to command {} from component {}",
            code, component
        )),
        CommandOutcome::Duplicate => Some(format!(
            "command {} to component {} is already pending",
            code, component
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aerolink_core::{AckResult, CommandAck};

    #[test]
    fn test_config_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.max_tries, 3);
        assert_eq!(config.ack_timeout_ms, 3_000);
        assert_eq!(config.response_check_interval_ms, 500);
        assert_eq!(config.default_ack_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_high_latency_timeout_class() {
        let config = DispatcherConfig::high_latency();
        assert_eq!(config.default_ack_timeout(), Duration::from_secs(120));
        // Other knobs keep their defaults.
        assert_eq!(config.max_tries, 3);
    }

    #[test]
    fn test_user_error_message_only_on_failure() {
        let component = ComponentId(1);
        let code = CommandCode(400);

        let accepted =
            CommandOutcome::Acked(CommandAck::new(code, AckResult::Accepted));
        assert!(user_error_message(component, code, &accepted).is_none());

        let denied = CommandOutcome::Acked(CommandAck::new(code, AckResult::Denied));
        let message = user_error_message(component, code, &denied).unwrap();
        assert!(message.contains("denied"));

        let silent = user_error_message(component, code, &CommandOutcome::NoResponse).unwrap();
        assert!(silent.contains("no response"));
    }
}
