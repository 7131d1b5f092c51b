//! Caller-facing command client.
//!
//! A cheaply clonable handle over the engine's op channel. Submissions from
//! any task are marshaled onto the engine timeline; nothing here blocks a
//! thread, and every completion arrives through the submission's handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use aerolink_core::{
    AckResult, CommandCode, CommandFrame, CommandPayload, ComponentId, MessageId,
    MessageIntervalPayload, MissionFrame,
};

use crate::command::{CommandHandlers, CommandOptions, CommandOutcome, CommandRequest};
use crate::dispatcher::EngineOp;
use crate::events::{CommandEvent, CommandEventBus};
use crate::intervals::IntervalRegistry;
use crate::request::{RequestMessageFailure, RequestMessageOutcome};

/// Submission-side failure.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The engine task has stopped (endpoint torn down).
    #[error("command engine is not running")]
    EngineStopped,
}

/// Failure of an awaited message request.
#[derive(Debug, thiserror::Error)]
pub enum RequestMessageError {
    #[error(transparent)]
    Failed(#[from] RequestMessageFailure),

    #[error("command engine is not running")]
    EngineStopped,
}

/// Handle to one endpoint's command engine.
#[derive(Debug, Clone)]
pub struct CommandClient {
    ops: mpsc::Sender<EngineOp>,
    intervals: Arc<IntervalRegistry>,
    events: CommandEventBus,
}

impl CommandClient {
    pub(crate) fn new(
        ops: mpsc::Sender<EngineOp>,
        intervals: Arc<IntervalRegistry>,
        events: CommandEventBus,
    ) -> Self {
        Self {
            ops,
            intervals,
            events,
        }
    }

    /// Submit a prepared command request.
    pub async fn submit(&self, request: CommandRequest) -> Result<(), ClientError> {
        self.ops
            .send(EngineOp::Submit(request))
            .await
            .map_err(|_| ClientError::EngineStopped)
    }

    /// Send a command with the float parameter block. The terminal outcome
    /// is logged and published on the event bus; failures surface to the
    /// user when `show_error` is set.
    pub async fn send_command(
        &self,
        component: ComponentId,
        code: CommandCode,
        show_error: bool,
        params: [f32; 7],
    ) -> Result<(), ClientError> {
        let request =
            CommandRequest::new(CommandFrame::new(component, code, CommandPayload::float(params)))
                .with_options(CommandOptions::new().with_show_error(show_error));
        self.submit(request).await
    }

    /// Send a positional command with the scaled-parameter wire variant.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_command_int(
        &self,
        component: ComponentId,
        code: CommandCode,
        frame: MissionFrame,
        show_error: bool,
        params: [f32; 4],
        x: f64,
        y: f64,
        z: f32,
    ) -> Result<(), ClientError> {
        let payload = CommandPayload::Int {
            frame,
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            x,
            y,
            z,
        };
        let request = CommandRequest::new(CommandFrame::new(component, code, payload))
            .with_options(CommandOptions::new().with_show_error(show_error));
        self.submit(request).await
    }

    /// Send a command and receive its outcome through the handler pair.
    pub async fn send_command_with_handler(
        &self,
        handlers: CommandHandlers,
        component: ComponentId,
        code: CommandCode,
        payload: CommandPayload,
        options: CommandOptions,
    ) -> Result<(), ClientError> {
        let request = CommandRequest::new(CommandFrame::new(component, code, payload))
            .with_options(options)
            .with_handlers(handlers);
        self.submit(request).await
    }

    /// Send a command and run `fallback` if the component acks it as
    /// unsupported, e.g. to fall back to an older command code.
    pub async fn send_command_with_unsupported_fallback(
        &self,
        fallback: impl FnOnce() + Send + 'static,
        component: ComponentId,
        code: CommandCode,
        show_error: bool,
        params: [f32; 7],
    ) -> Result<(), ClientError> {
        let handlers = CommandHandlers::on_result(move |_, outcome| {
            if let CommandOutcome::Acked(ack) = &outcome {
                if ack.result == AckResult::Unsupported {
                    fallback();
                }
            }
        });
        self.send_command_with_handler(
            handlers,
            component,
            code,
            CommandPayload::float(params),
            CommandOptions::new().with_show_error(show_error),
        )
        .await
    }

    /// Submit a command after a delay. Fire-and-forget; if the engine stops
    /// before the delay elapses the submission is dropped.
    pub fn send_command_delayed(
        &self,
        component: ComponentId,
        code: CommandCode,
        show_error: bool,
        delay: Duration,
        params: [f32; 7],
    ) {
        let client = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if client
                .send_command(component, code, show_error, params)
                .await
                .is_err()
            {
                debug!(
                    component = %component,
                    code = %code,
                    "engine stopped before delayed command was submitted"
                );
            }
        });
    }

    /// Whether a command for (component, code) is queued or in flight with
    /// its timeout not yet expired. A submission now would be rejected as a
    /// duplicate exactly when this returns `true` (for non-duplicable codes).
    pub async fn is_command_pending(
        &self,
        component: ComponentId,
        code: CommandCode,
    ) -> Result<bool, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.ops
            .send(EngineOp::IsPending {
                component,
                code,
                reply,
            })
            .await
            .map_err(|_| ClientError::EngineStopped)?;
        rx.await.map_err(|_| ClientError::EngineStopped)
    }

    /// Ask `component` to emit one message of type `message_id` and wait for
    /// it. The handler fires exactly once: with the message payload on
    /// success, or a [`RequestMessageFailure`] otherwise.
    pub async fn request_message(
        &self,
        handler: impl FnOnce(ComponentId, RequestMessageOutcome) + Send + 'static,
        component: ComponentId,
        message_id: MessageId,
        params: [f32; 5],
    ) -> Result<(), ClientError> {
        self.ops
            .send(EngineOp::RequestMessage {
                component,
                message_id,
                params,
                handler: Box::new(handler),
            })
            .await
            .map_err(|_| ClientError::EngineStopped)
    }

    /// Awaitable form of [`request_message`](Self::request_message).
    pub async fn request_message_async(
        &self,
        component: ComponentId,
        message_id: MessageId,
        params: [f32; 5],
    ) -> Result<serde_json::Value, RequestMessageError> {
        let (tx, rx) = oneshot::channel();
        self.request_message(
            move |_, outcome| {
                let _ = tx.send(outcome);
            },
            component,
            message_id,
            params,
        )
        .await
        .map_err(|_| RequestMessageError::EngineStopped)?;

        match rx.await {
            Ok(RequestMessageOutcome::Received(payload)) => Ok(payload),
            Ok(RequestMessageOutcome::Failed(failure)) => Err(failure.into()),
            Err(_) => Err(RequestMessageError::EngineStopped),
        }
    }

    /// Cached streaming interval for (component, message id), in
    /// microseconds. `None` means unknown, never zero.
    pub fn get_message_rate(&self, component: ComponentId, message_id: MessageId) -> Option<i32> {
        self.intervals.rate(component, message_id)
    }

    /// Drop the cached rate for (component, message id) so the next
    /// consumer re-queries it.
    pub fn invalidate_message_rate(&self, component: ComponentId, message_id: MessageId) {
        self.intervals.invalidate(component, message_id);
    }

    /// Negotiate the streaming interval of one message type. The cache is
    /// updated only once the component acks the change.
    pub async fn set_message_rate(
        &self,
        component: ComponentId,
        message_id: MessageId,
        rate_us: i32,
    ) -> Result<(), ClientError> {
        let intervals = self.intervals.clone();
        let handlers = CommandHandlers::on_result(move |component, outcome| match outcome {
            CommandOutcome::Acked(ack) if ack.result.is_success() => {
                intervals.record_rate(component, message_id, rate_us);
            }
            CommandOutcome::Acked(ack) if ack.result == AckResult::Unsupported => {
                intervals.mark_unsupported(component, message_id);
            }
            _ => {}
        });

        let mut options = CommandOptions::new();
        if rate_us < 0 {
            // A lost disable is harmless; resent disable spam is not.
            options = options.with_max_tries(1);
        }

        let params = [
            f32::from(message_id.0),
            rate_us as f32,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
        ];
        self.send_command_with_handler(
            handlers,
            component,
            CommandCode::SET_MESSAGE_INTERVAL,
            CommandPayload::float(params),
            options,
        )
        .await
    }

    /// Query the component for its current interval of one message type and
    /// cache the answer. Pairs the component has reported as unsupported are
    /// skipped.
    pub async fn refresh_message_rate(
        &self,
        component: ComponentId,
        message_id: MessageId,
    ) -> Result<(), ClientError> {
        if self.intervals.is_unsupported(component, message_id) {
            debug!(
                component = %component,
                message_id = %message_id,
                "interval known unsupported, skipping query"
            );
            return Ok(());
        }

        let intervals = self.intervals.clone();
        self.request_message(
            move |component, outcome| match outcome {
                RequestMessageOutcome::Received(payload) => {
                    match serde_json::from_value::<MessageIntervalPayload>(payload) {
                        Ok(interval) => intervals.record_rate(
                            component,
                            MessageId(interval.message_id),
                            interval.interval_us,
                        ),
                        Err(err) => {
                            warn!(component = %component, error = %err, "malformed interval payload");
                        }
                    }
                }
                RequestMessageOutcome::Failed(RequestMessageFailure::CommandError(_)) => {
                    intervals.mark_unsupported(component, message_id);
                }
                RequestMessageOutcome::Failed(failure) => {
                    debug!(
                        component = %component,
                        message_id = %message_id,
                        %failure,
                        "interval query failed"
                    );
                }
            },
            component,
            MessageId::MESSAGE_INTERVAL,
            [f32::from(message_id.0), 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    /// Force-finalize every outstanding command and message request with a
    /// no-response-class result and clear the queues. Completes once the
    /// engine has processed the teardown.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.ops
            .send(EngineOp::Disconnect { reply })
            .await
            .map_err(|_| ClientError::EngineStopped)?;
        rx.await.map_err(|_| ClientError::EngineStopped)
    }

    /// Subscribe to command lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CommandEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ClientError::EngineStopped.to_string(),
            "command engine is not running"
        );
        let failure: RequestMessageError = RequestMessageFailure::MessageNotReceived.into();
        assert_eq!(failure.to_string(), "requested message never arrived");
    }
}
