//! The container's out-of-band cancellation capability.

use super::AsyncInvocationId;
use crate::events::{get_event_sink, EVENT_CANCEL_FORWARDED};
use crate::utils::{format_timestamp, now, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

/// A context (typically the container) capable of cancelling an
/// invocation identified by its correlation token.
///
/// Client futures call this only when local cancellation has failed and
/// the caller allowed interruption. Implementations must:
/// - return without blocking on the remote side
/// - tolerate ids that already completed or were already cancelled
/// - tolerate concurrent calls from unrelated futures
#[cfg_attr(test, mockall::automock)]
pub trait AsyncCancellableContext: Send + Sync {
    /// Requests cancellation of the invocation named by `id`.
    fn cancel(&self, id: AsyncInvocationId);
}

/// A context that discards every cancellation request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCancellableContext;

impl AsyncCancellableContext for NoOpCancellableContext {
    fn cancel(&self, id: AsyncInvocationId) {
        trace!(invocation_id = %id, "Discarding cancellation request");
    }
}

/// A cancellation request travelling from a client to its container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    /// The invocation to cancel.
    pub id: AsyncInvocationId,
    /// When the client asked for cancellation.
    pub requested_at: Timestamp,
}

impl CancelRequest {
    /// Creates a request stamped with the current time.
    #[must_use]
    pub fn new(id: AsyncInvocationId) -> Self {
        Self {
            id,
            requested_at: now(),
        }
    }
}

/// A context that forwards requests over a bounded channel.
///
/// `cancel` never blocks: if the channel is full or the receiving side is
/// gone the request is dropped with a warning. Delivery is best effort.
#[derive(Debug, Clone)]
pub struct ChannelCancellableContext {
    sender: mpsc::Sender<CancelRequest>,
}

impl ChannelCancellableContext {
    /// Creates a context and the receiver that drains it.
    ///
    /// A `capacity` of zero is bumped to one.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, CancelRequestReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, CancelRequestReceiver { receiver })
    }

    /// Returns true once the receiving side has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl AsyncCancellableContext for ChannelCancellableContext {
    fn cancel(&self, id: AsyncInvocationId) {
        match self.sender.try_send(CancelRequest::new(id)) {
            Ok(()) => {
                debug!(invocation_id = %id, "Queued cancellation request");
            }
            Err(TrySendError::Full(_)) => {
                warn!(invocation_id = %id, "Cancellation channel full, dropping request");
            }
            Err(TrySendError::Closed(_)) => {
                warn!(invocation_id = %id, "Cancellation channel closed, dropping request");
            }
        }
    }
}

/// Receiving half of a [`ChannelCancellableContext`].
#[derive(Debug)]
pub struct CancelRequestReceiver {
    receiver: mpsc::Receiver<CancelRequest>,
}

impl CancelRequestReceiver {
    /// Waits for the next request; `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<CancelRequest> {
        self.receiver.recv().await
    }

    /// Returns a queued request without waiting.
    pub fn try_recv(&mut self) -> Option<CancelRequest> {
        self.receiver.try_recv().ok()
    }

    /// Forwards every request to `target` until all senders are dropped.
    ///
    /// Returns the number of forwarded requests.
    pub async fn serve_into(mut self, target: Arc<dyn AsyncCancellableContext>) -> usize {
        let events = get_event_sink();
        let mut forwarded = 0;
        while let Some(request) = self.receiver.recv().await {
            trace!(
                invocation_id = %request.id,
                requested_at = %request.requested_at,
                "Forwarding cancellation request"
            );
            target.cancel(request.id);
            forwarded += 1;
            events
                .emit(
                    EVENT_CANCEL_FORWARDED,
                    Some(json!({
                        "invocation_id": request.id.to_string(),
                        "requested_at": format_timestamp(&request.requested_at),
                    })),
                )
                .await;
        }
        debug!(forwarded, "Cancellation channel drained");
        forwarded
    }
}
