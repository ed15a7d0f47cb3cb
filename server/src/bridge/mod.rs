//! Concurrency Bridge
//!
//! Hands questions from the webhook serving context to background tasks and
//! pushes each outcome back to the user exactly once.
//!
//! One drain task runs per user with registered requests. It executes the
//! user's requests in order, each inside its own task so a panic in a backend
//! call still produces a reply and frees the user's queue.

pub mod delivery;
pub mod messages;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::dispatch::{DispatchError, QueryDispatcher, QueryRequest, QueryStatus, RequestId};
use crate::retry::{FailureKind, RetryPolicy};

pub use delivery::{DeliveryError, LinePushClient, ResponseDelivery, MAX_MESSAGE_CHARS};
pub use messages::ReplyMessages;

/// Bridge errors surfaced to the caller or the logs.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Reply for request {request_id} not delivered after {attempts} attempts: {source}")]
    Delivery {
        request_id: RequestId,
        attempts: u32,
        #[source]
        source: DeliveryError,
    },
}

/// What happened to an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Registered; the answer will be pushed later.
    Accepted(RequestId),
    /// The user's queue is full; a notice was sent instead.
    Busy,
    /// Nothing to ask.
    Ignored,
}

/// Single-use right to reply to one request.
///
/// Delivering consumes the ticket, so a request cannot be answered twice.
#[derive(Debug)]
struct CompletionTicket {
    request_id: RequestId,
    user_id: String,
    status: QueryStatus,
    message: String,
}

impl CompletionTicket {
    fn new(request: &QueryRequest, status: QueryStatus, message: String) -> Self {
        Self {
            request_id: request.id,
            user_id: request.user_id.clone(),
            status,
            message,
        }
    }

    async fn deliver(
        self,
        delivery: &dyn ResponseDelivery,
        policy: &RetryPolicy,
    ) -> Result<(), BridgeError> {
        let mut retries = 0u32;
        loop {
            let err = match delivery.push(&self.user_id, &self.message).await {
                Ok(()) => {
                    info!(
                        request_id = %self.request_id,
                        user_id = %self.user_id,
                        status = self.status.as_str(),
                        "Reply delivered"
                    );
                    return Ok(());
                }
                Err(e) => e,
            };

            let Some(delay) = policy.next_delay(FailureKind::Delivery, retries) else {
                return Err(BridgeError::Delivery {
                    request_id: self.request_id,
                    attempts: retries + 1,
                    source: err,
                });
            };
            retries += 1;
            warn!(
                request_id = %self.request_id,
                user_id = %self.user_id,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Push failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Glue between the webhook handlers and the dispatcher.
pub struct ConcurrencyBridge {
    dispatcher: Arc<QueryDispatcher>,
    delivery: Arc<dyn ResponseDelivery>,
    messages: ReplyMessages,
}

impl ConcurrencyBridge {
    pub fn new(
        dispatcher: Arc<QueryDispatcher>,
        delivery: Arc<dyn ResponseDelivery>,
        messages: ReplyMessages,
    ) -> Self {
        Self {
            dispatcher,
            delivery,
            messages,
        }
    }

    pub fn dispatcher(&self) -> &Arc<QueryDispatcher> {
        &self.dispatcher
    }

    /// Register a user's message and return without waiting on the backend.
    ///
    /// Must be called from within a tokio runtime.
    pub fn handle_incoming(
        self: &Arc<Self>,
        user_id: &str,
        text: &str,
    ) -> Result<Admission, BridgeError> {
        let text = text.trim();
        if text.is_empty() {
            debug!(user_id = %user_id, "Ignoring empty message");
            return Ok(Admission::Ignored);
        }

        match self.dispatcher.submit(user_id, text) {
            Ok(submission) => {
                info!(
                    user_id = %user_id,
                    request_id = %submission.request_id,
                    "Query registered"
                );
                if submission.needs_worker {
                    self.spawn_drain(user_id.to_string());
                }
                Ok(Admission::Accepted(submission.request_id))
            }
            Err(DispatchError::UserBusy { .. }) => {
                info!(user_id = %user_id, "User busy, message rejected");
                self.spawn_busy_notice(user_id.to_string());
                Ok(Admission::Busy)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn spawn_drain(self: &Arc<Self>, user_id: String) {
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            let worker_user = user_id.clone();
            let handle = tokio::spawn(async move { bridge.drain(&worker_user).await });
            if let Err(e) = handle.await {
                error!(user_id = %user_id, "Query worker panicked: {}", e);
            }
        });
    }

    fn spawn_busy_notice(self: &Arc<Self>, user_id: String) {
        let delivery = Arc::clone(&self.delivery);
        let notice = self.messages.busy.clone();
        tokio::spawn(async move {
            if let Err(e) = delivery.push(&user_id, &notice).await {
                debug!(user_id = %user_id, error = %e, "Busy notice not delivered");
            }
        });
    }

    /// Run the user's requests in order until their queue is empty.
    async fn drain(&self, user_id: &str) {
        while let Some(request) = self.dispatcher.begin_next(user_id) {
            let result = self.execute_isolated(&request).await;
            let status = QueryStatus::from_result(&result);
            if let Err(e) = &result {
                warn!(
                    request_id = %request.id,
                    user_id = %user_id,
                    code = e.code(),
                    error = %e,
                    "Query failed"
                );
            }

            let ticket = CompletionTicket::new(&request, status, self.messages.format(&result));
            if let Err(e) = ticket
                .deliver(self.delivery.as_ref(), &self.dispatcher.config().retry_policy)
                .await
            {
                error!(request_id = %request.id, user_id = %user_id, error = %e, "Giving up on reply");
            }

            if !self.dispatcher.finish(user_id, request.id, status) {
                break;
            }
        }
    }

    async fn execute_isolated(&self, request: &QueryRequest) -> Result<String, DispatchError> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let owned = request.clone();
        match tokio::spawn(async move { dispatcher.execute(&owned).await }).await {
            Ok(result) => result,
            Err(e) => {
                error!(request_id = %request.id, user_id = %request.user_id, "Query task panicked: {}", e);
                Err(DispatchError::Aborted(e.to_string()))
            }
        }
    }

    /// Request id of the user's in-flight query, if any.
    pub fn in_flight(&self, user_id: &str) -> Option<RequestId> {
        self.dispatcher.in_flight(user_id).map(|r| r.id)
    }
}
