//! Streaming response coordination.
//!
//! A spawned task pulls normalized events from the backend, relays each text
//! delta to the HTTP body channel in generation order while accumulating it,
//! then persists the turn pair exactly once and captures the exchange into
//! long-term memory. Relay and persistence are separate steps joined by a
//! [`StreamCompletion`], so each can be exercised on its own.

use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use serde_json::{Map, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::memory::MemoryGateway;
use super::providers::EventStream;
use super::retry::RetryPolicy;
use super::storage::{ChatStore, StoreError};
use crate::models::{
    chat::{Role, Turn, TurnMetadata, TurnPair},
    memory::MemoryMessage,
    prompt::{BackendEvent, TokenUsage},
};

/// Buffered deltas between the backend task and the response body.
const RELAY_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Dispatched,
    Streaming,
    Finalizing,
    Persisted,
    PersistFailed,
    Closed,
}

/// What the relay observed by the time generation stopped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamCompletion {
    pub text: String,
    pub usage: TokenUsage,
    pub finish_reason: Option<String>,
    /// The client went away before the backend finished.
    pub disconnected: bool,
    /// The backend stream failed after it started.
    pub backend_error: Option<String>,
}

/// Everything needed to persist one exchange once the stream ends.
#[derive(Debug, Clone)]
pub struct PendingTurn {
    pub chat_id: String,
    pub user_id: String,
    pub user_turn: Turn,
    pub model: String,
    /// The request's messages, used for memory capture.
    pub conversation: Vec<MemoryMessage>,
    pub attachment_count: usize,
}

#[derive(Debug)]
pub struct StreamOutcome {
    pub state: StreamState,
    pub completion: StreamCompletion,
}

#[derive(Clone)]
pub struct StreamCoordinator {
    chats: Arc<dyn ChatStore>,
    memory: MemoryGateway,
    retry: RetryPolicy,
    capture_window: usize,
}

struct Transitions {
    chat_id: String,
    state: StreamState,
}

impl Transitions {
    fn advance(&mut self, next: StreamState) {
        debug!(chat_id = %self.chat_id, from = ?self.state, to = ?next, "stream state");
        self.state = next;
    }
}

impl StreamCoordinator {
    pub fn new(
        chats: Arc<dyn ChatStore>,
        memory: MemoryGateway,
        retry: RetryPolicy,
        capture_window: usize,
    ) -> Self {
        Self {
            chats,
            memory,
            retry,
            capture_window,
        }
    }

    /// Spawns relay plus finalization for a dispatched backend stream.
    ///
    /// The returned receiver feeds the response body; the handle resolves
    /// once the turn pair has been persisted or the write has failed.
    pub fn spawn(
        &self,
        events: EventStream,
        pending: PendingTurn,
    ) -> (mpsc::Receiver<Bytes>, JoinHandle<StreamOutcome>) {
        let (tx, rx) = mpsc::channel(RELAY_BUFFER);
        let coordinator = self.clone();

        let handle = tokio::spawn(async move {
            let mut transitions = Transitions {
                chat_id: pending.chat_id.clone(),
                state: StreamState::Dispatched,
            };

            transitions.advance(StreamState::Streaming);
            let completion = relay(events, tx).await;

            transitions.advance(StreamState::Finalizing);
            let persisted = coordinator.finalize(&pending, &completion).await;
            transitions.advance(persisted);

            coordinator.capture(&pending, &completion).await;
            let state = transitions.state;
            transitions.advance(StreamState::Closed);

            StreamOutcome { state, completion }
        });

        (rx, handle)
    }

    /// Appends the user turn and the accumulated assistant turn in a single
    /// write. Transient storage errors are retried; ownership conflicts are not.
    pub async fn finalize(&self, pending: &PendingTurn, completion: &StreamCompletion) -> StreamState {
        let tokens = completion.usage.total_tokens;
        let pair = TurnPair {
            user: pending.user_turn.clone(),
            assistant: Turn {
                id: Uuid::new_v4().to_string(),
                role: Role::Assistant,
                content: completion.text.clone(),
                timestamp: Utc::now(),
                attachments: Vec::new(),
                metadata: Some(TurnMetadata {
                    tokens: Some(tokens),
                    model: Some(pending.model.clone()),
                    finish_reason: completion.finish_reason.clone(),
                }),
            },
            model: pending.model.clone(),
            tokens,
        };

        let result = self
            .retry
            .execute(
                "persist turn pair",
                |e: &StoreError| matches!(e, StoreError::Backend(_)),
                || self.chats.append_turns(&pending.chat_id, &pending.user_id, pair.clone()),
            )
            .await;

        match result {
            Ok(()) => {
                info!(
                    chat_id = %pending.chat_id,
                    tokens,
                    chars = completion.text.len(),
                    disconnected = completion.disconnected,
                    "persisted turn pair"
                );
                StreamState::Persisted
            },
            Err(e) => {
                error!(
                    chat_id = %pending.chat_id,
                    user_id = %pending.user_id,
                    error = %e,
                    "failed to persist turn pair after stream"
                );
                StreamState::PersistFailed
            },
        }
    }

    async fn capture(&self, pending: &PendingTurn, completion: &StreamCompletion) {
        let mut conversation = pending.conversation.clone();
        conversation.push(MemoryMessage {
            role: Role::Assistant.as_str().to_string(),
            content: completion.text.clone(),
        });

        let mut extra = Map::new();
        extra.insert("model".into(), json!(pending.model));
        extra.insert("tokens".into(), json!(completion.usage.total_tokens));
        extra.insert("attachmentCount".into(), json!(pending.attachment_count));

        if self
            .memory
            .capture_conversation(
                &conversation,
                &pending.user_id,
                Some(&pending.chat_id),
                self.capture_window,
                extra,
            )
            .await
            .is_none()
        {
            debug!(chat_id = %pending.chat_id, "memory capture skipped");
        }
    }
}

/// Forwards deltas to `tx` until the backend finishes, fails, or the
/// receiver is dropped. A dropped receiver stops generation: the backend
/// stream is dropped with it.
pub async fn relay(mut events: EventStream, tx: mpsc::Sender<Bytes>) -> StreamCompletion {
    let mut completion = StreamCompletion::default();

    while let Some(event) = events.next().await {
        match event {
            Ok(BackendEvent::Delta(delta)) => {
                completion.text.push_str(&delta);
                if tx.send(Bytes::from(delta)).await.is_err() {
                    debug!("client disconnected, stopping generation");
                    completion.disconnected = true;
                    break;
                }
            },
            Ok(BackendEvent::Usage(usage)) => completion.usage.merge(usage),
            Ok(BackendEvent::Finish(reason)) => completion.finish_reason = Some(reason),
            Err(e) => {
                warn!(error = %e, "backend stream failed mid-generation");
                completion.backend_error = Some(e.to_string());
                completion.finish_reason = Some("error".to_string());
                break;
            },
        }
    }

    completion
}
