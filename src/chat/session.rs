//! Chat session manager
//!
//! Lifecycle of one turn: `Idle → Sending → Streaming → Idle`. The log keeps
//! the cumulative assistant text in a single message that is replaced in
//! place as deltas arrive.

use crate::chat::stream::EventStreamDecoder;
use crate::error::TrackerError;
use crate::models::{ChatMessage, ChatRole};
use crate::storage::{self, KeyValueStorage, CHAT_HISTORY_KEY};
use crate::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Appended to the assistant reply when a turn fails
pub const CHAT_ERROR_MESSAGE: &str = "❌ Desculpe, ocorreu um erro. Tente novamente.";

/// Raw response body, chunk by chunk
pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

/// Opens a streamed chat completion for the full message log
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open_stream(&self, messages: &[ChatMessage]) -> Result<ByteStream>;
}

struct InFlight {
    request_id: u64,
    token: CancellationToken,
}

/// Clears the in-flight slot however the turn ends, including when the
/// caller drops the future.
struct TurnGuard<'a> {
    session: &'a ChatSession,
    request_id: u64,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.session.finish(self.request_id);
    }
}

pub struct ChatSession {
    storage: Arc<dyn KeyValueStorage>,
    transport: Arc<dyn ChatTransport>,
    messages: Mutex<Vec<ChatMessage>>,
    in_flight: Mutex<Option<InFlight>>,
    next_request_id: AtomicU64,
}

impl ChatSession {
    /// Restore the persisted log, starting empty if it is missing or malformed
    pub fn load(storage: Arc<dyn KeyValueStorage>, transport: Arc<dyn ChatTransport>) -> Self {
        let messages: Vec<ChatMessage> =
            storage::load_json(storage.as_ref(), CHAT_HISTORY_KEY).unwrap_or_default();
        debug!(count = messages.len(), "Loaded chat history");

        Self {
            storage,
            transport,
            messages: Mutex::new(messages),
            in_flight: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
        }
    }

    fn lock_messages(&self) -> MutexGuard<'_, Vec<ChatMessage>> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock_messages().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock_in_flight().is_some()
    }

    /// Send `input` and stream the assistant's answer into the log.
    ///
    /// Remote failures never surface here: they end the turn with
    /// [`CHAT_ERROR_MESSAGE`] in the log. The only error is
    /// [`TrackerError::ChatBusy`] when another turn is still running.
    pub async fn send_message(&self, input: &str) -> Result<()> {
        let (request_id, token) = self.begin()?;
        let _turn = TurnGuard {
            session: self,
            request_id,
        };

        let outcome = match self.push_user(input, &token) {
            Some(outgoing) => {
                let mut reply = String::new();
                let streamed = self.stream_reply(&outgoing, &token, &mut reply).await;
                streamed.map_err(|e| (e, reply))
            }
            None => Err((TrackerError::Cancelled, String::new())),
        };

        match outcome {
            Ok(()) => info!(request_id, "Chat turn completed"),
            Err((e, _)) if e.is_cancelled() || token.is_cancelled() => {
                info!(request_id, "Chat turn cancelled");
            }
            Err((e, mut reply)) => {
                error!(request_id, error = %e, "Chat error");
                reply.push_str(CHAT_ERROR_MESSAGE);
                self.upsert_assistant(&reply, &token);
            }
        }

        Ok(())
    }

    /// Abort any running turn and forget the whole conversation.
    pub fn clear_chat(&self) {
        if let Some(in_flight) = self.lock_in_flight().take() {
            info!(request_id = in_flight.request_id, "Cancelling in-flight chat request");
            in_flight.token.cancel();
        }

        let mut messages = self.lock_messages();
        messages.clear();
        storage::remove_key(self.storage.as_ref(), CHAT_HISTORY_KEY);
        info!("Chat history cleared");
    }

    fn begin(&self) -> Result<(u64, CancellationToken)> {
        let mut in_flight = self.lock_in_flight();
        if let Some(current) = in_flight.as_ref() {
            warn!(request_id = current.request_id, "Chat request already in flight");
            return Err(TrackerError::ChatBusy);
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        *in_flight = Some(InFlight {
            request_id,
            token: token.clone(),
        });
        Ok((request_id, token))
    }

    fn finish(&self, request_id: u64) {
        let mut in_flight = self.lock_in_flight();
        if in_flight.as_ref().is_some_and(|f| f.request_id == request_id) {
            *in_flight = None;
        }
    }

    /// Append the user turn and return the log to send.
    fn push_user(&self, input: &str, token: &CancellationToken) -> Option<Vec<ChatMessage>> {
        let mut messages = self.lock_messages();
        if token.is_cancelled() {
            return None;
        }
        messages.push(ChatMessage::user(input));
        self.persist(&messages);
        Some(messages.clone())
    }

    /// Replace the trailing assistant message with `text`, or append one.
    /// Returns false once the turn has been cancelled.
    fn upsert_assistant(&self, text: &str, token: &CancellationToken) -> bool {
        let mut messages = self.lock_messages();
        if token.is_cancelled() {
            return false;
        }

        match messages.last_mut() {
            Some(last) if last.role == ChatRole::Assistant => last.content = text.to_string(),
            _ => messages.push(ChatMessage::assistant(text)),
        }
        self.persist(&messages);
        true
    }

    fn persist(&self, messages: &[ChatMessage]) {
        storage::save_json(self.storage.as_ref(), CHAT_HISTORY_KEY, messages);
    }

    fn apply_deltas(&self, deltas: Vec<String>, reply: &mut String, token: &CancellationToken) -> Result<()> {
        for delta in deltas {
            reply.push_str(&delta);
            if !self.upsert_assistant(reply, token) {
                return Err(TrackerError::Cancelled);
            }
        }
        Ok(())
    }

    async fn stream_reply(
        &self,
        outgoing: &[ChatMessage],
        token: &CancellationToken,
        reply: &mut String,
    ) -> Result<()> {
        info!(messages = outgoing.len(), "Opening chat stream");

        let mut body = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(TrackerError::Cancelled),
            opened = self.transport.open_stream(outgoing) => opened?,
        };

        let mut decoder = EventStreamDecoder::new();
        while !decoder.is_done() {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(TrackerError::Cancelled),
                next = body.next() => next,
            };

            let Some(chunk) = next else { break };
            let deltas = decoder.feed(&chunk?);
            self.apply_deltas(deltas, reply, token)?;
        }

        let trailing = decoder.finish();
        if !trailing.is_empty() {
            debug!(count = trailing.len(), "Flushing trailing records");
        }
        self.apply_deltas(trailing, reply, token)
    }
}
