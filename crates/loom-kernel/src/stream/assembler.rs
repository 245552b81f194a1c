//! Folds a completion event stream into messages and deltas.

use std::collections::VecDeque;

use futures::StreamExt;
use loom_core::completion::{
    CompletionError, CompletionEvent, CompletionRequest, CompletionService, CompletionStream,
};
use loom_core::ids::{new_message_id, new_stream_id, now_millis};
use loom_core::messages::{Message, MessageDelta, ReplyMessage, StreamItem, ToolCall};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Cloneable handle that aborts one assembler.
#[derive(Clone, Debug)]
pub struct StreamHandle {
    stream_id: String,
    cancel: CancellationToken,
}

impl StreamHandle {
    /// Id of the assembler this handle aborts.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Stop further emission. Idempotent.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Whether the assembler was aborted.
    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct ReplyInProgress {
    id: String,
    timestamp: i64,
    text: String,
}

/// Single-pass assembler over one upstream completion stream.
///
/// Text deltas are folded into one in-progress reply: the first delta opens
/// it with an empty delta, `finish`, a tool call or the end of the stream
/// closes it with a `final` delta followed by the complete reply. Every
/// upstream tool call becomes its own `tool-calls` message.
///
/// After [`abort`](Self::abort) `next` returns `None`. An upstream error is
/// returned once as `Err`, then the assembler is exhausted.
pub struct StreamAssembler {
    id: String,
    upstream: Option<CompletionStream>,
    cancel: CancellationToken,
    queue: VecDeque<StreamItem>,
    reply: Option<ReplyInProgress>,
}

impl StreamAssembler {
    /// Assemble `upstream`.
    pub fn new(upstream: CompletionStream) -> Self {
        Self {
            id: new_stream_id(),
            upstream: Some(upstream),
            cancel: CancellationToken::new(),
            queue: VecDeque::new(),
            reply: None,
        }
    }

    /// Open a stream on `service` and assemble it.
    pub async fn open(
        service: &dyn CompletionService,
        request: CompletionRequest,
    ) -> Result<Self, CompletionError> {
        let upstream = service.stream(request).await?;
        let assembler = Self::new(upstream);
        debug!(stream_id = %assembler.id, "stream opened");
        Ok(assembler)
    }

    /// Unique id of this assembler.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Handle that can abort this assembler from elsewhere.
    pub fn handle(&self) -> StreamHandle {
        StreamHandle {
            stream_id: self.id.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Stop further emission. Idempotent.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Whether [`abort`](Self::abort) was called.
    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Next message or delta; `None` once exhausted or aborted.
    pub async fn next(&mut self) -> Option<Result<StreamItem, CompletionError>> {
        loop {
            if self.cancel.is_cancelled() {
                self.shutdown();
                return None;
            }
            if let Some(item) = self.queue.pop_front() {
                return Some(Ok(item));
            }

            let upstream = self.upstream.as_mut()?;
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    self.shutdown();
                    return None;
                }
                event = upstream.next() => event,
            };

            match event {
                None => {
                    trace!(stream_id = %self.id, "upstream ended");
                    self.upstream = None;
                    self.close_reply();
                }
                Some(Ok(event)) => {
                    if let Err(e) = self.absorb(event) {
                        self.shutdown();
                        return Some(Err(e));
                    }
                }
                Some(Err(e)) => {
                    self.shutdown();
                    return Some(Err(e));
                }
            }
        }
    }

    fn absorb(&mut self, event: CompletionEvent) -> Result<(), CompletionError> {
        match event {
            CompletionEvent::TextDelta { delta } => {
                let reply = self.reply.get_or_insert_with(|| {
                    let id = new_message_id();
                    let timestamp = now_millis();
                    self.queue
                        .push_back(MessageDelta::reply(id.clone(), timestamp, "").into());
                    ReplyInProgress {
                        id,
                        timestamp,
                        text: String::new(),
                    }
                });
                reply.text.push_str(&delta);
                self.queue
                    .push_back(MessageDelta::reply(reply.id.clone(), reply.timestamp, delta).into());
            }
            CompletionEvent::ToolCall { tool_name, args } => {
                self.close_reply();
                let call = ToolCall::new(tool_name, args);
                self.queue.push_back(Message::tool_calls(vec![call]).into());
            }
            CompletionEvent::Finish { finish_reason } => {
                trace!(stream_id = %self.id, finish_reason, "upstream finished");
                self.close_reply();
            }
            CompletionEvent::Error { error } => return Err(CompletionError::upstream(error)),
        }
        Ok(())
    }

    fn close_reply(&mut self) {
        if let Some(reply) = self.reply.take() {
            self.queue
                .push_back(MessageDelta::reply_final(reply.id.clone(), reply.timestamp).into());
            self.queue.push_back(
                Message::Reply(ReplyMessage {
                    id: reply.id,
                    timestamp: reply.timestamp,
                    text: reply.text,
                })
                .into(),
            );
        }
    }

    fn shutdown(&mut self) {
        self.upstream = None;
        self.queue.clear();
        self.reply = None;
    }
}

impl std::fmt::Debug for StreamAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamAssembler")
            .field("id", &self.id)
            .field("aborted", &self.is_aborted())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}
