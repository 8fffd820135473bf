//! Anthropic SSE event stream → OpenAI `chat.completion.chunk` stream.
//!
//! One [`StreamTranslator`] is constructed per client request and fed
//! decoded Anthropic [`StreamEvent`]s in order; it returns the OpenAI-shaped
//! JSON values to write downstream (already `[DONE]`-terminated once
//! [`StepOutput::terminate`] is set) and maintains the thinking cache as
//! tool-use blocks close.

use crate::message::ContentBlock;
use crate::protocol::anthropic::{ContentDelta, MessageDeltaFields, StreamEvent};
use crate::protocol::openai::{ChatCompletionChunk, ChunkChoice, Delta, FunctionDelta, ToolCallDelta};
use crate::thinking_cache::ThinkingCache;
use crate::translate::map_stop_reason;
use std::collections::HashMap;

#[derive(Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse,
    Other,
}

pub struct StreamTranslator {
    id: String,
    created: i64,
    model: String,
    block_kinds: HashMap<usize, BlockKind>,
    tool_call_positions: HashMap<usize, usize>,
    tool_use_ids: HashMap<usize, String>,
    next_tool_call_index: usize,
    thinking_accum: HashMap<usize, String>,
    last_signed_thinking: Option<ContentBlock>,
}

pub struct StepOutput {
    pub events: Vec<serde_json::Value>,
    pub terminate: bool,
}

impl StepOutput {
    fn chunk(chunk: ChatCompletionChunk) -> Self {
        Self {
            events: vec![serde_json::to_value(chunk).expect("chunk always serializes")],
            terminate: false,
        }
    }

    fn empty() -> Self {
        Self {
            events: Vec::new(),
            terminate: false,
        }
    }

    fn done() -> Self {
        Self {
            events: Vec::new(),
            terminate: true,
        }
    }
}

impl StreamTranslator {
    pub fn new(model: String, created: i64) -> Self {
        Self {
            id: format!("chatcmpl-{}", created),
            created,
            model,
            block_kinds: HashMap::new(),
            tool_call_positions: HashMap::new(),
            tool_use_ids: HashMap::new(),
            next_tool_call_index: 0,
            thinking_accum: HashMap::new(),
            last_signed_thinking: None,
        }
    }

    fn base_chunk(&self, choice: ChunkChoice) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk",
            created: self.created,
            model: self.model.clone(),
            choices: vec![choice],
        }
    }

    /// Processes one decoded upstream event. `thinking_cache` receives a
    /// `put` when a tool-use block closes with a signed thinking block
    /// observed earlier in the same message.
    pub async fn step(&mut self, event: StreamEvent, thinking_cache: &ThinkingCache) -> StepOutput {
        match event {
            StreamEvent::MessageStart { .. } => StepOutput::chunk(self.base_chunk(ChunkChoice {
                index: 0,
                delta: Delta {
                    role: Some("assistant"),
                    content: Some(String::new()),
                    ..Delta::default()
                },
                finish_reason: None,
            })),

            StreamEvent::ContentBlockStart { index, content_block } => {
                self.on_block_start(index, content_block)
            }

            StreamEvent::ContentBlockDelta { index, delta } => self.on_delta(index, delta),

            StreamEvent::ContentBlockStop { index } => self.on_block_stop(index, thinking_cache).await,

            StreamEvent::MessageDelta { delta, .. } => StepOutput::chunk(self.message_delta_chunk(delta)),

            StreamEvent::MessageStop => StepOutput::done(),

            StreamEvent::Ping => StepOutput::empty(),

            StreamEvent::Error { error } => StepOutput {
                events: vec![serde_json::json!({
                    "error": {"message": error.message, "type": error.kind}
                })],
                terminate: true,
            },
        }
    }

    fn on_block_start(&mut self, index: usize, block: ContentBlock) -> StepOutput {
        match block {
            ContentBlock::ToolUse { id, name, .. } => {
                let tool_call_index = self.next_tool_call_index;
                self.next_tool_call_index += 1;
                self.block_kinds.insert(index, BlockKind::ToolUse);
                self.tool_call_positions.insert(index, tool_call_index);
                self.tool_use_ids.insert(index, id.clone());

                StepOutput::chunk(self.base_chunk(ChunkChoice {
                    index: 0,
                    delta: Delta {
                        tool_calls: Some(vec![ToolCallDelta {
                            index: tool_call_index,
                            id: Some(id),
                            kind: Some("function"),
                            function: Some(FunctionDelta {
                                name: Some(name),
                                arguments: Some(String::new()),
                            }),
                        }]),
                        ..Delta::default()
                    },
                    finish_reason: None,
                }))
            }
            ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {
                self.block_kinds.insert(index, BlockKind::Thinking);
                self.thinking_accum.insert(index, String::new());
                StepOutput::empty()
            }
            ContentBlock::Text { .. } => {
                self.block_kinds.insert(index, BlockKind::Text);
                StepOutput::empty()
            }
            _ => {
                self.block_kinds.insert(index, BlockKind::Other);
                StepOutput::empty()
            }
        }
    }

    fn on_delta(&mut self, index: usize, delta: ContentDelta) -> StepOutput {
        match delta {
            ContentDelta::TextDelta { text } => StepOutput::chunk(self.base_chunk(ChunkChoice {
                index: 0,
                delta: Delta {
                    content: Some(text),
                    ..Delta::default()
                },
                finish_reason: None,
            })),
            ContentDelta::InputJsonDelta { partial_json } => {
                let Some(&tool_call_index) = self.tool_call_positions.get(&index) else {
                    return StepOutput::empty();
                };
                StepOutput::chunk(self.base_chunk(ChunkChoice {
                    index: 0,
                    delta: Delta {
                        tool_calls: Some(vec![ToolCallDelta {
                            index: tool_call_index,
                            id: None,
                            kind: None,
                            function: Some(FunctionDelta {
                                name: None,
                                arguments: Some(partial_json),
                            }),
                        }]),
                        ..Delta::default()
                    },
                    finish_reason: None,
                }))
            }
            ContentDelta::ThinkingDelta { thinking } => {
                self.thinking_accum.entry(index).or_default().push_str(&thinking);
                StepOutput::chunk(self.base_chunk(ChunkChoice {
                    index: 0,
                    delta: Delta {
                        reasoning_content: Some(thinking),
                        ..Delta::default()
                    },
                    finish_reason: None,
                }))
            }
            ContentDelta::SignatureDelta { signature } => {
                let thinking = self.thinking_accum.get(&index).cloned().unwrap_or_default();
                if !signature.is_empty() {
                    self.last_signed_thinking = Some(ContentBlock::Thinking { thinking, signature });
                }
                StepOutput::empty()
            }
        }
    }

    async fn on_block_stop(&mut self, index: usize, thinking_cache: &ThinkingCache) -> StepOutput {
        if self.block_kinds.get(&index) == Some(&BlockKind::ToolUse) {
            if let (Some(tool_use_id), Some(thinking)) =
                (self.tool_use_ids.get(&index).cloned(), self.last_signed_thinking.clone())
            {
                thinking_cache.put(tool_use_id, thinking).await;
            }
        }
        StepOutput::empty()
    }

    fn message_delta_chunk(&self, delta: MessageDeltaFields) -> ChatCompletionChunk {
        self.base_chunk(ChunkChoice {
            index: 0,
            delta: Delta::default(),
            finish_reason: Some(map_stop_reason(delta.stop_reason.as_deref()).to_string()),
        })
    }
}

pub const DONE_SENTINEL: &str = "[DONE]";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::anthropic::{ErrorPayload, MessagesResponse, Usage};

    fn message_start() -> StreamEvent {
        StreamEvent::MessageStart {
            message: MessagesResponse {
                id: "msg_1".into(),
                kind: "message".into(),
                role: "assistant".into(),
                content: vec![],
                model: "claude-sonnet-4-5-20250929".into(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage::default(),
            },
        }
    }

    #[tokio::test]
    async fn message_start_emits_role_chunk() {
        let mut t = StreamTranslator::new("sonnet-4-5".into(), 0);
        let cache = ThinkingCache::default();
        let out = t.step(message_start(), &cache).await;
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0]["choices"][0]["delta"]["role"], "assistant");
        assert!(!out.terminate);
    }

    #[tokio::test]
    async fn text_delta_emits_content_chunk() {
        let mut t = StreamTranslator::new("sonnet-4-5".into(), 0);
        let cache = ThinkingCache::default();
        t.step(message_start(), &cache).await;
        t.step(
            StreamEvent::ContentBlockStart {
                index: 0,
                content_block: ContentBlock::text(""),
            },
            &cache,
        )
        .await;
        let out = t
            .step(
                StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: ContentDelta::TextDelta { text: "hi".into() },
                },
                &cache,
            )
            .await;
        assert_eq!(out.events[0]["choices"][0]["delta"]["content"], "hi");
    }

    #[tokio::test]
    async fn tool_use_start_emits_tool_call_chunk_with_incrementing_index() {
        let mut t = StreamTranslator::new("sonnet-4-5".into(), 0);
        let cache = ThinkingCache::default();
        let out = t
            .step(
                StreamEvent::ContentBlockStart {
                    index: 0,
                    content_block: ContentBlock::ToolUse {
                        id: "toolu_1".into(),
                        name: "lookup".into(),
                        input: serde_json::json!({}),
                        cache_control: None,
                    },
                },
                &cache,
            )
            .await;
        let tool_calls = &out.events[0]["choices"][0]["delta"]["tool_calls"];
        assert_eq!(tool_calls[0]["index"], 0);
        assert_eq!(tool_calls[0]["id"], "toolu_1");
    }

    #[tokio::test]
    async fn message_stop_terminates_without_emitting_done_itself() {
        let mut t = StreamTranslator::new("sonnet-4-5".into(), 0);
        let cache = ThinkingCache::default();
        let out = t.step(StreamEvent::MessageStop, &cache).await;
        assert!(out.terminate);
        assert!(out.events.is_empty());
    }

    #[tokio::test]
    async fn error_event_terminates_and_emits_single_error_chunk() {
        let mut t = StreamTranslator::new("sonnet-4-5".into(), 0);
        let cache = ThinkingCache::default();
        let out = t
            .step(
                StreamEvent::Error {
                    error: ErrorPayload {
                        kind: "overloaded_error".into(),
                        message: "busy".into(),
                    },
                },
                &cache,
            )
            .await;
        assert!(out.terminate);
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0]["error"]["type"], "overloaded_error");
    }

    #[tokio::test]
    async fn ping_is_silently_discarded() {
        let mut t = StreamTranslator::new("sonnet-4-5".into(), 0);
        let cache = ThinkingCache::default();
        let out = t.step(StreamEvent::Ping, &cache).await;
        assert!(out.events.is_empty());
        assert!(!out.terminate);
    }

    #[tokio::test]
    async fn closing_tool_use_with_prior_signed_thinking_populates_cache() {
        let mut t = StreamTranslator::new("sonnet-4-5".into(), 0);
        let cache = ThinkingCache::default();

        t.step(
            StreamEvent::ContentBlockStart {
                index: 0,
                content_block: ContentBlock::Thinking {
                    thinking: String::new(),
                    signature: String::new(),
                },
            },
            &cache,
        )
        .await;
        t.step(
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::ThinkingDelta {
                    thinking: "because reasons".into(),
                },
            },
            &cache,
        )
        .await;
        t.step(
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::SignatureDelta { signature: "sig".into() },
            },
            &cache,
        )
        .await;
        t.step(StreamEvent::ContentBlockStop { index: 0 }, &cache).await;

        t.step(
            StreamEvent::ContentBlockStart {
                index: 1,
                content_block: ContentBlock::ToolUse {
                    id: "toolu_1".into(),
                    name: "lookup".into(),
                    input: serde_json::json!({}),
                    cache_control: None,
                },
            },
            &cache,
        )
        .await;
        t.step(StreamEvent::ContentBlockStop { index: 1 }, &cache).await;

        let cached = cache.get("toolu_1").await.unwrap();
        assert_eq!(cached.thinking_signature(), Some("sig"));
    }

    #[tokio::test]
    async fn message_delta_maps_stop_reason_to_finish_reason() {
        let mut t = StreamTranslator::new("sonnet-4-5".into(), 0);
        let cache = ThinkingCache::default();
        let out = t
            .step(
                StreamEvent::MessageDelta {
                    delta: MessageDeltaFields {
                        stop_reason: Some("tool_use".into()),
                        stop_sequence: None,
                    },
                    usage: None,
                },
                &cache,
            )
            .await;
        assert_eq!(out.events[0]["choices"][0]["finish_reason"], "tool_calls");
    }
}
