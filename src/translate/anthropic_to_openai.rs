//! Anthropic Messages response → OpenAI `chat.completion` response (unary).

use crate::message::ContentBlock;
use crate::protocol::anthropic::MessagesResponse;
use crate::protocol::openai::{
    ChatCompletionResponse, Choice, FunctionCall, ResponseMessage, ToolCall, Usage,
};
use crate::translate::map_stop_reason;

/// The raw thinking blocks (with signatures) a response carried, handed back
/// alongside the translated response so the caller can stash them in the
/// thinking cache for a later tool-result turn.
pub struct Translated {
    pub response: ChatCompletionResponse,
    pub thinking_blocks: Vec<ContentBlock>,
}

pub fn translate_response(upstream: &MessagesResponse, now_unix: i64) -> Translated {
    let mut text = String::new();
    let mut reasoning_text = String::new();
    let mut tool_calls = Vec::new();
    let mut thinking_blocks = Vec::new();

    for block in &upstream.content {
        match block {
            ContentBlock::Text { text: t, .. } => text.push_str(t),
            ContentBlock::ToolUse { id, name, input, .. } => {
                tool_calls.push(ToolCall {
                    id: id.clone(),
                    kind: "function".to_string(),
                    function: FunctionCall {
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string()),
                    },
                });
            }
            ContentBlock::Thinking { thinking, .. } => {
                reasoning_text.push_str(thinking);
                thinking_blocks.push(block.clone());
            }
            ContentBlock::RedactedThinking { .. } => {
                thinking_blocks.push(block.clone());
            }
            ContentBlock::Image { .. } | ContentBlock::ToolResult { .. } => {}
        }
    }

    let finish_reason = map_stop_reason(upstream.stop_reason.as_deref());
    let prompt_tokens = upstream.usage.input_tokens;
    let completion_tokens = upstream.usage.output_tokens;

    let response = ChatCompletionResponse {
        id: format!("chatcmpl-{}", suffix_of(&upstream.id)),
        object: "chat.completion",
        created: now_unix,
        model: upstream.model.clone(),
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant",
                content: Some(text),
                tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                reasoning_content: if reasoning_text.is_empty() {
                    None
                } else {
                    Some(reasoning_text)
                },
            },
            finish_reason: finish_reason.to_string(),
        }],
        usage: Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
    };

    Translated {
        response,
        thinking_blocks,
    }
}

fn suffix_of(anthropic_id: &str) -> &str {
    anthropic_id.rsplit('_').next().unwrap_or(anthropic_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::anthropic::Usage as AUsage;
    use serde_json::json;

    fn base_response(content: Vec<ContentBlock>, stop_reason: &str) -> MessagesResponse {
        MessagesResponse {
            id: "msg_01abcXYZ".to_string(),
            kind: "message".to_string(),
            role: "assistant".to_string(),
            content,
            model: "claude-sonnet-4-5-20250929".to_string(),
            stop_reason: Some(stop_reason.to_string()),
            stop_sequence: None,
            usage: AUsage {
                input_tokens: 10,
                output_tokens: 5,
                cache_creation_input_tokens: None,
                cache_read_input_tokens: None,
            },
        }
    }

    #[test]
    fn text_blocks_concatenate_into_message_content() {
        let resp = base_response(
            vec![ContentBlock::text("hello "), ContentBlock::text("world")],
            "end_turn",
        );
        let out = translate_response(&resp, 0);
        assert_eq!(out.response.choices[0].message.content.as_deref(), Some("hello world"));
        assert_eq!(out.response.choices[0].finish_reason, "stop");
    }

    #[test]
    fn tool_use_blocks_become_tool_calls_with_stringified_input() {
        let resp = base_response(
            vec![ContentBlock::ToolUse {
                id: "toolu_1".into(),
                name: "lookup".into(),
                input: json!({"q": "rust"}),
                cache_control: None,
            }],
            "tool_use",
        );
        let out = translate_response(&resp, 0);
        let calls = out.response.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, "{\"q\":\"rust\"}");
        assert_eq!(out.response.choices[0].finish_reason, "tool_calls");
    }

    #[test]
    fn thinking_text_goes_to_reasoning_content_and_side_channel() {
        let resp = base_response(
            vec![ContentBlock::Thinking {
                thinking: "pondering".into(),
                signature: "sig".into(),
            }],
            "end_turn",
        );
        let out = translate_response(&resp, 0);
        assert_eq!(
            out.response.choices[0].message.reasoning_content.as_deref(),
            Some("pondering")
        );
        assert_eq!(out.thinking_blocks.len(), 1);
    }

    #[test]
    fn max_tokens_maps_to_length_finish_reason() {
        let resp = base_response(vec![ContentBlock::text("cut off")], "max_tokens");
        let out = translate_response(&resp, 0);
        assert_eq!(out.response.choices[0].finish_reason, "length");
    }

    #[test]
    fn response_id_uses_suffix_of_anthropic_id() {
        let resp = base_response(vec![], "end_turn");
        let out = translate_response(&resp, 0);
        assert_eq!(out.response.id, "chatcmpl-01abcXYZ");
    }

    #[test]
    fn usage_totals_input_and_output_tokens() {
        let resp = base_response(vec![], "end_turn");
        let out = translate_response(&resp, 0);
        assert_eq!(out.response.usage.prompt_tokens, 10);
        assert_eq!(out.response.usage.completion_tokens, 5);
        assert_eq!(out.response.usage.total_tokens, 15);
    }
}
