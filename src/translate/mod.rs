//! Bidirectional translation between the OpenAI Chat Completions wire shape
//! and the Anthropic Messages wire shape, unary and streaming.

pub mod anthropic_to_openai;
pub mod openai_to_anthropic;
pub mod stream;

pub(crate) fn map_stop_reason(stop_reason: Option<&str>) -> &'static str {
    match stop_reason {
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        Some("end_turn") | Some("stop_sequence") | _ => "stop",
    }
}
