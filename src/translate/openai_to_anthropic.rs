//! OpenAI Chat Completions request → Anthropic Messages request.

use crate::message::{ContentBlock, ImageSource, Message, Role};
use crate::models::{reasoning_budget, ResolvedModel, REASONING_LEVELS};
use crate::protocol::anthropic::{MessagesRequest, SystemPrompt, ThinkingConfig, Tool, ToolChoice};
use crate::protocol::openai::{ChatCompletionRequest, ChatContent, ChatContentPart, ChatMessage};
use std::collections::HashMap;

const DEFAULT_MAX_TOKENS: u32 = 4_096;
const THINKING_MIN_TAIL: u32 = 1_024;

/// `thinking_restorations` maps a tool-use id to the signed thinking block
/// that preceded it in an earlier stream, fetched from the thinking cache by
/// the caller before translation (cache access is async; this function is
/// kept pure and synchronous).
pub fn translate_request(
    req: &ChatCompletionRequest,
    resolved: &ResolvedModel,
    thinking_restorations: &HashMap<String, ContentBlock>,
) -> MessagesRequest {
    let (system_text, segments) = flatten_messages(&req.messages);
    let mut messages: Vec<Message> = segments
        .into_iter()
        .map(|(role, content)| Message { role, content })
        .collect();
    restore_thinking_blocks(&mut messages, thinking_restorations);

    let mut tools = convert_tools(req);
    let mut tool_choice = convert_tool_choice(req.tool_choice.as_ref());
    if matches!(&req.tool_choice, Some(v) if v.as_str() == Some("none")) {
        tools = None;
        tool_choice = None;
    }

    let (reasoning_level, warn) = resolve_reasoning_level(req, resolved);
    if let Some(msg) = warn {
        crate::logging::warn(&msg);
    }

    let mut max_tokens = req.max_tokens.or(req.max_completion_tokens).unwrap_or(DEFAULT_MAX_TOKENS);
    let thinking = reasoning_level.as_deref().and_then(reasoning_budget).map(|budget| {
        max_tokens = max_tokens.max(budget + THINKING_MIN_TAIL);
        ThinkingConfig::enabled(budget)
    });

    MessagesRequest {
        model: resolved.upstream_id.clone(),
        messages,
        max_tokens,
        system: system_text.map(SystemPrompt::Text),
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: None,
        stop_sequences: req.stop.as_ref().map(|s| match s {
            crate::protocol::openai::StopSequences::One(s) => vec![s.clone()],
            crate::protocol::openai::StopSequences::Many(v) => v.clone(),
        }),
        tools,
        tool_choice,
        thinking,
        stream: req.stream,
        metadata: None,
    }
}

fn resolve_reasoning_level(
    req: &ChatCompletionRequest,
    resolved: &ResolvedModel,
) -> (Option<String>, Option<String>) {
    match req.reasoning_effort.as_deref() {
        Some(level) if REASONING_LEVELS.contains(&level) => (Some(level.to_string()), None),
        Some(level) => (
            resolved.reasoning_level.clone(),
            Some(format!("Ignoring unknown reasoning_effort '{}'", level)),
        ),
        None => (resolved.reasoning_level.clone(), None),
    }
}

type Segment = (Role, Vec<ContentBlock>);

/// Flattens the OpenAI message list into system text plus an ordered list
/// of user/assistant segments, with role merging and the leading-assistant
/// deferral already applied, ready for the final consecutive-role merge.
fn flatten_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Segment>) {
    let mut system_parts = Vec::new();
    let mut raw: Vec<Segment> = Vec::new();

    for message in messages {
        match message.role.as_str() {
            "system" => {
                if let Some(content) = &message.content {
                    let text = content.as_text();
                    if !text.is_empty() {
                        system_parts.push(text);
                    }
                }
            }
            "user" => raw.push((Role::User, convert_content(message.content.as_ref()))),
            "assistant" => {
                let mut content = convert_content(message.content.as_ref());
                if let Some(tool_calls) = &message.tool_calls {
                    content.extend(convert_tool_calls(tool_calls));
                }
                if let Some(call) = &message.function_call {
                    content.push(legacy_function_call_block(call));
                }
                raw.push((Role::Assistant, content));
            }
            "tool" => raw.push((Role::User, vec![tool_result_block(message)])),
            "function" => raw.push((Role::User, vec![legacy_function_result_block(message)])),
            _ => {}
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    (system, defer_leading_assistant(raw))
}

fn defer_leading_assistant(raw: Vec<Segment>) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut deferred: Option<Vec<ContentBlock>> = None;
    let mut seen_user = false;

    for (role, content) in raw {
        match (role, seen_user) {
            (Role::Assistant, false) => {
                deferred.get_or_insert_with(Vec::new).extend(content);
            }
            (Role::User, false) => {
                seen_user = true;
                out.push((Role::User, content));
                if let Some(def) = deferred.take() {
                    out.push((Role::Assistant, def));
                }
            }
            (role, _) => out.push((role, content)),
        }
    }
    if let Some(def) = deferred.take() {
        out.push((Role::Assistant, def));
    }

    merge_consecutive(out)
}

/// Re-inserts a cached signed thinking block at the head of the assistant
/// turn that produced the matching tool use, when the upstream requires it
/// to see its own prior reasoning alongside a tool result on the next turn.
fn restore_thinking_blocks(messages: &mut [Message], restorations: &HashMap<String, ContentBlock>) {
    if restorations.is_empty() {
        return;
    }
    for message in messages.iter_mut() {
        if message.role != Role::Assistant {
            continue;
        }
        let already_restored = matches!(message.content.first(), Some(ContentBlock::Thinking { .. }));
        if already_restored {
            continue;
        }
        let hit = message.content.iter().find_map(|block| match block {
            ContentBlock::ToolUse { id, .. } => restorations.get(id),
            _ => None,
        });
        if let Some(block) = hit {
            message.content.insert(0, block.clone());
        }
    }
}

fn merge_consecutive(segments: Vec<Segment>) -> Vec<Segment> {
    let mut merged: Vec<Segment> = Vec::new();
    for (role, content) in segments {
        if let Some(last) = merged.last_mut() {
            if last.0 == role {
                last.1.extend(content);
                continue;
            }
        }
        merged.push((role, content));
    }
    merged
}

fn convert_content(content: Option<&ChatContent>) -> Vec<ContentBlock> {
    match content {
        None => Vec::new(),
        Some(ChatContent::Text(text)) => vec![ContentBlock::text(text.clone())],
        Some(ChatContent::Parts(parts)) => parts
            .iter()
            .map(|part| match part {
                ChatContentPart::Text { text } => ContentBlock::text(text.clone()),
                ChatContentPart::ImageUrl { image_url } => ContentBlock::Image {
                    source: parse_image_source(&image_url.url),
                },
            })
            .collect(),
    }
}

fn parse_image_source(url: &str) -> ImageSource {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((media_type, data)) = rest.split_once(";base64,") {
            return ImageSource::Base64 {
                media_type: media_type.to_string(),
                data: data.to_string(),
            };
        }
    }
    ImageSource::Url { url: url.to_string() }
}

fn convert_tool_calls(tool_calls: &[crate::protocol::openai::ToolCall]) -> Vec<ContentBlock> {
    tool_calls
        .iter()
        .map(|call| ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input: serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| serde_json::json!({})),
            cache_control: None,
        })
        .collect()
}

fn legacy_function_call_block(call: &crate::protocol::openai::FunctionCall) -> ContentBlock {
    ContentBlock::ToolUse {
        id: format!("func_{}", call.name),
        name: call.name.clone(),
        input: serde_json::from_str(&call.arguments).unwrap_or_else(|_| serde_json::json!({})),
        cache_control: None,
    }
}

fn tool_result_block(message: &ChatMessage) -> ContentBlock {
    let content = message.content.as_ref().map(|c| c.as_text()).unwrap_or_default();
    ContentBlock::ToolResult {
        tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
        content: crate::message::ToolResultContent::Text(content),
        is_error: None,
        cache_control: None,
    }
}

fn legacy_function_result_block(message: &ChatMessage) -> ContentBlock {
    let name = message.name.clone().unwrap_or_default();
    let content = message.content.as_ref().map(|c| c.as_text()).unwrap_or_default();
    ContentBlock::ToolResult {
        tool_use_id: format!("func_{}", name),
        content: crate::message::ToolResultContent::Text(content),
        is_error: None,
        cache_control: None,
    }
}

fn convert_tools(req: &ChatCompletionRequest) -> Option<Vec<Tool>> {
    let mut tools = Vec::new();
    if let Some(t) = &req.tools {
        tools.extend(t.iter().map(|t| Tool {
            name: t.function.name.clone(),
            description: t.function.description.clone(),
            input_schema: t.function.parameters.clone(),
        }));
    }
    if let Some(functions) = &req.functions {
        tools.extend(functions.iter().map(|f| Tool {
            name: f.name.clone(),
            description: f.description.clone(),
            input_schema: f.parameters.clone(),
        }));
    }
    if tools.is_empty() {
        None
    } else {
        Some(tools)
    }
}

fn convert_tool_choice(choice: Option<&serde_json::Value>) -> Option<ToolChoice> {
    let value = choice?;
    if let Some(s) = value.as_str() {
        return match s {
            "auto" | "none" => None,
            other => Some(ToolChoice::Mode { kind: other.to_string() }),
        };
    }
    let name = value.get("function")?.get("name")?.as_str()?;
    Some(ToolChoice::Named {
        kind: "tool".to_string(),
        name: name.to_string(),
    })
}
