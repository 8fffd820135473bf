//! Request normalization pipeline applied to an Anthropic-shaped request
//! before it is dispatched upstream.
//!
//! Operates on a raw [`serde_json::Value`] rather than the typed
//! [`crate::protocol::anthropic::MessagesRequest`] so that fields neither
//! side names explicitly ride through untouched — a client that sends an
//! extension field on `/v1/messages` gets it back on the wire to upstream
//! unchanged.

use serde_json::{json, Value};

const SYSTEM_SPOOF: &str = "You are Claude Code, Anthropic's official CLI for Claude.";
const THINKING_MIN_TAIL: u64 = 1024;
const MAX_CACHE_MARKERS: usize = 4;

const BETA_OAUTH: &str = "oauth-2025-04-20";
const BETA_EXTENDED_CONTEXT: &str = "context-1m-2025-08-07";
const BETA_THINKING: &str = "interleaved-thinking-2025-05-14";
const BETA_FINE_GRAINED_TOOLS: &str = "fine-grained-tool-streaming-2025-05-14";

/// Runs the five normalization steps in order and returns the assembled
/// `anthropic-beta` flags for the dispatch headers. `extended_context` is
/// the transient routing flag set by model resolution, not a request
/// field; it is consumed here and never forwarded upstream.
pub fn normalize_request(mut request: Value, extended_context: bool) -> (Value, Vec<String>) {
    sanitize_params(&mut request);
    tighten_thinking(&mut request);
    inject_system_spoof(&mut request);
    annotate_prompt_cache(&mut request);
    let beta_flags = assemble_beta_flags(&request, extended_context);
    (request, beta_flags)
}

fn sanitize_params(request: &mut Value) {
    let Some(obj) = request.as_object_mut() else {
        return;
    };

    if !matches!(obj.get("top_p"), Some(Value::Number(n)) if n.as_f64().is_some_and(|f| (0.0..=1.0).contains(&f)))
    {
        obj.remove("top_p");
    }
    if !matches!(obj.get("temperature"), Some(Value::Number(_))) {
        obj.remove("temperature");
    }
    if !matches!(obj.get("top_k"), Some(Value::Number(n)) if n.as_u64().is_some_and(|v| v > 0))
    {
        obj.remove("top_k");
    }
    let tools_invalid = match obj.get("tools") {
        None => true,
        Some(Value::Null) => true,
        Some(Value::Array(a)) => a.is_empty(),
        Some(_) => true,
    };
    if tools_invalid {
        obj.remove("tools");
    }
    if matches!(obj.get("thinking"), Some(Value::Null) | None) {
        obj.remove("thinking");
    }
}

fn thinking_enabled(request: &Value) -> bool {
    request
        .get("thinking")
        .and_then(|t| t.get("type"))
        .and_then(Value::as_str)
        == Some("enabled")
}

fn tighten_thinking(request: &mut Value) {
    if !thinking_enabled(request) {
        return;
    }

    let budget = request
        .get("thinking")
        .and_then(|t| t.get("budget_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let Some(obj) = request.as_object_mut() else {
        return;
    };

    if obj.contains_key("temperature") {
        obj.insert("temperature".into(), json!(1.0));
    }
    if let Some(top_p) = obj.get("top_p").and_then(Value::as_f64) {
        obj.insert("top_p".into(), json!(top_p.clamp(0.95, 1.0)));
    }
    obj.remove("top_k");

    let required = budget + THINKING_MIN_TAIL;
    let current = obj.get("max_tokens").and_then(Value::as_u64).unwrap_or(0);
    if current < required {
        obj.insert("max_tokens".into(), json!(required));
    }
}

fn inject_system_spoof(request: &mut Value) {
    let Some(obj) = request.as_object_mut() else {
        return;
    };

    let spoof_block = json!({"type": "text", "text": SYSTEM_SPOOF});

    match obj.get("system") {
        None | Some(Value::Null) => {
            obj.insert("system".into(), Value::Array(vec![spoof_block]));
        }
        Some(Value::String(text)) => {
            let text = text.clone();
            obj.insert(
                "system".into(),
                json!([spoof_block, {"type": "text", "text": text}]),
            );
        }
        Some(Value::Array(blocks)) => {
            let already_present = blocks
                .first()
                .and_then(|b| b.get("text"))
                .and_then(Value::as_str)
                == Some(SYSTEM_SPOOF);
            if !already_present {
                let mut blocks = blocks.clone();
                blocks.insert(0, spoof_block);
                obj.insert("system".into(), Value::Array(blocks));
            }
        }
        Some(_) => {}
    }
}

fn is_marked(block: &Value) -> bool {
    block
        .get("cache_control")
        .is_some_and(|c| !c.is_null())
}

fn mark(block: &mut Value) {
    if let Some(obj) = block.as_object_mut() {
        obj.insert(
            "cache_control".into(),
            json!({"type": "ephemeral"}),
        );
    }
}

fn count_existing_markers(request: &Value) -> usize {
    let mut count = 0;
    if let Some(tools) = request.get("tools").and_then(Value::as_array) {
        count += tools.iter().filter(|t| is_marked(t)).count();
    }
    if let Some(system) = request.get("system").and_then(Value::as_array) {
        count += system.iter().filter(|b| is_marked(b)).count();
    }
    if let Some(messages) = request.get("messages").and_then(Value::as_array) {
        for message in messages {
            if let Some(content) = message.get("content").and_then(Value::as_array) {
                count += content.iter().filter(|b| is_marked(b)).count();
            }
        }
    }
    count
}

/// Consumes remaining cache-control slots in priority order: last tool
/// definition, last system block, then the last content block of the last
/// two user messages.
fn annotate_prompt_cache(request: &mut Value) {
    let mut remaining = MAX_CACHE_MARKERS.saturating_sub(count_existing_markers(request));
    if remaining == 0 {
        return;
    }

    let Some(obj) = request.as_object_mut() else {
        return;
    };

    if remaining > 0 {
        if let Some(Value::Array(tools)) = obj.get_mut("tools") {
            if let Some(last) = tools.last_mut() {
                if !is_marked(last) {
                    mark(last);
                    remaining -= 1;
                }
            }
        }
    }

    if remaining > 0 {
        match obj.get_mut("system") {
            Some(Value::String(text)) => {
                let text = text.clone();
                let mut block = json!({"type": "text", "text": text});
                mark(&mut block);
                obj.insert("system".into(), Value::Array(vec![block]));
                remaining -= 1;
            }
            Some(Value::Array(blocks)) => {
                if let Some(last) = blocks.last_mut() {
                    if !is_marked(last) {
                        mark(last);
                        remaining -= 1;
                    }
                }
            }
            _ => {}
        }
    }

    if remaining > 0 {
        if let Some(Value::Array(messages)) = obj.get_mut("messages") {
            let user_indices: Vec<usize> = messages
                .iter()
                .enumerate()
                .filter(|(_, m)| m.get("role").and_then(Value::as_str) == Some("user"))
                .map(|(i, _)| i)
                .collect();
            let last_two = user_indices.iter().rev().take(2);
            let mut targets: Vec<usize> = last_two.copied().collect();
            targets.reverse();

            for idx in targets {
                if remaining == 0 {
                    break;
                }
                let message = &mut messages[idx];
                match message.get_mut("content") {
                    Some(Value::String(text)) => {
                        let text = text.clone();
                        let mut block = json!({"type": "text", "text": text});
                        mark(&mut block);
                        if let Some(msg_obj) = message.as_object_mut() {
                            msg_obj.insert("content".into(), Value::Array(vec![block]));
                        }
                        remaining -= 1;
                    }
                    Some(Value::Array(blocks)) => {
                        if let Some(last) = blocks.last_mut() {
                            if !is_marked(last) {
                                mark(last);
                                remaining -= 1;
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

fn assemble_beta_flags(request: &Value, extended_context: bool) -> Vec<String> {
    let mut flags = vec![BETA_OAUTH.to_string()];
    if extended_context {
        flags.push(BETA_EXTENDED_CONTEXT.to_string());
    }
    if thinking_enabled(request) {
        flags.push(BETA_THINKING.to_string());
    }
    let has_tools = matches!(request.get("tools"), Some(Value::Array(a)) if !a.is_empty());
    let streaming = matches!(request.get("stream"), Some(Value::Bool(true)));
    if has_tools && !streaming {
        flags.push(BETA_FINE_GRAINED_TOOLS.to_string());
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_invalid_top_p_and_keeps_valid() {
        let req = json!({"model":"x","messages":[],"max_tokens":10,"top_p":1.5});
        let (out, _) = normalize_request(req, false);
        assert!(out.get("top_p").is_none());

        let req = json!({"model":"x","messages":[],"max_tokens":10,"top_p":0.5});
        let (out, _) = normalize_request(req, false);
        assert_eq!(out["top_p"], json!(0.5));
    }

    #[test]
    fn removes_empty_tools_and_null_thinking() {
        let req = json!({"model":"x","messages":[],"max_tokens":10,"tools":[],"thinking":null});
        let (out, _) = normalize_request(req, false);
        assert!(out.get("tools").is_none());
        assert!(out.get("thinking").is_none());
    }

    #[test]
    fn thinking_forces_temperature_and_clamps_top_p() {
        let req = json!({
            "model":"x","messages":[],"max_tokens":10,
            "temperature":0.2,"top_p":0.1,"top_k":5,
            "thinking":{"type":"enabled","budget_tokens":8000}
        });
        let (out, _) = normalize_request(req, false);
        assert_eq!(out["temperature"], json!(1.0));
        assert_eq!(out["top_p"], json!(0.95));
        assert!(out.get("top_k").is_none());
        assert_eq!(out["max_tokens"], json!(8000 + THINKING_MIN_TAIL));
    }

    #[test]
    fn thinking_tightening_never_lowers_sufficient_max_tokens() {
        let req = json!({
            "model":"x","messages":[],"max_tokens":50000,
            "thinking":{"type":"enabled","budget_tokens":8000}
        });
        let (out, _) = normalize_request(req, false);
        assert_eq!(out["max_tokens"], json!(50000));
    }

    #[test]
    fn system_spoof_prepended_to_string_system() {
        let req = json!({"model":"x","messages":[],"max_tokens":10,"system":"be nice"});
        let (out, _) = normalize_request(req, false);
        let system = out["system"].as_array().unwrap();
        assert_eq!(system[0]["text"], json!(SYSTEM_SPOOF));
        assert_eq!(system[1]["text"], json!("be nice"));
    }

    #[test]
    fn system_spoof_injection_is_idempotent() {
        let req = json!({"model":"x","messages":[],"max_tokens":10,"system":"be nice"});
        let (once, _) = normalize_request(req, false);
        let (twice, _) = normalize_request(once.clone(), false);
        assert_eq!(once["system"], twice["system"]);
    }

    #[test]
    fn cache_markers_skipped_when_already_at_limit() {
        let req = json!({
            "model":"x","max_tokens":10,
            "system":[{"type":"text","text":"a","cache_control":{"type":"ephemeral"}}],
            "tools":[{"name":"t","input_schema":{},"cache_control":{"type":"ephemeral"}}],
            "messages":[
                {"role":"user","content":[{"type":"text","text":"1","cache_control":{"type":"ephemeral"}}]},
                {"role":"assistant","content":[{"type":"text","text":"2"}]},
                {"role":"user","content":[{"type":"text","text":"3","cache_control":{"type":"ephemeral"}}]}
            ]
        });
        let (out, _) = normalize_request(req, false);
        // four markers already present; nothing new added despite an unmarked
        // assistant/user block existing.
        let messages = out["messages"].as_array().unwrap();
        assert!(!is_marked(&messages[1]["content"][0]));
    }

    #[test]
    fn beta_flags_include_oauth_and_conditional_flags() {
        let req = json!({
            "model":"x","messages":[],"max_tokens":10,
            "tools":[{"name":"t","input_schema":{}}],
            "thinking":{"type":"enabled","budget_tokens":8000}
        });
        let (_, flags) = normalize_request(req, true);
        assert!(flags.contains(&BETA_OAUTH.to_string()));
        assert!(flags.contains(&BETA_EXTENDED_CONTEXT.to_string()));
        assert!(flags.contains(&BETA_THINKING.to_string()));
        assert!(flags.contains(&BETA_FINE_GRAINED_TOOLS.to_string()));
    }

    #[test]
    fn fine_grained_tool_flag_absent_when_streaming() {
        let req = json!({
            "model":"x","messages":[],"max_tokens":10,"stream":true,
            "tools":[{"name":"t","input_schema":{}}]
        });
        let (_, flags) = normalize_request(req, false);
        assert!(!flags.contains(&BETA_FINE_GRAINED_TOOLS.to_string()));
    }
}
