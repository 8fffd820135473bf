//! Wire-level request/response shapes for the two protocols this gateway
//! speaks: Anthropic's native Messages API and the OpenAI-compatible Chat
//! Completions API.

pub mod anthropic;
pub mod openai;
