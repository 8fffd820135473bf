//! HTTP clients that dispatch normalized requests to the two kinds of
//! upstream this gateway fronts: Anthropic's own Messages endpoint (via
//! OAuth) and user-declared OpenAI-compatible custom providers.

pub mod anthropic_client;
pub mod custom_client;

use crate::auth::AuthError;

#[derive(Debug)]
pub enum DispatchError {
    Auth(AuthError),
    Transport(String),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Auth(e) => write!(f, "{}", e),
            DispatchError::Transport(e) => write!(f, "upstream transport error: {}", e),
        }
    }
}

/// Outcome of a non-streaming dispatch: either a parsed success body, or the
/// upstream's non-2xx status and raw body, forwarded verbatim for the
/// caller to decide how to shape into its own response.
pub enum UnaryOutcome {
    Success(serde_json::Value),
    UpstreamError { status: u16, body: String },
}

pub(crate) fn synthetic_error_event(kind: &str, message: &str) -> String {
    format!(
        "event: error\ndata: {}\n\n",
        serde_json::json!({"type": "error", "error": {"type": kind, "message": message}})
    )
}
