//! Authentication surface: a single Anthropic OAuth credential, managed by
//! [`oauth::OAuthManager`]. This gateway fronts exactly one upstream
//! identity, so there is no multi-provider detection layer here — just the
//! OAuth state machine and what it reveals about itself.

pub mod oauth;

pub use oauth::{AuthError, AuthStatus, OAuthManager, ScopeProfile};
