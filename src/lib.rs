//! Library surface for the gateway: everything the `max-gateway` binary and
//! its tests need to build the HTTP surface, speak both wire protocols, and
//! manage the underlying OAuth credential.

pub mod auth;
pub mod config;
pub mod http;
pub mod logging;
pub mod message;
pub mod models;
pub mod normalize;
pub mod protocol;
pub mod sse;
pub mod storage;
pub mod thinking_cache;
pub mod translate;
pub mod upstream;
