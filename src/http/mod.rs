//! Request/response client with retry, timeout and credential handling.
//!
//! # Retry policy
//!
//! | Outcome                  | Retried | Surfaced as                          |
//! |--------------------------|---------|--------------------------------------|
//! | 2xx, 3xx, 4xx (not 401)  | no      | `Ok(Response)`                       |
//! | 401                      | no      | [`Kind::Unauthorized`], credential cleared, [`AuthSignal`] fired |
//! | 5xx                      | yes     | [`Kind::Status`] once retries run out |
//! | network failure/timeout  | yes     | [`Kind::Transport`] once retries run out |
//!
//! [`Kind::Unauthorized`]: crate::error::Kind::Unauthorized
//! [`Kind::Status`]: crate::error::Kind::Status
//! [`Kind::Transport`]: crate::error::Kind::Transport
//! [`AuthSignal`]: crate::auth::AuthSignal

pub mod client;
pub mod config;
pub mod retry;
pub mod transport;

pub use client::Client;
pub use config::{Config, ENVIRONMENT_VAR, Environment, RequestOptions};
pub use reqwest::Method;
pub use retry::{RetryContext, RetryPolicy, RetryState};
pub use transport::{ReqwestTransport, Response, Transport};
