#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Each integration test binary uses a different subset of these helpers"
)]

use std::sync::Arc;
use std::time::Duration;

use courier_client_sdk::auth::{AuthSignal, Credential};
use courier_client_sdk::http::{Client, Config, RetryPolicy};
use courier_client_sdk::storage::CredentialStore;
use httpmock::MockServer;
use tracing_subscriber::EnvFilter;

pub const TOKEN: &str = "session-token";

/// Route crate logs to the test harness. Set `RUST_LOG=courier_client_sdk=debug` to see them.
pub fn init_tracing() {
    drop(
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init(),
    );
}

/// Retries on the default schedule shape, scaled down so tests stay fast.
#[must_use]
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(3)
        .initial_delay(Duration::from_millis(5))
        .max_delay(Duration::from_millis(20))
        .build()
}

#[must_use]
pub fn store_with_token() -> Arc<CredentialStore> {
    let store = Arc::new(CredentialStore::memory_only());
    store.set_credential(&Credential::new(TOKEN));
    store
}

pub fn client(
    server: &MockServer,
    store: &Arc<CredentialStore>,
) -> anyhow::Result<(Client, AuthSignal)> {
    init_tracing();
    let signal = AuthSignal::new();
    let config = Config::builder().retry(fast_retry()).build();
    let client = Client::new(
        &server.base_url(),
        config,
        Arc::clone(store),
        signal.clone(),
    )?;
    Ok((client, signal))
}
