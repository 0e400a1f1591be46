use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, Request, StatusCode};
use serde::Serialize;
use tokio::time::sleep;
use url::Url;

use super::config::{Config, RequestOptions};
use super::retry::RetryContext;
use super::transport::{ReqwestTransport, Response, Transport};
use crate::Result;
use crate::auth::AuthSignal;
use crate::error::{Error, Kind};
use crate::storage::CredentialStore;

const JSON_MIME: &str = "application/json";

/// Request/response client with credential injection, timeouts and bounded retries.
///
/// Network failures and 5xx responses are retried with exponential backoff. Other
/// responses, including 4xx, are handed back as a [`Response`] for the caller to inspect,
/// with one exception: a 401 clears the stored credential, fires the [`AuthSignal`] and
/// comes back as an error of kind [`Kind::Unauthorized`].
///
/// [`Client`] is cheap to clone and thread-safe.
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use courier_client_sdk::Result;
/// use courier_client_sdk::auth::AuthSignal;
/// use courier_client_sdk::http::{Client, Config, Environment};
/// use courier_client_sdk::storage::{CredentialStore, FileBackend};
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let store = Arc::new(CredentialStore::new(FileBackend::new("store.json")));
///     let signal = AuthSignal::new();
///     let config = Config::builder().environment(Environment::from_env()).build();
///
///     let client = Client::new("https://api.example.com/api", config, store, signal)?;
///     let response = client.get("chats").await?;
///     println!("{}: {}", response.status(), response.text());
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Config,
    /// Always ends with `/` so relative paths join beneath it.
    base_url: Url,
    transport: Box<dyn Transport>,
    store: Arc<CredentialStore>,
    auth_signal: AuthSignal,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url.as_str())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client that sends requests through [`reqwest`].
    pub fn new(
        base_url: &str,
        config: Config,
        store: Arc<CredentialStore>,
        auth_signal: AuthSignal,
    ) -> Result<Self> {
        Self::with_transport(
            base_url,
            config,
            store,
            auth_signal,
            ReqwestTransport::default(),
        )
    }

    /// Create a client over a custom [`Transport`].
    pub fn with_transport<T: Transport>(
        base_url: &str,
        config: Config,
        store: Arc<CredentialStore>,
        auth_signal: AuthSignal,
        transport: T,
    ) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| Error::validation(format!("invalid base url {base_url}: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                base_url,
                transport: Box::new(transport),
                store,
                auth_signal,
            }),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    #[must_use]
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn auth_signal(&self) -> &AuthSignal {
        &self.inner.auth_signal
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        self.request::<()>(Method::GET, path, None, None).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        self.request(Method::POST, path, Some(body), None).await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        self.request(Method::PUT, path, Some(body), None).await
    }

    pub async fn patch<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        self.request(Method::PATCH, path, Some(body), None).await
    }

    pub async fn delete(&self, path: &str) -> Result<Response> {
        self.request::<()>(Method::DELETE, path, None, None).await
    }

    /// Issue a request and drive it through the retry policy.
    ///
    /// `path` is resolved against the base URL and must stay beneath it: absolute URLs and
    /// `..` segments that escape the base are rejected with [`Kind::Validation`], so the
    /// credential is only ever sent to the configured host. The caller only observes the final
    /// outcome; intermediate attempts are logged.
    pub async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: Option<RequestOptions>,
    ) -> Result<Response> {
        let url = self.resolve(path)?;
        let body = body.map(serde_json::to_vec).transpose()?;
        let options = options.unwrap_or_default();
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.inner.config.timeout());

        self.send(method, url, body, &options.headers, timeout)
            .await
    }

    fn resolve(&self, path: &str) -> Result<Url> {
        let base = &self.inner.base_url;
        let url = base.join(path.trim_start_matches('/'))?;

        if url.origin() != base.origin() || !url.path().starts_with(base.path()) {
            return Err(Error::validation(format!(
                "path {path} resolves outside of {base}"
            )));
        }

        Ok(url)
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            level = "debug",
            skip(self, body, headers, timeout),
            fields(method = %method, path = url.path(), status_code, attempts)
        )
    )]
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<Response> {
        let path = url.path().to_owned();
        let mut context = RetryContext::new(self.inner.config.retry());

        loop {
            context.begin();
            let request = self.build_request(&method, &url, body.as_deref(), headers, timeout)?;
            let outcome = self
                .inner
                .transport
                .execute(request)
                .await
                .and_then(|response| classify(response, &method, &path));

            #[cfg(feature = "tracing")]
            tracing::Span::current().record("attempts", context.attempt() + 1);

            match outcome {
                Ok(response) => {
                    context.succeed();

                    #[cfg(feature = "tracing")]
                    tracing::Span::current().record("status_code", response.status().as_u16());

                    return Ok(response);
                }
                Err(e) if e.is_retryable() => {
                    if let Some(delay) = context.schedule_retry() {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(
                            attempt = context.attempt(),
                            ?delay,
                            error = %e,
                            "Request failed, retrying"
                        );

                        sleep(delay).await;
                        continue;
                    }

                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        method = %method,
                        path = %path,
                        attempts = context.attempt() + 1,
                        elapsed = ?context.elapsed(),
                        error = %e,
                        "Request failed after exhausting retries"
                    );

                    return Err(e);
                }
                Err(e) => {
                    context.fail();
                    if e.kind() == Kind::Unauthorized {
                        self.on_unauthorized();
                    }
                    return Err(e);
                }
            }
        }
    }

    fn build_request(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&[u8]>,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<Request> {
        let mut request = Request::new(method.clone(), url.clone());
        *request.timeout_mut() = Some(timeout);

        let request_headers = request.headers_mut();
        request_headers.insert(ACCEPT, HeaderValue::from_static(JSON_MIME));
        if let Some(body) = body {
            request_headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_MIME));
            *request.body_mut() = Some(body.to_vec().into());
        }

        let request_headers = request.headers_mut();
        if let Some(credential) = self.inner.store.credential() {
            let mut value = HeaderValue::from_str(&credential.bearer())?;
            value.set_sensitive(true);
            request_headers.insert(AUTHORIZATION, value);
        }

        for (name, value) in headers {
            request_headers.insert(name.clone(), value.clone());
        }

        Ok(request)
    }

    fn on_unauthorized(&self) {
        #[cfg(feature = "tracing")]
        tracing::warn!("Credential rejected, clearing it and signalling auth failure");

        self.inner.store.clear_credential();
        self.inner.auth_signal.emit();
    }
}

fn classify(response: Response, method: &Method, path: &str) -> Result<Response> {
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED {
        return Err(Error::unauthorized(method.clone(), path.to_owned()));
    }

    if status.is_server_error() {
        return Err(Error::status(
            status,
            method.clone(),
            path.to_owned(),
            response.text(),
        ));
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::time::Instant;

    use super::*;
    use crate::auth::Credential;
    use crate::http::retry::RetryPolicy;

    /// Replays a fixed script of outcomes and records what was sent.
    #[derive(Clone, Default)]
    struct ScriptedTransport {
        script: Arc<Mutex<VecDeque<Result<Response>>>>,
        seen: Arc<Mutex<Vec<Request>>>,
    }

    impl ScriptedTransport {
        fn with(outcomes: Vec<Result<Response>>) -> Self {
            Self {
                script: Arc::new(Mutex::new(outcomes.into())),
                seen: Arc::default(),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn header(&self, call: usize, name: &str) -> Option<String> {
            self.seen.lock().unwrap()[call]
                .headers()
                .get(name)
                .map(|v| v.to_str().unwrap().to_owned())
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(&self, request: Request) -> Result<Response> {
            self.seen.lock().unwrap().push(request);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(status(StatusCode::OK)))
        }
    }

    fn status(code: StatusCode) -> Response {
        Response::new(code, HeaderMap::new(), Vec::new())
    }

    fn network_error() -> Result<Response> {
        Err(Error::with_source(
            Kind::Transport,
            io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"),
        ))
    }

    fn client(transport: ScriptedTransport) -> Client {
        let store = Arc::new(CredentialStore::memory_only());
        store.set_credential(&Credential::new("token-1"));
        Client::with_transport(
            "https://api.example.com/api",
            Config::default(),
            store,
            AuthSignal::new(),
            transport,
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_then_success_waits_expected_backoff() {
        for failures in 0..=3_u32 {
            let mut script: Vec<_> = (0..failures)
                .map(|_| Ok(status(StatusCode::SERVICE_UNAVAILABLE)))
                .collect();
            script.push(Ok(status(StatusCode::OK)));
            let transport = ScriptedTransport::with(script);
            let client = client(transport.clone());

            let started = Instant::now();
            let response = client.get("chats").await.unwrap();
            let elapsed = started.elapsed();

            let expected: u64 = (0..failures).map(|i| (1_000_u64 << i).min(5_000)).sum();
            assert_eq!(response.status(), StatusCode::OK);
            let expected = Duration::from_millis(expected);
            assert!(
                elapsed >= expected && elapsed < expected + Duration::from_millis(10),
                "failures = {failures}: waited {elapsed:?}, expected {expected:?}"
            );
            assert_eq!(transport.calls(), failures as usize + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_are_retried() {
        let transport = ScriptedTransport::with(vec![network_error(), Ok(status(StatusCode::OK))]);
        let client = client(transport.clone());

        let response = client.get("chats").await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_server_errors_reject_without_clearing_credential() {
        let transport = ScriptedTransport::with(
            (0..4)
                .map(|_| Ok(status(StatusCode::INTERNAL_SERVER_ERROR)))
                .collect(),
        );
        let client = client(transport.clone());
        let mut signal = client.auth_signal().subscribe();

        let err = client.get("chats").await.unwrap_err();

        assert_eq!(err.kind(), Kind::Status);
        assert_eq!(transport.calls(), 4, "initial attempt plus three retries");
        assert!(client.store().credential().is_some(), "credential kept");
        assert_eq!(signal.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_network_errors_surface_as_transport() {
        let transport = ScriptedTransport::with((0..4).map(|_| network_error()).collect());
        let client = client(transport.clone());

        let err = client.get("chats").await.unwrap_err();

        assert_eq!(err.kind(), Kind::Transport);
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_after_retries_clears_credential_and_signals_once() {
        let transport = ScriptedTransport::with(vec![
            Ok(status(StatusCode::BAD_GATEWAY)),
            Ok(status(StatusCode::BAD_GATEWAY)),
            Ok(status(StatusCode::UNAUTHORIZED)),
        ]);
        let client = client(transport.clone());
        let mut signal = client.auth_signal().subscribe();

        let err = client.get("me").await.unwrap_err();

        assert_eq!(err.kind(), Kind::Unauthorized);
        assert_eq!(transport.calls(), 3, "401 is never retried");
        assert!(client.store().credential().is_none(), "credential cleared");
        assert!(signal.try_recv().is_ok(), "signal fired");
        assert_eq!(signal.try_recv(), Err(TryRecvError::Empty), "fired once");
    }

    #[tokio::test]
    async fn client_errors_are_returned_as_responses() {
        let transport = ScriptedTransport::with(vec![Ok(status(StatusCode::NOT_FOUND))]);
        let client = client(transport.clone());

        let response = client.get("chats/missing").await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn injects_bearer_and_resolves_path_under_base() {
        let transport = ScriptedTransport::default();
        let client = client(transport.clone());

        client.post("/chats/c1/messages", &serde_json::json!({ "content": "hi" })).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].url().as_str(), "https://api.example.com/api/chats/c1/messages");
        assert_eq!(seen[0].method(), &Method::POST);
        assert_eq!(seen[0].timeout(), Some(&Duration::from_secs(10)));
        drop(seen);
        assert_eq!(
            transport.header(0, "authorization").as_deref(),
            Some("Bearer token-1")
        );
        assert_eq!(
            transport.header(0, "content-type").as_deref(),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn omits_authorization_without_credential() {
        let transport = ScriptedTransport::default();
        let client = client(transport.clone());
        client.store().clear_credential();

        client.get("health").await.unwrap();

        assert_eq!(transport.header(0, "authorization"), None);
    }

    #[tokio::test]
    async fn per_call_options_override_defaults() {
        let transport = ScriptedTransport::default();
        let client = client(transport.clone());
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/csv"));
        let options = RequestOptions::builder()
            .headers(headers)
            .timeout(Duration::from_secs(2))
            .build();

        client
            .request::<()>(Method::GET, "export", None, Some(options))
            .await
            .unwrap();

        assert_eq!(transport.header(0, "accept").as_deref(), Some("text/csv"));
        assert_eq!(
            transport.seen.lock().unwrap()[0].timeout(),
            Some(&Duration::from_secs(2))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retry_policy_fails_fast() {
        let transport = ScriptedTransport::with(vec![Ok(status(StatusCode::SERVICE_UNAVAILABLE))]);
        let store = Arc::new(CredentialStore::memory_only());
        let config = Config::builder().retry(RetryPolicy::none()).build();
        let client = Client::with_transport(
            "https://api.example.com",
            config,
            store,
            AuthSignal::new(),
            transport.clone(),
        )
        .unwrap();

        let err = client.get("chats").await.unwrap_err();

        assert_eq!(err.kind(), Kind::Status);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn paths_cannot_leave_the_base_url() {
        let transport = ScriptedTransport::default();
        let client = client(transport.clone());

        for path in [
            "https://elsewhere.example/collect",
            "http://api.example.com/api/chats",
            "\\\\elsewhere.example/collect",
            "../admin",
            "chats/../../admin",
        ] {
            let err = client.get(path).await.unwrap_err();
            assert_eq!(err.kind(), Kind::Validation, "{path} should be rejected");
        }

        assert_eq!(transport.calls(), 0, "nothing sent, credential never leaked");
    }

    #[test]
    fn invalid_base_url_is_validation_error() {
        let err = Client::new(
            "not a url",
            Config::default(),
            Arc::new(CredentialStore::memory_only()),
            AuthSignal::new(),
        )
        .unwrap_err();

        assert_eq!(err.kind(), Kind::Validation);
    }
}
