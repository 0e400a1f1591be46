#![allow(
    clippy::unwrap_used,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

mod requests {
    use std::time::Duration;

    use courier_client_sdk::http::{Method, RequestOptions};
    use httpmock::{Method::GET, Method::POST, MockServer};
    use reqwest::StatusCode;
    use reqwest::header::{HeaderMap, HeaderValue};
    use serde_json::json;

    use crate::common::{TOKEN, client, store_with_token};

    #[tokio::test]
    async fn get_sends_bearer_credential() -> anyhow::Result<()> {
        let server = MockServer::start();
        let store = store_with_token();
        let (client, _signal) = client(&server, &store)?;

        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/chats")
                .header("authorization", format!("Bearer {TOKEN}"))
                .header("accept", "application/json");
            then.status(StatusCode::OK)
                .json_body(json!([{ "id": "c1", "name": "general" }]));
        });

        let response = client.get("/chats").await?;
        let chats: serde_json::Value = response.json()?;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(chats[0]["name"], "general");
        mock.assert();

        Ok(())
    }

    #[tokio::test]
    async fn post_sends_json_body() -> anyhow::Result<()> {
        let server = MockServer::start();
        let store = store_with_token();
        let (client, _signal) = client(&server, &store)?;

        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/chats/c1/messages")
                .header("content-type", "application/json")
                .json_body(json!({ "content": "hello" }));
            then.status(StatusCode::CREATED)
                .json_body(json!({ "id": "m1" }));
        });

        let response = client
            .post("chats/c1/messages", &json!({ "content": "hello" }))
            .await?;

        assert_eq!(response.status(), StatusCode::CREATED);
        mock.assert();

        Ok(())
    }

    #[tokio::test]
    async fn per_call_headers_are_sent() -> anyhow::Result<()> {
        let server = MockServer::start();
        let store = store_with_token();
        let (client, _signal) = client(&server, &store)?;

        let mock = server.mock(|when, then| {
            when.method(GET).path("/me").header("x-request-id", "abc");
            then.status(StatusCode::OK).json_body(json!({ "id": "u1" }));
        });

        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        let options = RequestOptions::builder()
            .headers(headers)
            .timeout(Duration::from_secs(2))
            .build();

        client
            .request::<()>(Method::GET, "/me", None, Some(options))
            .await?;
        mock.assert();

        Ok(())
    }

    #[tokio::test]
    async fn client_errors_are_returned_to_the_caller() -> anyhow::Result<()> {
        let server = MockServer::start();
        let store = store_with_token();
        let (client, signal) = client(&server, &store)?;
        let mut auth_errors = signal.subscribe();

        let mock = server.mock(|when, then| {
            when.method(GET).path("/chats/missing");
            then.status(StatusCode::NOT_FOUND)
                .json_body(json!({ "error": "not found" }));
        });

        let response = client.get("/chats/missing").await?;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        mock.assert_calls(1);
        assert!(store.credential().is_some());
        assert!(auth_errors.try_recv().is_err());

        Ok(())
    }
}

mod failures {
    use std::sync::Arc;

    use courier_client_sdk::auth::AuthSignal;
    use courier_client_sdk::error::{Kind, Status};
    use courier_client_sdk::http::{Client, Config};
    use httpmock::{Method::GET, MockServer};
    use reqwest::StatusCode;

    use crate::common::{client, fast_retry, store_with_token};

    #[tokio::test]
    async fn server_errors_retry_then_surface() -> anyhow::Result<()> {
        let server = MockServer::start();
        let store = store_with_token();
        let (client, _signal) = client(&server, &store)?;

        let mock = server.mock(|when, then| {
            when.method(GET).path("/chats");
            then.status(StatusCode::SERVICE_UNAVAILABLE).body("maintenance");
        });

        let err = client.get("/chats").await.unwrap_err();

        assert_eq!(err.kind(), Kind::Status);
        let status = err.downcast_ref::<Status>().unwrap();
        assert_eq!(status.status_code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status.message, "maintenance");
        // One initial attempt plus three retries
        mock.assert_calls(4);
        assert!(store.credential().is_some());

        Ok(())
    }

    #[tokio::test]
    async fn unauthorized_clears_credential_and_signals_once() -> anyhow::Result<()> {
        let server = MockServer::start();
        let store = store_with_token();
        let (client, signal) = client(&server, &store)?;
        let mut auth_errors = signal.subscribe();

        let mock = server.mock(|when, then| {
            when.method(GET).path("/me");
            then.status(StatusCode::UNAUTHORIZED);
        });

        let err = client.get("/me").await.unwrap_err();

        assert_eq!(err.kind(), Kind::Unauthorized);
        mock.assert_calls(1);
        assert!(store.credential().is_none());
        auth_errors.try_recv()?;
        assert!(auth_errors.try_recv().is_err());

        Ok(())
    }

    #[tokio::test]
    async fn requests_after_logout_carry_no_credential() -> anyhow::Result<()> {
        let server = MockServer::start();
        let store = store_with_token();
        let (client, _signal) = client(&server, &store)?;

        let rejected = server.mock(|when, then| {
            when.method(GET).path("/me");
            then.status(StatusCode::UNAUTHORIZED);
        });
        client.get("/me").await.unwrap_err();
        rejected.assert();

        let anonymous = server.mock(|when, then| {
            when.method(GET).path("/public").header_missing("authorization");
            then.status(StatusCode::OK);
        });
        client.get("/public").await?;
        anonymous.assert();

        Ok(())
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() -> anyhow::Result<()> {
        // Bind then release a port so nothing is listening on it
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let base = format!("http://{}", listener.local_addr()?);
        drop(listener);

        let store = store_with_token();
        let config = Config::builder().retry(fast_retry()).build();
        let client = Client::new(&base, config, Arc::clone(&store), AuthSignal::new())?;

        let err = client.get("/chats").await.unwrap_err();

        assert_eq!(err.kind(), Kind::Transport);
        assert!(store.credential().is_some());

        Ok(())
    }
}
