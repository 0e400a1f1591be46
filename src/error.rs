use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

/// HTTP method type, re-exported for use with error inspection.
pub use reqwest::Method;
/// HTTP status code type, re-exported for use with error inspection.
pub use reqwest::StatusCode;
use reqwest::header;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// A 5xx response that survived every retry
    Status,
    /// The server rejected the credential (HTTP 401). The credential has been cleared.
    Unauthorized,
    /// Network-level failure (connect, timeout, reset) that survived every retry
    Transport,
    /// Error related to invalid input handed to the client
    Validation,
    /// Internal error from dependencies
    Internal,
    /// Error related to WebSocket connections
    WebSocket,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    pub fn status<S: Into<String>>(
        status_code: StatusCode,
        method: Method,
        path: String,
        message: S,
    ) -> Self {
        Status {
            status_code,
            method,
            path,
            message: message.into(),
        }
        .into()
    }

    #[must_use]
    pub fn unauthorized(method: Method, path: String) -> Self {
        Unauthorized { method, path }.into()
    }

    /// Whether the retry policy may attempt this call again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            Kind::Transport => true,
            Kind::Status => self
                .downcast_ref::<Status>()
                .is_some_and(|s| s.status_code.is_server_error()),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Status {
    pub status_code: StatusCode,
    pub method: Method,
    pub path: String,
    pub message: String,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error({}) making {} call to {} with {}",
            self.status_code, self.method, self.path, self.message
        )
    }
}

impl StdError for Status {}

#[non_exhaustive]
#[derive(Debug)]
pub struct Unauthorized {
    pub method: Method,
    pub path: String,
}

impl fmt::Display for Unauthorized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "credential rejected making {} call to {}",
            self.method, self.path
        )
    }
}

impl StdError for Unauthorized {}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<header::InvalidHeaderValue> for Error {
    fn from(e: header::InvalidHeaderValue) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<Status> for Error {
    fn from(err: Status) -> Self {
        Error::with_source(Kind::Status, err)
    }
}

impl From<Unauthorized> for Error {
    fn from(err: Unauthorized) -> Self {
        Error::with_source(Kind::Unauthorized, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_status_is_retryable() {
        let error = Error::status(
            StatusCode::BAD_GATEWAY,
            Method::GET,
            "/orders".to_owned(),
            "upstream down",
        );

        assert_eq!(error.kind(), Kind::Status);
        assert!(error.is_retryable(), "5xx should be retried");
    }

    #[test]
    fn client_status_and_unauthorized_are_terminal() {
        let not_found = Error::status(
            StatusCode::NOT_FOUND,
            Method::GET,
            "/orders/1".to_owned(),
            "",
        );
        let unauthorized = Error::unauthorized(Method::POST, "/orders".to_owned());

        assert!(!not_found.is_retryable(), "4xx should not be retried");
        assert!(!unauthorized.is_retryable(), "401 should not be retried");
        assert_eq!(unauthorized.kind(), Kind::Unauthorized);
    }

    #[test]
    fn unauthorized_display_should_succeed() {
        let error: Error = Unauthorized {
            method: Method::GET,
            path: "/me".to_owned(),
        }
        .into();

        assert_eq!(
            error.to_string(),
            "Unauthorized: credential rejected making GET call to /me"
        );
        assert!(error.downcast_ref::<Unauthorized>().is_some());
    }
}
