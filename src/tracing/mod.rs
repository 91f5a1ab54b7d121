//! Request correlation for logs and error bodies.
//!
//! Every request gets a [`RequestId`] (taken from `x-request-id` when the
//! client sent a usable one). The id is kept in a task-local so error
//! responses built deep inside a handler can echo it back.

use std::{cell::RefCell, fmt, future::Future};

use axum::http::Request;
use tower_http::trace::MakeSpan;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

impl Default for RequestId {
    fn default() -> Self {
        RequestId(Uuid::new_v4().to_string())
    }
}

impl RequestId {
    pub fn new(value: impl Into<String>) -> Self {
        RequestId(value.into())
    }

    /// Accepts a client supplied id only if it is short visible ASCII.
    pub fn from_header(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        let usable = !trimmed.is_empty()
            && trimmed.len() <= MAX_REQUEST_ID_LEN
            && trimmed.bytes().all(|b| b.is_ascii_graphic());
        usable.then(|| RequestId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

tokio::task_local! {
    static CURRENT_REQUEST_ID: RefCell<Option<RequestId>>;
}

pub async fn scope_request_id<Fut, R>(request_id: RequestId, future: Fut) -> R
where
    Fut: Future<Output = R>,
{
    CURRENT_REQUEST_ID
        .scope(RefCell::new(Some(request_id)), future)
        .await
}

pub fn current_request_id() -> Option<RequestId> {
    CURRENT_REQUEST_ID
        .try_with(|cell| cell.borrow().clone())
        .ok()
        .flatten()
}

/// Span factory for `TraceLayer` that tags spans with the request id.
#[derive(Clone, Default)]
pub struct RequestSpanMaker;

impl<B> MakeSpan<B> for RequestSpanMaker {
    fn make_span(&mut self, request: &Request<B>) -> tracing::Span {
        let request_id = request
            .extensions()
            .get::<RequestId>()
            .cloned()
            .or_else(|| {
                request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(RequestId::from_header)
            })
            .unwrap_or_default();

        tracing::info_span!(
            "http.request",
            request_id = %request_id.as_str(),
            method = %request.method(),
            uri = %request.uri(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_id_is_visible_inside_scope_only() {
        assert!(current_request_id().is_none());
        let seen = scope_request_id(RequestId::new("req-7"), async {
            current_request_id().map(|rid| rid.0)
        })
        .await;
        assert_eq!(seen.as_deref(), Some("req-7"));
        assert!(current_request_id().is_none());
    }

    #[test]
    fn header_values_with_control_characters_are_rejected() {
        assert!(RequestId::from_header("abc\u{7f}").is_none());
        assert!(RequestId::from_header("   ").is_none());
        assert!(RequestId::from_header(&"x".repeat(200)).is_none());
        assert_eq!(
            RequestId::from_header(" req-1 ").map(|r| r.0).as_deref(),
            Some("req-1")
        );
    }
}
