//! Request-scoped cancellation, deadline and values.
//!
//! Every request dispatched by [`Mux`](crate::Mux) carries a [`RequestContext`]
//! derived from the mux's root context, so shutting the mux down cancels every
//! in-flight request. Contexts are plain values: deriving one (child, timeout,
//! value) never mutates the parent, and cloning a request with a new context
//! is how work is handed to another owner.
//!
//! # Deadlines
//!
//! Clients can ask for a shorter deadline via the `X-Request-Timeout` header:
//! ```text
//! X-Request-Timeout: 5000  # 5 seconds in milliseconds
//! ```
//! Values outside [`MIN_REQUEST_TIMEOUT_MS`]..=[`MAX_REQUEST_TIMEOUT_MS`] or
//! that fail to parse are ignored. A client value never extends a deadline
//! configured on the server.

use std::time::Duration;

use axum::http::{Extensions, HeaderMap};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Minimum allowed client request timeout (100ms).
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 100;

/// Maximum allowed client request timeout (5 minutes).
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 300_000;

/// Header name for client-specified request timeout.
pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout";

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Why a context is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    Cancelled,
    DeadlineExceeded,
}

impl std::fmt::Display for ContextError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextError::Cancelled => f.write_str("context cancelled"),
            ContextError::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

impl std::error::Error for ContextError {}

/// Cancellation signal, optional deadline, request id and typed values
/// attached to one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    request_id: Option<String>,
    values: Extensions,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}

impl RequestContext {
    /// An empty root context: never cancelled unless [`cancel`](Self::cancel)
    /// is called, no deadline, no values.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            request_id: None,
            values: Extensions::new(),
        }
    }

    /// Derive a context that is cancelled with its parent but can also be
    /// cancelled on its own without affecting the parent.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            request_id: self.request_id.clone(),
            values: self.values.clone(),
        }
    }

    /// Derive a child context whose deadline is at most `timeout` from now.
    ///
    /// A timeout too large to represent as an instant leaves the current
    /// deadline in place.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.child(),
        }
    }

    /// Derive a child context with the earlier of the current deadline and
    /// `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut ctx = self.child();
        ctx.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        ctx
    }

    /// Derive a context carrying `value`; a value of the same type is shadowed.
    pub fn with_value<T>(&self, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut ctx = self.clone();
        ctx.values.insert(value);
        ctx
    }

    pub fn with_request_id(&self, request_id: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.request_id = Some(request_id.into());
        ctx
    }

    pub fn value<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.values.get::<T>()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.err().is_some()
    }

    /// `None` while the context is live, otherwise the reason it ended.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn cancelled(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;

                    _ = self.token.cancelled() => ContextError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }

    /// Build the context for one inbound request.
    ///
    /// The request id comes from `X-Request-Id` when present, otherwise a
    /// UUIDv4 is generated. The deadline is the tighter of `server_timeout`
    /// and a valid `X-Request-Timeout` header.
    pub(crate) fn for_request(
        &self,
        headers: &HeaderMap,
        server_timeout: Option<Duration>,
    ) -> Self {
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut ctx = self.child().with_request_id(request_id);
        if let Some(timeout) = server_timeout {
            ctx = ctx.with_timeout(timeout);
        }
        if let Some(timeout) = client_timeout(headers) {
            ctx = ctx.with_timeout(timeout);
        }
        ctx
    }
}

/// Parse and bound the client-specified `X-Request-Timeout` header.
fn client_timeout(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(REQUEST_TIMEOUT_HEADER)?.to_str().ok()?;

    let Ok(ms) = value.trim().parse::<u64>() else {
        debug!(value, "Invalid X-Request-Timeout header value, ignoring");
        return None;
    };

    if !(MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS).contains(&ms) {
        debug!(
            timeout_ms = ms,
            min = MIN_REQUEST_TIMEOUT_MS,
            max = MAX_REQUEST_TIMEOUT_MS,
            "Client timeout outside allowed range, ignoring"
        );
        return None;
    }

    debug!(timeout_ms = ms, "Client specified request timeout via header");
    Some(Duration::from_millis(ms))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[derive(Debug, Clone, PartialEq)]
    struct TenantId(u32);

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn test_background_is_live() {
        let ctx = RequestContext::background();
        assert!(!ctx.is_cancelled());
        assert!(ctx.deadline().is_none());
        assert!(ctx.request_id().is_none());
    }

    #[test]
    fn test_cancel_parent_cancels_child() {
        let parent = RequestContext::background();
        let child = parent.child();

        parent.cancel();
        assert_eq!(child.err(), Some(ContextError::Cancelled));
    }

    #[test]
    fn test_cancel_child_leaves_parent() {
        let parent = RequestContext::background();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_values_do_not_leak_to_parent() {
        let parent = RequestContext::background();
        let child = parent.with_value(TenantId(7));

        assert_eq!(child.value::<TenantId>(), Some(&TenantId(7)));
        assert!(parent.value::<TenantId>().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_keeps_earlier_deadline() {
        let ctx = RequestContext::background().with_timeout(Duration::from_secs(1));
        let looser = ctx.with_timeout(Duration::from_secs(10));

        assert_eq!(looser.deadline(), ctx.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_unrepresentable_keeps_deadline() {
        let unbounded = RequestContext::background().with_timeout(Duration::MAX);
        assert!(unbounded.deadline().is_none());
        assert!(!unbounded.is_cancelled());

        let bounded = RequestContext::background().with_timeout(Duration::from_secs(1));
        let derived = bounded.with_timeout(Duration::MAX);
        assert_eq!(derived.deadline(), bounded.deadline());

        bounded.cancel();
        assert!(derived.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let ctx = RequestContext::background().with_timeout(Duration::from_millis(200));
        assert!(ctx.err().is_none());

        assert_eq!(ctx.cancelled().await, ContextError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_cancelled_resolves_on_cancel() {
        let ctx = RequestContext::background();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        ctx.cancel();
        assert_eq!(handle.await.unwrap(), ContextError::Cancelled);
    }

    #[test]
    fn test_for_request_propagates_request_id() {
        let root = RequestContext::background();
        let ctx = root.for_request(&headers(&[("x-request-id", "abc-123")]), None);

        assert_eq!(ctx.request_id(), Some("abc-123"));
    }

    #[test]
    fn test_for_request_generates_request_id() {
        let root = RequestContext::background();
        let ctx = root.for_request(&HeaderMap::new(), None);

        let id = ctx.request_id().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_timeout_applied() {
        let root = RequestContext::background();
        let before = Instant::now();
        let ctx = root.for_request(&headers(&[("x-request-timeout", "5000")]), None);

        assert_eq!(ctx.deadline(), Some(before + Duration::from_millis(5000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_timeout_cannot_extend_server_timeout() {
        let root = RequestContext::background();
        let before = Instant::now();
        let ctx = root.for_request(
            &headers(&[("x-request-timeout", "60000")]),
            Some(Duration::from_secs(2)),
        );

        assert_eq!(ctx.deadline(), Some(before + Duration::from_secs(2)));
    }

    #[test]
    fn test_client_timeout_out_of_range_ignored() {
        assert!(client_timeout(&headers(&[("x-request-timeout", "50")])).is_none());
        assert!(client_timeout(&headers(&[("x-request-timeout", "999999")])).is_none());
        assert!(client_timeout(&headers(&[("x-request-timeout", "soon")])).is_none());
    }

    #[test]
    fn test_client_timeout_bounds_inclusive() {
        assert_eq!(
            client_timeout(&headers(&[("x-request-timeout", "100")])),
            Some(Duration::from_millis(100))
        );
        assert_eq!(
            client_timeout(&headers(&[("x-request-timeout", "300000")])),
            Some(Duration::from_millis(300_000))
        );
    }
}
