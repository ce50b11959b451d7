//! Router adapter: registers facade handlers on a path router and serves them
//! through Axum.
//!
//! # Dispatch
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Stamp start    │ ← ResponseWriter timeline begins
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │   Route match    │ ← matchit; raw handlers return here
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │  Buffer body     │ ← 413 above MAX_REQUEST_BODY_SIZE
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ Request context  │ ← request id, deadline, child of the mux context
//! └────────┬─────────┘
//!          │
//!          ▼
//!   Handler (or 404 handler)
//! ```
//!
//! Pattern syntax and precedence are matchit's: `/users/{id}`,
//! `/files/{*path}`. Patterns match any method.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use axum::Router;
use axum::extract::Request as HostRequest;
use axum::http::StatusCode;
use axum::http::header::CONTENT_LENGTH;
use axum::response::{IntoResponse, Response as HostResponse};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::MuxConfig;
use crate::context::RequestContext;
use crate::error::{MuxError, MuxResult};
use crate::request::Request;
use crate::response::{ResponseWriter, TimeUnit};

/// Boxed future returned by type-erased handlers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Handler working on the request and response facades.
///
/// The handler owns both facades for the duration of the call and hands the
/// writer back so the mux can finish the host response.
pub type Handler = Arc<dyn Fn(ResponseWriter, Request) -> BoxFuture<ResponseWriter> + Send + Sync>;

/// Handler working on the untouched host request and response.
pub type RawHandler = Arc<dyn Fn(HostRequest) -> BoxFuture<HostResponse> + Send + Sync>;

/// Convert an async facade handler into a shareable [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(ResponseWriter, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ResponseWriter> + Send + 'static,
{
    Arc::new(move |w, r| -> BoxFuture<ResponseWriter> { Box::pin(f(w, r)) })
}

#[derive(Clone)]
enum Route {
    Facade(Handler),
    Raw(RawHandler),
}

/// Path router whose handlers receive [`ResponseWriter`] and [`Request`].
///
/// Clones share the root context, so calling [`shutdown`](Mux::shutdown) on a
/// clone stops a mux that was moved into [`serve`](Mux::serve).
#[derive(Clone)]
pub struct Mux {
    routes: matchit::Router<Route>,
    not_found: Handler,
    config: Arc<MuxConfig>,
    context: RequestContext,
}

impl Default for Mux {
    fn default() -> Self {
        Self::new()
    }
}

impl Mux {
    pub fn new() -> Self {
        Self::with_config(MuxConfig::default())
    }

    /// Create a mux whose default not-found handler answers
    /// `404 {"error": config.not_found_message}`.
    pub fn with_config(config: MuxConfig) -> Self {
        let message = config.not_found_message.clone();
        let not_found = handler_fn(move |mut w, _r| {
            let message = message.clone();
            async move {
                w.error(StatusCode::NOT_FOUND, message);
                w
            }
        });

        Self {
            routes: matchit::Router::new(),
            not_found,
            config: Arc::new(config),
            context: RequestContext::background(),
        }
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    /// Parent of every request context. Cancelling it cancels all in-flight
    /// requests and stops [`serve`](Self::serve).
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Cancel the mux context: every in-flight request context is cancelled
    /// and [`serve`](Self::serve) stops accepting connections.
    pub fn shutdown(&self) {
        info!("Mux shutdown requested");
        self.context.cancel();
    }

    /// Register `handler` for `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `MuxError::Route` if the pattern is invalid or conflicts with
    /// an existing one.
    pub fn handle_func<F, Fut>(&mut self, pattern: &str, handler: F) -> MuxResult<()>
    where
        F: Fn(ResponseWriter, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResponseWriter> + Send + 'static,
    {
        self.insert(pattern, Route::Facade(handler_fn(handler)))
    }

    /// Register one handler for several patterns, stopping at the first
    /// registration error.
    pub fn multi_handle_func<F, Fut>(&mut self, patterns: &[&str], handler: F) -> MuxResult<()>
    where
        F: Fn(ResponseWriter, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResponseWriter> + Send + 'static,
    {
        let handler = handler_fn(handler);
        for pattern in patterns {
            self.insert(pattern, Route::Facade(handler.clone()))?;
        }
        Ok(())
    }

    /// Register an already type-erased [`Handler`].
    pub fn handle_boxed(&mut self, pattern: &str, handler: Handler) -> MuxResult<()> {
        self.insert(pattern, Route::Facade(handler))
    }

    /// Register a handler that bypasses the facades entirely.
    pub fn handle<F, Fut>(&mut self, pattern: &str, handler: F) -> MuxResult<()>
    where
        F: Fn(HostRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HostResponse> + Send + 'static,
    {
        let raw: RawHandler =
            Arc::new(move |req| -> BoxFuture<HostResponse> { Box::pin(handler(req)) });
        self.insert(pattern, Route::Raw(raw))
    }

    /// Replace the handler used when no pattern matches.
    pub fn not_found<F, Fut>(&mut self, handler: F)
    where
        F: Fn(ResponseWriter, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResponseWriter> + Send + 'static,
    {
        self.not_found = handler_fn(handler);
    }

    fn insert(&mut self, pattern: &str, route: Route) -> MuxResult<()> {
        self.routes.insert(pattern, route)?;
        debug!(pattern, "Registered route");
        Ok(())
    }

    /// Serve one request.
    ///
    /// The response timeline starts before the route lookup, so latency
    /// covers matching, body buffering and the handler itself.
    pub async fn dispatch(&self, req: HostRequest) -> HostResponse {
        let writer = ResponseWriter::buffered();

        let path = req.uri().path().to_owned();
        let (handler, matches) = match self.routes.at(&path) {
            Ok(matched) => {
                let matches: Vec<(String, String)> = matched
                    .params
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.to_string()))
                    .collect();
                match matched.value {
                    Route::Facade(handler) => (handler.clone(), matches),
                    Route::Raw(handler) => return handler(req).await,
                }
            }
            Err(_) => (self.not_found.clone(), Vec::new()),
        };

        let mut request = match self.wrap_request(req).await {
            Ok(request) => request,
            Err(e) => return e.into_response(),
        };
        request.set_matches(matches);

        let method = request.method().clone();
        let request_id = request.context().request_id().map(str::to_string);

        let writer = handler(writer, request).await;

        debug!(
            %method,
            path = %path,
            request_id = request_id.as_deref(),
            status = writer.status().map(|s| s.as_u16()),
            latency_ms = writer.latency(TimeUnit::Millisecond),
            duration_ms = writer.duration(TimeUnit::Millisecond),
            "Request handled"
        );

        writer.into_response()
    }

    async fn wrap_request(&self, req: HostRequest) -> MuxResult<Request> {
        let limit = self.config.max_request_body_size;
        let declared = req
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > limit) {
            return Err(MuxError::PayloadTooLarge { limit });
        }

        let ctx = self
            .context
            .for_request(req.headers(), self.config.request_timeout());

        let (parts, body) = req.into_parts();
        let body = axum::body::to_bytes(body, limit)
            .await
            .map_err(|e| MuxError::Body(e.to_string()))?;

        Ok(Request::from_parts(parts, body).with_context(ctx))
    }

    /// Turn the mux into an Axum router that sends every request through
    /// [`dispatch`](Self::dispatch), with HTTP tracing.
    pub fn into_router(self) -> Router {
        let mux = Arc::new(self);
        Router::new()
            .fallback(move |req: HostRequest| {
                let mux = mux.clone();
                async move { mux.dispatch(req).await }
            })
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on `listener` until the mux context is cancelled.
    ///
    /// Connect info is enabled so [`Request::ip`] can fall back to the peer
    /// address.
    pub async fn serve(self, listener: TcpListener) -> MuxResult<()> {
        let context = self.context.clone();
        if let Ok(addr) = listener.local_addr() {
            info!("Server listening on http://{addr}");
        }

        let app = self.into_router();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let reason = context.cancelled().await;
            info!(%reason, "Shutting down server");
        })
        .await?;

        Ok(())
    }
}
