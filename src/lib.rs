//! # mux-facade
//!
//! Ergonomic request and response facades over Axum, plus a router adapter
//! that dispatches to handlers written against them:
//!
//! - **Request lookups**: ordered-fallback query, path and auth lookups,
//!   repeated or comma-separated list queries, client IP resolution
//! - **Deep cloning**: hand an independent copy of a request, bound to a new
//!   context, to background work
//! - **Response timing**: start, first-byte and last-byte instants captured as
//!   a side effect of writes
//! - **Reply helpers**: JSON, plain text, streaming, structured errors,
//!   deprecation headers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Axum HTTP Server (host engine)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Mux (router adapter: stamp start → match → wrap → call)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  matchit (path patterns)                                    │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  Request (facade + context)  │  ResponseWriter (timeline)   │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │  Handlers                                                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mux_facade::{Mux, MuxConfig, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mux_facade::MuxError> {
//!     let mut mux = Mux::with_config(MuxConfig::from_env()?);
//!
//!     mux.handle_func("/users/{id}", |mut w, r| async move {
//!         let id = r.param(&["id"]);
//!         let fields = r.queries(&["fields", "f"]);
//!         w.json(&serde_json::json!({ "id": id, "fields": fields }));
//!         w
//!     })?;
//!
//!     mux.handle_func("/admin", |mut w, r| async move {
//!         if r.auth(&[]).is_empty() {
//!             w.error(StatusCode::UNAUTHORIZED, "missing credentials");
//!         }
//!         w
//!     })?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     mux.serve(listener).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod mux;
pub mod request;
pub mod response;

// Re-exports for convenience
pub use axum::http::StatusCode;
pub use config::MuxConfig;
pub use context::{ContextError, RequestContext};
pub use error::{ApiError, MuxError, MuxResult};
pub use mux::{Handler, Mux, handler_fn};
pub use request::Request;
pub use response::{BufferSink, ResponseSink, ResponseWriter, TimeUnit, Timeline};
