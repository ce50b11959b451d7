//! Output sinks wrapped by [`ResponseWriter`](super::ResponseWriter).

use std::io;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use tracing::warn;

/// The host's write side of one response.
///
/// Headers can be edited until the status is written. The status is written
/// at most once; a body write before any status implies `200 OK`.
pub trait ResponseSink: Send {
    fn headers_mut(&mut self) -> &mut HeaderMap;

    fn write_header(&mut self, status: StatusCode);

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn is_header_written(&self) -> bool;
}

/// In-memory sink that becomes an axum [`Response`] once the handler is done.
#[derive(Debug, Default)]
pub struct BufferSink {
    headers: HeaderMap,
    /// Status and the header snapshot taken when it was written
    written: Option<(StatusCode, HeaderMap)>,
    body: Vec<u8>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.written.as_ref().map(|(status, _)| *status)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Build the host response. A sink nobody wrote to becomes an empty 200.
    pub fn into_response(self) -> Response {
        let (status, headers) = self
            .written
            .unwrap_or((StatusCode::OK, self.headers));

        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

impl ResponseSink for BufferSink {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        if let Some((current, _)) = &self.written {
            warn!(
                current = current.as_u16(),
                ignored = status.as_u16(),
                "Superfluous write_header call"
            );
            return;
        }
        self.written = Some((status, self.headers.clone()));
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written.is_none() {
            self.write_header(StatusCode::OK);
        }
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn is_header_written(&self) -> bool {
        self.written.is_some()
    }
}
