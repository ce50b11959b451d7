//! Response facade: write instrumentation and reply helpers.
//!
//! [`ResponseWriter`] decorates a [`ResponseSink`]. Every call is forwarded
//! to the sink unchanged; the writer only records the last status it was
//! asked to write and stamps the response [`Timeline`]:
//!
//! ```text
//! dispatch ──► start
//! write_header ──► first_byte      (also on an implicit 200 from write)
//! write ──► end                    (every body write)
//!
//! latency  = first_byte - start
//! duration = end - first_byte
//! ```

pub mod sink;
pub mod timing;

use std::io;
use std::time::Instant;

use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{error, warn};

use crate::error::ApiError;

pub use sink::{BufferSink, ResponseSink};
pub use timing::{TimeUnit, Timeline};

/// `Deprecated` response header.
pub const DEPRECATED_HEADER: HeaderName = HeaderName::from_static("deprecated");

/// `Sunset` response header (RFC 8594).
pub const SUNSET_HEADER: HeaderName = HeaderName::from_static("sunset");

static JSON_CONTENT_TYPE: HeaderValue = HeaderValue::from_static("application/json");
static TEXT_CONTENT_TYPE: HeaderValue = HeaderValue::from_static("text/plain");

/// IMF-fixdate, the preferred HTTP-date format.
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

const STREAM_CHUNK_SIZE: usize = 8 * 1024;

/// Instrumented wrapper around a response sink.
#[derive(Debug)]
pub struct ResponseWriter<S: ResponseSink = BufferSink> {
    sink: S,
    status: Option<StatusCode>,
    timeline: Timeline,
}

impl<S: ResponseSink> ResponseWriter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            status: None,
            timeline: Timeline::default(),
        }
    }

    /// Stamp the instant dispatch began.
    pub fn set_start(&mut self, start: Instant) {
        self.timeline.start = Some(start);
    }

    pub fn header_mut(&mut self) -> &mut HeaderMap {
        self.sink.headers_mut()
    }

    /// Forward `status` to the sink, record it, and stamp the first byte.
    pub fn write_header(&mut self, status: StatusCode) {
        self.sink.write_header(status);
        self.timeline.first_byte = Some(Instant::now());
        self.status = Some(status);
    }

    /// Forward `buf` to the sink and stamp the end of the response.
    ///
    /// A write to a sink whose status is not yet written writes `200 OK`
    /// first, as the sink would.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.sink.is_header_written() {
            self.write_header(StatusCode::OK);
        }
        let result = self.sink.write(buf);
        self.timeline.end = Some(Instant::now());
        result
    }

    /// Last status explicitly written, `None` before any write.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn start(&self) -> Option<Instant> {
        self.timeline.start
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Time between dispatch and the status write, in `unit`.
    pub fn latency(&self, unit: TimeUnit) -> f64 {
        self.timeline.latency(unit)
    }

    /// Time between the status write and the last body write, in `unit`.
    pub fn duration(&self, unit: TimeUnit) -> f64 {
        self.timeline.duration(unit)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Write `{"error": "<err>"}` as JSON with status `code`.
    pub fn error(&mut self, code: StatusCode, err: impl std::fmt::Display) {
        self.header_mut().insert(CONTENT_TYPE, JSON_CONTENT_TYPE.clone());
        self.write_header(code);
        let body = serde_json::to_vec(&ApiError::new(err.to_string())).unwrap_or_default();
        if let Err(e) = self.write(&body) {
            warn!(error = %e, status = code.as_u16(), "Failed to write error body");
        }
    }

    /// Mark the endpoint deprecated, optionally announcing its sunset.
    pub fn deprecate(&mut self, deprecation: DateTime<Utc>, sunset: Option<DateTime<Utc>>) {
        self.set_http_date(DEPRECATED_HEADER, deprecation);
        if let Some(sunset) = sunset {
            self.set_http_date(SUNSET_HEADER, sunset);
        }
    }

    fn set_http_date(&mut self, name: HeaderName, at: DateTime<Utc>) {
        let formatted = at.format(HTTP_DATE_FORMAT).to_string();
        match HeaderValue::from_str(&formatted) {
            Ok(value) => {
                self.header_mut().insert(name, value);
            }
            Err(e) => warn!(header = %name, error = %e, "Invalid HTTP date"),
        }
    }

    /// Copy everything from `reader` into the response.
    ///
    /// Sets `Content-Type`, and `Content-Length` when `size` is known.
    /// Returns the number of bytes copied.
    pub async fn stream<R>(
        &mut self,
        mut reader: R,
        content_type: &str,
        size: Option<u64>,
    ) -> io::Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let content_type = HeaderValue::from_str(content_type)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.header_mut().insert(CONTENT_TYPE, content_type);
        if let Some(size) = size {
            self.header_mut().insert(CONTENT_LENGTH, HeaderValue::from(size));
        }

        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        let mut copied = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(copied);
            }
            let chunk = buf.get(..n).unwrap_or_default();
            self.write_all_bytes(chunk)?;
            copied += n as u64;
        }
    }

    fn write_all_bytes(&mut self, mut chunk: &[u8]) -> io::Result<()> {
        while !chunk.is_empty() {
            match self.write(chunk)? {
                0 => return Err(io::ErrorKind::WriteZero.into()),
                n => chunk = chunk.get(n..).unwrap_or_default(),
            }
        }
        Ok(())
    }

    /// Write `message` as `text/plain`.
    pub fn reply(&mut self, message: &str) {
        self.header_mut().insert(CONTENT_TYPE, TEXT_CONTENT_TYPE.clone());
        if let Err(e) = self.write(message.as_bytes()) {
            warn!(error = %e, "Failed to write reply");
        }
    }

    /// Serialize `value` and write it as `application/json`.
    ///
    /// If encoding fails before anything was written, the response becomes a
    /// 500 with the JSON error body; otherwise the failure is only logged.
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) {
        self.header_mut().insert(CONTENT_TYPE, JSON_CONTENT_TYPE.clone());
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                if let Err(e) = self.write(&bytes) {
                    warn!(error = %e, "Failed to write JSON body");
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to encode JSON response");
                if !self.sink.is_header_written() {
                    self.error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "failed to encode response body",
                    );
                }
            }
        }
    }
}

impl ResponseWriter<BufferSink> {
    /// A buffered writer whose timeline starts now.
    pub fn buffered() -> Self {
        let mut writer = Self::new(BufferSink::new());
        writer.set_start(Instant::now());
        writer
    }

    pub fn into_response(self) -> axum::response::Response {
        self.sink.into_response()
    }
}

impl<S: ResponseSink> io::Write for ResponseWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ResponseWriter::<S>::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::ser::Error as _;
    use std::io::Write as _;

    /// Sink that fails every body write after the first `ok_writes`.
    #[derive(Default)]
    struct FlakySink {
        headers: HeaderMap,
        status: Option<StatusCode>,
        ok_writes: usize,
        body: Vec<u8>,
    }

    impl ResponseSink for FlakySink {
        fn headers_mut(&mut self) -> &mut HeaderMap {
            &mut self.headers
        }

        fn write_header(&mut self, status: StatusCode) {
            self.status.get_or_insert(status);
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.ok_writes == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"));
            }
            self.ok_writes -= 1;
            self.body.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn is_header_written(&self) -> bool {
            self.status.is_some()
        }
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("boom"))
        }
    }

    fn body_of(writer: &ResponseWriter) -> String {
        String::from_utf8(writer.sink().body().to_vec()).unwrap()
    }

    #[test]
    fn test_timeline_is_ordered() {
        let mut writer = ResponseWriter::buffered();
        writer.write_header(StatusCode::OK);
        writer.write(b"a").unwrap();
        writer.write(b"b").unwrap();

        let t = writer.timeline();
        let (start, first_byte, end) = (t.start.unwrap(), t.first_byte.unwrap(), t.end.unwrap());
        assert!(start <= first_byte);
        assert!(first_byte <= end);
        assert!(writer.latency(TimeUnit::Nanosecond) >= 0.0);
        assert!(writer.duration(TimeUnit::Nanosecond) >= 0.0);
    }

    #[test]
    fn test_write_without_header_stamps_first_byte() {
        let mut writer = ResponseWriter::buffered();
        writer.write(b"hello").unwrap();

        assert_eq!(writer.status(), Some(StatusCode::OK));
        assert!(writer.timeline().first_byte.is_some());
        assert!(writer.timeline().first_byte <= writer.timeline().end);
    }

    #[test]
    fn test_write_follows_sink_header_state() {
        let mut sink = FlakySink {
            ok_writes: 1,
            ..FlakySink::default()
        };
        sink.write_header(StatusCode::CREATED);

        let mut writer = ResponseWriter::new(sink);
        writer.write(b"late").unwrap();

        assert_eq!(writer.status(), None);
        assert!(writer.timeline().first_byte.is_none());
        assert!(writer.timeline().end.is_some());
        assert_eq!(writer.sink().status, Some(StatusCode::CREATED));
        assert_eq!(writer.sink().body, b"late");
    }

    #[test]
    fn test_nothing_written_reports_zero() {
        let writer = ResponseWriter::buffered();

        assert_eq!(writer.status(), None);
        assert_eq!(writer.latency(TimeUnit::Millisecond), 0.0);
        assert_eq!(writer.duration(TimeUnit::Millisecond), 0.0);
    }

    #[test]
    fn test_status_records_last_call() {
        let mut writer = ResponseWriter::buffered();
        writer.write_header(StatusCode::CREATED);
        writer.write_header(StatusCode::CONFLICT);

        assert_eq!(writer.status(), Some(StatusCode::CONFLICT));
        // The sink keeps the first status it saw
        assert_eq!(writer.sink().status(), Some(StatusCode::CREATED));
    }

    #[test]
    fn test_write_error_propagates_and_stamps_end() {
        let mut writer = ResponseWriter::new(FlakySink::default());
        let err = writer.write(b"data").unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(writer.timeline().end.is_some());
    }

    #[test]
    fn test_error_body() {
        let mut writer = ResponseWriter::buffered();
        writer.error(StatusCode::NOT_FOUND, "x");

        assert_eq!(writer.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(body_of(&writer), r#"{"error":"x"}"#);

        let response = writer.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_error_accepts_error_values() {
        let mut writer = ResponseWriter::buffered();
        let err = io::Error::other("disk full");
        writer.error(StatusCode::INSUFFICIENT_STORAGE, err);

        assert_eq!(body_of(&writer), r#"{"error":"disk full"}"#);
    }

    #[test]
    fn test_error_ignores_write_failure() {
        let mut writer = ResponseWriter::new(FlakySink::default());
        writer.error(StatusCode::BAD_GATEWAY, "upstream");

        assert_eq!(writer.status(), Some(StatusCode::BAD_GATEWAY));
        assert_eq!(writer.sink().status, Some(StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn test_deprecate_headers() {
        let deprecation = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let sunset = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        let mut writer = ResponseWriter::buffered();
        writer.deprecate(deprecation, Some(sunset));

        let headers = writer.header_mut();
        assert_eq!(headers[DEPRECATED_HEADER], "Mon, 15 Jan 2024 10:30:00 GMT");
        assert_eq!(headers[SUNSET_HEADER], "Sun, 01 Jun 2025 00:00:00 GMT");
    }

    #[test]
    fn test_deprecate_without_sunset() {
        let deprecation = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();

        let mut writer = ResponseWriter::buffered();
        writer.deprecate(deprecation, None);

        assert!(writer.header_mut().contains_key(DEPRECATED_HEADER));
        assert!(!writer.header_mut().contains_key(SUNSET_HEADER));
    }

    #[tokio::test]
    async fn test_stream_copies_all_bytes() {
        let payload = vec![7u8; STREAM_CHUNK_SIZE * 2 + 11];
        let mut writer = ResponseWriter::buffered();

        let copied = writer
            .stream(payload.as_slice(), "application/octet-stream", Some(payload.len() as u64))
            .await
            .unwrap();

        assert_eq!(copied, payload.len() as u64);
        assert_eq!(writer.sink().body(), payload.as_slice());

        let response = writer.into_response();
        assert_eq!(response.headers()[CONTENT_TYPE], "application/octet-stream");
        assert_eq!(response.headers()[CONTENT_LENGTH], "16395");
    }

    #[tokio::test]
    async fn test_stream_without_size_omits_content_length() {
        let mut writer = ResponseWriter::buffered();
        writer.stream(&b"csv,data"[..], "text/csv", None).await.unwrap();

        let response = writer.into_response();
        assert!(!response.headers().contains_key(CONTENT_LENGTH));
    }

    #[tokio::test]
    async fn test_stream_propagates_write_error() {
        let mut writer = ResponseWriter::new(FlakySink::default());
        let result = writer.stream(&b"abc"[..], "text/plain", None).await;

        assert!(result.is_err());
    }

    #[test]
    fn test_reply_plain_text() {
        let mut writer = ResponseWriter::buffered();
        writer.reply("pong");

        assert_eq!(body_of(&writer), "pong");
        assert_eq!(writer.header_mut()[CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn test_json_body() {
        let mut writer = ResponseWriter::buffered();
        writer.json(&serde_json::json!({"id": 1}));

        assert_eq!(writer.status(), Some(StatusCode::OK));
        assert_eq!(body_of(&writer), r#"{"id":1}"#);
        assert_eq!(writer.header_mut()[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_json_encode_failure_becomes_500() {
        let mut writer = ResponseWriter::buffered();
        writer.json(&Unencodable);

        assert_eq!(writer.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(
            body_of(&writer),
            r#"{"error":"failed to encode response body"}"#
        );
    }

    #[test]
    fn test_json_encode_failure_after_flush_writes_nothing_more() {
        let mut writer = ResponseWriter::buffered();
        writer.write_header(StatusCode::ACCEPTED);
        writer.json(&Unencodable);

        assert_eq!(writer.status(), Some(StatusCode::ACCEPTED));
        assert!(writer.sink().body().is_empty());
    }

    #[test]
    fn test_io_write_impl() {
        let mut writer = ResponseWriter::buffered();
        write!(writer, "{}-{}", "a", 1).unwrap();

        assert_eq!(body_of(&writer), "a-1");
    }
}
