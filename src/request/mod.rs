//! Request facade: convenience lookups and deep cloning over an inbound request.
//!
//! [`Request`] owns everything it exposes (method, URI, headers, trailers,
//! buffered body, parsed forms, path-match state and its [`RequestContext`]).
//! Cloning therefore never shares mutable state: a clone handed to background
//! work can edit headers or parse forms without the original observing it.
//!
//! # Lookups
//!
//! | Method            | Single-key source                    |
//! |-------------------|--------------------------------------|
//! | [`Request::query`]   | first decoded query value         |
//! | [`Request::param`]   | path value bound by the router    |
//! | [`Request::queries`] | all values of the first matching key |
//!
//! See [`lookup`] for the fallback rules.

pub mod form;
pub mod ip;
pub mod lookup;

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, FromRequest, Multipart};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, TRANSFER_ENCODING};
use axum::http::{self, HeaderMap, Method, Uri, Version};
use tracing::debug;

use crate::context::RequestContext;
use crate::error::{MuxError, MuxResult};

pub use form::{FileHeader, MultipartForm, Values};

/// Wrapped inbound request.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    trailers: HeaderMap,
    transfer_encoding: Vec<String>,
    remote_addr: String,
    body: Bytes,
    form: Option<Values>,
    post_form: Option<Values>,
    multipart_form: Option<MultipartForm>,
    ctx: RequestContext,
    /// Values for the matching wildcards of the route pattern, in pattern order
    matches: Vec<(String, String)>,
    /// Values set through `set_path_value` that don't match a wildcard
    other_values: HashMap<String, String>,
}

impl Request {
    /// Wrap host request parts and an already-buffered body.
    ///
    /// The remote address is taken from axum's `ConnectInfo<SocketAddr>`
    /// extension when the server was started with connect info.
    pub fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_default();

        let transfer_encoding = parts
            .headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();

        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            trailers: HeaderMap::new(),
            transfer_encoding,
            remote_addr,
            body,
            form: None,
            post_form: None,
            multipart_form: None,
            ctx: RequestContext::background(),
            matches: Vec::new(),
            other_values: HashMap::new(),
        }
    }

    pub(crate) fn set_matches(&mut self, matches: Vec<(String, String)>) {
        self.matches = matches;
    }

    // =========================================================================
    // Fallback lookups
    // =========================================================================

    /// First non-empty query value among `keys`, in order.
    ///
    /// With more than one key, the last key is returned literally when none
    /// of them is set. With a single key, a miss yields an empty string.
    ///
    /// # Panics
    ///
    /// Panics if `keys` is empty.
    pub fn query(&self, keys: &[&str]) -> String {
        let raw = self.raw_query();
        lookup::resolve(|key| lookup::first_query_value(raw, key), keys)
    }

    /// All values of the first key with a non-empty value, supporting both
    /// `a=1&a=2` and `a=1,2`. Empty when no key matches.
    pub fn queries(&self, keys: &[&str]) -> Vec<String> {
        lookup::query_values(self.raw_query(), keys)
    }

    /// First non-empty path value among `keys`, with the same default rules
    /// as [`query`](Self::query).
    ///
    /// # Panics
    ///
    /// Panics if `keys` is empty.
    pub fn param(&self, keys: &[&str]) -> String {
        lookup::resolve(|key| self.path_value(key).to_string(), keys)
    }

    /// The `Authorization` header if non-empty, else the first fallback,
    /// else an empty string.
    pub fn auth(&self, fallback: &[&str]) -> String {
        let auth = self
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !auth.is_empty() {
            return auth.to_string();
        }

        fallback.first().map(|f| f.to_string()).unwrap_or_default()
    }

    /// `X-Real-IP` if set, else the host part of the remote address.
    /// Empty when the remote address is malformed.
    pub fn ip(&self) -> String {
        ip::client_ip(&self.headers, &self.remote_addr)
    }

    // =========================================================================
    // Path values
    // =========================================================================

    /// Value bound to the wildcard `name`, or set with
    /// [`set_path_value`](Self::set_path_value). Empty if neither.
    pub fn path_value(&self, name: &str) -> &str {
        if let Some((_, value)) = self.matches.iter().find(|(n, _)| n == name) {
            return value;
        }
        self.other_values
            .get(name)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn set_path_value(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some((_, slot)) = self.matches.iter_mut().find(|(n, _)| n == name) {
            *slot = value;
            return;
        }
        self.other_values.insert(name.to_string(), value);
    }

    // =========================================================================
    // Context and cloning
    // =========================================================================

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    /// Replace the context, keeping everything else.
    pub fn with_context(mut self, ctx: RequestContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Independent deep copy bound to `ctx`.
    ///
    /// Headers, trailers, URI, transfer encodings, parsed forms, multipart
    /// file headers and path-match state are all copied; the buffered body is
    /// immutable and shared.
    pub fn clone_with_context(&self, ctx: RequestContext) -> Self {
        let mut r2 = self.clone();
        r2.ctx = ctx;
        r2
    }

    // =========================================================================
    // Forms
    // =========================================================================

    /// Populate [`form`](Self::form) and [`post_form`](Self::post_form).
    ///
    /// `form` holds the body values of an urlencoded POST, PUT or PATCH
    /// followed by the query values; `post_form` holds the body values only.
    /// Calling it again is a no-op.
    pub fn parse_form(&mut self) -> MuxResult<()> {
        if self.form.is_some() {
            return Ok(());
        }

        let mut post_form = Values::new();
        if self.has_body_form() && self.content_type() == Some("application/x-www-form-urlencoded") {
            post_form = form::parse_values(&self.body);
        }

        let mut all = post_form.clone();
        form::merge_values(&mut all, &form::parse_values(self.raw_query().as_bytes()));

        debug!(
            form_keys = all.len(),
            post_form_keys = post_form.len(),
            "Parsed form values"
        );
        self.form = Some(all);
        self.post_form = Some(post_form);
        Ok(())
    }

    /// Parse a `multipart/form-data` body into
    /// [`multipart_form`](Self::multipart_form). Text parts are also merged
    /// into `form` and `post_form`. Calling it again is a no-op.
    pub async fn parse_multipart_form(&mut self) -> MuxResult<()> {
        if self.multipart_form.is_some() {
            return Ok(());
        }
        self.parse_form()?;

        let mut builder = http::Request::builder()
            .method(self.method.clone())
            .uri(self.uri.clone());
        if let Some(headers) = builder.headers_mut() {
            *headers = self.headers.clone();
        }
        let host_request = builder
            .body(Body::from(self.body.clone()))
            .map_err(|e| MuxError::Form(e.to_string()))?;

        let mut multipart = Multipart::from_request(host_request, &())
            .await
            .map_err(|e| MuxError::Form(e.to_string()))?;

        let mut parsed = MultipartForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| MuxError::Form(e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let filename = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let header = field.headers().clone();
            let content = field
                .bytes()
                .await
                .map_err(|e| MuxError::Form(e.to_string()))?;

            match filename {
                Some(filename) => parsed.file.entry(name).or_default().push(FileHeader {
                    filename,
                    content_type,
                    header,
                    size: content.len() as u64,
                    content,
                }),
                None => {
                    let text = String::from_utf8(content.to_vec())
                        .map_err(|e| MuxError::Form(format!("field {name} is not UTF-8: {e}")))?;
                    parsed.value.entry(name).or_default().push(text);
                }
            }
        }

        if let Some(form) = self.form.as_mut() {
            form::merge_values(form, &parsed.value);
        }
        if let Some(post_form) = self.post_form.as_mut() {
            form::merge_values(post_form, &parsed.value);
        }
        debug!(
            values = parsed.value.len(),
            files = parsed.file.len(),
            "Parsed multipart form"
        );
        self.multipart_form = Some(parsed);
        Ok(())
    }

    /// First value of `key` from [`form`](Self::form), parsing it on demand.
    /// Parse failures yield an empty string.
    pub fn form_value(&mut self, key: &str) -> String {
        if let Err(e) = self.parse_form() {
            debug!(error = %e, "Ignoring form parse failure");
        }
        self.form
            .as_ref()
            .map(|f| form::first_value(f, key).to_string())
            .unwrap_or_default()
    }

    /// First value of `key` from the body-only [`post_form`](Self::post_form).
    pub fn post_form_value(&mut self, key: &str) -> String {
        if let Err(e) = self.parse_form() {
            debug!(error = %e, "Ignoring form parse failure");
        }
        self.post_form
            .as_ref()
            .map(|f| form::first_value(f, key).to_string())
            .unwrap_or_default()
    }

    pub fn form(&self) -> Option<&Values> {
        self.form.as_ref()
    }

    pub fn form_mut(&mut self) -> Option<&mut Values> {
        self.form.as_mut()
    }

    pub fn post_form(&self) -> Option<&Values> {
        self.post_form.as_ref()
    }

    pub fn multipart_form(&self) -> Option<&MultipartForm> {
        self.multipart_form.as_ref()
    }

    pub fn multipart_form_mut(&mut self) -> Option<&mut MultipartForm> {
        self.multipart_form.as_mut()
    }

    fn has_body_form(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH)
    }

    fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::trim)
    }

    // =========================================================================
    // Plain accessors
    // =========================================================================

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn set_uri(&mut self, uri: Uri) {
        self.uri = uri;
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn raw_query(&self) -> &str {
        self.uri.query().unwrap_or_default()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn trailers(&self) -> &HeaderMap {
        &self.trailers
    }

    pub fn trailers_mut(&mut self) -> &mut HeaderMap {
        &mut self.trailers
    }

    pub fn transfer_encoding(&self) -> &[String] {
        &self.transfer_encoding
    }

    pub fn transfer_encoding_mut(&mut self) -> &mut Vec<String> {
        &mut self.transfer_encoding
    }

    /// `host:port` of the peer, empty when the server has no connect info.
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn set_remote_addr(&mut self, addr: impl Into<String>) {
        self.remote_addr = addr.into();
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self::from_parts(parts, body)
    }
}
