//! Parsed form data attached to a request.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::http::HeaderMap;
use url::form_urlencoded;

/// Multi-valued map of decoded form or query values.
pub type Values = HashMap<String, Vec<String>>;

/// Decode `application/x-www-form-urlencoded` bytes into [`Values`].
///
/// Invalid UTF-8 in keys or values is replaced, never rejected.
pub fn parse_values(input: &[u8]) -> Values {
    let mut values = Values::new();
    for (key, value) in form_urlencoded::parse(input) {
        values
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    values
}

/// First value stored under `key`, empty if there is none.
pub fn first_value<'a>(values: &'a Values, key: &str) -> &'a str {
    values
        .get(key)
        .and_then(|v| v.first())
        .map(String::as_str)
        .unwrap_or_default()
}

/// Append every value of `from` to `into`, keeping the existing ones first.
pub(crate) fn merge_values(into: &mut Values, from: &Values) {
    for (key, values) in from {
        into.entry(key.clone())
            .or_default()
            .extend(values.iter().cloned());
    }
}

/// A parsed `multipart/form-data` body.
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    /// Text parts keyed by field name.
    pub value: Values,
    /// File parts keyed by field name.
    pub file: HashMap<String, Vec<FileHeader>>,
}

impl MultipartForm {
    pub fn files(&self, name: &str) -> &[FileHeader] {
        self.file.get(name).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Metadata and content of one uploaded file part.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub filename: String,
    pub content_type: Option<String>,
    /// Headers of this part (not of the request).
    pub header: HeaderMap,
    pub size: u64,
    pub content: Bytes,
}
