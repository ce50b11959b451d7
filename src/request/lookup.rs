//! Ordered-fallback lookups over query strings, path values and headers.
//!
//! A fallback lookup tries each key in priority order and returns the first
//! non-empty value. When nothing matches and more than one key was given, the
//! last key is returned literally as a default:
//!
//! ```text
//! query(["page"])          -> ""      (single key: never a literal default)
//! query(["page", "p", "1"]) -> "1"    (neither page nor p set)
//! ```

use url::form_urlencoded;

/// Resolve `keys` in order against `lookup`.
///
/// # Panics
///
/// Panics if `keys` is empty. That can only be a programming error.
pub fn resolve<F>(mut lookup: F, keys: &[&str]) -> String
where
    F: FnMut(&str) -> String,
{
    assert!(
        !keys.is_empty(),
        "mux_facade: need to provide at least one key to check"
    );

    for key in keys {
        let value = lookup(key);
        if !value.is_empty() {
            return value;
        }
    }

    match keys {
        // No default value supplied
        [_] => String::new(),
        [.., default] => (*default).to_string(),
        [] => String::new(),
    }
}

/// First decoded value of `key` in a raw query string, empty if absent.
pub fn first_query_value(raw_query: &str, key: &str) -> String {
    form_urlencoded::parse(raw_query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

/// All values of the first key (in priority order) that has at least one
/// non-empty value in `raw_query`.
///
/// Pairs without `=` and pairs with an empty value are skipped. When the
/// winning key has exactly one value it is split on commas, so `a=1&a=2`
/// and `a=1,2` both yield `["1", "2"]`. Empty pieces are dropped, and a
/// value made only of commas counts as absent. No match yields an empty
/// vector.
pub fn query_values(raw_query: &str, keys: &[&str]) -> Vec<String> {
    let pairs: Vec<(String, String)> = raw_query
        .split('&')
        .filter(|pair| matches!(pair.split_once('='), Some((_, value)) if !value.is_empty()))
        .filter_map(|pair| {
            form_urlencoded::parse(pair.as_bytes())
                .next()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
        })
        .collect();

    for key in keys {
        let mut values: Vec<String> = pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect();

        match values.len() {
            0 => continue,
            1 => {
                let single = values.remove(0);
                let pieces: Vec<String> = single
                    .split(',')
                    .filter(|piece| !piece.is_empty())
                    .map(str::to_string)
                    .collect();
                if !pieces.is_empty() {
                    return pieces;
                }
            }
            _ => return values,
        }
    }

    Vec::new()
}
