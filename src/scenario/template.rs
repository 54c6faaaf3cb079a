//! Placeholder interpolation
//!
//! A placeholder `{key.a.b}` reads `a.b` out of the response cached under
//! `key`. Anything that cannot be resolved becomes the empty string.
//!
//! Each match replaces the first occurrence of its token text in the
//! string built so far, so repeated tokens are consumed one match at a
//! time.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::cache::Cache;

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(.*?)\}").expect("placeholder pattern is valid"));

/// Resolve every placeholder in `input` against `cache`
pub fn resolve(input: &str, cache: &Cache) -> String {
    let mut output = input.to_string();
    for caps in PLACEHOLDER_RE.captures_iter(input) {
        let token = &caps[0];
        let mut segments = caps[1].split('.');
        let key = segments.next().unwrap_or_default();
        let path: Vec<&str> = segments.collect();

        let value = cache.lookup(key, &path).unwrap_or_default();
        output = output.replacen(token, &value, 1);
    }
    output
}

/// Resolve placeholders in every header value
pub fn resolve_headers(
    headers: &BTreeMap<String, String>,
    cache: &Cache,
) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| (name.clone(), resolve(value, cache)))
        .collect()
}

/// Resolve placeholders in the string leaves of a payload
///
/// Only nested objects are descended; arrays and other values are copied
/// unchanged.
pub fn resolve_payload(payload: &Map<String, Value>, cache: &Cache) -> Map<String, Value> {
    payload
        .iter()
        .map(|(key, value)| {
            let resolved = match value {
                Value::Object(inner) => Value::Object(resolve_payload(inner, cache)),
                Value::String(s) => Value::String(resolve(s, cache)),
                other => other.clone(),
            };
            (key.clone(), resolved)
        })
        .collect()
}

/// Placeholder tokens in `input` that would resolve to the empty string
pub fn unresolved<'a>(input: &'a str, cache: &Cache) -> Vec<&'a str> {
    PLACEHOLDER_RE
        .captures_iter(input)
        .filter(|caps| {
            let mut segments = caps[1].split('.');
            let key = segments.next().unwrap_or_default();
            let path: Vec<&str> = segments.collect();
            cache.lookup(key, &path).is_none()
        })
        .filter_map(|caps| caps.get(0).map(|m| m.as_str()))
        .collect()
}
