//! Response cache and structured value access
//!
//! The cache maps a key to the raw body of a previously received response.
//! Values are read back out of those bodies with dot paths, where a `[N]`
//! segment (alone, or trailing a key as in `data[0]`) indexes an array.

use std::collections::HashMap;

use serde_json::Value;

/// Raw response bodies keyed by `cache_as`, scoped to one scenario
#[derive(Debug, Clone, Default)]
pub struct Cache {
    entries: HashMap<String, Vec<u8>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a body, replacing any earlier body under the same key
    pub fn insert(&mut self, key: impl Into<String>, body: Vec<u8>) {
        self.entries.insert(key.into(), body);
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Read the value at `path` inside the body cached under `key`, coerced
    /// to a string
    pub fn lookup(&self, key: &str, path: &[&str]) -> Option<String> {
        let body = self.get(key)?;
        let value = get(body, path)?;
        coerce_to_string(&value)
    }
}

/// Parse `bytes` as JSON and return the value addressed by `path`
pub fn get(bytes: &[u8], path: &[&str]) -> Option<Value> {
    let root: Value = serde_json::from_slice(bytes).ok()?;
    value_at(&root, path).cloned()
}

/// Walk `path` from `root`
pub fn value_at<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for segment in path {
        current = step(current, segment)?;
    }
    Some(current)
}

/// Split a dot path into its segments, ignoring empty ones
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

/// String form of a scalar; `None` for null, arrays and objects
pub fn coerce_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn step<'a>(current: &'a Value, segment: &str) -> Option<&'a Value> {
    let (key, indices) = match segment.find('[') {
        Some(pos) => segment.split_at(pos),
        None => (segment, ""),
    };

    let mut value = if key.is_empty() {
        current
    } else {
        current.as_object()?.get(key)?
    };

    let mut rest = indices;
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        let index: usize = inner[..close].trim().parse().ok()?;
        value = value.as_array()?.get(index)?;
        rest = &inner[close + 1..];
    }

    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_with(key: &str, body: Value) -> Cache {
        let mut cache = Cache::new();
        cache.insert(key, body.to_string().into_bytes());
        cache
    }

    #[test]
    fn test_lookup_nested_string() {
        let cache = cache_with("auth", json!({"user": {"token": "abc"}}));
        assert_eq!(cache.lookup("auth", &["user", "token"]), Some("abc".to_string()));
    }

    #[test]
    fn test_lookup_coerces_numbers_and_bools() {
        let cache = cache_with("post", json!({"userId": 1, "ratio": 0.5, "ok": true}));
        assert_eq!(cache.lookup("post", &["userId"]), Some("1".to_string()));
        assert_eq!(cache.lookup("post", &["ratio"]), Some("0.5".to_string()));
        assert_eq!(cache.lookup("post", &["ok"]), Some("true".to_string()));
    }

    #[test]
    fn test_lookup_rejects_non_scalars() {
        let cache = cache_with("list", json!({"data": [1], "meta": {}, "none": null}));
        assert_eq!(cache.lookup("list", &["data"]), None);
        assert_eq!(cache.lookup("list", &["meta"]), None);
        assert_eq!(cache.lookup("list", &["none"]), None);
    }

    #[test]
    fn test_array_index_segments() {
        let cache = cache_with("list", json!({"data": [{"id": "a"}, {"id": "b"}]}));
        assert_eq!(cache.lookup("list", &["data", "[1]", "id"]), Some("b".to_string()));
        assert_eq!(cache.lookup("list", &["data[0]", "id"]), Some("a".to_string()));
        assert_eq!(cache.lookup("list", &["data", "[5]", "id"]), None);
    }

    #[test]
    fn test_missing_key_and_invalid_body() {
        let mut cache = Cache::new();
        assert_eq!(cache.lookup("nope", &["id"]), None);
        cache.insert("text", b"not json".to_vec());
        assert_eq!(cache.lookup("text", &[]), None);
    }

    #[test]
    fn test_insert_overwrites() {
        let mut cache = cache_with("k", json!({"v": 1}));
        cache.insert("k", br#"{"v": 2}"#.to_vec());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup("k", &["v"]), Some("2".to_string()));
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("data.[0].id"), vec!["data", "[0]", "id"]);
        assert!(split_path("").is_empty());
    }
}
