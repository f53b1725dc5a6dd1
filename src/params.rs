use std::collections::BTreeMap;

/// Reserved key under which anonymous splat captures are collected
pub const SPLAT: &str = "splat";

/// Reserved key under which regular expression capture groups are collected
pub const CAPTURES: &str = "captures";

/// Request parameters gathered from the query string, a form body and the matched route.
///
/// Every key maps to a sequence of values. Most keys hold a single value, but a key repeated in
/// the query string (e.g. `?tag=a&tag=b`) collects all of its values in order.
/// Keys written as `name[]` are stored under `name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    map: BTreeMap<String, Vec<String>>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a url-encoded string (a query string or a form body) into parameters
    pub fn parse(encoded: &str) -> Self {
        let mut params = Params::new();
        params.append_encoded(encoded);
        params
    }

    /// Appends every pair of the url-encoded string `encoded`
    pub fn append_encoded(&mut self, encoded: &str) {
        for (key, value) in form_urlencoded::parse(encoded.as_bytes()) {
            let key = key.strip_suffix("[]").unwrap_or(&key);
            self.append(key, value);
        }
    }

    /// Returns the first value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns every value of `key`, in the order they were added
    pub fn get_all(&self, key: &str) -> &[String] {
        self.map.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the anonymous splat captures of the matched pattern
    pub fn splat(&self) -> &[String] {
        self.get_all(SPLAT)
    }

    /// Returns the capture groups of the matched regular expression
    pub fn captures(&self) -> &[String] {
        self.get_all(CAPTURES)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Adds `value` to the sequence of values held by `key`
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.entry(key.into()).or_default().push(value.into());
    }

    /// Replaces all values of `key` with `value`
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), vec![value.into()]);
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.map.remove(key)
    }

    /// Overlays `other` on top of these parameters.
    ///
    /// Keys present in `other` replace the keys held here entirely.
    pub fn merge(&mut self, other: Params) {
        for (key, values) in other.map {
            self.map.insert(key, values);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut params = Params::new();
        for (key, value) in iter {
            params.append(key, value);
        }
        params
    }
}
