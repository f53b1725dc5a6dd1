use std::collections::BTreeMap;

/// An incoming request, as handed over by the gateway.
///
/// Header names are stored in `Train-Case` (e.g. `User-Agent`), but lookups through
/// [`Request::header`] ignore case.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query_string: String,
    pub scheme: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: String::from("GET"),
            path: String::from("/"),
            query_string: String::new(),
            scheme: String::from("http"),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }
}

impl Request {
    /// Creates a request for `method` and `target`, where the target may include a query string
    pub fn new(method: impl Into<String>, target: &str) -> Self {
        let (path, query_string) = target.split_once('?').unwrap_or((target, ""));
        Self {
            method: method.into(),
            path: path.to_string(),
            query_string: query_string.to_string(),
            ..Self::default()
        }
    }

    /// Adds a request header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the request body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the value of the request header `name` if it exists
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the media type of the body, without parameters
    pub fn media_type(&self) -> Option<&str> {
        let content_type = self.header("Content-Type")?;
        let media_type = content_type.split(';').next().unwrap_or(content_type).trim();
        Some(media_type)
    }

    /// Returns the host the request was directed to, without the port
    pub fn host(&self) -> Option<&str> {
        let host = self.header("Host")?.trim();

        // IPv6 literals keep their brackets: `[::1]:8080` is `[::1]`
        if host.starts_with('[') {
            return host.find(']').map(|end| &host[..=end]);
        }

        Some(host.split_once(':').map_or(host, |(h, _)| h))
    }

    /// Returns true if `media_type` is acceptable according to the `Accept` header.
    ///
    /// A request without an `Accept` header accepts everything.
    pub fn accepts(&self, media_type: &str) -> bool {
        let Some(accept) = self.header("Accept") else {
            return true;
        };

        let (kind, _) = media_type.split_once('/').unwrap_or((media_type, ""));

        accept
            .split(',')
            .filter_map(|entry| entry.split(';').next())
            .map(str::trim)
            .any(|range| match range.split_once('/') {
                Some(("*", "*")) => true,
                Some((range_kind, "*")) => range_kind.eq_ignore_ascii_case(kind),
                _ => range.eq_ignore_ascii_case(media_type),
            })
    }
}
