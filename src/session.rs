use crate::request::Request;
use crate::response::Response;
use std::collections::BTreeMap;

/// Per-client values that outlive a single request
///
/// The dispatcher never interprets the contents. Persisting them between requests is the job of
/// a [`SessionStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    values: BTreeMap<String, String>,
    modified: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.modified = true;
        self.values.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let removed = self.values.remove(key);
        self.modified |= removed.is_some();
        removed
    }

    pub fn clear(&mut self) {
        self.modified |= !self.values.is_empty();
        self.values.clear();
    }

    /// Returns true if the session was changed since it was loaded
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Session
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            modified: false,
        }
    }
}

/// Loads sessions before a request is dispatched, and stores them once the response is ready.
pub trait SessionStore: Send + Sync {
    fn load(&self, request: &Request) -> Session;

    /// Called after the after-filters ran. Typically used to set a cookie on the response.
    fn commit(&self, session: &Session, response: &mut Response);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loaded_sessions_are_clean() {
        let session = Session::from_iter([("user", "frank")]);
        assert_eq!(session.get("user"), Some("frank"));
        assert!(!session.is_modified());
    }

    #[test]
    fn tracks_modifications() {
        let mut session = Session::new();
        assert_eq!(session.remove("missing"), None);
        assert!(!session.is_modified());

        session.insert("user", "frank");
        assert!(session.is_modified());
    }

    #[test]
    fn clearing_an_empty_session_is_not_a_change() {
        let mut session = Session::new();
        session.clear();
        assert!(!session.is_modified());

        let mut session = Session::from_iter([("a", "b")]);
        session.clear();
        assert!(session.is_modified());
        assert!(session.is_empty());
    }
}
