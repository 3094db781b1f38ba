//! Header map with case-insensitive name lookup, plus the header names the
//! fetch client reads and writes.

use std::fmt;

/// Entity tag sent by the origin with a cacheable response.
pub const ETAG: &str = "ETag";
/// Conditional request header carrying a previously seen entity tag.
pub const IF_NONE_MATCH: &str = "If-None-Match";
/// Total number of items in a paginated collection (json-server style APIs).
pub const X_TOTAL_COUNT: &str = "X-Total-Count";
pub const ACCEPT: &str = "Accept";
pub const HOST: &str = "Host";
pub const CONNECTION: &str = "Connection";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
pub const USER_AGENT: &str = "User-Agent";

/// A case-insensitive, multi-value HTTP header map.
///
/// Preserves insertion order, which is also the order headers are written on
/// the wire.
///
/// # Examples
///
/// ```
/// use refetch::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Accept", "application/json");
/// headers.set("If-None-Match", "\"v1\"");
/// headers.set("if-none-match", "\"v2\"");
///
/// assert_eq!(headers.get("accept"), Some("application/json"));
/// assert_eq!(headers.get("If-None-Match"), Some("\"v2\""));
/// assert_eq!(headers.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty header map with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Appends a header entry. Multiple values for the same name are preserved.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Replaces every value of `name` with a single `value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.inner.push((name, value.into()));
    }

    /// Returns the first value for the given header name (case-insensitive), or `None`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns an iterator over all values for the given header name (case-insensitive).
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.inner
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes all entries with the given header name. Returns `true` if any were removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.inner.len() < before
    }

    /// Returns `true` if at least one entry has the given name (case-insensitive).
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Returns the total number of header entries (not unique names).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no header entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copies parsed headers out of an `httparse` buffer.
    ///
    /// Values that are not valid UTF-8 are skipped; none of the headers this
    /// crate interprets may carry opaque bytes.
    pub(crate) fn from_parsed(raw: &[httparse::Header<'_>]) -> Self {
        let mut headers = Self::with_capacity(raw.len());
        for header in raw {
            if let Ok(value) = std::str::from_utf8(header.value) {
                headers.insert(header.name, value.trim());
            }
        }
        headers
    }
}

/// Writes headers in HTTP/1.1 wire format, one `Name: value\r\n` line each.
impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_get() {
        let h: Headers = [("ETag", "\"abc\"")].into_iter().collect();
        assert_eq!(h.get("etag"), Some("\"abc\""));
        assert_eq!(h.get("ETAG"), Some("\"abc\""));
    }

    #[test]
    fn set_replaces_all_values() {
        let mut h = Headers::new();
        h.insert("Accept", "text/html");
        h.insert("accept", "text/plain");
        h.set(ACCEPT, "application/json");
        let vals: Vec<_> = h.get_all("accept").collect();
        assert_eq!(vals, vec!["application/json"]);
    }

    #[test]
    fn wire_format() {
        let mut h = Headers::new();
        h.insert(HOST, "example.com");
        h.insert(IF_NONE_MATCH, "\"v1\"");
        assert_eq!(h.to_string(), "Host: example.com\r\nIf-None-Match: \"v1\"\r\n");
    }

    #[test]
    fn remove_reports_presence() {
        let mut h = Headers::new();
        h.insert(X_TOTAL_COUNT, "12");
        assert!(h.remove("x-total-count"));
        assert!(!h.remove("x-total-count"));
        assert!(h.is_empty());
    }
}
