//! Request paths.
//!
//! A [`DavPath`] is the percent-decoded part of the request path that
//! comes after the configured prefix. A trailing slash is stripped, but
//! remembered, so that collections can be told apart from plain resources.
use std::fmt;

use http::StatusCode;
use percent_encoding::{percent_decode, utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use crate::errors::{DavError, DavResult};

// Encode all non-unreserved characters, except '/'.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Path below the handler prefix, percent-decoded.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DavPath {
    prefix: String,
    path: String,
    collection: bool,
}

impl fmt::Debug for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.as_url_string_with_prefix())
    }
}

impl fmt::Display for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_url_string_with_prefix())
    }
}

// turn a raw (still encoded) path into a decoded, normalized one.
fn normalize_path(raw: &str) -> DavResult<(String, bool)> {
    if raw == "*" {
        return Ok(("*".to_string(), false));
    }
    let decoded = percent_decode(raw.as_bytes())
        .decode_utf8()
        .map_err(|_| DavError::InvalidPath)?;
    if decoded.contains('\0') {
        return Err(DavError::InvalidPath);
    }
    let collection = decoded.ends_with('/');
    let mut segments = Vec::new();
    for seg in decoded.split('/') {
        match seg {
            "" | "." => {}
            ".." => return Err(DavError::InvalidPath),
            s => segments.push(s),
        }
    }
    let path = format!("/{}", segments.join("/"));
    let collection = collection && path != "/";
    Ok((path, collection))
}

impl DavPath {
    /// Build a path from an already-decoded path like `/dir/file`.
    pub fn new(path: &str) -> DavPath {
        let collection = path.len() > 1 && path.ends_with('/');
        let trimmed = path.trim_end_matches('/');
        let path = if trimmed.is_empty() {
            "/".to_string()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        DavPath {
            prefix: String::new(),
            path,
            collection,
        }
    }

    /// Strip `prefix` from the raw path of `uri` and decode the rest.
    pub(crate) fn from_uri_and_prefix(uri: &http::Uri, prefix: &str) -> DavResult<DavPath> {
        DavPath::from_str_and_prefix(uri.path(), prefix)
    }

    /// Like `from_uri_and_prefix`, but from the raw path of a URL.
    pub(crate) fn from_str_and_prefix(raw: &str, prefix: &str) -> DavResult<DavPath> {
        let prefix = prefix.trim_end_matches('/');
        if raw == "*" {
            return Ok(DavPath {
                prefix: prefix.to_string(),
                path: "*".to_string(),
                collection: false,
            });
        }
        if !raw.starts_with('/') {
            return Err(DavError::InvalidPath);
        }
        let rest = match raw.strip_prefix(prefix) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => return Err(DavError::InvalidPath),
        };
        let (path, collection) = normalize_path(rest)?;
        Ok(DavPath {
            prefix: prefix.to_string(),
            path,
            collection,
        })
    }

    /// Resolve `href` (absolute, or relative to `base`) to a path on this
    /// server. `None` if it's on another host or outside `prefix`.
    pub(crate) fn from_href(base: &str, href: &str, prefix: &str) -> DavResult<Option<DavPath>> {
        let base = Url::parse(base).map_err(|_| StatusCode::BAD_REQUEST)?;
        let url = base.join(href).map_err(|_| StatusCode::BAD_REQUEST)?;
        let same_host = url.host_str() == base.host_str()
            && url.port_or_known_default() == base.port_or_known_default();
        if !same_host {
            return Ok(None);
        }
        Ok(DavPath::from_str_and_prefix(url.path(), prefix).ok())
    }

    /// The decoded path, always starting with a `/`, no trailing slash.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// The prefix that was stripped off.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Did the request path end in a slash.
    pub fn is_collection(&self) -> bool {
        self.collection
    }

    /// Is this the `*` of `OPTIONS *`.
    pub fn is_star(&self) -> bool {
        self.path == "*"
    }

    /// Same path below another prefix.
    pub(crate) fn with_prefix(&self, prefix: &str) -> DavPath {
        let mut p = self.clone();
        p.prefix = prefix.trim_end_matches('/').to_string();
        p
    }

    /// Encoded path, without the prefix.
    pub fn as_url_string(&self) -> String {
        let mut s = utf8_percent_encode(&self.path, PATH_ENCODE_SET).to_string();
        if self.collection {
            s.push('/');
        }
        s
    }

    /// Encoded path, including the prefix. This is what goes into `<D:href>`.
    pub fn as_url_string_with_prefix(&self) -> String {
        format!("{}{}", self.prefix, self.as_url_string())
    }

    /// Guess the content type from the extension of the last segment.
    pub(crate) fn mime_type_str(&self) -> String {
        let name = self.path.rsplit('/').next().unwrap_or("");
        mime_guess::from_path(name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_uri_and_prefix() {
        let uri: http::Uri = "/dav/some%20dir/file.txt".parse().unwrap();
        let p = DavPath::from_uri_and_prefix(&uri, "/dav").unwrap();
        assert_eq!(p.as_str(), "/some dir/file.txt");
        assert!(!p.is_collection());
        assert_eq!(p.as_url_string_with_prefix(), "/dav/some%20dir/file.txt");
    }

    #[test]
    fn test_collection() {
        let uri: http::Uri = "/dav//dir/".parse().unwrap();
        let p = DavPath::from_uri_and_prefix(&uri, "/dav/").unwrap();
        assert_eq!(p.as_str(), "/dir");
        assert!(p.is_collection());
        assert_eq!(p.as_url_string(), "/dir/");

        let uri: http::Uri = "/dav".parse().unwrap();
        let p = DavPath::from_uri_and_prefix(&uri, "/dav").unwrap();
        assert_eq!(p.as_str(), "/");
        assert!(!p.is_collection());
    }

    #[test]
    fn test_from_href() {
        let base = "http://h:8080/dav/a/b.txt";
        let p = DavPath::from_href(base, "c%20d.txt", "/dav").unwrap().unwrap();
        assert_eq!(p.as_str(), "/a/c d.txt");
        let p = DavPath::from_href(base, "http://h:8080/dav/x/", "/dav").unwrap().unwrap();
        assert_eq!(p.as_str(), "/x");
        assert!(DavPath::from_href(base, "http://h/dav/x", "/dav").unwrap().is_none());
        assert!(DavPath::from_href(base, "/other/x", "/dav").unwrap().is_none());
        assert!(DavPath::from_href("no base", "/x", "").is_err());
    }

    #[test]
    fn test_invalid() {
        let uri: http::Uri = "/dav/a/../../etc".parse().unwrap();
        assert!(DavPath::from_uri_and_prefix(&uri, "/dav").is_err());
        let uri: http::Uri = "/davx/a".parse().unwrap();
        assert!(DavPath::from_uri_and_prefix(&uri, "/dav").is_err());
    }

    #[test]
    fn test_new() {
        assert_eq!(DavPath::new("dir/").as_url_string(), "/dir/");
        assert_eq!(DavPath::new("/").as_str(), "/");
        assert_eq!(DavPath::new("/a.html").mime_type_str(), "text/html");
    }
}
