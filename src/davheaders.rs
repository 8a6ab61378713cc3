use std::fmt;

use headers::Header;
use http::header::{HeaderName, HeaderValue};
use regex::Regex;

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    static ref IF: HeaderName = HeaderName::from_static("if");
    static ref RANGE: HeaderName = HeaderName::from_static("range");
    static ref CONTENT_RANGE: HeaderName = HeaderName::from_static("content-range");
    static ref RE_CONTENT_RANGE: Regex =
        Regex::new(r"^bytes\s+(\d+)-(\d+)/(\d+|\*)$").unwrap();
}

fn one<'i, I>(values: &mut I) -> Result<&'i HeaderValue, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(invalid)?;
    if values.next().is_some() {
        Err(invalid())
    } else {
        Ok(v)
    }
}

fn one_str<'i, I>(values: &mut I) -> Result<&'i str, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    one(values)?.to_str().map_err(|_| invalid())
}

fn invalid() -> headers::Error {
    headers::Error::invalid()
}

fn encode_str<E: Extend<HeaderValue>>(s: &str, values: &mut E) {
    if let Ok(v) = HeaderValue::from_str(s) {
        values.extend(std::iter::once(v));
    }
}

/// Depth: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        };
        f.write_str(s)
    }
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?;
        match value.as_bytes() {
            b"0" => Ok(Depth::Zero),
            b"1" => Ok(Depth::One),
            v if v.eq_ignore_ascii_case(b"infinity") => Ok(Depth::Infinity),
            _ => Err(invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(&self.to_string(), values)
    }
}

/// One entry of a Timeout: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DavTimeout {
    Seconds(u64),
    Infinite,
}

/// Timeout: header, a list of wanted timeouts in order of preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeout(pub Vec<DavTimeout>);

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut v = Vec::new();
        for value in values {
            let value = value.to_str().map_err(|_| invalid())?;
            for word in value.split(',').map(str::trim) {
                if word.eq_ignore_ascii_case("infinite") {
                    v.push(DavTimeout::Infinite);
                } else if let Some(num) = word
                    .get(..7)
                    .filter(|p| p.eq_ignore_ascii_case("second-"))
                    .map(|_| &word[7..])
                {
                    let secs = num.parse::<u64>().map_err(|_| invalid())?;
                    v.push(DavTimeout::Seconds(secs));
                } else if !word.is_empty() {
                    return Err(invalid());
                }
            }
        }
        if v.is_empty() {
            return Err(invalid());
        }
        Ok(Timeout(v))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = self
            .0
            .iter()
            .map(|t| match t {
                DavTimeout::Seconds(n) => format!("Second-{n}"),
                DavTimeout::Infinite => "Infinite".to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        encode_str(&s, values)
    }
}

/// Overwrite: header. Anything but `F` means "yes".
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?;
        Ok(Overwrite(!value.as_bytes().eq_ignore_ascii_case(b"F")))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let v = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(v)));
    }
}

/// Destination: header, an absolute URL or an absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one_str(values)?.trim();
        if s.is_empty() {
            return Err(invalid());
        }
        Ok(Destination(s.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(&self.0, values)
    }
}

/// Lock-Token: header. The angle brackets are not part of the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one_str(values)?.trim();
        let s = s
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .ok_or_else(invalid)?;
        Ok(LockToken(s.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(&format!("<{}>", self.0), values)
    }
}

/// If: header, unparsed. See the `conditional` module for the grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct If(pub String);

impl Header for If {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut v = Vec::new();
        for value in values {
            v.push(value.to_str().map_err(|_| invalid())?);
        }
        if v.is_empty() {
            return Err(invalid());
        }
        Ok(If(v.join(" ")))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(&self.0, values)
    }
}

/// One range of a `Range: bytes=...` header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ByteRange {
    /// `start-` or `start-end`.
    FromTo(u64, Option<u64>),
    /// `-n`, the last n bytes.
    Last(u64),
}

impl ByteRange {
    /// Resolve against the total length. `None` if unsatisfiable.
    pub fn resolve(&self, len: u64) -> Option<(u64, u64)> {
        match *self {
            ByteRange::FromTo(start, end) => {
                if start >= len {
                    return None;
                }
                let end = end.map(|e| e.min(len - 1)).unwrap_or(len - 1);
                Some((start, end))
            }
            ByteRange::Last(n) => {
                if n == 0 || len == 0 {
                    return None;
                }
                Some((len.saturating_sub(n), len - 1))
            }
        }
    }
}

/// Range: header, only the `bytes` unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRanges(pub Vec<ByteRange>);

impl Header for ByteRanges {
    fn name() -> &'static HeaderName {
        &RANGE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one_str(values)?.trim();
        let (unit, set) = s.split_once('=').ok_or_else(invalid)?;
        if !unit.trim().eq_ignore_ascii_case("bytes") {
            return Err(invalid());
        }
        let mut v = Vec::new();
        for part in set.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (start, end) = part.split_once('-').ok_or_else(invalid)?;
            let (start, end) = (start.trim(), end.trim());
            let range = if start.is_empty() {
                ByteRange::Last(end.parse().map_err(|_| invalid())?)
            } else {
                let start = start.parse::<u64>().map_err(|_| invalid())?;
                let end = if end.is_empty() {
                    None
                } else {
                    Some(end.parse::<u64>().map_err(|_| invalid())?)
                };
                if end.map(|e| e < start).unwrap_or(false) {
                    return Err(invalid());
                }
                ByteRange::FromTo(start, end)
            };
            v.push(range);
        }
        if v.is_empty() {
            return Err(invalid());
        }
        Ok(ByteRanges(v))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = self
            .0
            .iter()
            .map(|r| match r {
                ByteRange::FromTo(s, Some(e)) => format!("{s}-{e}"),
                ByteRange::FromTo(s, None) => format!("{s}-"),
                ByteRange::Last(n) => format!("-{n}"),
            })
            .collect::<Vec<_>>()
            .join(",");
        encode_str(&format!("bytes={s}"), values)
    }
}

/// Content-Range: header of a partial PUT.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: Option<u64>,
}

/// Why a Content-Range: header could not be used.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ContentRangeError {
    Malformed,
    MultipleRanges,
}

impl ContentRange {
    pub(crate) fn parse(s: &str) -> Result<ContentRange, ContentRangeError> {
        let s = s.trim();
        if s.contains(',') {
            return Err(ContentRangeError::MultipleRanges);
        }
        let caps = RE_CONTENT_RANGE
            .captures(s)
            .ok_or(ContentRangeError::Malformed)?;
        let num = |i: usize| caps[i].parse::<u64>().map_err(|_| ContentRangeError::Malformed);
        let (start, end) = (num(1)?, num(2)?);
        // the length, end - start + 1, must fit in an u64.
        if end < start || end == u64::MAX {
            return Err(ContentRangeError::Malformed);
        }
        let total = match &caps[3] {
            "*" => None,
            _ => Some(num(3)?),
        };
        Ok(ContentRange { start, end, total })
    }
}

impl Header for ContentRange {
    fn name() -> &'static HeaderName {
        &CONTENT_RANGE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        ContentRange::parse(one_str(values)?).map_err(|_| invalid())
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(&content_range(self.start, self.end, self.total), values)
    }
}

/// Format a Content-Range value, `*` for an unknown total length.
pub(crate) fn content_range(start: u64, end: u64, total: Option<u64>) -> String {
    match total {
        Some(t) => format!("bytes {start}-{end}/{t}"),
        None => format!("bytes {start}-{end}/*"),
    }
}
