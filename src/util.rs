use std::io::{Cursor, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use bytes::Bytes;
use http::method::InvalidMethod;
use time::format_description::well_known::Rfc3339;
use time::macros::{format_description, offset};

use crate::errors::{DavError, DavResult};

bitflags! {
    /// The closed set of methods the handler knows about.
    ///
    /// Also used as a set, e.g. for the capabilities of a backend.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DavMethod: u32 {
        const HEAD = 0x0001;
        const GET = 0x0002;
        const PUT = 0x0004;
        const OPTIONS = 0x0010;
        const PROPFIND = 0x0020;
        const PROPPATCH = 0x0040;
        const MKCOL = 0x0080;
        const COPY = 0x0100;
        const MOVE = 0x0200;
        const DELETE = 0x0400;
        const LOCK = 0x0800;
        const UNLOCK = 0x1000;

        const HTTP_RO = Self::HEAD.bits() | Self::GET.bits() | Self::OPTIONS.bits();
        const HTTP_RW = Self::HTTP_RO.bits() | Self::PUT.bits();
        const WEBDAV_RO = Self::HTTP_RO.bits() | Self::PROPFIND.bits();
        const WEBDAV_BODY = Self::PUT.bits() | Self::PROPFIND.bits()
            | Self::PROPPATCH.bits() | Self::LOCK.bits();
    }
}

impl DavMethod {
    pub const WEBDAV_RW: Self = Self::all();

    // order in which methods are listed in the Allow: header.
    pub(crate) const ALLOW_ORDER: [(DavMethod, &'static str); 12] = [
        (DavMethod::OPTIONS, "OPTIONS"),
        (DavMethod::GET, "GET"),
        (DavMethod::HEAD, "HEAD"),
        (DavMethod::PUT, "PUT"),
        (DavMethod::DELETE, "DELETE"),
        (DavMethod::MKCOL, "MKCOL"),
        (DavMethod::COPY, "COPY"),
        (DavMethod::MOVE, "MOVE"),
        (DavMethod::PROPFIND, "PROPFIND"),
        (DavMethod::PROPPATCH, "PROPPATCH"),
        (DavMethod::LOCK, "LOCK"),
        (DavMethod::UNLOCK, "UNLOCK"),
    ];

    /// Wire name of a single method. Returns `""` for combined sets.
    pub fn as_str(&self) -> &'static str {
        Self::ALLOW_ORDER
            .iter()
            .find(|(m, _)| m == self)
            .map(|(_, name)| *name)
            .unwrap_or("")
    }
}

// translate method into our own type that has webdav methods as well.
// Method names are matched case-insensitively.
pub(crate) fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::HEAD => DavMethod::HEAD,
        http::Method::GET => DavMethod::GET,
        http::Method::PUT => DavMethod::PUT,
        http::Method::DELETE => DavMethod::DELETE,
        http::Method::OPTIONS => DavMethod::OPTIONS,
        _ => DavMethod::ALLOW_ORDER
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(m.as_str()))
            .map(|(method, _)| *method)
            .ok_or(DavError::UnknownDavMethod)?,
    };
    Ok(m)
}

// for external use.
impl std::convert::TryFrom<&http::Method> for DavMethod {
    type Error = InvalidMethod;

    fn try_from(value: &http::Method) -> Result<Self, Self::Error> {
        dav_method(value).map_err(|_| {
            // A trick to get at the value of http::method::InvalidMethod.
            http::method::Method::from_bytes(b"").unwrap_err()
        })
    }
}

pub(crate) fn systemtime_to_offsetdatetime(t: SystemTime) -> time::OffsetDateTime {
    let secs = match t.duration_since(UNIX_EPOCH) {
        Ok(t) => t.as_secs() as i64,
        Err(_) => 0,
    };
    time::OffsetDateTime::from_unix_timestamp(secs)
        .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
        .to_offset(offset!(UTC))
}

/// `getlastmodified` and `Last-Modified`: `Sun, 06 Nov 1994 08:49:37 GMT`.
pub(crate) fn systemtime_to_httpdate(t: SystemTime) -> String {
    let fmt = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    systemtime_to_offsetdatetime(t)
        .format(&fmt)
        .unwrap_or_default()
}

/// `creationdate`: `1996-12-19T16:39:57Z`.
pub(crate) fn systemtime_to_rfc3339(t: SystemTime) -> String {
    systemtime_to_offsetdatetime(t)
        .format(&Rfc3339)
        .unwrap_or_default()
}

// A buffer that implements "Write".
#[derive(Clone)]
pub(crate) struct MemBuffer(Cursor<Vec<u8>>);

impl MemBuffer {
    pub fn new() -> MemBuffer {
        MemBuffer(Cursor::new(Vec::new()))
    }

    pub fn take(&mut self) -> Bytes {
        let buf = std::mem::take(self.0.get_mut());
        self.0.set_position(0);
        Bytes::from(buf)
    }
}

impl Write for MemBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
