//! Contains the storage backend interface.
//!
//! The handler does not store anything itself. Resources, properties and
//! locks live in a [`DavBackend`], which gets one call per request method.
//! The calls get an options struct that the handler built from the request
//! headers and body, and return either a status or some content.
//!
//! Every method has a default implementation that returns
//! [`BackendError::NotImplemented`]. The [`Capabilities`] a backend reports
//! decide which methods are actually dispatched and advertised in `Allow:`.
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::future;
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite};
use xmltree::Element;

use crate::conditional::ConditionKind;
use crate::davheaders::{ByteRange, ContentRange, DavTimeout, Depth};
use crate::davpath::DavPath;
use crate::util::DavMethod;

/// Future returned by all backend methods.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = BackendResult<T>> + Send + 'a>>;

/// Result of a backend call.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors a backend can return. Each one maps to a HTTP status.
#[derive(Debug)]
pub enum BackendError {
    NotImplemented,
    NotFound,
    Forbidden,
    Locked,
    Conflict,
    /// Any other status, passed through verbatim.
    Status(StatusCode),
    Io(io::Error),
}

impl BackendError {
    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            BackendError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            BackendError::NotFound => StatusCode::NOT_FOUND,
            BackendError::Forbidden => StatusCode::FORBIDDEN,
            BackendError::Locked => StatusCode::LOCKED,
            BackendError::Conflict => StatusCode::CONFLICT,
            BackendError::Status(s) => *s,
            BackendError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BackendError::Io(e) => write!(f, "I/O error: {e}"),
            other => write!(f, "{}", other.statuscode()),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BackendError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BackendError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => BackendError::NotFound,
            io::ErrorKind::PermissionDenied => BackendError::Forbidden,
            _ => BackendError::Io(e),
        }
    }
}

/// Outcome of a backend operation.
///
/// `Done` and `Failed` are translated by the handler into the usual
/// status for that method (`Failed` is mostly `404 Not Found`).
/// `Status` is passed through as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DavStatus {
    Done,
    Failed,
    Status(StatusCode),
}

impl DavStatus {
    pub(crate) fn resolve(self, done: StatusCode, failed: StatusCode) -> StatusCode {
        match self {
            DavStatus::Done => done,
            DavStatus::Failed => failed,
            DavStatus::Status(s) => s,
        }
    }
}

impl From<bool> for DavStatus {
    fn from(ok: bool) -> Self {
        if ok {
            DavStatus::Done
        } else {
            DavStatus::Failed
        }
    }
}

impl From<StatusCode> for DavStatus {
    fn from(s: StatusCode) -> Self {
        DavStatus::Status(s)
    }
}

/// Which primitives a backend implements. Fixed when the handler is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Methods with a real implementation. `OPTIONS` is always available,
    /// `HEAD` only needs to be listed if `head()` is implemented.
    pub methods: DavMethod,
    /// `checklock()` is implemented. Without it there is no class 2
    /// (locking) support.
    pub checklock: bool,
}

impl Capabilities {
    pub fn new(methods: DavMethod) -> Capabilities {
        Capabilities {
            methods,
            checklock: false,
        }
    }

    pub fn with_checklock(self) -> Capabilities {
        Capabilities {
            checklock: true,
            ..self
        }
    }
}

/// Read side of a resource body that can seek.
pub trait DavSeekRead: AsyncRead + AsyncSeek + Send + Unpin {}
impl<T: AsyncRead + AsyncSeek + Send + Unpin> DavSeekRead for T {}

/// Write side of a resource body.
pub trait DavSeekWrite: AsyncWrite + AsyncSeek + Send + Unpin {}
impl<T: AsyncWrite + AsyncSeek + Send + Unpin> DavSeekWrite for T {}

/// The body returned by `get()`.
pub enum ContentBody {
    /// Seekable stream. Byte ranges can be served.
    Seekable(Box<dyn DavSeekRead>),
    /// Plain stream. Always served in full.
    Stream(Box<dyn AsyncRead + Send + Unpin>),
    /// In-memory data.
    Data(Bytes),
}

/// Resource content plus the metadata that goes into the headers.
pub struct DavContent {
    pub body: ContentBody,
    pub mimetype: Option<String>,
    pub mtime: Option<SystemTime>,
    pub size: Option<u64>,
}

impl DavContent {
    pub fn new(body: ContentBody) -> DavContent {
        let size = match &body {
            ContentBody::Data(b) => Some(b.len() as u64),
            _ => None,
        };
        DavContent {
            body,
            mimetype: None,
            mtime: None,
            size,
        }
    }

    pub fn data(data: impl Into<Bytes>) -> DavContent {
        DavContent::new(ContentBody::Data(data.into()))
    }

    pub fn mimetype(self, mimetype: impl Into<String>) -> DavContent {
        DavContent {
            mimetype: Some(mimetype.into()),
            ..self
        }
    }

    pub fn mtime(self, mtime: SystemTime) -> DavContent {
        DavContent {
            mtime: Some(mtime),
            ..self
        }
    }

    pub fn size(self, size: u64) -> DavContent {
        DavContent {
            size: Some(size),
            ..self
        }
    }
}

/// Options for `get()` and `head()`.
#[derive(Debug, Clone)]
pub struct GetOptions {
    pub path: DavPath,
    /// Parsed `Range:` header. Empty if there was none.
    pub ranges: Vec<ByteRange>,
}

/// What `get()` and `head()` return.
pub enum GetReply {
    Content(DavContent),
    Status(DavStatus),
}

/// Options for `put()`.
#[derive(Debug, Clone)]
pub struct PutOptions {
    pub path: DavPath,
    pub content_length: Option<u64>,
    /// Defaults to `application/octet-stream`.
    pub content_type: String,
    pub content_language: Option<String>,
    /// Partial PUT.
    pub range: Option<ContentRange>,
}

/// What `put()` returns.
pub enum PutReply {
    /// The handler copies the request body into `writer`. `new` decides
    /// between `201 Created` and `204 No Content`.
    Writer { writer: Box<dyn DavSeekWrite>, new: bool },
    /// The PUT was handled (or refused) by the backend. `Failed` is `403`.
    Status(DavStatus),
}

/// The name of a property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropName {
    /// Namespace URI. Empty for "no namespace".
    pub namespace: String,
    pub name: String,
}

impl PropName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> PropName {
        PropName {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub(crate) fn is_dav(&self, name: &str) -> bool {
        self.namespace == crate::multistatus::NS_DAV_URI && self.name == name
    }
}

/// The value of a property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Empty,
    Text(String),
    /// Rendered depending on the property (`creationdate`, `getlastmodified`).
    Time(SystemTime),
    /// Raw XML content, e.g. for `supportedlock`.
    Xml(Vec<Element>),
}

impl From<&str> for PropValue {
    fn from(s: &str) -> PropValue {
        PropValue::Text(s.to_string())
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> PropValue {
        PropValue::Text(s)
    }
}

impl From<SystemTime> for PropValue {
    fn from(t: SystemTime) -> PropValue {
        PropValue::Time(t)
    }
}

/// A property of a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct DavProp {
    pub namespace: String,
    pub name: String,
    pub value: PropValue,
}

impl DavProp {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<PropValue>,
    ) -> DavProp {
        DavProp {
            namespace: namespace.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    /// A property in the `DAV:` namespace.
    pub fn dav(name: impl Into<String>, value: impl Into<PropValue>) -> DavProp {
        DavProp::new(crate::multistatus::NS_DAV_URI, name, value)
    }

    /// `DAV:resourcetype`, either a collection or a plain resource.
    pub fn resourcetype(collection: bool) -> DavProp {
        let value = if collection {
            PropValue::Text("collection".to_string())
        } else {
            PropValue::Empty
        };
        DavProp::dav("resourcetype", value)
    }

    pub(crate) fn prop_name(&self) -> PropName {
        PropName::new(self.namespace.clone(), self.name.clone())
    }
}

/// What a PROPFIND asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropRequest {
    /// `<allprop/>` or an empty body.
    All,
    /// `<propname/>`, values are not returned.
    Names,
    /// `<prop>` with a list of properties.
    Props(Vec<PropName>),
}

/// Options for `propfind()`.
#[derive(Debug, Clone)]
pub struct PropfindOptions {
    pub path: DavPath,
    /// Defaults to `infinity`.
    pub depth: Depth,
    pub props: PropRequest,
}

/// One resource in a PROPFIND reply.
#[derive(Debug, Clone, PartialEq)]
pub struct DavResource {
    /// Decoded path below the prefix, e.g. `/dir/` or `/dir/file`.
    pub path: String,
    pub props: Vec<DavProp>,
}

/// One property of a PROPPATCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropPatch {
    pub namespace: String,
    pub name: String,
    /// `Some` for `<set>`, `None` for `<remove>`.
    pub value: Option<String>,
    /// Set by the backend. Defaults to `200 OK`.
    pub status: StatusCode,
}

/// Options for `proppatch()`.
#[derive(Debug, Clone)]
pub struct ProppatchOptions {
    pub path: DavPath,
    pub props: Vec<PropPatch>,
}

/// Options for `mkcol()` and `delete()`.
#[derive(Debug, Clone)]
pub struct PathOptions {
    pub path: DavPath,
}

/// Where COPY and MOVE go to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Below this handler.
    Local(DavPath),
    /// Somewhere else, the full URL.
    Remote(String),
}

/// Options for `copy()` and `move_()`.
#[derive(Debug, Clone)]
pub struct CopyMoveOptions {
    pub path: DavPath,
    pub depth: Depth,
    pub dest: Destination,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Exclusive,
    Shared,
}

impl LockScope {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            LockScope::Exclusive => "exclusive",
            LockScope::Shared => "shared",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Write,
}

impl LockType {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            LockType::Write => "write",
        }
    }
}

/// An active lock.
#[derive(Debug, Clone, PartialEq)]
pub struct DavLock {
    pub token: String,
    pub scope: LockScope,
    pub locktype: LockType,
    pub depth: Depth,
    pub owner: Option<Element>,
    /// `None` is infinite. More than one million is an absolute expiry
    /// time in seconds since the epoch, otherwise it's relative.
    pub timeout: Option<u64>,
}

/// Options for `lock()`.
#[derive(Debug, Clone)]
pub struct LockOptions {
    pub path: DavPath,
    pub depth: Depth,
    /// The `Timeout:` header, in order of preference.
    pub requested_timeout: Vec<DavTimeout>,
    /// Timeout of the lock. Pre-set from the first `Timeout:` entry,
    /// the backend may change it.
    pub timeout: Option<u64>,
    /// Set when refreshing: the token of the lock to refresh.
    pub update: Option<String>,
    pub scope: LockScope,
    pub locktype: LockType,
    pub owner: Option<Element>,
    pub locktoken: String,
}

impl LockOptions {
    pub(crate) fn to_lock(&self) -> DavLock {
        DavLock {
            token: self.locktoken.clone(),
            scope: self.scope,
            locktype: self.locktype,
            depth: self.depth,
            owner: self.owner.clone(),
            timeout: self.timeout,
        }
    }
}

/// Options for `unlock()`.
#[derive(Debug, Clone)]
pub struct UnlockOptions {
    pub path: DavPath,
    pub depth: Depth,
    pub token: String,
}

fn not_implemented<'a, T: Send + 'a>() -> BackendFuture<'a, T> {
    Box::pin(future::ready(Err(BackendError::NotImplemented)))
}

/// The storage backend.
///
/// Only `capabilities()` is required. Implement the methods you list
/// in the capabilities.
pub trait DavBackend: Send + Sync {
    /// What this backend can do.
    fn capabilities(&self) -> Capabilities;

    /// Check credentials. `auth_type` is `Basic` when the client sent
    /// basic authentication. Defaults to allowing everything.
    fn check_auth<'a>(
        &'a self,
        _auth_type: Option<&'a str>,
        _user: Option<&'a str>,
        _password: Option<&'a str>,
    ) -> BackendFuture<'a, bool> {
        Box::pin(future::ready(Ok(true)))
    }

    /// Does an entity tag from an `If:` header match the resource at `uri`?
    ///
    /// Lock tokens are checked against `checklock` and never get here.
    /// Negation is applied by the caller. Defaults to `true`.
    fn check_condition<'a>(
        &'a self,
        _uri: &'a str,
        _condition: &'a ConditionKind,
    ) -> BackendFuture<'a, bool> {
        Box::pin(future::ready(Ok(true)))
    }

    fn get<'a>(&'a self, _opts: &'a GetOptions) -> BackendFuture<'a, GetReply> {
        not_implemented()
    }

    /// Like `get()`, but the body is never read.
    fn head<'a>(&'a self, _opts: &'a GetOptions) -> BackendFuture<'a, GetReply> {
        not_implemented()
    }

    fn put<'a>(&'a self, _opts: &'a PutOptions) -> BackendFuture<'a, PutReply> {
        not_implemented()
    }

    /// Return the resources and their properties. For a collection, also
    /// the members down to `opts.depth`.
    fn propfind<'a>(&'a self, _opts: &'a PropfindOptions) -> BackendFuture<'a, Vec<DavResource>> {
        not_implemented()
    }

    /// Apply the changes and set the status of each property. Returns an
    /// optional `responsedescription`.
    fn proppatch<'a>(
        &'a self,
        _opts: &'a mut ProppatchOptions,
    ) -> BackendFuture<'a, Option<String>> {
        not_implemented()
    }

    fn mkcol<'a>(&'a self, _opts: &'a PathOptions) -> BackendFuture<'a, DavStatus> {
        not_implemented()
    }

    fn delete<'a>(&'a self, _opts: &'a PathOptions) -> BackendFuture<'a, DavStatus> {
        not_implemented()
    }

    fn copy<'a>(&'a self, _opts: &'a CopyMoveOptions) -> BackendFuture<'a, DavStatus> {
        not_implemented()
    }

    fn move_<'a>(&'a self, _opts: &'a CopyMoveOptions) -> BackendFuture<'a, DavStatus> {
        not_implemented()
    }

    /// Create or refresh a lock. The backend must make sure two
    /// conflicting locks are never both granted.
    fn lock<'a>(&'a self, _opts: &'a mut LockOptions) -> BackendFuture<'a, DavStatus> {
        not_implemented()
    }

    fn unlock<'a>(&'a self, _opts: &'a UnlockOptions) -> BackendFuture<'a, DavStatus> {
        not_implemented()
    }

    /// The lock on `path`, if any.
    fn checklock<'a>(&'a self, _path: &'a DavPath) -> BackendFuture<'a, Option<DavLock>> {
        Box::pin(future::ready(Ok(None)))
    }
}
