//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

use bytes::buf::Buf;
use futures_util::stream::Stream;
use headers::authorization::Basic;
use headers::{Authorization, HeaderMapExt};
use http::header::{self, HeaderMap, HeaderValue};
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::backend::{Capabilities, DavBackend};
use crate::body::{Body, StreamBody};
use crate::conditional::{if_header_holds, ConditionSet};
use crate::davheaders;
use crate::davpath::DavPath;
use crate::errors::{DavError, DavResult};
use crate::ls::LockManager;
use crate::util::{dav_method, DavMethod};

mod handle_copymove;
mod handle_delete;
mod handle_gethead;
use handle_gethead::READ_BUF_SIZE;
mod handle_lock;
mod handle_mkcol;
mod handle_options;
mod handle_props;
mod handle_put;

/// Request bodies of methods other than PUT are read into memory,
/// up to this size.
pub(crate) const MAX_BODY_SIZE: usize = 65536;

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling request.
    prefix: String,
    /// Storage backend.
    backend: Arc<dyn DavBackend>,
    /// Set of allowed methods (Defaults to "all methods"). Methods the
    /// backend does not implement are never allowed.
    allow: DavMethod,
    /// Realm in the `WWW-Authenticate` challenge.
    realm: String,
    /// Value of the `X-Dav-Powered-By` header.
    powered_by: String,
    /// read buffer size in bytes
    read_buf_size: usize,
    /// Maximum size of a buffered request body.
    max_body_size: usize,
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(backend: impl DavBackend + 'static) -> DavBuilder {
        DavBuilder::from_arc(Arc::new(backend))
    }

    /// Like `new`, for a backend that is shared with other code.
    pub fn from_arc(backend: Arc<dyn DavBackend>) -> DavBuilder {
        Self {
            prefix: String::new(),
            backend,
            allow: DavMethod::WEBDAV_RW,
            realm: "WebDAV".to_string(),
            powered_by: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
            read_buf_size: READ_BUF_SIZE,
            max_body_size: MAX_BODY_SIZE,
        }
    }

    /// Use the configuration that was built to generate a DavHandler.
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off the request path before it is
    /// handed to the backend.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = prefix.into();
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethod) -> Self {
        let mut this = self;
        this.allow = allow;
        this
    }

    /// Authentication realm.
    pub fn realm(self, realm: impl Into<String>) -> Self {
        let mut this = self;
        this.realm = realm.into();
        this
    }

    /// Name sent in the `X-Dav-Powered-By` header.
    pub fn powered_by(self, name: impl Into<String>) -> Self {
        let mut this = self;
        this.powered_by = name.into();
        this
    }

    /// Read buffer size in bytes
    pub fn read_buf_size(self, size: usize) -> Self {
        let mut this = self;
        this.read_buf_size = size;
        this
    }

    /// Maximum size of the request body of PROPFIND, PROPPATCH and LOCK.
    pub fn max_body_size(self, size: usize) -> Self {
        let mut this = self;
        this.max_body_size = size;
        this
    }
}

/// The webdav handler struct.
///
/// The `new` and `build` etc methods are used to instantiate a handler.
///
/// The `handle` and `handle_with` methods are the methods that do the actual work.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) backend: Arc<dyn DavBackend>,
    pub(crate) caps: Capabilities,
    pub(crate) allow: DavMethod,
    pub(crate) realm: Arc<String>,
    pub(crate) powered_by: Arc<String>,
    pub(crate) read_buf_size: usize,
    pub(crate) max_body_size: usize,
}

// The methods a backend with these capabilities can serve.
pub(crate) fn available_methods(caps: &Capabilities) -> DavMethod {
    let locking = DavMethod::LOCK | DavMethod::UNLOCK;
    let mut m = (caps.methods & !locking) | DavMethod::OPTIONS;
    if m.contains(DavMethod::GET) {
        m |= DavMethod::HEAD;
    }
    if caps.checklock {
        m |= caps.methods & locking;
    }
    m
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        let caps = cfg.backend.capabilities();
        let allow = (available_methods(&caps) & cfg.allow) | DavMethod::OPTIONS;
        debug!("backend capabilities {:?}, allowed methods {:?}", caps, allow);
        Self {
            prefix: Arc::new(cfg.prefix),
            backend: cfg.backend,
            caps,
            allow,
            realm: Arc::new(cfg.realm),
            powered_by: Arc::new(cfg.powered_by),
            read_buf_size: cfg.read_buf_size,
            max_body_size: cfg.max_body_size,
        }
    }
}

/// A request that passed the authentication and `If:` checks.
pub(crate) struct DavRequest {
    pub(crate) method: DavMethod,
    pub(crate) path: DavPath,
    /// Absolute URI of the request, `scheme://host/prefix/path`.
    pub(crate) uri: String,
    pub(crate) conditions: Option<ConditionSet>,
    pub(crate) req: Request<()>,
}

impl DavRequest {
    pub(crate) fn headers(&self) -> &HeaderMap {
        self.req.headers()
    }

    /// The `Depth:` header, `400 Bad Request` if it's invalid.
    pub(crate) fn depth(&self, default: davheaders::Depth) -> DavResult<davheaders::Depth> {
        match self.headers().typed_try_get::<davheaders::Depth>() {
            Ok(Some(depth)) => Ok(depth),
            Ok(None) => Ok(default),
            Err(_) => Err(StatusCode::BAD_REQUEST.into()),
        }
    }

    /// Lock tokens submitted in the `If:` header.
    pub(crate) fn lock_tokens(&self) -> Vec<&str> {
        self.conditions
            .as_ref()
            .map(|c| c.lock_tokens())
            .unwrap_or_default()
    }
}

fn request_uri(req: &Request<()>, path: &DavPath) -> String {
    let scheme = req.uri().scheme_str().unwrap_or("http");
    let host = req
        .uri()
        .authority()
        .map(|a| a.as_str())
        .or_else(|| {
            req.headers()
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
        })
        .unwrap_or("localhost");
    format!("{}://{}{}", scheme, host, path.as_url_string_with_prefix())
}

// a response with only a status.
pub(crate) fn empty_response(status: StatusCode) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = status;
    res.headers_mut().typed_insert(headers::ContentLength(0));
    res
}

// "207 Multi-Status".
fn status_text(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(backend: impl DavBackend + 'static) -> DavBuilder {
        DavBuilder::new(backend)
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.handle_inner(req).await
    }

    /// Handle a webdav request, with an extra prefix appended to the
    /// configured one.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(format!(
                "{}/{}",
                this.prefix.strip_suffix('/').unwrap_or(&this.prefix),
                prefix.strip_prefix('/').unwrap_or(&prefix)
            ));
        }
        this.handle_inner(req).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    /// Used with webserver frameworks that have not
    /// opted to use the `http_body` crate just yet.
    #[doc(hidden)]
    pub async fn handle_stream<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>>,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        self.handle_inner(req).await
    }
}

impl DavHandler {
    // helper.
    pub(crate) fn lock_manager(&self) -> LockManager<'_> {
        LockManager::new(&*self.backend, &self.caps)
    }

    // "OPTIONS, GET, HEAD, ..." for the Allow: header.
    pub(crate) fn allow_header(&self) -> String {
        DavMethod::ALLOW_ORDER
            .iter()
            .filter(|(m, _)| self.allow.contains(*m))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn method_not_allowed(&self) -> Response<Body> {
        let mut res = empty_response(StatusCode::METHOD_NOT_ALLOWED);
        if let Ok(v) = HeaderValue::from_str(&self.allow_header()) {
            res.headers_mut().insert(header::ALLOW, v);
        }
        res
    }

    fn unauthorized(&self) -> Response<Body> {
        let mut res = empty_response(StatusCode::UNAUTHORIZED);
        let challenge = format!("Basic realm=\"{}\"", self.realm);
        if let Ok(v) = HeaderValue::from_str(&challenge) {
            res.headers_mut().insert(header::WWW_AUTHENTICATE, v);
        }
        res
    }

    // decode the credentials and ask the backend.
    async fn check_auth(&self, req: &Request<()>) -> DavResult<bool> {
        let (auth_type, user, password) =
            match req.headers().typed_get::<Authorization<Basic>>() {
                Some(auth) => (
                    Some("Basic".to_string()),
                    Some(auth.username().to_string()),
                    Some(auth.password().to_string()),
                ),
                None => {
                    let scheme = req
                        .headers()
                        .get(header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.split_whitespace().next())
                        .map(|s| s.to_string());
                    (scheme, None, None)
                }
            };
        let ok = self
            .backend
            .check_auth(auth_type.as_deref(), user.as_deref(), password.as_deref())
            .await?;
        if !ok {
            debug!("authentication failed for {:?}", user);
        }
        Ok(ok)
    }

    // drain request body and return length.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| {
                DavError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(DavError::StatusClose(StatusCode::PAYLOAD_TOO_LARGE));
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        // Turn any DavError results into a HTTP error response.
        let mut resp = match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result {}", resp.status());
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                let mut resp = empty_response(err.statuscode());
                if err.must_close() {
                    resp.headers_mut()
                        .insert(header::CONNECTION, HeaderValue::from_static("close"));
                }
                resp
            }
        };

        let status = status_text(resp.status());
        let h = resp.headers_mut();
        if let Ok(v) = HeaderValue::from_str(&self.powered_by) {
            h.insert("x-dav-powered-by", v);
        }
        if let Ok(v) = HeaderValue::from_str(&status) {
            h.insert("x-webdav-status", v);
        }
        resp
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // translate HTTP method to Webdav method. Unknown methods are
        // refused after authentication.
        let method = dav_method(req.method()).ok();

        // OPTIONS needs no authentication, and has no preconditions.
        if method == Some(DavMethod::OPTIONS) {
            debug!("== START REQUEST OPTIONS {}", req.uri());
            return self.handle_options(&req).await;
        }

        if !self.check_auth(&req).await? {
            return Ok(self.unauthorized());
        }

        // make sure the request path is valid.
        let path = DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?;
        let uri = request_uri(&req, &path);

        // the If: header must parse, and hold.
        let conditions = match req.headers().typed_try_get::<davheaders::If>() {
            Ok(None) => None,
            Ok(Some(hdr)) => match ConditionSet::parse(&hdr.0) {
                Ok(set) => Some(set),
                Err(e) => {
                    debug!("{e}");
                    return Err(StatusCode::PRECONDITION_FAILED.into());
                }
            },
            Err(_) => return Err(StatusCode::PRECONDITION_FAILED.into()),
        };
        if let Some(set) = &conditions {
            if !if_header_holds(set, &uri, &path, &self.lock_manager(), &*self.backend).await {
                debug!("If: header does not hold for {uri}");
                return Err(StatusCode::PRECONDITION_FAILED.into());
            }
        }

        // see if method is allowed.
        let method = match method {
            Some(m) if self.allow.contains(m) => m,
            Some(m) if m == DavMethod::LOCK => {
                debug!("LOCK on {path}, but locking is not available");
                return Err(StatusCode::PRECONDITION_FAILED.into());
            }
            _ => {
                debug!(
                    "method {} not allowed on request {}",
                    req.method(),
                    req.uri()
                );
                return Ok(self.method_not_allowed());
            }
        };

        let dreq = DavRequest {
            method,
            path,
            uri,
            conditions,
            req,
        };
        debug!("== START REQUEST {} {}", method.as_str(), dreq.path);

        // PUT is the only handler that reads the body itself. All the
        // other handlers either expected no body, or a pre-read Vec<u8>.
        if method == DavMethod::PUT {
            return self.handle_put(&dreq, body).await;
        }
        let body_data = self.read_request(body, self.max_body_size).await?;

        // Not all methods accept a body.
        if !body_data.is_empty() && !DavMethod::WEBDAV_BODY.contains(method) {
            return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
        }

        match method {
            m if m == DavMethod::GET || m == DavMethod::HEAD => self.handle_get(&dreq).await,
            m if m == DavMethod::PROPFIND => self.handle_propfind(&dreq, &body_data).await,
            m if m == DavMethod::PROPPATCH => self.handle_proppatch(&dreq, &body_data).await,
            m if m == DavMethod::MKCOL => self.handle_mkcol(&dreq).await,
            m if m == DavMethod::DELETE => self.handle_delete(&dreq).await,
            m if m == DavMethod::COPY || m == DavMethod::MOVE => self.handle_copymove(&dreq).await,
            m if m == DavMethod::LOCK => self.handle_lock(&dreq, &body_data).await,
            m if m == DavMethod::UNLOCK => self.handle_unlock(&dreq).await,
            // OPTIONS and PUT were handled above.
            _ => Ok(self.method_not_allowed()),
        }
    }
}
