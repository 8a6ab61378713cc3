use headers::HeaderMapExt;
use http::header::{self, HeaderValue};
use http::{Response, StatusCode};
use xmltree::Element;

use crate::backend::{LockOptions, LockScope, LockType, UnlockOptions};
use crate::body::Body;
use crate::davhandler::{empty_response, DavRequest};
use crate::davheaders::{self, DavTimeout, Depth};
use crate::errors::DavError;
use crate::ls;
use crate::multistatus;
use crate::xmltree_ext::{self, ElementExt};
use crate::DavResult;

// what a <D:lockinfo> asks for.
#[derive(Debug)]
struct LockInfo {
    scope: LockScope,
    locktype: LockType,
    owner: Option<Element>,
}

fn parse_lockinfo(body: &[u8]) -> DavResult<LockInfo> {
    let root = xmltree_ext::parse_dav_body(body, "lockinfo")?;
    let mut scope = None;
    let mut locktype = None;
    let mut owner = None;
    for elem in root.child_elems() {
        if elem.is_dav("lockscope") {
            scope = match elem.child_elems().first() {
                Some(s) if s.is_dav("exclusive") => Some(LockScope::Exclusive),
                Some(s) if s.is_dav("shared") => Some(LockScope::Shared),
                _ => return Err(DavError::XmlParseError),
            };
        } else if elem.is_dav("locktype") {
            locktype = match elem.child_elems().first() {
                Some(t) if t.is_dav("write") => Some(LockType::Write),
                _ => return Err(DavError::XmlParseError),
            };
        } else if elem.is_dav("owner") {
            owner = Some(elem.clone());
        }
    }
    match (scope, locktype) {
        (Some(scope), Some(locktype)) => Ok(LockInfo {
            scope,
            locktype,
            owner,
        }),
        _ => Err(DavError::XmlParseError),
    }
}

impl crate::DavHandler {
    pub(crate) async fn handle_lock(
        &self,
        req: &DavRequest,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let depth = req.depth(Depth::Infinity)?;
        let requested_timeout = req
            .headers()
            .typed_get::<davheaders::Timeout>()
            .map(|t| t.0)
            .unwrap_or_default();
        let timeout = match requested_timeout.first() {
            Some(DavTimeout::Seconds(n)) => Some(*n),
            _ => None,
        };

        let lm = self.lock_manager();
        let tokens = req.lock_tokens();

        let mut opts = if body.is_empty() && req.conditions.is_some() {
            // refresh of an existing lock.
            if !lm.check_lock_status(&req.path, &tokens, false).await? {
                return Err(StatusCode::LOCKED.into());
            }
            // the submitted token of a lock on this resource, or else
            // the first one.
            let locks = lm.query_locks(&req.path).await?;
            let token = match tokens
                .iter()
                .find(|t| locks.iter().any(|l| l.token == **t))
                .or_else(|| tokens.first())
            {
                Some(t) => t.to_string(),
                None => return Err(StatusCode::BAD_REQUEST.into()),
            };
            let current = locks.into_iter().find(|l| l.token == token);
            debug!("LOCK {}: refresh {} ({:?})", req.path, token, current);
            let (scope, locktype, owner, depth) = match current {
                Some(l) => (l.scope, l.locktype, l.owner, l.depth),
                None => (LockScope::Exclusive, LockType::Write, None, depth),
            };
            LockOptions {
                path: req.path.clone(),
                depth,
                requested_timeout,
                timeout,
                update: Some(token.clone()),
                scope,
                locktype,
                owner,
                locktoken: token,
            }
        } else {
            let info = parse_lockinfo(body)?;
            let shared = info.scope == LockScope::Shared;
            if !lm.check_lock_status(&req.path, &tokens, shared).await? {
                return Err(StatusCode::LOCKED.into());
            }
            LockOptions {
                path: req.path.clone(),
                depth,
                requested_timeout,
                timeout,
                update: None,
                scope: info.scope,
                locktype: info.locktype,
                owner: info.owner,
                locktoken: ls::new_locktoken(),
            }
        };

        trace!("backend lock {} {:?}", opts.path, opts.update);
        let status = self
            .backend
            .lock(&mut opts)
            .await?
            .resolve(StatusCode::OK, StatusCode::LOCKED);
        if !status.is_success() {
            return Ok(empty_response(status));
        }

        let body = multistatus::lock_response(&opts.to_lock())?;
        let mut res = Response::new(Body::from(body));
        *res.status_mut() = status;
        let h = res.headers_mut();
        h.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/xml; charset=\"utf-8\""),
        );
        if let Ok(v) = HeaderValue::from_str(&format!("<{}>", opts.locktoken)) {
            h.insert("lock-token", v);
        }
        Ok(res)
    }

    pub(crate) async fn handle_unlock(&self, req: &DavRequest) -> DavResult<Response<Body>> {
        let token = match req.headers().typed_get::<davheaders::LockToken>() {
            Some(t) => t.0,
            None => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let opts = UnlockOptions {
            path: req.path.clone(),
            depth: req.depth(Depth::Infinity)?,
            token,
        };
        trace!("backend unlock {} {}", opts.path, opts.token);
        let status = self.backend.unlock(&opts).await?;
        Ok(empty_response(
            status.resolve(StatusCode::NO_CONTENT, StatusCode::CONFLICT),
        ))
    }
}
