#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{self, Cursor, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::{HeaderMap, Request, StatusCode};
use parking_lot::Mutex;
use tokio::io::{AsyncSeek, AsyncWrite};

use dav_server_base::backend::*;
use dav_server_base::body::Body;
use dav_server_base::conditional::ConditionKind;
use dav_server_base::davheaders::Depth;
use dav_server_base::davpath::DavPath;
use dav_server_base::{DavHandler, DavMethod};

pub const DAV_NS: &str = "DAV:";

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Everything the mock backend stores, plus a log of the calls.
#[derive(Default)]
pub struct State {
    pub files: BTreeMap<String, Vec<u8>>,
    pub props: BTreeMap<String, Vec<DavProp>>,
    pub locks: BTreeMap<String, DavLock>,
    pub etags: BTreeMap<String, String>,
    pub calls: Vec<String>,
    pub last_put: Option<PutOptions>,
    pub last_copymove: Option<CopyMoveOptions>,
    pub last_lock: Option<LockOptions>,
}

#[derive(Clone)]
pub struct MockBackend {
    pub state: Arc<Mutex<State>>,
    pub caps: Capabilities,
    pub credentials: Option<(String, String)>,
}

impl MockBackend {
    /// Everything but HEAD, with locking.
    pub fn new() -> MockBackend {
        let methods = DavMethod::WEBDAV_RW & !DavMethod::HEAD;
        MockBackend {
            state: Arc::new(Mutex::new(State::default())),
            caps: Capabilities::new(methods).with_checklock(),
            credentials: None,
        }
    }

    pub fn without_locking() -> MockBackend {
        let mut b = MockBackend::new();
        b.caps.checklock = false;
        b
    }

    pub fn with_credentials(self, user: &str, password: &str) -> MockBackend {
        MockBackend {
            credentials: Some((user.to_string(), password.to_string())),
            ..self
        }
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        self.state.lock().files.insert(path.to_string(), data.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(path).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    fn call(&self, name: &str, path: &DavPath) {
        self.state.lock().calls.push(format!("{} {}", name, path.as_str()));
    }

    fn resource(state: &State, path: &str) -> DavResource {
        let collection = path == "/";
        let mut props = vec![DavProp::resourcetype(collection)];
        if let Some(data) = state.files.get(path) {
            props.push(DavProp::dav("getcontentlength", data.len().to_string()));
        }
        if let Some(extra) = state.props.get(path) {
            props.extend(extra.iter().cloned());
        }
        DavResource {
            path: if collection { "/".to_string() } else { path.to_string() },
            props,
        }
    }
}

/// Writes into a file of the shared state.
pub struct MemWriter {
    state: Arc<Mutex<State>>,
    path: String,
    pos: u64,
}

impl AsyncWrite for MemWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let mut state = this.state.lock();
        let data = state.files.entry(this.path.clone()).or_default();
        let start = this.pos as usize;
        let end = start + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        this.pos = end as u64;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for MemWriter {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        match position {
            SeekFrom::Start(pos) => {
                self.get_mut().pos = pos;
                Ok(())
            }
            _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "seek")),
        }
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.pos))
    }
}

impl DavBackend for MockBackend {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn check_auth<'a>(
        &'a self,
        _auth_type: Option<&'a str>,
        user: Option<&'a str>,
        password: Option<&'a str>,
    ) -> BackendFuture<'a, bool> {
        Box::pin(async move {
            Ok(match &self.credentials {
                Some((u, p)) => user == Some(u.as_str()) && password == Some(p.as_str()),
                None => true,
            })
        })
    }

    fn check_condition<'a>(
        &'a self,
        uri: &'a str,
        condition: &'a ConditionKind,
    ) -> BackendFuture<'a, bool> {
        Box::pin(async move {
            let state = self.state.lock();
            Ok(match condition {
                ConditionKind::LockToken(_) => false,
                ConditionKind::ETagStrong(e) | ConditionKind::ETagWeak(e) => {
                    state.etags.get(uri) == Some(e)
                }
            })
        })
    }

    fn get<'a>(&'a self, opts: &'a GetOptions) -> BackendFuture<'a, GetReply> {
        Box::pin(async move {
            self.call("get", &opts.path);
            let data = match self.file(opts.path.as_str()) {
                Some(data) => data,
                None => return Ok(GetReply::Status(DavStatus::Failed)),
            };
            let size = data.len() as u64;
            let body = ContentBody::Seekable(Box::new(Cursor::new(data)));
            Ok(GetReply::Content(DavContent::new(body).size(size)))
        })
    }

    fn put<'a>(&'a self, opts: &'a PutOptions) -> BackendFuture<'a, PutReply> {
        Box::pin(async move {
            self.call("put", &opts.path);
            let mut state = self.state.lock();
            state.last_put = Some(opts.clone());
            let path = opts.path.as_str().to_string();
            let new = !state.files.contains_key(&path);
            // a partial PUT keeps the existing content.
            if new || opts.range.is_none() {
                state.files.insert(path.clone(), Vec::new());
            }
            let writer = MemWriter {
                state: self.state.clone(),
                path,
                pos: 0,
            };
            Ok(PutReply::Writer {
                writer: Box::new(writer),
                new,
            })
        })
    }

    fn propfind<'a>(&'a self, opts: &'a PropfindOptions) -> BackendFuture<'a, Vec<DavResource>> {
        Box::pin(async move {
            self.call("propfind", &opts.path);
            let state = self.state.lock();
            let path = opts.path.as_str();
            if path != "/" && !state.files.contains_key(path) {
                return Err(BackendError::NotFound);
            }
            let mut res = vec![MockBackend::resource(&state, path)];
            if path == "/" && opts.depth != Depth::Zero {
                for name in state.files.keys() {
                    res.push(MockBackend::resource(&state, name));
                }
            }
            Ok(res)
        })
    }

    fn proppatch<'a>(
        &'a self,
        opts: &'a mut ProppatchOptions,
    ) -> BackendFuture<'a, Option<String>> {
        Box::pin(async move {
            self.call("proppatch", &opts.path);
            let mut state = self.state.lock();
            let path = opts.path.as_str().to_string();
            for p in opts.props.iter_mut() {
                if p.namespace == DAV_NS {
                    p.status = StatusCode::FORBIDDEN;
                    continue;
                }
                let props = state.props.entry(path.clone()).or_default();
                props.retain(|d| !(d.namespace == p.namespace && d.name == p.name));
                if let Some(value) = &p.value {
                    props.push(DavProp::new(p.namespace.clone(), p.name.clone(), value.clone()));
                }
            }
            Ok(None)
        })
    }

    fn mkcol<'a>(&'a self, opts: &'a PathOptions) -> BackendFuture<'a, DavStatus> {
        Box::pin(async move {
            self.call("mkcol", &opts.path);
            Ok(DavStatus::Done)
        })
    }

    fn delete<'a>(&'a self, opts: &'a PathOptions) -> BackendFuture<'a, DavStatus> {
        Box::pin(async move {
            self.call("delete", &opts.path);
            let removed = self.state.lock().files.remove(opts.path.as_str()).is_some();
            Ok(removed.into())
        })
    }

    fn copy<'a>(&'a self, opts: &'a CopyMoveOptions) -> BackendFuture<'a, DavStatus> {
        Box::pin(async move {
            self.call("copy", &opts.path);
            self.state.lock().last_copymove = Some(opts.clone());
            Ok(DavStatus::Done)
        })
    }

    fn move_<'a>(&'a self, opts: &'a CopyMoveOptions) -> BackendFuture<'a, DavStatus> {
        Box::pin(async move {
            self.call("move", &opts.path);
            self.state.lock().last_copymove = Some(opts.clone());
            Ok(DavStatus::Done)
        })
    }

    fn lock<'a>(&'a self, opts: &'a mut LockOptions) -> BackendFuture<'a, DavStatus> {
        Box::pin(async move {
            self.call("lock", &opts.path);
            let mut state = self.state.lock();
            state.last_lock = Some(opts.clone());
            let path = opts.path.as_str().to_string();
            let lock = DavLock {
                token: opts.locktoken.clone(),
                scope: opts.scope,
                locktype: opts.locktype,
                depth: opts.depth,
                owner: opts.owner.clone(),
                timeout: opts.timeout,
            };
            match (&opts.update, state.locks.get(&path)) {
                (Some(token), Some(l)) if &l.token == token => {}
                (Some(_), _) => return Ok(DavStatus::Failed),
                (None, Some(l))
                    if l.scope == LockScope::Exclusive || opts.scope == LockScope::Exclusive =>
                {
                    return Ok(DavStatus::Failed)
                }
                (None, _) => {}
            }
            state.locks.insert(path, lock);
            Ok(DavStatus::Done)
        })
    }

    fn unlock<'a>(&'a self, opts: &'a UnlockOptions) -> BackendFuture<'a, DavStatus> {
        Box::pin(async move {
            self.call("unlock", &opts.path);
            let mut state = self.state.lock();
            let found = matches!(state.locks.get(opts.path.as_str()), Some(l) if l.token == opts.token);
            if found {
                state.locks.remove(opts.path.as_str());
            }
            Ok(found.into())
        })
    }

    fn checklock<'a>(&'a self, path: &'a DavPath) -> BackendFuture<'a, Option<DavLock>> {
        Box::pin(async move { Ok(self.state.lock().locks.get(path.as_str()).cloned()) })
    }
}

pub fn request(method: &str, uri: &str) -> http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "localhost")
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl Reply {
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }
}

pub async fn send(dav: &DavHandler, req: Request<Body>) -> Reply {
    let resp = dav.handle(req).await;
    let (parts, body) = resp.into_parts();
    let body = body.collect().await.expect("response body");
    Reply {
        status: parts.status,
        headers: parts.headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    }
}

/// Take a lock on `path` and return its token.
pub async fn lock(dav: &DavHandler, path: &str, scope: &str) -> String {
    let body = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
        <D:lockinfo xmlns:D="DAV:">
          <D:lockscope><D:{scope}/></D:lockscope>
          <D:locktype><D:write/></D:locktype>
          <D:owner>tester</D:owner>
        </D:lockinfo>"#
    );
    let req = request("LOCK", path).body(Body::from(body)).unwrap();
    let reply = send(dav, req).await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
    let token = reply.header("lock-token");
    token
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

/// Serves `/file.txt`, optionally locked. Uses the default `If:`
/// entity tag hook of the trait.
pub struct PlainBackend {
    pub lock: Option<DavLock>,
}

impl PlainBackend {
    pub fn locked_with(token: &str) -> PlainBackend {
        PlainBackend {
            lock: Some(DavLock {
                token: token.to_string(),
                scope: LockScope::Exclusive,
                locktype: LockType::Write,
                depth: Depth::Zero,
                owner: None,
                timeout: None,
            }),
        }
    }
}

impl DavBackend for PlainBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities::new(DavMethod::GET | DavMethod::LOCK | DavMethod::UNLOCK).with_checklock()
    }

    fn get<'a>(&'a self, opts: &'a GetOptions) -> BackendFuture<'a, GetReply> {
        Box::pin(async move {
            if opts.path.as_str() != "/file.txt" {
                return Ok(GetReply::Status(DavStatus::Failed));
            }
            Ok(GetReply::Content(DavContent::data("hello")))
        })
    }

    fn checklock<'a>(&'a self, path: &'a DavPath) -> BackendFuture<'a, Option<DavLock>> {
        let lock = self.lock.clone().filter(|_| path.as_str() == "/file.txt");
        Box::pin(async move { Ok(lock) })
    }
}
