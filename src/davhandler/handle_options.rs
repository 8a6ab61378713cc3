use headers::HeaderMapExt;
use http::header::{self, HeaderValue};
use http::{Request, Response};

use crate::body::Body;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_options(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        // Class 2 (locking) only if the backend can tell us about locks.
        let dav = if self.allow.contains(DavMethod::LOCK) {
            "1,2"
        } else {
            "1"
        };
        trace!("OPTIONS {}: DAV: {}", req.uri(), dav);

        let h = res.headers_mut();
        h.insert("dav", HeaderValue::from_static(dav));
        h.insert("ms-author-via", HeaderValue::from_static("DAV"));
        if let Ok(allow) = HeaderValue::from_str(&self.allow_header()) {
            h.insert(header::ALLOW, allow);
        }
        h.typed_insert(headers::ContentLength(0));

        Ok(res)
    }
}
