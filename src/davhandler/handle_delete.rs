use http::{Response, StatusCode};

use crate::backend::PathOptions;
use crate::body::Body;
use crate::davhandler::{empty_response, DavRequest};
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_delete(&self, req: &DavRequest) -> DavResult<Response<Body>> {
        // A DELETE on a collection always acts on all members, so
        // the only Depth: allowed is "infinity".
        if let Some(depth) = req.headers().get("depth") {
            if !depth.as_bytes().eq_ignore_ascii_case(b"infinity") {
                debug!("DELETE {}: Depth {:?} refused", req.path, depth);
                return Err(StatusCode::BAD_REQUEST.into());
            }
        }

        let tokens = req.lock_tokens();
        if !self
            .lock_manager()
            .check_lock_status(&req.path, &tokens, false)
            .await?
        {
            return Err(StatusCode::LOCKED.into());
        }

        let opts = PathOptions {
            path: req.path.clone(),
        };
        trace!("backend delete {}", opts.path);
        let status = self.backend.delete(&opts).await?;
        Ok(empty_response(
            status.resolve(StatusCode::NO_CONTENT, StatusCode::NOT_FOUND),
        ))
    }
}
