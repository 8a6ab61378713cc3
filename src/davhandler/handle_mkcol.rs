use http::{Response, StatusCode};

use crate::backend::PathOptions;
use crate::body::Body;
use crate::davhandler::{empty_response, DavRequest};
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_mkcol(&self, req: &DavRequest) -> DavResult<Response<Body>> {
        let opts = PathOptions {
            path: req.path.clone(),
        };
        trace!("backend mkcol {}", opts.path);
        let status = self.backend.mkcol(&opts).await?;
        Ok(empty_response(
            status.resolve(StatusCode::CREATED, StatusCode::NOT_FOUND),
        ))
    }
}
