use headers::HeaderMapExt;
use http::{Response, StatusCode};

use crate::backend::{CopyMoveOptions, Destination};
use crate::body::Body;
use crate::davhandler::{empty_response, DavRequest};
use crate::davheaders::{self, Depth};
use crate::davpath::DavPath;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    // A destination on the same host and port, below our prefix, is local.
    // Anything else is passed to the backend as an URL.
    fn destination(&self, req: &DavRequest, dest: &str) -> DavResult<Destination> {
        Ok(match DavPath::from_href(&req.uri, dest, &self.prefix)? {
            Some(path) => Destination::Local(path),
            None => Destination::Remote(dest.to_string()),
        })
    }

    pub(crate) async fn handle_copymove(&self, req: &DavRequest) -> DavResult<Response<Body>> {
        let dest = match req.headers().typed_get::<davheaders::Destination>() {
            Some(dest) => dest.0,
            None => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let depth = req.depth(Depth::Infinity)?;
        let is_move = req.method == DavMethod::MOVE;

        let lm = self.lock_manager();
        let tokens = req.lock_tokens();
        if is_move && !lm.check_lock_status(&req.path, &tokens, false).await? {
            return Err(StatusCode::LOCKED.into());
        }
        let dest = self.destination(req, &dest)?;
        if let Destination::Local(path) = &dest {
            if !lm.check_lock_status(path, &tokens, false).await? {
                return Err(StatusCode::LOCKED.into());
            }
        }

        let overwrite = req
            .headers()
            .typed_get::<davheaders::Overwrite>()
            .map(|o| o.0)
            .unwrap_or(true);
        let opts = CopyMoveOptions {
            path: req.path.clone(),
            depth,
            dest,
            overwrite,
        };

        let status = if is_move {
            trace!("backend move {} -> {:?}", opts.path, opts.dest);
            self.backend.move_(&opts).await?
        } else {
            trace!("backend copy {} -> {:?}", opts.path, opts.dest);
            self.backend.copy(&opts).await?
        };
        Ok(empty_response(
            status.resolve(StatusCode::CREATED, StatusCode::NOT_FOUND),
        ))
    }
}
