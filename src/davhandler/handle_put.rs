use std::cmp;
use std::error::Error as StdError;
use std::io::{self, SeekFrom};

use bytes::Buf;
use headers::HeaderMapExt;
use http::header;
use http::{Response, StatusCode};
use http_body::Body as HttpBody;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::backend::{DavSeekWrite, PutOptions, PutReply};
use crate::body::Body;
use crate::davhandler::{empty_response, DavRequest};
use crate::davheaders::{ContentRange, ContentRangeError};
use crate::DavResult;

// Build the options from the Content-* headers. Any Content-* header
// we do not understand means 501.
fn put_options(req: &DavRequest) -> DavResult<PutOptions> {
    let h = req.headers();

    let content_type = match h.get(header::CONTENT_TYPE) {
        Some(v) => {
            let v = v.to_str().map_err(|_| StatusCode::BAD_REQUEST)?;
            let multipart = v
                .get(..10)
                .map(|p| p.eq_ignore_ascii_case("multipart/"))
                .unwrap_or(false);
            if multipart {
                debug!("PUT {}: multipart not supported", req.path);
                return Err(StatusCode::NOT_IMPLEMENTED.into());
            }
            v.to_string()
        }
        None => "application/octet-stream".to_string(),
    };

    let mut content_language = None;
    let mut range = None;
    for (name, value) in h.iter() {
        let name = name.as_str();
        if !name.starts_with("content-") {
            continue;
        }
        match name {
            "content-type" | "content-length" => {}
            // meaning is undefined for PUT.
            "content-location" => {}
            "content-language" => {
                content_language = value.to_str().ok().map(|s| s.to_string());
            }
            "content-range" => {
                let v = value.to_str().map_err(|_| StatusCode::BAD_REQUEST)?;
                range = match ContentRange::parse(v) {
                    Ok(r) => Some(r),
                    Err(ContentRangeError::MultipleRanges) => {
                        return Err(StatusCode::NOT_IMPLEMENTED.into())
                    }
                    Err(ContentRangeError::Malformed) => {
                        return Err(StatusCode::BAD_REQUEST.into())
                    }
                };
            }
            // content-encoding, content-md5, and anything else.
            _ => {
                debug!("PUT {}: unsupported header {}", req.path, name);
                return Err(StatusCode::NOT_IMPLEMENTED.into());
            }
        }
    }

    Ok(PutOptions {
        path: req.path.clone(),
        content_length: h.typed_get::<headers::ContentLength>().map(|c| c.0),
        content_type,
        content_language,
        range,
    })
}

// copy the request body into the writer. For a partial PUT, only
// the bytes of the range are written, starting at its offset.
async fn copy_body<ReqBody, ReqData, ReqError>(
    body: ReqBody,
    writer: &mut Box<dyn DavSeekWrite>,
    range: Option<&ContentRange>,
) -> io::Result<()>
where
    ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    ReqData: Buf + Send + 'static,
    ReqError: StdError + Send + Sync + 'static,
{
    let mut left = match range {
        Some(r) => {
            writer.seek(SeekFrom::Start(r.start)).await?;
            let len = (r.end - r.start).checked_add(1).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "Content-Range too large")
            })?;
            Some(len)
        }
        None => None,
    };

    pin_utils::pin_mut!(body);
    while let Some(res) = body.data().await {
        let mut buf = res.map_err(|e| io::Error::new(io::ErrorKind::UnexpectedEof, e))?;
        while buf.has_remaining() {
            let chunk = buf.chunk();
            let n = match left {
                Some(l) => cmp::min(l, chunk.len() as u64) as usize,
                None => chunk.len(),
            };
            if n == 0 {
                break;
            }
            writer.write_all(&chunk[..n]).await?;
            buf.advance(n);
            if let Some(l) = left.as_mut() {
                *l -= n as u64;
            }
        }
        if left == Some(0) {
            break;
        }
    }
    writer.flush().await?;
    writer.shutdown().await?;
    Ok(())
}

impl crate::DavHandler {
    pub(crate) async fn handle_put<ReqBody, ReqData, ReqError>(
        &self,
        req: &DavRequest,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let tokens = req.lock_tokens();
        if !self
            .lock_manager()
            .check_lock_status(&req.path, &tokens, false)
            .await?
        {
            return Err(StatusCode::LOCKED.into());
        }

        let opts = put_options(req)?;
        trace!("backend put {} {:?}", opts.path, opts.range);
        let (mut writer, new) = match self.backend.put(&opts).await? {
            PutReply::Writer { writer, new } => (writer, new),
            PutReply::Status(s) => {
                return Ok(empty_response(
                    s.resolve(StatusCode::NO_CONTENT, StatusCode::FORBIDDEN),
                ))
            }
        };

        let status = match copy_body(body, &mut writer, opts.range.as_ref()).await {
            Ok(()) if new => StatusCode::CREATED,
            Ok(()) => StatusCode::NO_CONTENT,
            Err(e) => {
                debug!("PUT {}: write failed: {}", req.path, e);
                StatusCode::FORBIDDEN
            }
        };
        Ok(empty_response(status))
    }
}
