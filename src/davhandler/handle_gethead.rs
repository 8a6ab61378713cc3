use std::cmp;
use std::io::{Cursor, SeekFrom};

use async_stream::stream;
use bytes::Bytes;
use headers::HeaderMapExt;
use http::header::{self, HeaderValue};
use http::{Response, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;

use crate::backend::{ContentBody, DavContent, DavSeekRead, GetOptions, GetReply};
use crate::body::Body;
use crate::davhandler::{empty_response, DavRequest};
use crate::davheaders::{self, content_range};
use crate::util::DavMethod;
use crate::DavResult;

pub(crate) const READ_BUF_SIZE: usize = 16384;

// the parts of a multipart/byteranges reply.
struct Multipart {
    boundary: String,
    content_type: String,
    total: Option<u64>,
}

impl Multipart {
    fn part_header(&self, start: u64, end: u64) -> String {
        format!(
            "\r\n--{}\r\nContent-Type: {}\r\nContent-Range: {}\r\n\r\n",
            self.boundary,
            self.content_type,
            content_range(start, end, self.total)
        )
    }

    fn trailer(&self) -> String {
        format!("\r\n--{}--\r\n", self.boundary)
    }
}

// Copy the ranges out of a seekable reader.
fn read_ranges(
    mut reader: Box<dyn DavSeekRead>,
    ranges: Vec<(u64, u64)>,
    multipart: Option<Multipart>,
    bufsize: usize,
) -> Body {
    Body::stream(stream! {
        for (start, end) in ranges {
            if let Some(mp) = &multipart {
                yield Ok(Bytes::from(mp.part_header(start, end)));
            }
            if let Err(e) = reader.seek(SeekFrom::Start(start)).await {
                yield Err(e);
                return;
            }
            let mut left = end - start + 1;
            while left > 0 {
                let mut buf = vec![0u8; cmp::min(left, bufsize as u64) as usize];
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        buf.truncate(n);
                        left -= n as u64;
                        yield Ok(Bytes::from(buf));
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }
        if let Some(mp) = &multipart {
            yield Ok(Bytes::from(mp.trailer()));
        }
    })
}

// Copy a reader until EOF.
fn read_all<R>(mut reader: R, bufsize: usize) -> Body
where
    R: AsyncRead + Send + Unpin + 'static,
{
    Body::stream(stream! {
        loop {
            let mut buf = vec![0u8; bufsize];
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    buf.truncate(n);
                    yield Ok(Bytes::from(buf));
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    })
}

impl crate::DavHandler {
    pub(crate) async fn handle_get(&self, req: &DavRequest) -> DavResult<Response<Body>> {
        let head = req.method == DavMethod::HEAD;

        // a malformed Range: header is ignored.
        let ranges = match req.headers().typed_get::<davheaders::ByteRanges>() {
            Some(r) if !head => r.0,
            _ => Vec::new(),
        };
        let opts = GetOptions {
            path: req.path.clone(),
            ranges,
        };

        let reply = if head && self.caps.methods.contains(DavMethod::HEAD) {
            trace!("backend head {}", opts.path);
            self.backend.head(&opts).await?
        } else {
            trace!("backend get {}", opts.path);
            self.backend.get(&opts).await?
        };
        let content = match reply {
            GetReply::Content(c) => c,
            GetReply::Status(s) => {
                return Ok(empty_response(
                    s.resolve(StatusCode::OK, StatusCode::NOT_FOUND),
                ))
            }
        };
        let DavContent {
            body,
            mimetype,
            mtime,
            size,
        } = content;

        let mut res = Response::new(Body::empty());
        let content_type = mimetype.unwrap_or_else(|| req.path.mime_type_str());
        {
            let h = res.headers_mut();
            let ct = HeaderValue::from_str(&content_type)
                .unwrap_or(HeaderValue::from_static("application/octet-stream"));
            h.insert(header::CONTENT_TYPE, ct);
            if let Some(mtime) = mtime {
                h.typed_insert(headers::LastModified::from(mtime));
            }
        }

        if head {
            if let Some(size) = size {
                res.headers_mut().typed_insert(headers::ContentLength(size));
            }
            return Ok(res);
        }

        // in-memory data can serve ranges too.
        let mut reader: Box<dyn DavSeekRead> = match body {
            ContentBody::Seekable(reader) => reader,
            ContentBody::Data(data) => Box::new(Cursor::new(data)),
            ContentBody::Stream(reader) => {
                if let Some(size) = size {
                    res.headers_mut().typed_insert(headers::ContentLength(size));
                }
                *res.body_mut() = read_all(reader, self.read_buf_size);
                return Ok(res);
            }
        };
        if opts.ranges.is_empty() {
            if let Some(size) = size {
                res.headers_mut().typed_insert(headers::ContentLength(size));
            }
            *res.body_mut() = read_all(reader, self.read_buf_size);
            return Ok(res);
        }
        res.headers_mut()
            .typed_insert(headers::AcceptRanges::bytes());

        // we need the length to resolve the ranges. If the backend did
        // not tell us, find out, but keep reporting the total as "*".
        let len = match size {
            Some(size) => size,
            None => reader.seek(SeekFrom::End(0)).await?,
        };
        let resolved = opts
            .ranges
            .iter()
            .filter_map(|r| r.resolve(len))
            .collect::<Vec<_>>();
        debug!(
            "GET {}: ranges {:?} resolved to {:?} (length {})",
            req.path, opts.ranges, resolved, len
        );

        if resolved.is_empty() {
            let mut res = empty_response(StatusCode::RANGE_NOT_SATISFIABLE);
            if let Ok(v) = HeaderValue::from_str(&format!("bytes */{len}")) {
                res.headers_mut().insert(header::CONTENT_RANGE, v);
            }
            return Ok(res);
        }

        *res.status_mut() = StatusCode::PARTIAL_CONTENT;
        if let &[(start, end)] = resolved.as_slice() {
            let h = res.headers_mut();
            if let Ok(v) = HeaderValue::from_str(&content_range(start, end, size)) {
                h.insert(header::CONTENT_RANGE, v);
            }
            h.typed_insert(headers::ContentLength(end - start + 1));
            *res.body_mut() = read_ranges(reader, resolved, None, self.read_buf_size);
            return Ok(res);
        }

        let multipart = Multipart {
            boundary: format!("SEPARATOR_{}", Uuid::new_v4().simple()),
            content_type,
            total: size,
        };
        let ct = format!("multipart/byteranges; boundary={}", multipart.boundary);
        if let Ok(v) = HeaderValue::from_str(&ct) {
            res.headers_mut().insert(header::CONTENT_TYPE, v);
        }
        *res.body_mut() = read_ranges(reader, resolved, Some(multipart), self.read_buf_size);
        Ok(res)
    }
}
