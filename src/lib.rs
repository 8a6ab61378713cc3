//! ## Generic async HTTP/Webdav protocol handler
//!
//! [`Webdav`] (RFC4918) is defined as
//! HTTP (GET/HEAD/PUT/DELETE) plus a bunch of extension methods (PROPFIND, etc).
//! These extension methods are used to manage collections (like unix directories),
//! get information on collections (like unix `ls` or `readdir`), rename and
//! copy items, lock/unlock items, etc.
//!
//! This library is the protocol half of a Webdav server. It takes a
//! `http::Request`, checks authentication and the `If:` header, parses the
//! request headers and XML bodies, and calls a [`DavBackend`] that actually
//! stores resources, properties and locks. The replies of the backend are
//! turned into a `http::Response`, including `207 Multi-Status` XML and
//! `multipart/byteranges` bodies.
//!
//! The handler works with the standard http types from the `http` and
//! `http_body` crates, so it can be used straight away with hyper and
//! other libraries that use those types.
//!
//! ## Backend interface.
//!
//! - the library contains a [HTTP handler][DavHandler].
//! - you supply a [backend][DavBackend]. It reports its [`Capabilities`],
//!   and only the methods it implements are dispatched and advertised.
//! - locking is done by the backend as well. When the capabilities have
//!   `checklock` set, the handler asks the backend for the lock on a path
//!   before every modifying request.
//!
//! ## Implemented standards.
//!
//! - RFC4918: PROPFIND, PROPPATCH, MKCOL, COPY, MOVE, LOCK, UNLOCK and
//!   the `If:` header with state tokens, ETags and `Not`.
//! - RFC7233: single and multiple byte ranges on GET.
//! - partial PUT with the `Content-Range` header, like Apache's `mod_dav`.
//!
//! ## Example.
//!
//! A backend that serves a single read-only resource.
//!
//! ```no_run
//! use dav_server_base::backend::*;
//! use dav_server_base::{DavHandler, DavMethod};
//!
//! struct Hello;
//!
//! impl DavBackend for Hello {
//!     fn capabilities(&self) -> Capabilities {
//!         Capabilities::new(DavMethod::GET)
//!     }
//!
//!     fn get<'a>(&'a self, opts: &'a GetOptions) -> BackendFuture<'a, GetReply> {
//!         Box::pin(async move {
//!             if opts.path.as_str() != "/hello.txt" {
//!                 return Ok(GetReply::Status(DavStatus::Failed));
//!             }
//!             Ok(GetReply::Content(DavContent::data("hello world\n")))
//!         })
//!     }
//! }
//!
//! # async fn serve(req: http::Request<dav_server_base::body::Body>) {
//! let dav = DavHandler::builder(Hello).strip_prefix("/dav").build();
//! let resp = dav.handle(req).await;
//! # }
//! ```
//!
//! [`Webdav`]: https://tools.ietf.org/html/rfc4918

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod davhandler;
mod errors;
mod ls;
mod multistatus;
mod util;
mod xmltree_ext;

pub mod backend;
pub mod body;
pub mod conditional;
pub mod davheaders;
pub mod davpath;

use crate::errors::DavResult;

pub use crate::backend::{Capabilities, DavBackend, DavStatus};
pub use crate::davhandler::{DavBuilder, DavHandler};
pub use crate::util::DavMethod;
