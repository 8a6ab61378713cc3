use std::error::Error;
use std::io::{self, ErrorKind};

use http::StatusCode;
use xml::writer::Error as XmlWError;

use crate::backend::BackendError;

pub(crate) type DavResult<T> = Result<T, DavError>;

#[derive(Debug)]
pub(crate) enum DavError {
    XmlReadError,  // error reading/parsing xml
    XmlParseError, // error interpreting xml
    XmlWriteError(XmlWError),
    InvalidPath,   // error parsing path
    UnknownDavMethod,
    Status(StatusCode),
    StatusClose(StatusCode),
    Backend(BackendError),
    IoError(io::Error),
}

impl Error for DavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DavError::Backend(e) => Some(e),
            DavError::IoError(e) => Some(e),
            DavError::XmlWriteError(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for DavError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DavError::XmlReadError => write!(f, "XML parse error"),
            DavError::XmlParseError => write!(f, "XML parse error"),
            DavError::XmlWriteError(_) => write!(f, "XML generate error"),
            DavError::InvalidPath => write!(f, "invalid path"),
            DavError::UnknownDavMethod => write!(f, "unknown webdav method"),
            DavError::Status(s) | DavError::StatusClose(s) => write!(f, "{s}"),
            DavError::Backend(e) => write!(f, "backend error: {e}"),
            DavError::IoError(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl From<BackendError> for DavError {
    fn from(e: BackendError) -> Self {
        DavError::Backend(e)
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl From<StatusCode> for DavError {
    fn from(e: StatusCode) -> Self {
        DavError::Status(e)
    }
}

impl From<XmlWError> for DavError {
    fn from(e: XmlWError) -> Self {
        DavError::XmlWriteError(e)
    }
}

impl From<xmltree::ParseError> for DavError {
    fn from(_e: xmltree::ParseError) -> Self {
        DavError::XmlReadError
    }
}

fn ioerror_to_status(ioerror: &io::Error) -> StatusCode {
    match ioerror.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl DavError {
    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            DavError::XmlReadError => StatusCode::BAD_REQUEST,
            DavError::XmlParseError => StatusCode::BAD_REQUEST,
            DavError::XmlWriteError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::UnknownDavMethod => StatusCode::METHOD_NOT_ALLOWED,
            DavError::Status(e) => *e,
            DavError::StatusClose(e) => *e,
            DavError::Backend(e) => e.statuscode(),
            DavError::IoError(e) => ioerror_to_status(e),
        }
    }

    // the connection is in an unknown state after an I/O error, or the
    // request body was not read completely.
    pub(crate) fn must_close(&self) -> bool {
        matches!(
            self,
            &DavError::StatusClose(_)
                | &DavError::IoError(_)
                | &DavError::Backend(BackendError::Io(_))
        )
    }
}
