//! Small ambient utilities shared by every crate in the workspace: the error
//! type, a task bundle for structured concurrency, and shutdown signalling.

pub mod bundle;
pub mod shutdown;

/// Error taxonomy kinds referenced throughout the RPC, land engine and
/// config subsystems. These are not exception types: they classify a
/// [`failure::Error`] so that callers (RPC responses, HTTP envelopes) can
/// report a stable machine-readable code without downcasting call chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ParamInvalid,
    NotFound,
    PermissionDenied,
    Timeout,
    ConnFail,
    NoInstance,
    FrameInvalid,
    SerializeFail,
    ConfigParse,
    ConfigValidate,
    DbFail,
    Conflict,
    ClientShutdown,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ParamInvalid => "PARAM_INVALID",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ConnFail => "CONN_FAIL",
            ErrorKind::NoInstance => "NO_INSTANCE",
            ErrorKind::FrameInvalid => "FRAME_INVALID",
            ErrorKind::SerializeFail => "SERIALIZE_FAIL",
            ErrorKind::ConfigParse => "CONFIG_PARSE",
            ErrorKind::ConfigValidate => "CONFIG_VALIDATE",
            ErrorKind::DbFail => "DB_FAIL",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::ClientShutdown => "CLIENT_SHUTDOWN",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Numeric code the GM HTTP envelope reports for this kind (§4.P, §7
    /// "HTTP endpoints emit the envelope with `code = taxonomy code`").
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::ParamInvalid => 400,
            ErrorKind::PermissionDenied => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::ConfigValidate => 422,
            ErrorKind::ConnFail => 502,
            ErrorKind::NoInstance | ErrorKind::ClientShutdown => 503,
            ErrorKind::Timeout => 504,
            ErrorKind::FrameInvalid
            | ErrorKind::SerializeFail
            | ErrorKind::ConfigParse
            | ErrorKind::DbFail
            | ErrorKind::Internal => 500,
        }
    }

    /// Inverse of [`ErrorKind::as_str`], used to reconstruct a tagged error
    /// carried across an RPC or HTTP boundary as a plain string code.
    pub fn parse(code: &str) -> ErrorKind {
        match code {
            "PARAM_INVALID" => ErrorKind::ParamInvalid,
            "NOT_FOUND" => ErrorKind::NotFound,
            "PERMISSION_DENIED" => ErrorKind::PermissionDenied,
            "TIMEOUT" => ErrorKind::Timeout,
            "CONN_FAIL" => ErrorKind::ConnFail,
            "NO_INSTANCE" => ErrorKind::NoInstance,
            "FRAME_INVALID" => ErrorKind::FrameInvalid,
            "SERIALIZE_FAIL" => ErrorKind::SerializeFail,
            "CONFIG_PARSE" => ErrorKind::ConfigParse,
            "CONFIG_VALIDATE" => ErrorKind::ConfigValidate,
            "DB_FAIL" => ErrorKind::DbFail,
            "CONFLICT" => ErrorKind::Conflict,
            "CLIENT_SHUTDOWN" => ErrorKind::ClientShutdown,
            _ => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged failure: a taxonomy kind plus a human-readable message.
///
/// Code that needs to surface one of these across an RPC or HTTP boundary
/// should construct it explicitly; code that just wants to propagate a
/// miscellaneous failure should keep using `errors::Error` via `?`.
#[derive(Debug, Clone)]
pub struct TaggedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaggedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TaggedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TaggedError {}

pub mod errors {
    pub use failure::err_msg;
    pub use failure::format_err;
    pub use failure::Error;

    pub type Result<T> = std::result::Result<T, Error>;

    /// Downcasts a `failure::Error` chain to find a [`crate::TaggedError`],
    /// defaulting to `Internal` when the failure carries no taxonomy tag.
    pub fn kind_of(err: &Error) -> crate::ErrorKind {
        if let Some(tagged) = err.downcast_ref::<crate::TaggedError>() {
            return tagged.kind;
        }
        crate::ErrorKind::Internal
    }
}

pub use async_std;
pub use async_trait::async_trait;
pub use futures;

/// Re-export so downstream crates can write `common::Result<T>` directly.
pub type Result<T> = errors::Result<T>;
pub use errors::Error;
