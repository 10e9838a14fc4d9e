use std::fmt;
use std::io;
use thiserror::Error;

pub const STATUS_OK: i32 = 0;
pub const STATUS_PENDING: i32 = 1;

pub const ERR_ABORT: i32 = -1;
pub const ERR_BAD_CONNECTION: i32 = -3;
pub const ERR_BAD_DATA: i32 = -4;
pub const ERR_BAD_PARAM: i32 = -7;
pub const ERR_BAD_REPLY: i32 = -8;
pub const ERR_DUPLICATE: i32 = -12;
pub const ERR_NOT_ALLOWED: i32 = -18;
pub const ERR_NOT_FOUND: i32 = -19;
pub const ERR_NO_DATA: i32 = -21;
pub const ERR_OPEN: i32 = -26;
pub const ERR_OUT_OF_BOUNDS: i32 = -27;
pub const ERR_REMOTE: i32 = -29;
pub const ERR_TIMEOUT: i32 = -32;
pub const ERR_TOO_LARGE: i32 = -33;
pub const ERR_TOO_SMALL: i32 = -34;
pub const ERR_UNSUPPORTED: i32 = -35;
pub const ERR_BUSY: i32 = -39;

/// Errors produced anywhere in the client, from codec to facade.
///
/// The type is `Clone` so that a tag can latch a terminal error and hand the
/// same value back on every later call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EipError {
    #[error("Operation aborted")]
    Abort,

    #[error("Connection error: {0}")]
    BadConnection(String),

    #[error("Bad data: {0}")]
    BadData(String),

    #[error("Invalid parameter: {0}")]
    BadParam(String),

    #[error("Malformed reply: {0}")]
    BadReply(String),

    #[error("Operation already in progress")]
    Busy,

    #[error("Object already tracked: {0}")]
    Duplicate(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("No data: {0}")]
    NoData(String),

    #[error("Not allowed: {0}")]
    NotAllowed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unable to open: {0}")]
    Open(String),

    #[error("Offset {offset} + {size} bytes is outside the {len} byte buffer")]
    OutOfBounds { offset: usize, size: usize, len: usize },

    #[error("EtherNet/IP command failed with status 0x{0:08X}")]
    EipStatus(u32),

    #[error("CIP error 0x{general:02X}{}: {}", fmt_extended(.extended), cip_message(.general))]
    CipStatus { general: u8, extended: Option<u16> },

    #[error("Operation timed out")]
    Timeout,

    #[error("Too large: {0}")]
    TooLarge(String),

    #[error("Too small: {0}")]
    TooSmall(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

fn cip_message(general: &u8) -> &'static str {
    crate::cip::status_message(*general)
}

fn fmt_extended(extended: &Option<u16>) -> String {
    match extended {
        Some(ext) => format!("/0x{:04X}", ext),
        None => String::new(),
    }
}

impl EipError {
    /// Numeric status code for the error, negative by convention.
    pub fn code(&self) -> i32 {
        match self {
            EipError::Abort => ERR_ABORT,
            EipError::BadConnection(_) | EipError::Io(_) => ERR_BAD_CONNECTION,
            EipError::BadData(_) => ERR_BAD_DATA,
            EipError::BadParam(_) | EipError::Format(_) => ERR_BAD_PARAM,
            EipError::BadReply(_) => ERR_BAD_REPLY,
            EipError::Busy => ERR_BUSY,
            EipError::Duplicate(_) => ERR_DUPLICATE,
            EipError::NoData(_) => ERR_NO_DATA,
            EipError::NotAllowed(_) => ERR_NOT_ALLOWED,
            EipError::NotFound(_) => ERR_NOT_FOUND,
            EipError::Open(_) => ERR_OPEN,
            EipError::OutOfBounds { .. } => ERR_OUT_OF_BOUNDS,
            EipError::EipStatus(_) | EipError::CipStatus { .. } => ERR_REMOTE,
            EipError::Timeout => ERR_TIMEOUT,
            EipError::TooLarge(_) => ERR_TOO_LARGE,
            EipError::TooSmall(_) => ERR_TOO_SMALL,
            EipError::Unsupported(_) => ERR_UNSUPPORTED,
        }
    }

    /// Errors after which a tag cannot make further progress.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EipError::BadParam(_)
                | EipError::Format(_)
                | EipError::Unsupported(_)
                | EipError::TooLarge(_)
                | EipError::Open(_)
                | EipError::Duplicate(_)
        )
    }

    /// Errors that indicate the underlying connection is unusable.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            EipError::BadConnection(_) | EipError::Io(_) | EipError::Timeout
        )
    }
}

impl From<io::Error> for EipError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => EipError::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => EipError::BadConnection(err.to_string()),
            _ => EipError::Io(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EipError>;

/// Progress of an asynchronous operation as seen by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Ok,
    Pending,
    Err(EipError),
}

impl Status {
    pub fn code(&self) -> i32 {
        match self {
            Status::Ok => STATUS_OK,
            Status::Pending => STATUS_PENDING,
            Status::Err(e) => e.code(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Status::Pending)
    }

    pub fn error(&self) -> Option<&EipError> {
        match self {
            Status::Err(e) => Some(e),
            _ => None,
        }
    }

    /// Converts a settled status into a `Result`. `Pending` maps to `Timeout`
    /// since callers only do this after giving up waiting.
    pub fn into_result(self) -> Result<()> {
        match self {
            Status::Ok => Ok(()),
            Status::Pending => Err(EipError::Timeout),
            Status::Err(e) => Err(e),
        }
    }
}

impl From<Result<()>> for Status {
    fn from(res: Result<()>) -> Self {
        match res {
            Ok(()) => Status::Ok,
            Err(e) => Status::Err(e),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "OK"),
            Status::Pending => write!(f, "PENDING"),
            Status::Err(e) => write!(f, "{} ({})", e, e.code()),
        }
    }
}
