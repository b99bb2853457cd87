use thiserror::Error;

use crate::codes::{ResponseCode, response};

pub type Result<T> = std::result::Result<T, MtpError>;

#[derive(Debug, Error)]
pub enum MtpError {
    /// The device answered with a response code other than OK.
    #[error("{operation} failed: {code}")]
    Response {
        operation: &'static str,
        code: ResponseCode,
    },

    #[error("USB transfer timed out")]
    Timeout,

    #[error("malformed {what}: {detail}")]
    Decode { what: &'static str, detail: String },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("device session is closed")]
    Closed,

    #[error("no MTP session is open")]
    NoSession,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MtpError {
    pub(crate) fn decode(what: &'static str, detail: impl Into<String>) -> Self {
        MtpError::Decode {
            what,
            detail: detail.into(),
        }
    }

    /// Response code carried by this error, if the device produced one.
    pub fn response_code(&self) -> Option<u16> {
        match self {
            MtpError::Response { code, .. } => Some(code.0),
            _ => None,
        }
    }

    /// True when the device rejected the request because it does not implement
    /// the operation or one of its parameters.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self.response_code(),
            Some(
                response::OPERATION_NOT_SUPPORTED
                    | response::PARAMETER_NOT_SUPPORTED
                    | response::SPECIFICATION_BY_FORMAT_UNSUPPORTED
                    | response::SPECIFICATION_BY_GROUP_UNSUPPORTED
                    | response::SPECIFICATION_BY_DEPTH_UNSUPPORTED
                    | response::OBJECT_PROP_NOT_SUPPORTED
            )
        )
    }

    /// Maps the error onto the errno reported to filesystem callers.
    pub fn errno(&self) -> i32 {
        match self {
            MtpError::Response { code, .. } => match code.0 {
                response::INVALID_OBJECT_HANDLE | response::INVALID_PARENT_OBJECT => libc::ENOENT,
                response::INVALID_STORAGE_ID => libc::ENODEV,
                response::ACCESS_DENIED => libc::EACCES,
                response::STORE_FULL => libc::ENOSPC,
                response::STORE_READ_ONLY | response::OBJECT_WRITE_PROTECTED => libc::EROFS,
                response::DEVICE_BUSY => libc::EBUSY,
                response::OPERATION_NOT_SUPPORTED => libc::ENOSYS,
                response::INVALID_PARAMETER => libc::EINVAL,
                _ => libc::EIO,
            },
            MtpError::Closed | MtpError::NoSession => libc::ENODEV,
            _ => libc::EIO,
        }
    }
}
