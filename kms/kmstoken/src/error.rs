// Copyright (c) Microsoft. All rights reserved.

use pkcs11_sys::{
    CK_RV, CKR_ARGUMENTS_BAD, CKR_BUFFER_TOO_SMALL, CKR_FUNCTION_FAILED,
    CKR_FUNCTION_NOT_SUPPORTED, CKR_GENERAL_ERROR, CKR_OBJECT_HANDLE_INVALID,
};

/// The category of an [`Error`].
///
/// Each provider interface maps a kind to its own status vocabulary when the error
/// does not carry an explicit code.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    InvalidArgument,
    InvalidHandle,
    NotFound,
    NotSupported,
    OutOfRange,
    BadFlags,
    PermissionDenied,
    FailedPrecondition,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::InvalidHandle => "invalid handle",
            ErrorKind::NotFound => "not found",
            ErrorKind::NotSupported => "not supported",
            ErrorKind::OutOfRange => "out of range",
            ErrorKind::BadFlags => "bad flags",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::FailedPrecondition => "failed precondition",
            ErrorKind::Internal => "internal error",
        })
    }
}

/// An error raised by the token or by a provider interface built on it.
///
/// `code` is the status code reported across the foreign interface, in the vocabulary
/// of the layer that raised the error (a `CK_RV` for the token, a `SECURITY_STATUS`
/// for the key storage provider).
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    code: Option<u64>,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidArgument, message)
    }

    pub fn invalid_handle(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidHandle, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotFound, message)
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::NotSupported, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::OutOfRange, message)
    }

    pub fn bad_flags(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::BadFlags, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::PermissionDenied, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::FailedPrecondition, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Internal, message)
    }

    /// Attaches the foreign status code to report for this error.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<u64>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_rv(self, rv: CK_RV) -> Self {
        self.with_code(rv.0)
    }

    #[must_use]
    pub fn with_source<E>(mut self, err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.source = Some(err.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> Option<u64> {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The PKCS#11 return value for this error.
    pub fn rv(&self) -> CK_RV {
        match self.code {
            #[allow(clippy::cast_possible_truncation)]
            Some(code) => CK_RV(code as pkcs11_sys::CK_ULONG),
            None => match self.kind {
                ErrorKind::InvalidArgument | ErrorKind::BadFlags => CKR_ARGUMENTS_BAD,
                ErrorKind::InvalidHandle => CKR_OBJECT_HANDLE_INVALID,
                ErrorKind::NotSupported => CKR_FUNCTION_NOT_SUPPORTED,
                ErrorKind::OutOfRange => CKR_BUFFER_TOO_SMALL,
                ErrorKind::NotFound
                | ErrorKind::PermissionDenied
                | ErrorKind::FailedPrecondition => CKR_FUNCTION_FAILED,
                ErrorKind::Internal => CKR_GENERAL_ERROR,
            },
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|err| &**err as &(dyn std::error::Error + 'static))
    }
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Error::internal("openssl operation failed").with_source(err)
    }
}
