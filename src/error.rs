//! Errors raised by the slot and session directory.
//!
//! Every error names the operation that raised it and maps to the PKCS#11
//! return value a caller should hand back across the Cryptoki interface.
use std::fmt;

use cryptoki_sys::{
    CK_RV, CK_SESSION_HANDLE, CK_SLOT_ID, CKR_CRYPTOKI_ALREADY_INITIALIZED, CKR_DEVICE_ERROR,
    CKR_SESSION_HANDLE_INVALID, CKR_SESSION_PARALLEL_NOT_SUPPORTED, CKR_SLOT_ID_INVALID, CKR_TOKEN_NOT_PRESENT,
};

//------------ Error ---------------------------------------------------------

type Operation = &'static str;
type ErrorMessage = String;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// A token could not be constructed, or the remote client could not be
    /// built. Fatal to initialization.
    DeviceError(Operation, ErrorMessage),

    SlotIdInvalid(Operation, CK_SLOT_ID),
    SessionHandleInvalid(Operation, CK_SESSION_HANDLE),
    SessionParallelNotSupported(Operation),
    TokenNotPresent(Operation, CK_SLOT_ID),

    /// Initialization was requested while the directory is already ready.
    AlreadyInitialized(Operation),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::DeviceError(op, msg) => write!(f, "{}: {}", op, msg),
            Error::SlotIdInvalid(op, id) => write!(f, "{}: no slot with id {}", op, id),
            Error::SessionHandleInvalid(op, handle) => write!(f, "{}: session {} not found", op, handle),
            Error::SessionParallelNotSupported(op) => {
                write!(f, "{}: sessions must be opened with CKF_SERIAL_SESSION", op)
            }
            Error::TokenNotPresent(op, id) => write!(f, "{}: no token present in slot {}", op, id),
            Error::AlreadyInitialized(op) => write!(f, "{}: directory is already initialized", op),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn device(op: Operation, msg: impl fmt::Display) -> Self {
        Error::DeviceError(op, msg.to_string())
    }

    /// Returns the name of the operation that raised this error.
    pub fn operation(&self) -> &str {
        match self {
            Error::DeviceError(op, _)
            | Error::SlotIdInvalid(op, _)
            | Error::SessionHandleInvalid(op, _)
            | Error::SessionParallelNotSupported(op)
            | Error::TokenNotPresent(op, _)
            | Error::AlreadyInitialized(op) => op,
        }
    }

    /// Returns the PKCS#11 return value for this error.
    pub fn rv(&self) -> CK_RV {
        match self {
            Error::DeviceError(..) => CKR_DEVICE_ERROR,
            Error::SlotIdInvalid(..) => CKR_SLOT_ID_INVALID,
            Error::SessionHandleInvalid(..) => CKR_SESSION_HANDLE_INVALID,
            Error::SessionParallelNotSupported(_) => CKR_SESSION_PARALLEL_NOT_SUPPORTED,
            Error::TokenNotPresent(..) => CKR_TOKEN_NOT_PRESENT,
            Error::AlreadyInitialized(_) => CKR_CRYPTOKI_ALREADY_INITIALIZED,
        }
    }
}

impl From<Error> for CK_RV {
    fn from(e: Error) -> Self {
        e.rv()
    }
}

//------------ Tests ---------------------------------------------------------
