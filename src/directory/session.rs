//! Sessions opened against a slot's token.
use std::sync::atomic::{AtomicU64, Ordering};

use cryptoki_sys::{
    CK_FLAGS, CK_SESSION_HANDLE, CK_SLOT_ID, CK_STATE, CKF_RW_SESSION, CKS_RO_PUBLIC_SESSION, CKS_RW_PUBLIC_SESSION,
};

/// The next session handle to hand out. Zero is `CK_INVALID_HANDLE`.
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Allocates a session handle that is unique within the process.
pub(super) fn next_handle() -> CK_SESSION_HANDLE {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed) as CK_SESSION_HANDLE
}

//------------ Session -------------------------------------------------------

#[derive(Debug)]
pub struct Session {
    handle: CK_SESSION_HANDLE,
    slot_id: CK_SLOT_ID,
    flags: CK_FLAGS,
}

impl Session {
    pub(super) fn new(handle: CK_SESSION_HANDLE, slot_id: CK_SLOT_ID, flags: CK_FLAGS) -> Self {
        Session { handle, slot_id, flags }
    }

    pub fn handle(&self) -> CK_SESSION_HANDLE {
        self.handle
    }

    pub fn slot_id(&self) -> CK_SLOT_ID {
        self.slot_id
    }

    pub fn flags(&self) -> CK_FLAGS {
        self.flags
    }

    pub fn is_read_write(&self) -> bool {
        self.flags & CKF_RW_SESSION != 0
    }

    pub fn state(&self) -> CK_STATE {
        if self.is_read_write() {
            CKS_RW_PUBLIC_SESSION
        } else {
            CKS_RO_PUBLIC_SESSION
        }
    }
}

//------------ Tests ---------------------------------------------------------
