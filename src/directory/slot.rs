//! A slot: one configured HSM endpoint, hosting at most one token.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use cryptoki_sys::{
    CK_FLAGS, CK_SESSION_HANDLE, CK_SLOT_ID, CKF_HW_SLOT, CKF_REMOVABLE_DEVICE, CKF_SERIAL_SESSION, CKF_TOKEN_PRESENT,
};

use crate::config::SlotConfig;
use crate::directory::session::{self, Session};
use crate::directory::token::Token;
use crate::endpoint::EndpointContext;
use crate::error::Error;

pub type SharedSession = Arc<Mutex<Session>>;

//------------ Slot ----------------------------------------------------------

#[derive(Debug)]
pub struct Slot {
    id: CK_SLOT_ID,
    description: String,
    config: Arc<SlotConfig>,
    context: EndpointContext,

    /// Set at most once, while the directory builds the slot.
    token: Option<Token>,

    sessions: RwLock<HashMap<CK_SESSION_HANDLE, SharedSession>>,
}

impl Slot {
    pub fn new(id: CK_SLOT_ID, config: Arc<SlotConfig>, context: EndpointContext) -> Self {
        Slot {
            id,
            description: config.description.clone(),
            config,
            context,
            token: None,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Places the token in the slot.
    ///
    /// Only done before the slot is published, a slot's token never changes
    /// afterwards.
    pub fn insert_token(&mut self, token: Token) -> Result<(), Error> {
        if self.token.is_some() {
            return Err(Error::device(
                "Slot::insert_token",
                format!("slot {} already holds a token", self.id),
            ));
        }
        self.token = Some(token);
        Ok(())
    }

    pub fn id(&self) -> CK_SLOT_ID {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn config(&self) -> &Arc<SlotConfig> {
        &self.config
    }

    pub fn context(&self) -> &EndpointContext {
        &self.context
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn is_token_present(&self) -> bool {
        self.token.is_some()
    }

    /// Returns the `CK_SLOT_INFO` flags for the slot.
    pub fn flags(&self) -> CK_FLAGS {
        let mut flags = CKF_HW_SLOT | CKF_REMOVABLE_DEVICE;
        if self.is_token_present() {
            flags |= CKF_TOKEN_PRESENT;
        }
        flags
    }

    /// Cancels the slot's execution context. Harmless to repeat.
    pub fn cancel(&self) {
        self.context.cancel();
    }
}

/// # Sessions
impl Slot {
    /// Opens a session against the slot's token and returns its handle.
    pub fn open_session(&self, flags: CK_FLAGS) -> Result<CK_SESSION_HANDLE, Error> {
        if flags & CKF_SERIAL_SESSION == 0 {
            return Err(Error::SessionParallelNotSupported("Slot::open_session"));
        }
        if !self.is_token_present() {
            return Err(Error::TokenNotPresent("Slot::open_session", self.id));
        }

        let handle = session::next_handle();
        let session = Arc::new(Mutex::new(Session::new(handle, self.id, flags)));
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, session);

        debug!("Opened session {} on slot {}", handle, self.id);
        Ok(handle)
    }

    pub fn close_session(&self, handle: CK_SESSION_HANDLE) -> Result<(), Error> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);

        match removed {
            Some(_) => {
                debug!("Closed session {} on slot {}", handle, self.id);
                Ok(())
            }
            None => Err(Error::SessionHandleInvalid("Slot::close_session", handle)),
        }
    }

    pub fn close_all_sessions(&self) {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn has_session(&self, handle: CK_SESSION_HANDLE) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&handle)
    }

    pub fn get_session(&self, handle: CK_SESSION_HANDLE) -> Result<SharedSession, Error> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
            .ok_or(Error::SessionHandleInvalid("Slot::get_session", handle))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use cryptoki_sys::CKF_RW_SESSION;

    use super::*;
    use crate::test;

    fn slot_with_token(id: CK_SLOT_ID) -> Slot {
        let config = test::slot_config("Token", "https://hsm.example.com/api/v1", true);
        let context = EndpointContext::new(&config.url, "", None);
        let mut slot = Slot::new(id, config, context);
        slot.insert_token(Token::new("Token").unwrap()).unwrap();
        slot
    }

    #[test]
    fn slot_without_token_refuses_sessions() {
        let config = test::slot_config("Empty", "https://hsm.example.com/api/v1", false);
        let context = EndpointContext::new(&config.url, "", None);
        let slot = Slot::new(1, config, context);

        assert!(!slot.is_token_present());
        assert_eq!(0, slot.flags() & CKF_TOKEN_PRESENT);
        assert_eq!(
            Err(Error::TokenNotPresent("Slot::open_session", 1)),
            slot.open_session(CKF_SERIAL_SESSION)
        );
    }

    #[test]
    fn token_is_inserted_once() {
        let mut slot = slot_with_token(0);
        assert_ne!(0, slot.flags() & CKF_TOKEN_PRESENT);
        assert!(slot.insert_token(Token::new("Other").unwrap()).is_err());
        assert_eq!("Token", slot.token().unwrap().label());
    }

    #[test]
    fn sessions_must_be_serial() {
        let slot = slot_with_token(0);
        assert_eq!(
            Err(Error::SessionParallelNotSupported("Slot::open_session")),
            slot.open_session(CKF_RW_SESSION)
        );
    }

    #[test]
    fn open_get_and_close_sessions() {
        let slot = slot_with_token(2);
        let ro = slot.open_session(CKF_SERIAL_SESSION).unwrap();
        let rw = slot.open_session(CKF_SERIAL_SESSION | CKF_RW_SESSION).unwrap();
        assert_ne!(ro, rw);
        assert_eq!(2, slot.session_count());

        let session = slot.get_session(rw).unwrap();
        let session = session.lock().unwrap();
        assert_eq!(rw, session.handle());
        assert_eq!(2, session.slot_id());
        assert!(session.is_read_write());
        drop(session);

        slot.close_session(ro).unwrap();
        assert!(!slot.has_session(ro));
        assert!(slot.has_session(rw));
        assert_eq!(
            Err(Error::SessionHandleInvalid("Slot::close_session", ro)),
            slot.close_session(ro)
        );

        slot.close_all_sessions();
        assert_eq!(0, slot.session_count());
        assert!(slot.get_session(rw).is_err());
    }

    #[test]
    fn cancel_reaches_context() {
        let slot = slot_with_token(0);
        slot.cancel();
        slot.cancel();
        assert!(slot.context().is_cancelled());
    }
}
