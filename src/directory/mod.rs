//! The slot and session directory.
//!
//! Turns the configured endpoints into slots, decides per slot whether its
//! token is visible, resolves session handles back to the slot that owns
//! them, and tears everything down again on shutdown.
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use cryptoki_sys::{CK_SESSION_HANDLE, CK_SLOT_ID};
use secrecy::ExposeSecret;

use crate::config::{Config, SlotConfig};
use crate::constants::SERVER_URL_TEMPLATE;
use crate::endpoint::credential::resolve_password;
use crate::endpoint::probe::check_ready;
use crate::endpoint::{ApiClient, EndpointContext, ReadinessProbe};
use crate::error::Error;

pub mod session;
pub mod slot;
pub mod token;

pub use self::session::Session;
pub use self::slot::{SharedSession, Slot};
pub use self::token::{LabelTokenFactory, Token, TokenError, TokenFactory};

//------------ Published -----------------------------------------------------

/// Everything a successful initialization makes visible to readers.
#[derive(Debug)]
struct Published {
    slots: Vec<Arc<Slot>>,
    config: Arc<Config>,
    client: Arc<dyn ReadinessProbe>,
}

//------------ SlotDirectory -------------------------------------------------

/// The directory of slots built from the configured endpoints.
///
/// A directory starts out not initialized. [`SlotDirectory::initialize`]
/// builds the slots and publishes them in one go, [`SlotDirectory::finalize`]
/// cancels them and returns the directory to its initial state. The two are
/// serialized against each other. Lookups may run concurrently from any
/// thread and see either the complete slot collection or none at all.
#[derive(Debug, Default)]
pub struct SlotDirectory {
    lifecycle: Mutex<()>,
    state: RwLock<Option<Published>>,
}

/// # Lifecycle
impl SlotDirectory {
    pub fn new() -> Self {
        SlotDirectory::default()
    }

    /// Initializes the directory using an [`ApiClient`] for the readiness
    /// checks and plain tokens named after the slot labels.
    pub fn initialize(&self, config: Arc<Config>) -> Result<(), Error> {
        let _lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        self.ensure_not_initialized("SlotDirectory::initialize")?;

        let client = ApiClient::with_timeout(SERVER_URL_TEMPLATE, config.debug, config.probe_timeout())
            .map_err(|e| Error::device("SlotDirectory::initialize", format!("cannot create client: {}", e)))?;

        self.build_and_publish(config, Arc::new(client), &LabelTokenFactory)
    }

    /// Initializes the directory with the given collaborators.
    ///
    /// Slots are built in configuration order, the slot for the n-th
    /// endpoint gets id n. If a token cannot be created for any endpoint
    /// the whole initialization fails and nothing is published. An
    /// endpoint that is unreachable, or not ready, merely leaves its slot
    /// without a token.
    pub fn initialize_with(
        &self,
        config: Arc<Config>,
        client: Arc<dyn ReadinessProbe>,
        tokens: &dyn TokenFactory,
    ) -> Result<(), Error> {
        let _lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        self.ensure_not_initialized("SlotDirectory::initialize")?;
        self.build_and_publish(config, client, tokens)
    }

    /// Cancels the context of every slot and marks the directory as not
    /// initialized.
    ///
    /// Does nothing if the directory is not initialized. Slots still held
    /// by callers stay usable for lookups but their contexts are cancelled.
    pub fn finalize(&self) {
        let _lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let Some(published) = state.as_ref() else {
            debug!("Directory is not initialized, nothing to finalize");
            return;
        };

        for slot in &published.slots {
            slot.cancel();
        }
        info!("Finalized directory with {} slot(s)", published.slots.len());
        *state = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    fn ensure_not_initialized(&self, op: &'static str) -> Result<(), Error> {
        if self.is_initialized() {
            Err(Error::AlreadyInitialized(op))
        } else {
            Ok(())
        }
    }

    /// Must only be called while holding the lifecycle lock.
    fn build_and_publish(
        &self,
        config: Arc<Config>,
        client: Arc<dyn ReadinessProbe>,
        tokens: &dyn TokenFactory,
    ) -> Result<(), Error> {
        info!("Initializing directory with {} endpoint(s)", config.slots.len());

        let mut slots: Vec<Arc<Slot>> = Vec::with_capacity(config.slots.len());
        for (index, slot_config) in config.slots.iter().enumerate() {
            match Self::build_slot(index as CK_SLOT_ID, slot_config, client.as_ref(), tokens) {
                Ok(slot) => slots.push(Arc::new(slot)),
                Err(e) => {
                    error!("Initialization aborted: {}", e);
                    for slot in &slots {
                        slot.cancel();
                    }
                    return Err(e);
                }
            }
        }

        let present = slots.iter().filter(|slot| slot.is_token_present()).count();
        info!("Directory ready: {} slot(s), {} with a token", slots.len(), present);

        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Some(Published { slots, config, client });
        Ok(())
    }

    fn build_slot(
        id: CK_SLOT_ID,
        slot_config: &Arc<SlotConfig>,
        probe: &dyn ReadinessProbe,
        tokens: &dyn TokenFactory,
    ) -> Result<Slot, Error> {
        let password = slot_config
            .password
            .as_ref()
            .and_then(|password| resolve_password(password.expose_secret()));
        let login_required = password.is_none();

        let context = EndpointContext::new(&slot_config.url, &slot_config.user, password);
        let mut slot = Slot::new(id, slot_config.clone(), context);

        let mut token = match tokens.create_token(&slot_config.label) {
            Ok(token) => token,
            Err(e) => {
                slot.cancel();
                return Err(Error::device(
                    "SlotDirectory::initialize",
                    format!("cannot create token for slot {} '{}': {}", id, slot_config.label, e),
                ));
            }
        };

        if login_required {
            token.set_login_required();
        }

        let visible = if slot_config.sparse {
            debug!("Slot {} '{}' is sparse, token shown without probing", id, slot_config.label);
            true
        } else {
            check_ready(probe, slot.context())
        };

        if visible {
            slot.insert_token(token)?;
        } else {
            info!("Slot {} '{}' has no token, endpoint {} is not ready", id, slot_config.label, slot_config.url);
        }

        Ok(slot)
    }
}

/// # Lookup
impl SlotDirectory {
    /// Returns the slot with the given id.
    pub fn get_slot(&self, id: CK_SLOT_ID) -> Result<Arc<Slot>, Error> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .as_ref()
            .and_then(|published| usize::try_from(id).ok().and_then(|index| published.slots.get(index)))
            .cloned()
            .ok_or(Error::SlotIdInvalid("SlotDirectory::get_slot", id))
    }

    /// Returns the slot that owns the session with the given handle.
    pub fn get_session_slot(&self, handle: CK_SESSION_HANDLE) -> Result<Arc<Slot>, Error> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .as_ref()
            .and_then(|published| published.slots.iter().find(|slot| slot.has_session(handle)))
            .cloned()
            .ok_or(Error::SessionHandleInvalid("SlotDirectory::get_session_slot", handle))
    }

    /// Returns the session with the given handle.
    pub fn get_session(&self, handle: CK_SESSION_HANDLE) -> Result<SharedSession, Error> {
        self.get_session_slot(handle)?.get_session(handle)
    }

    /// Returns all slots in id order.
    pub fn slots(&self) -> Vec<Arc<Slot>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|published| published.slots.clone())
            .unwrap_or_default()
    }

    pub fn slot_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|published| published.slots.len())
            .unwrap_or(0)
    }

    /// Returns the slot ids, optionally only those of slots with a token.
    pub fn slot_ids(&self, token_present_only: bool) -> Vec<CK_SLOT_ID> {
        self.slots()
            .iter()
            .filter(|slot| !token_present_only || slot.is_token_present())
            .map(|slot| slot.id())
            .collect()
    }

    pub fn config(&self) -> Option<Arc<Config>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|published| published.config.clone())
    }

    pub fn client(&self) -> Option<Arc<dyn ReadinessProbe>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|published| published.client.clone())
    }
}

//------------ Tests ---------------------------------------------------------
