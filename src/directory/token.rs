//! The token hosted by a slot.
use std::fmt;

use cryptoki_sys::{CK_FLAGS, CKF_LOGIN_REQUIRED, CKF_TOKEN_INITIALIZED};

use crate::constants::TOKEN_LABEL_LEN;

//------------ Token ---------------------------------------------------------

/// The presence and identity of a token within a slot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Token {
    label: String,
    flags: CK_FLAGS,
}

impl Token {
    /// Creates a token with the given label.
    ///
    /// Fails if the label does not fit the label field of `CK_TOKEN_INFO`.
    pub fn new(label: &str) -> Result<Self, TokenError> {
        if label.len() > TOKEN_LABEL_LEN {
            return Err(TokenError::LabelTooLong(label.to_string()));
        }
        Ok(Token {
            label: label.to_string(),
            flags: CKF_TOKEN_INITIALIZED,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the label blank padded to the size of the label field.
    pub fn padded_label(&self) -> [u8; TOKEN_LABEL_LEN] {
        let mut padded = [b' '; TOKEN_LABEL_LEN];
        padded[..self.label.len()].copy_from_slice(self.label.as_bytes());
        padded
    }

    pub fn flags(&self) -> CK_FLAGS {
        self.flags
    }

    /// Marks the token as needing a login before any cryptographic use.
    pub fn set_login_required(&mut self) {
        self.flags |= CKF_LOGIN_REQUIRED;
    }

    pub fn is_login_required(&self) -> bool {
        self.flags & CKF_LOGIN_REQUIRED != 0
    }
}

//------------ TokenFactory --------------------------------------------------

/// Produces the token for a slot from the slot's label.
pub trait TokenFactory: Send + Sync {
    fn create_token(&self, label: &str) -> Result<Token, TokenError>;
}

/// Creates plain tokens through [`Token::new`].
#[derive(Clone, Copy, Debug, Default)]
pub struct LabelTokenFactory;

impl TokenFactory for LabelTokenFactory {
    fn create_token(&self, label: &str) -> Result<Token, TokenError> {
        Token::new(label)
    }
}

//------------ TokenError ----------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TokenError {
    LabelTooLong(String),
    Other(String),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenError::LabelTooLong(label) => {
                write!(f, "token label '{}' is longer than {} bytes", label, TOKEN_LABEL_LEN)
            }
            TokenError::Other(msg) => write!(f, "cannot create token: {}", msg),
        }
    }
}

impl std::error::Error for TokenError {}

//------------ Tests ---------------------------------------------------------
