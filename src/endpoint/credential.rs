//! Resolving configured slot passwords.
use std::env;

use secrecy::SecretString;

use crate::constants::PASSWORD_ENV_PREFIX;

/// Resolves a configured password against the process environment.
///
/// See [`resolve_password_with`].
pub fn resolve_password(configured: &str) -> Option<SecretString> {
    resolve_password_with(configured, |name| env::var(name).ok())
}

/// Resolves a configured password into the effective password.
///
/// A value of the form `env:NAME` stands for the content of the variable
/// `NAME` as returned by `lookup`, an unset variable counts as empty. Any
/// other value is the password itself.
///
/// Returns `None` if the effective password is empty: no credential is
/// supplied, basic authentication is off and the token needs a login before
/// it can be used. Resolution never fails.
pub fn resolve_password_with<F>(configured: &str, lookup: F) -> Option<SecretString>
where
    F: FnOnce(&str) -> Option<String>,
{
    let password = match configured.strip_prefix(PASSWORD_ENV_PREFIX) {
        Some(name) => lookup(name).unwrap_or_else(|| {
            warn!("Environment variable '{}' for slot password is not set", name);
            String::new()
        }),
        None => configured.to_string(),
    };

    if password.is_empty() {
        None
    } else {
        Some(SecretString::new(password))
    }
}

//------------ Tests ---------------------------------------------------------
