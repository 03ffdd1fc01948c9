//! The per-slot execution context used for every request to an endpoint.
use std::fmt;

use base64::{Engine as _, engine::general_purpose};
use reqwest::header::{HeaderValue, InvalidHeaderValue};
use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;

use crate::constants::SERVER_URL_VARIABLE;

//------------ BasicAuth -----------------------------------------------------

/// HTTP basic authentication credentials.
pub struct BasicAuth {
    user: String,
    password: SecretString,
}

impl BasicAuth {
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Returns the value for an `Authorization` header.
    ///
    /// The value is marked as sensitive so that it is left out of any
    /// debug logging done by the HTTP stack.
    pub fn header_value(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let credentials = format!("{}:{}", self.user, self.password.expose_secret());
        let mut value = HeaderValue::from_str(&format!("Basic {}", general_purpose::STANDARD.encode(credentials)))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

//------------ EndpointContext -----------------------------------------------

/// Binds requests to one endpoint.
///
/// Carries the endpoint address, the basic authentication credentials if a
/// password was supplied, and a cancellation handle. Every slot has its own
/// context, cancelling one never affects the requests of another slot.
///
/// The cancellation handle can be triggered from any thread. Requests bound
/// to the context watch it and unwind once it fires.
#[derive(Debug)]
pub struct EndpointContext {
    url: String,
    basic_auth: Option<BasicAuth>,
    cancel: CancellationToken,
}

impl EndpointContext {
    /// Creates a context for the endpoint at `url`.
    ///
    /// Basic authentication is attached only if `password` is given.
    pub fn new(url: &str, user: &str, password: Option<SecretString>) -> Self {
        let basic_auth = password.map(|password| BasicAuth {
            user: user.to_string(),
            password,
        });

        EndpointContext {
            url: url.to_string(),
            basic_auth,
            cancel: CancellationToken::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn basic_auth(&self) -> Option<&BasicAuth> {
        self.basic_auth.as_ref()
    }

    /// Substitutes this context's address into a server address template.
    pub fn server_url(&self, template: &str) -> String {
        template.replace(SERVER_URL_VARIABLE, &self.url)
    }

    /// Signals all requests bound to this context to stop.
    ///
    /// Calling this more than once is harmless.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes once the context has been cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Returns a handle that follows this context's cancellation, for work
    /// that must outlive a borrow of the context.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn password(s: &str) -> Option<SecretString> {
        Some(SecretString::new(s.to_string()))
    }

    #[test]
    fn basic_auth_only_with_password() {
        let with = EndpointContext::new("https://hsm/api/v1", "operator", password("secret"));
        let without = EndpointContext::new("https://hsm/api/v1", "operator", None);

        assert_eq!("operator", with.basic_auth().unwrap().user());
        assert!(without.basic_auth().is_none());
    }

    #[test]
    fn header_value_is_base64_of_user_and_password() {
        let ctx = EndpointContext::new("https://hsm/api/v1", "Aladdin", password("open sesame"));
        let value = ctx.basic_auth().unwrap().header_value().unwrap();

        assert_eq!("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==", value.to_str().unwrap());
        assert!(value.is_sensitive());
    }

    #[test]
    fn debug_output_hides_password() {
        let ctx = EndpointContext::new("https://hsm/api/v1", "operator", password("hunter2"));
        assert!(!format!("{:?}", ctx).contains("hunter2"));
    }

    #[test]
    fn server_url_substitutes_address() {
        let ctx = EndpointContext::new("https://10.0.0.1:8443/api/v1", "", None);
        assert_eq!("https://10.0.0.1:8443/api/v1", ctx.server_url(SERVER_URL_VARIABLE));
        assert_eq!("https://10.0.0.1:8443/api/v1/health", ctx.server_url("{URL}/health"));
    }

    #[test]
    fn cancel_is_idempotent() {
        let ctx = EndpointContext::new("https://hsm/api/v1", "", None);
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        ctx.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn contexts_cancel_independently() {
        let a = EndpointContext::new("https://a/api/v1", "", None);
        let b = EndpointContext::new("https://b/api/v1", "", None);
        a.cancel();
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
    }

    #[test]
    fn cancel_reaches_other_threads() {
        let ctx = EndpointContext::new("https://hsm/api/v1", "", None);
        let token = ctx.cancellation_token();

        let waiter = std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(token.cancelled());
            token.is_cancelled()
        });

        ctx.cancel();
        assert!(waiter.join().unwrap());
    }
}
