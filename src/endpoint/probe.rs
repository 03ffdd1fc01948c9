//! Checking whether an endpoint is ready to serve requests.
use std::fmt;

use reqwest::StatusCode;

use crate::constants::READY_STATUS_CEILING;
use crate::endpoint::{client, EndpointContext};

/// Issues a liveness query against a remote endpoint.
///
/// Implementations must honour the cancellation of the context they are
/// given and must not block without bound, an unreachable endpoint should
/// result in an error rather than a hang.
pub trait ReadinessProbe: fmt::Debug + Send + Sync {
    /// Queries the readiness of the endpoint bound to `context`.
    ///
    /// Returns the HTTP status of the response, or an error if no response
    /// was received at all.
    fn health_ready(&self, context: &EndpointContext) -> Result<StatusCode, client::Error>;
}

/// Returns whether a readiness response status means the endpoint is ready.
pub fn is_ready(status: StatusCode) -> bool {
    status.as_u16() < READY_STATUS_CEILING
}

/// Probes `context` and reports whether its endpoint is ready.
///
/// Failures are logged here and reported as not ready, they never propagate.
pub fn check_ready(probe: &dyn ReadinessProbe, context: &EndpointContext) -> bool {
    match probe.health_ready(context) {
        Ok(status) if is_ready(status) => true,
        Ok(status) => {
            warn!("Endpoint {} is not ready: status {}", context.url(), status);
            false
        }
        Err(e) => {
            warn!("Endpoint {} could not be probed: {}", context.url(), e);
            false
        }
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_range_counts_as_ready() {
        assert!(is_ready(StatusCode::OK));
        assert!(is_ready(StatusCode::NO_CONTENT));
        assert!(!is_ready(StatusCode::PERMANENT_REDIRECT));
        assert!(!is_ready(StatusCode::UNAUTHORIZED));
        assert!(!is_ready(StatusCode::PRECONDITION_FAILED));
        assert!(!is_ready(StatusCode::SERVICE_UNAVAILABLE));
    }
}
