//! The REST client used to reach the HSM endpoints.
//!
//! The PKCS#11 interface is synchronous, so the client owns a small tokio
//! runtime and blocks on it for every request. Each request is bounded by a
//! timeout and by the cancellation of the slot context it was issued for.
//!
//! Callers may themselves run inside a tokio runtime. Blocking on the
//! client's runtime is then moved to a separate thread, and the runtime is
//! shut down in the background when the client is dropped.
use std::fmt;
use std::future::Future;
use std::thread;
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use crate::constants::{
    HEALTH_READY_PATH, HEALTH_STATE_PATH, P11NETHSM_APP, P11NETHSM_VERSION, PROBE_TIMEOUT_SECS,
};
use crate::endpoint::{EndpointContext, ReadinessProbe};

//------------ ApiClient -----------------------------------------------------

#[derive(Debug)]
pub struct ApiClient {
    /// Client for all endpoints, verifying certificates.
    http: reqwest::Client,

    /// Client for endpoints on the local host, where self-signed
    /// certificates are accepted.
    http_local: reqwest::Client,

    /// Only taken when the client is dropped.
    runtime: Option<tokio::runtime::Runtime>,

    server_template: String,

    timeout: Duration,
}

impl ApiClient {
    /// Creates a client for the given server address template.
    ///
    /// The template contains `{URL}`, which is replaced by the address of the
    /// slot each request is issued for. If `debug` is set, connections log
    /// their traffic.
    pub fn new(server_template: &str, debug: bool) -> Result<Self, Error> {
        Self::with_timeout(server_template, debug, Duration::from_secs(PROBE_TIMEOUT_SECS))
    }

    pub fn with_timeout(server_template: &str, debug: bool, timeout: Duration) -> Result<Self, Error> {
        let build = |accept_invalid_certs: bool| {
            reqwest::ClientBuilder::new()
                .connect_timeout(timeout)
                .connection_verbose(debug)
                .user_agent(format!("{}/{}", P11NETHSM_APP, P11NETHSM_VERSION))
                .danger_accept_invalid_certs(accept_invalid_certs)
                .build()
                .map_err(|e| Error::request_build(server_template, e))
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("p11nethsm-http")
            .enable_all()
            .build()
            .map_err(|e| Error::request_build(server_template, format!("cannot start runtime: {}", e)))?;

        Ok(ApiClient {
            http: build(false)?,
            http_local: build(true)?,
            runtime: Some(runtime),
            server_template: server_template.to_string(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Queries the system state of the endpoint bound to `context`.
    pub fn health_state(&self, context: &EndpointContext) -> Result<SystemState, Error> {
        let uri = self.uri(context, HEALTH_STATE_PATH);
        let req = self.get(context, &uri)?;
        self.run(context, &uri, async {
            let res = req.send().await.map_err(|e| Error::execute(&uri, e))?;
            match res.status() {
                StatusCode::OK => {
                    let data: HealthStateData = res
                        .json()
                        .await
                        .map_err(|e| Error::response(&uri, format!("could not parse JSON response: {}", e)))?;
                    Ok(data.state)
                }
                status => Err(Error::response_unexpected_status(&uri, status)),
            }
        })
    }

    fn uri(&self, context: &EndpointContext, path: &str) -> String {
        format!("{}{}", context.server_url(&self.server_template), path)
    }

    fn client(&self, uri: &str) -> &reqwest::Client {
        if uri.starts_with("https://localhost") || uri.starts_with("https://127.0.0.1") {
            &self.http_local
        } else {
            &self.http
        }
    }

    /// Prepares a GET request, with basic authentication if the context has
    /// credentials.
    fn get(&self, context: &EndpointContext, uri: &str) -> Result<RequestBuilder, Error> {
        trace!("GET {}", uri);
        let mut req = self.client(uri).get(uri);
        if let Some(auth) = context.basic_auth() {
            let value = auth.header_value().map_err(|e| Error::request_build(uri, e))?;
            req = req.header(AUTHORIZATION, value);
        }
        Ok(req)
    }

    /// Drives `fut` to completion, unless the context is cancelled or the
    /// timeout passes first.
    fn run<F, T>(&self, context: &EndpointContext, uri: &str, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>> + Send,
        T: Send,
    {
        if context.is_cancelled() {
            return Err(Error::cancelled(uri));
        }

        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| Error::execute(uri, "client runtime is shut down"))?;

        let request = async {
            tokio::select! {
                _ = context.cancelled() => Err(Error::cancelled(uri)),
                res = tokio::time::timeout(self.timeout, fut) => match res {
                    Ok(res) => res,
                    Err(_) => Err(Error::Timeout(uri.to_string(), self.timeout)),
                },
            }
        };

        if tokio::runtime::Handle::try_current().is_ok() {
            // A runtime cannot be blocked on from within another one.
            thread::scope(|s| s.spawn(|| runtime.block_on(request)).join())
                .unwrap_or_else(|_| Err(Error::execute(uri, "request thread panicked")))
        } else {
            runtime.block_on(request)
        }
    }
}

impl Drop for ApiClient {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl ReadinessProbe for ApiClient {
    fn health_ready(&self, context: &EndpointContext) -> Result<StatusCode, Error> {
        let uri = self.uri(context, HEALTH_READY_PATH);
        let req = self.get(context, &uri)?;
        self.run(context, &uri, async {
            let res = req.send().await.map_err(|e| Error::execute(&uri, e))?;
            debug!("GET {} returned {}", uri, res.status());
            Ok::<_, Error>(res.status())
        })
    }
}

//------------ SystemState ---------------------------------------------------

/// The state an HSM reports on its health endpoint.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SystemState {
    Unprovisioned,
    Locked,
    Operational,
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SystemState::Unprovisioned => write!(f, "unprovisioned"),
            SystemState::Locked => write!(f, "locked"),
            SystemState::Operational => write!(f, "operational"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HealthStateData {
    state: SystemState,
}

//------------ Error ---------------------------------------------------------

type ErrorUri = String;
type ErrorMessage = String;

#[derive(Clone, Debug)]
pub enum Error {
    RequestBuild(ErrorUri, ErrorMessage),
    RequestExecute(ErrorUri, ErrorMessage),
    Response(ErrorUri, ErrorMessage),
    Timeout(ErrorUri, Duration),
    Cancelled(ErrorUri),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::RequestBuild(uri, msg) => write!(f, "Issue creating request for URI: {}, error: {}", uri, msg),
            Error::RequestExecute(uri, msg) => write!(f, "Issue accessing URI: {}, error: {}", uri, msg),
            Error::Response(uri, msg) => write!(f, "Issue processing response from URI: {}, error: {}", uri, msg),
            Error::Timeout(uri, after) => write!(f, "No response from URI: {} within {}s", uri, after.as_secs_f32()),
            Error::Cancelled(uri) => write!(f, "Request to URI: {} was cancelled", uri),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn request_build(uri: &str, msg: impl fmt::Display) -> Self {
        Error::RequestBuild(uri.to_string(), msg.to_string())
    }

    pub fn execute(uri: &str, msg: impl fmt::Display) -> Self {
        Error::RequestExecute(uri.to_string(), msg.to_string())
    }

    pub fn response(uri: &str, msg: impl fmt::Display) -> Self {
        Error::Response(uri.to_string(), msg.to_string())
    }

    pub fn cancelled(uri: &str) -> Self {
        Error::Cancelled(uri.to_string())
    }

    pub fn response_unexpected_status(uri: &str, status: StatusCode) -> Self {
        Error::Response(uri.to_string(), format!("unexpected status code {}", status))
    }
}

//------------ Tests ---------------------------------------------------------
