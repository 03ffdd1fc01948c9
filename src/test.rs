//! Helper functions for testing the directory and the endpoint client.
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::LevelFilter;
use reqwest::StatusCode;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, LogType, SlotConfig};
use crate::constants::PROBE_TIMEOUT_SECS;
use crate::directory::token::{Token, TokenError, TokenFactory};
use crate::endpoint::{client, EndpointContext, ReadinessProbe};

pub fn init_logging() {
    // Errors only mean that a logger was already set up by an earlier test.
    let _ = config(vec![]).init_logging();
}

//------------ Configuration -------------------------------------------------

pub fn slot_config(label: &str, url: &str, sparse: bool) -> Arc<SlotConfig> {
    slot_config_with_password(label, url, None, sparse)
}

pub fn slot_config_with_password(label: &str, url: &str, password: Option<&str>, sparse: bool) -> Arc<SlotConfig> {
    Arc::new(SlotConfig {
        label: label.to_string(),
        description: format!("{} description", label),
        url: url.to_string(),
        user: "operator".to_string(),
        password: password.map(|password| SecretString::new(password.to_string())),
        sparse,
    })
}

pub fn config(slots: Vec<Arc<SlotConfig>>) -> Config {
    Config {
        debug: false,
        log_level: LevelFilter::Debug,
        log_type: LogType::Stderr,
        log_file: PathBuf::from("./p11nethsm.log"),
        syslog_facility: "user".to_string(),
        probe_timeout_secs: PROBE_TIMEOUT_SECS,
        slots,
    }
}

//------------ ScriptedProbe -------------------------------------------------

/// A readiness probe answering from a table of endpoint addresses.
///
/// Endpoints missing from the table behave as if they were unreachable.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    responses: HashMap<String, u16>,
    probed: Mutex<Vec<(String, CancellationToken)>>,
}

impl ScriptedProbe {
    pub fn respond(mut self, url: &str, status: u16) -> Self {
        self.responses.insert(url.to_string(), status);
        self
    }

    /// The addresses probed so far, in order.
    pub fn probed(&self) -> Vec<String> {
        self.lock().iter().map(|(url, _)| url.clone()).collect()
    }

    /// Whether the context of each probe has since been cancelled.
    pub fn cancelled_contexts(&self) -> Vec<bool> {
        self.lock().iter().map(|(_, token)| token.is_cancelled()).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, CancellationToken)>> {
        self.probed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReadinessProbe for ScriptedProbe {
    fn health_ready(&self, context: &EndpointContext) -> Result<StatusCode, client::Error> {
        let url = context.url();
        self.lock().push((url.to_string(), context.cancellation_token()));

        match self.responses.get(url) {
            Some(status) => StatusCode::from_u16(*status).map_err(|e| client::Error::response(url, e)),
            None => Err(client::Error::execute(url, "connection refused")),
        }
    }
}

//------------ FailingTokenFactory -------------------------------------------

/// Creates tokens, except for the one label it was told to fail on.
#[derive(Clone, Debug)]
pub struct FailingTokenFactory {
    fail_for: String,
}

impl FailingTokenFactory {
    pub fn new(fail_for: &str) -> Self {
        FailingTokenFactory {
            fail_for: fail_for.to_string(),
        }
    }
}

impl TokenFactory for FailingTokenFactory {
    fn create_token(&self, label: &str) -> Result<Token, TokenError> {
        if label == self.fail_for {
            Err(TokenError::Other(format!("refusing to create token '{}'", label)))
        } else {
            Token::new(label)
        }
    }
}

//------------ Local HTTP endpoints ------------------------------------------

/// Serves exactly one request with the given raw HTTP response.
///
/// Returns the base address of the server and a handle that yields the
/// head of the request it received.
pub fn one_shot_responder(response: &str) -> (String, JoinHandle<String>) {
    let listener = local_listener();
    let base = base_url(&listener);
    let response = response.to_string();

    let handle = thread::spawn(move || match listener.accept() {
        Ok((mut stream, _)) => {
            let request = read_request_head(&mut stream);
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.flush();
            request
        }
        Err(e) => panic!("could not accept connection: {}", e),
    });

    (base, handle)
}

/// A listener that accepts connections but never answers.
///
/// The listener must be kept alive for as long as it is used.
pub fn silent_listener() -> (String, TcpListener) {
    let listener = local_listener();
    (base_url(&listener), listener)
}

/// An address on the local host where nothing listens.
pub fn unreachable_url() -> String {
    let listener = local_listener();
    base_url(&listener)
}

fn local_listener() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").unwrap()
}

fn base_url(listener: &TcpListener) -> String {
    format!("http://{}", listener.local_addr().unwrap())
}

fn read_request_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&head).to_string()
}
