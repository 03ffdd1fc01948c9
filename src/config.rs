//! Configuration of the slot directory and of logging.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use std::{env, fmt, fs, io};

use log::LevelFilter;
use secrecy::SecretString;
use serde::de;
use serde::{Deserialize, Deserializer};
#[cfg(unix)]
use syslog::Facility;

use crate::constants::*;
use crate::util::ext_serde;

//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn log_level() -> LevelFilter {
        match env::var(P11NETHSM_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value for log level in env var {}, using 'info'",
                        P11NETHSM_ENV_LOG_LEVEL
                    );
                    LevelFilter::Info
                }
            },
            _ => LevelFilter::Info,
        }
    }
    fn log_type() -> LogType {
        LogType::Stderr
    }
    fn log_file() -> PathBuf {
        PathBuf::from("./p11nethsm.log")
    }
    fn syslog_facility() -> String {
        "user".to_string()
    }
    fn probe_timeout_secs() -> u64 {
        PROBE_TIMEOUT_SECS
    }
}

//------------ Config --------------------------------------------------------

/// Global configuration: the HSM endpoints to present as slots, plus logging.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Enables verbose logging of the traffic with the HSM endpoints.
    #[serde(default)]
    pub debug: bool,

    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "ext_serde::de_level_filter"
    )]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    pub log_file: PathBuf,

    #[serde(default = "ConfigDefaults::syslog_facility")]
    pub syslog_facility: String,

    #[serde(default = "ConfigDefaults::probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// One entry per slot, in slot id order.
    #[serde(default)]
    pub slots: Vec<Arc<SlotConfig>>,
}

/// # Accessors
impl Config {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// # Create
impl Config {
    /// Finds the config file in the default locations and reads it.
    pub fn create() -> Result<Self, ConfigError> {
        match Self::locate() {
            Some(path) => Self::read_config(&path),
            None => Err(ConfigError::Other(format!(
                "No configuration file '{}' found, set {} to point to one",
                P11NETHSM_CONFIG_FILE_NAME, P11NETHSM_ENV_CONFIG
            ))),
        }
    }

    /// Returns the first existing config file in the default locations.
    pub fn locate() -> Option<PathBuf> {
        let explicit = env::var_os(P11NETHSM_ENV_CONFIG).map(PathBuf::from);
        let home = env::var_os("HOME").map(PathBuf::from);
        Self::candidate_paths(explicit, home)
            .into_iter()
            .find(|path| path.is_file())
    }

    /// Lists the config file locations to try, most specific first.
    fn candidate_paths(explicit: Option<PathBuf>, home: Option<PathBuf>) -> Vec<PathBuf> {
        if let Some(path) = explicit {
            return vec![path];
        }

        let mut paths: Vec<PathBuf> = P11NETHSM_CONFIG_DIRS
            .iter()
            .map(|dir| Path::new(dir).join(P11NETHSM_CONFIG_FILE_NAME))
            .collect();

        if let Some(home) = home {
            paths.push(home.join(P11NETHSM_USER_CONFIG_DIR).join(P11NETHSM_CONFIG_FILE_NAME));
        }

        paths
    }

    pub fn read_config(file: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(file)
            .map_err(|e| ConfigError::Other(format!("Cannot read config file '{}': {}", file.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parses and verifies a config from its TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.verify()?;
        Ok(config)
    }

    pub fn verify(&self) -> Result<(), ConfigError> {
        if self.probe_timeout_secs == 0 {
            return Err(ConfigError::other("probe_timeout_secs must be at least 1"));
        }

        let mut labels = HashSet::new();
        for slot in &self.slots {
            if slot.label.is_empty() {
                return Err(ConfigError::other("every slot must have a label"));
            }
            if let Err(e) = url::Url::parse(&slot.url) {
                return Err(ConfigError::InvalidUrl(slot.label.clone(), e));
            }
            if !labels.insert(slot.label.as_str()) {
                return Err(ConfigError::Other(format!("duplicate slot label '{}'", slot.label)));
            }
        }

        if self.slots.is_empty() {
            warn!("No slots are configured, the token list will be empty");
        }

        Ok(())
    }
}

/// # Logging
impl Config {
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.stderr_logger(),
            #[cfg(unix)]
            LogType::Syslog => {
                let facility = Facility::from_str(&self.syslog_facility)
                    .map_err(|_| ConfigError::other("Invalid syslog_facility"))?;
                self.syslog_logger(facility)
            }
            #[cfg(not(unix))]
            LogType::Syslog => Err(ConfigError::other("syslog is only supported on Unix")),
        }
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger()
            .chain(io::stderr())
            .apply()
            .map_err(|e| ConfigError::Other(format!("Failed to init stderr logging: {}", e)))
    }

    /// Creates a file logger using the file provided by `path`.
    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = match fern::log_file(path) {
            Ok(file) => file,
            Err(err) => {
                let error_string = format!("Failed to open log file '{}': {}", path.display(), err);
                error!("{}", error_string.as_str());
                return Err(ConfigError::Other(error_string));
            }
        };
        self.fern_logger()
            .chain(file)
            .apply()
            .map_err(|e| ConfigError::Other(format!("Failed to init file logging: {}", e)))
    }

    /// Creates a syslog logger and configures correctly.
    #[cfg(unix)]
    fn syslog_logger(&self, facility: syslog::Facility) -> Result<(), ConfigError> {
        let process = env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .and_then(std::ffi::OsStr::to_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| String::from(P11NETHSM_APP));
        let formatter = syslog::Formatter3164 {
            facility,
            hostname: None,
            process,
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter.clone())
            .or_else(|_| syslog::tcp(formatter.clone(), ("127.0.0.1", 601)))
            .or_else(|_| syslog::udp(formatter, ("127.0.0.1", 0), ("127.0.0.1", 514)));
        match logger {
            Ok(logger) => self
                .fern_logger()
                .chain(logger)
                .apply()
                .map_err(|e| ConfigError::Other(format!("Failed to init syslog: {}", e))),
            Err(err) => {
                let msg = format!("Cannot connect to syslog: {}", err);
                Err(ConfigError::Other(msg))
            }
        }
    }

    /// Creates and returns a fern logger with log level tweaks
    fn fern_logger(&self) -> fern::Dispatch {
        // suppress overly noisy logging, unless asked to show the wire traffic
        let framework_level = if self.debug {
            self.log_level
        } else {
            self.log_level.min(LevelFilter::Warn)
        };

        let show_target = self.log_level == LevelFilter::Trace || self.log_level == LevelFilter::Debug;
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("rustls", framework_level)
            .level_for("hyper", framework_level)
            .level_for("hyper_util", framework_level)
            .level_for("mio", framework_level)
            .level_for("reqwest", framework_level)
            .level_for("want", framework_level)
            .level_for("h2", framework_level)
    }
}

//------------ SlotConfig ----------------------------------------------------

/// The configuration of one HSM endpoint, presented as one slot.
#[derive(Debug, Deserialize)]
pub struct SlotConfig {
    /// The token label.
    pub label: String,

    #[serde(default)]
    pub description: String,

    /// The base address of the endpoint's REST API.
    pub url: String,

    #[serde(default)]
    pub user: String,

    /// Either the password itself or `env:` followed by the name of the
    /// environment variable that holds it.
    #[serde(default)]
    pub password: Option<SecretString>,

    /// Shows the token without checking that the endpoint is ready.
    #[serde(default)]
    pub sparse: bool,
}

//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    TomlError(toml::de::Error),
    InvalidUrl(String, url::ParseError),
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::InvalidUrl(label, e) => write!(f, "Invalid url for slot '{}': {}", label, e),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::TomlError(e)
    }
}

//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
    Syslog,
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            "syslog" => Ok(LogType::Syslog),
            _ => Err(de::Error::custom(format!(
                "expected \"stderr\", \"file\" or \"syslog\", found : \"{}\"",
                string
            ))),
        }
    }
}

//------------ Tests ---------------------------------------------------------
