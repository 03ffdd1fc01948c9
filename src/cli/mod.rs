//! The `p11nethsm` command line tool.
//!
//! Inspects a configuration and the HSM endpoints it names, using the same
//! directory the PKCS#11 module builds.

pub mod report;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use secrecy::ExposeSecret;

use crate::config::{Config, ConfigError};
use crate::constants::SERVER_URL_TEMPLATE;
use crate::directory::SlotDirectory;
use crate::endpoint::credential::resolve_password;
use crate::endpoint::{client, ApiClient, EndpointContext};

use self::report::{ConfigSummary, EndpointHealth, Report, ReportError, ReportFormat, SlotInfo};

//------------ Options -------------------------------------------------------

/// The command line options for the p11nethsm tool.
#[derive(clap::Parser)]
#[command(version, about = "Inspect the slots presented by the NetHSM PKCS#11 module.")]
pub struct Options {
    #[command(flatten)]
    pub general: GeneralOptions,

    #[command(subcommand)]
    pub command: Command,
}

impl Options {
    /// Creates the options from the process arguments.
    ///
    /// If the arguments won't result in usable options, exits the process.
    pub fn from_args() -> Self {
        Self::parse()
    }

    pub fn run(self) -> Result<String, Error> {
        let config = self.general.load_config()?;
        config.init_logging()?;
        let report = self.command.run(config)?;
        Ok(report.format(self.general.format)?)
    }
}

//------------ GeneralOptions ------------------------------------------------

#[derive(clap::Args)]
pub struct GeneralOptions {
    /// The configuration file. Searched in the default locations if absent.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Report format: text or json.
    #[arg(short, long, default_value = "text")]
    pub format: ReportFormat,
}

impl GeneralOptions {
    /// Reads the configuration, which is verified while it is parsed.
    fn load_config(&self) -> Result<Config, Error> {
        match &self.config {
            Some(path) => Ok(Config::read_config(path)?),
            None => Ok(Config::create()?),
        }
    }
}

//------------ Command -------------------------------------------------------

#[derive(clap::Subcommand)]
pub enum Command {
    /// Check that the configuration can be read and is valid.
    Check,

    /// Build the slots and show whether each has a token.
    Slots,

    /// Show the system state reported by each endpoint.
    Health,
}

impl Command {
    pub fn run(self, config: Config) -> Result<Report, Error> {
        match self {
            Command::Check => Ok(Report::Config(ConfigSummary {
                slots: config.slots.len(),
            })),
            Command::Slots => Self::slots(config),
            Command::Health => Self::health(config),
        }
    }

    fn slots(config: Config) -> Result<Report, Error> {
        let directory = SlotDirectory::new();
        directory.initialize(Arc::new(config))?;

        let slots = directory.slots().iter().map(|slot| SlotInfo::from(slot.as_ref())).collect();
        directory.finalize();

        Ok(Report::Slots(slots))
    }

    fn health(config: Config) -> Result<Report, Error> {
        let client = ApiClient::with_timeout(SERVER_URL_TEMPLATE, config.debug, config.probe_timeout())?;

        let endpoints = config
            .slots
            .iter()
            .map(|slot| {
                let password = slot
                    .password
                    .as_ref()
                    .and_then(|password| resolve_password(password.expose_secret()));
                let context = EndpointContext::new(&slot.url, &slot.user, password);

                let (state, error) = match client.health_state(&context) {
                    Ok(state) => (Some(state), None),
                    Err(e) => {
                        warn!("Could not get state of '{}': {}", slot.label, e);
                        (None, Some(e.to_string()))
                    }
                };
                context.cancel();

                EndpointHealth {
                    label: slot.label.clone(),
                    url: slot.url.clone(),
                    state,
                    error,
                }
            })
            .collect();

        Ok(Report::Health(endpoints))
    }
}

//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    Config(ConfigError),
    Directory(crate::Error),
    Client(client::Error),
    Report(ReportError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Directory(e) => write!(f, "Directory error: {}", e),
            Error::Client(e) => write!(f, "Client error: {}", e),
            Error::Report(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<crate::Error> for Error {
    fn from(e: crate::Error) -> Self {
        Error::Directory(e)
    }
}

impl From<client::Error> for Error {
    fn from(e: client::Error) -> Self {
        Error::Client(e)
    }
}

impl From<ReportError> for Error {
    fn from(e: ReportError) -> Self {
        Error::Report(e)
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    #[test]
    fn parse_arguments() {
        let args = ["p11nethsm", "--config", "/tmp/p11.conf", "-f", "json", "slots"];
        let options = Options::try_parse_from(args).unwrap();
        assert_eq!(Some(PathBuf::from("/tmp/p11.conf")), options.general.config);
        assert_eq!(ReportFormat::Json, options.general.format);
        assert!(matches!(options.command, Command::Slots));

        let options = Options::try_parse_from(["p11nethsm", "check"]).unwrap();
        assert_eq!(ReportFormat::Text, options.general.format);
        assert!(Options::try_parse_from(["p11nethsm", "-f", "xml", "check"]).is_err());
    }

    #[test]
    fn load_config_verifies_once_while_parsing() {
        use std::io::Write;

        let mut valid = tempfile::NamedTempFile::new().unwrap();
        valid.write_all(b"[[slots]]\nlabel = \"A\"\nurl = \"https://a.example.com/api/v1\"\n").unwrap();
        let general = GeneralOptions {
            config: Some(valid.path().to_path_buf()),
            format: ReportFormat::Text,
        };
        assert_eq!(1, general.load_config().unwrap().slots.len());

        let mut invalid = tempfile::NamedTempFile::new().unwrap();
        invalid.write_all(b"[[slots]]\nlabel = \"A\"\nurl = \"not a url\"\n").unwrap();
        let general = GeneralOptions {
            config: Some(invalid.path().to_path_buf()),
            format: ReportFormat::Text,
        };
        assert!(matches!(general.load_config(), Err(Error::Config(ConfigError::InvalidUrl(..)))));
    }

    #[test]
    fn slots_command_reports_sparse_and_unreachable() {
        let config = test::config(vec![
            test::slot_config("Sparse", &test::unreachable_url(), true),
            test::slot_config_with_password("Down", &test::unreachable_url(), Some("secret"), false),
        ]);

        let report = Command::Slots.run(config).unwrap();
        let Report::Slots(slots) = report else {
            panic!("expected slot report");
        };

        assert_eq!(2, slots.len());
        assert!(slots[0].token_present);
        assert!(slots[0].login_required);
        assert!(!slots[1].token_present);
    }

    #[test]
    fn health_command_reports_unreachable_endpoint() {
        let config = test::config(vec![test::slot_config("Down", &test::unreachable_url(), false)]);

        let Report::Health(endpoints) = Command::Health.run(config).unwrap() else {
            panic!("expected health report");
        };
        assert_eq!(1, endpoints.len());
        assert!(endpoints[0].state.is_none());
        assert!(endpoints[0].error.is_some());
    }
}
