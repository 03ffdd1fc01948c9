//! Various crate-wide constants.

//------------ Binary Names -------------------------------------------------

/// The friendly name of the `p11nethsm` binary.
pub const P11NETHSM_APP: &str = "p11nethsm";

/// The version of this crate, used in the HTTP user agent.
pub const P11NETHSM_VERSION: &str = env!("CARGO_PKG_VERSION");


//------------ Config Files Paths -------------------------------------------

/// The file name of the configuration file.
pub const P11NETHSM_CONFIG_FILE_NAME: &str = "p11nethsm.conf";

/// The system directories searched for the configuration file, in order.
pub const P11NETHSM_CONFIG_DIRS: &[&str] = &["/etc/nitrokey", "/usr/local/etc/nitrokey"];

/// The per-user directory searched last, relative to `$HOME`.
pub const P11NETHSM_USER_CONFIG_DIR: &str = ".config/nitrokey";


//------------ Environment Variables ----------------------------------------

/// The environment variable with an explicit path to the config file.
///
/// If set, no other location is searched.
pub const P11NETHSM_ENV_CONFIG: &str = "P11NETHSM_CONFIG";

/// The environment variable with the log level.
///
/// The variable should contain the name of a [`log::LevelFilter`]. It will
/// be overwritten by the config file. The default is “info.”
pub const P11NETHSM_ENV_LOG_LEVEL: &str = "P11NETHSM_LOG_LEVEL";

/// The prefix marking a slot password as the name of an environment
/// variable holding the actual password.
pub const PASSWORD_ENV_PREFIX: &str = "env:";


//------------ Remote API ---------------------------------------------------

/// The variable substituted with a slot's endpoint address.
pub const SERVER_URL_VARIABLE: &str = "{URL}";

/// The server address template handed to the API client.
///
/// Every slot supplies its own address at request time, so the template is
/// nothing but the variable.
pub const SERVER_URL_TEMPLATE: &str = SERVER_URL_VARIABLE;

/// The path of the readiness endpoint, relative to the server address.
pub const HEALTH_READY_PATH: &str = "/health/ready";

/// The path of the health state endpoint, relative to the server address.
pub const HEALTH_STATE_PATH: &str = "/health/state";

/// Readiness responses with a status below this count as ready.
pub const READY_STATUS_CEILING: u16 = 300;

/// Default seconds to wait for a readiness probe before giving up.
pub const PROBE_TIMEOUT_SECS: u64 = 10;


//------------ PKCS#11 ------------------------------------------------------

/// The size of the blank padded label field in `CK_TOKEN_INFO`.
pub const TOKEN_LABEL_LEN: usize = 32;
