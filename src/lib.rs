//! The _p11nethsm_ library crate.
//!
//! Presents remote NetHSM endpoints as PKCS#11 slots. The [`SlotDirectory`]
//! turns the configured endpoints into slots, each hosting at most one token,
//! and resolves session handles back to the slot that owns them.

#[macro_use]
extern crate log;

pub mod cli;
pub mod config;
pub mod constants;
pub mod directory;
pub mod endpoint;
pub mod error;
pub mod test;
pub mod util;

pub use directory::SlotDirectory;
pub use error::Error;
