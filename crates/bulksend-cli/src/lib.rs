//! Bulksend CLI library
//!
//! Command-line front end for the dispatch engine: contact list loading and
//! validation, TOML configuration, and a dry-run transport for rehearsing a send.

pub mod cli;
pub mod commands;
pub mod config;
pub mod contacts;
pub mod dry_run;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::{run_dispatch, CommandDispatcher, DispatchRequest, DispatchSummary};
pub use config::{AppConfig, DryRunConfig};
pub use contacts::{
    check_contacts, load_contacts, parse_contacts, ContactListReport, JsonContactSource,
};
pub use dry_run::DryRunTransport;
pub use error::{CliError, Result};
