//! sitedrop: command-line front end for the sitedrop ingestion core.
//!
//! Provides the YAML config loader, a filesystem [`store::FsObjectStore`],
//! a webhook notifier, a local authorizer and the clap CLI in [`cli`].

pub mod auth;
pub mod cli;
pub mod load_config;
pub mod notify;
pub mod store;

pub use cli::{run, Cli, Commands};
