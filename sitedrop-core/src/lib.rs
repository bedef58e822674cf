#![doc = "sitedrop-core: ingestion, validation and lifecycle core for sitedrop."]

//! This crate holds every component of the static-site ingestion pipeline:
//! path and file-type rules, bundle inspection, archive and repository
//! sources, namespaced object storage, quota accounting and the site
//! lifecycle. Backends are reached through the traits in [`contract`];
//! in-memory implementations live in [`memory`] and [`store`].
//!
//! # Usage
//! Build an [`ingest::Ingestor`] once at startup and call its `submit_*`
//! methods; use [`ingest::Ingestor::lifecycle`] for activation and deletion.

pub mod archive;
pub mod classify;
pub mod config;
pub mod contract;
pub mod error;
pub mod ingest;
pub mod inspect;
pub mod ledger;
pub mod lifecycle;
pub mod memory;
pub mod model;
pub mod path;
pub mod repository;
pub mod store;
pub mod sweep;
