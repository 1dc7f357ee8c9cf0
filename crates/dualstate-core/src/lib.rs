//! Core types, snapshots, ingestion, and storage for dualstate.
//!
//! This crate provides the foundational data structures used across all dualstate crates:
//! - [`types`]: Interface nodes, edges, scopes, ledger rows, and the store error type
//! - [`snapshot`]: Immutable [`GraphSnapshot`](snapshot::GraphSnapshot) values and their traversals
//! - [`ingest`]: The graph builder that turns an interface stream into a snapshot
//! - [`graph`]: The [`InterfaceGraph`](graph::InterfaceGraph) service with atomic snapshot swap
//! - [`ledger`]: The change ledger, the one writable proposal surface
//! - [`store`]: Storage traits, implemented for SQLite in [`sqlite`]
//! - [`export`]: Versioned record sets plus DOT and Mermaid renderings
//! - [`config`]: Configuration loading from `.dualstate/dualstate.json`
//! - [`hash`]: Deterministic content hashing (base62 of xxhash64)

pub mod active;
pub mod config;
pub mod error;
pub mod export;
pub mod graph;
pub mod hash;
pub mod ingest;
pub mod ledger;
pub mod snapshot;
pub mod sqlite;
pub mod sqlite_ledger;
pub mod sqlite_outcomes;
pub mod sqlite_queries;
pub mod store;
pub mod types;
