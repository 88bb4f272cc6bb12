//! # Core Module
//!
//! Stateless building blocks shared by the engine and the workflows.
//!
//! - **Configuration** ([`config`]) - Raw configuration documents, validated models and the loader
//! - **Data Models** ([`models`]) - Trials, parameter assignments and objective results
//! - **Environment** ([`environment`]) - Child-process environment overlay for the detector toolchain
//! - **File I/O** ([`io`]) - Output naming, geometry editing, driver scripts and the trial ledger
//! - **Utilities** ([`utils`]) - Command templates for objective invocations

pub mod config;
pub mod environment;
pub mod io;
pub mod models;
pub mod utils;
