//! Configuration documents for a run.
//!
//! A run is described by four documents: the run configuration (paths, executables,
//! detector and simulation inputs), the problem configuration (budget, concurrency and
//! optimizer settings), the design parameters and the objectives. They are first read
//! into permissive [`file`] structures, which callers may patch, and then validated
//! into the immutable [`models`] by the [`loader`].

pub mod defaults;
pub mod file;
pub mod loader;
pub mod models;

pub use loader::{ConfigDocuments, ConfigError, ConfigPaths, load_config};
pub use models::Config;
