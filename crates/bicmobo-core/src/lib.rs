//! # BIC-MOBO Core Library
//!
//! A configuration-driven experiment driver for multi-objective design studies of the
//! barrel imaging calorimeter. Each optimizer-proposed design point is turned into a
//! detector geometry and reconstruction settings, pushed through the external
//! simulation and reconstruction executables, scored by external objective scripts,
//! and fed back to the optimizer.
//!
//! ## Architectural Philosophy
//!
//! The library keeps the same three-layer split throughout:
//!
//! - **[`core`]: The Foundation.** Stateless data: configuration documents and their
//!   validated models, trial and objective models, the per-invocation environment
//!   overlay, file naming conventions, geometry editing and the trial ledger.
//!
//! - **[`engine`]: The Logic Core.** The stateful pieces of a run: the parameter space,
//!   the subprocess runner and scheduler capability, the trial executor, the objective
//!   dispatcher and the optimizer capability.
//!
//! - **[`workflows`]: The Public API.** The optimization loop driver that ties `engine`
//!   and `core` together into a complete run.

pub mod core;
pub mod engine;
pub mod workflows;
