//! # Engine Module
//!
//! Runtime machinery of an optimization run: the parameter space handed to optimizers,
//! subprocess execution with timeouts and process-tree cleanup, the scheduler that bounds
//! concurrency, the trial executor and objective dispatch, and the optimizer capability.
//!
//! ## Architecture
//!
//! - **Parameter Space** ([`space`]) - Search-space description and candidate validation
//! - **Processes** ([`process`]) - One external program, bounded and cancellable
//! - **Scheduling** ([`scheduler`]) - Submit/poll/wait backend with a local implementation
//! - **Trial Execution** ([`executor`]) - Geometry edits, simulation and reconstruction
//! - **Objectives** ([`objectives`]) - Objective scripts and result parsing
//! - **Optimizers** ([`optimizer`]) - Proposal strategies and the Pareto front
//! - **State Tracking** ([`state`]) - Loop states and run summaries
//! - **Progress Monitoring** ([`progress`]) - Progress reporting callbacks
//! - **Error Handling** ([`error`]) - Fatal run errors

pub mod error;
pub mod executor;
pub mod objectives;
pub mod optimizer;
pub mod process;
pub mod progress;
pub mod scheduler;
pub mod space;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;
