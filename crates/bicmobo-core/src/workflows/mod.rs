//! # Workflows Module
//!
//! High-level entry points that run a complete optimization from validated
//! configuration to a [`RunSummary`](crate::engine::state::RunSummary).
//!
//! - **Optimization Workflow** ([`optimize`]) - The propose, execute, evaluate and report
//!   loop with failure accounting, global timeout and interruption handling.

pub mod optimize;
