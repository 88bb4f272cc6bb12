//! File-system side of a trial: naming conventions, per-trial directory layout,
//! detector geometry edits, reproducible driver scripts and the run ledger.

pub mod compact;
pub mod ledger;
pub mod naming;
pub mod scripts;
