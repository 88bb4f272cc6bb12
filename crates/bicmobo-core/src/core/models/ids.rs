use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one trial within a run.
///
/// The tag derived from it names every per-trial directory and output file, so two
/// trials with distinct identifiers never share a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrialId(pub u64);

impl TrialId {
    pub fn tag(&self) -> String {
        format!("trial{:05}", self.0)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TrialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_is_zero_padded() {
        assert_eq!(TrialId(7).tag(), "trial00007");
        assert_eq!(TrialId(123456).tag(), "trial123456");
    }

    #[test]
    fn next_increments() {
        assert_eq!(TrialId(0).next(), TrialId(1));
    }
}
