use serde::{Deserialize, Serialize};
use std::fmt;

/// Step of the per-trial pipeline that produces a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "sim")]
    Simulation,
    #[serde(rename = "rec")]
    Reconstruction,
    #[serde(rename = "ana")]
    Analysis,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Simulation => "sim",
            Stage::Reconstruction => "rec",
            Stage::Analysis => "ana",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "sim" => Some(Stage::Simulation),
            "rec" => Some(Stage::Reconstruction),
            "ana" => Some(Stage::Analysis),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
