//! Core types for cairn

use serde::{Deserialize, Serialize};

/// Scheduling hint for a task.
///
/// Among tasks that are ready at the same moment, `TryFirst` tasks are offered
/// before `Neutral` ones, which are offered before `TryLast` ones. A priority
/// never overrides a dependency edge.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Prefer running as early as possible
    TryFirst,
    /// No preference
    #[default]
    Neutral,
    /// Prefer running as late as possible
    TryLast,
}

impl Priority {
    /// Returns the string representation of the priority
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TryFirst => "try_first",
            Self::Neutral => "neutral",
            Self::TryLast => "try_last",
        }
    }

    /// Bucket index used by the scheduler, lower runs earlier
    pub fn rank(&self) -> usize {
        match self {
            Self::TryFirst => 0,
            Self::Neutral => 1,
            Self::TryLast => 2,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "try_first" | "first" => Ok(Self::TryFirst),
            "neutral" | "" => Ok(Self::Neutral),
            "try_last" | "last" => Ok(Self::TryLast),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}
