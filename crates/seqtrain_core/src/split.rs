//! Dataset partitions.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One of the three partitions a sequence dataset is cut into.
///
/// Partitions are contiguous ranges of windows in chronological order, so
/// `Train` always precedes `Dev`, which always precedes `Test`.
///
/// # Example
///
/// ```rust
/// use seqtrain_core::Split;
///
/// let split: Split = "dev".parse().unwrap();
/// assert_eq!(split, Split::Dev);
/// assert!(split.is_eval());
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    /// Windows used for gradient updates.
    #[default]
    Train,
    /// Windows used for model selection and early stopping.
    Dev,
    /// Held-out windows used only for the final report.
    Test,
}

impl Split {
    /// All splits in chronological order.
    pub const ALL: [Split; 3] = [Split::Train, Split::Dev, Split::Test];

    /// Check if this is the training split.
    #[must_use]
    pub const fn is_train(&self) -> bool {
        matches!(self, Split::Train)
    }

    /// Check if this is an evaluation split (dev or test).
    #[must_use]
    pub const fn is_eval(&self) -> bool {
        matches!(self, Split::Dev | Split::Test)
    }

    /// Lowercase name used as a metric prefix (`train_loss`, `dev_loss`, ...).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Dev => "dev",
            Split::Test => "test",
        }
    }

    /// Position of the split in chronological order (0=train, 1=dev, 2=test).
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Split::Train => 0,
            Split::Dev => 1,
            Split::Test => 2,
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Split::Train),
            "dev" => Ok(Split::Dev),
            "test" => Ok(Split::Test),
            other => Err(CoreError::UnknownSplit(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_checks() {
        assert!(Split::Train.is_train());
        assert!(!Split::Train.is_eval());
        assert!(Split::Dev.is_eval());
        assert!(Split::Test.is_eval());
    }

    #[test]
    fn test_split_order() {
        assert!(Split::Train < Split::Dev);
        assert!(Split::Dev < Split::Test);
        let indices: Vec<usize> = Split::ALL.iter().map(Split::index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_split_parse_and_display() {
        for split in Split::ALL {
            let parsed: Split = split.to_string().parse().unwrap();
            assert_eq!(parsed, split);
        }
        assert!("valid".parse::<Split>().is_err());
    }

    #[test]
    fn test_split_serde_lowercase() {
        let json = serde_json::to_string(&Split::Dev).unwrap();
        assert_eq!(json, "\"dev\"");
    }
}
