use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum number of replica acknowledgements a read or write needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    One,
    #[default]
    Quorum,
    All,
}

impl ConsistencyLevel {
    /// Replicas that must answer out of `replication_factor`.
    pub fn required_acks(self, replication_factor: usize) -> usize {
        match self {
            ConsistencyLevel::One => 1.min(replication_factor),
            ConsistencyLevel::Quorum => replication_factor / 2 + 1,
            ConsistencyLevel::All => replication_factor,
        }
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyLevel::One => write!(f, "ONE"),
            ConsistencyLevel::Quorum => write!(f, "QUORUM"),
            ConsistencyLevel::All => write!(f, "ALL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_acks() {
        assert_eq!(ConsistencyLevel::One.required_acks(3), 1);
        assert_eq!(ConsistencyLevel::Quorum.required_acks(3), 2);
        assert_eq!(ConsistencyLevel::Quorum.required_acks(5), 3);
        assert_eq!(ConsistencyLevel::Quorum.required_acks(1), 1);
        assert_eq!(ConsistencyLevel::All.required_acks(3), 3);
    }

    #[test]
    fn test_quorum_reads_overlap_quorum_writes() {
        for rf in 1..8 {
            let acks = ConsistencyLevel::Quorum.required_acks(rf);
            assert!(acks * 2 > rf, "rf={} quorum={}", rf, acks);
        }
    }
}
