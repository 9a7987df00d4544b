//! Pipeline stages.

use serde::{Deserialize, Serialize};

/// One ordered step of a job's pipeline. Stages execute strictly
/// sequentially per job; no stage starts before the previous completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Call the extraction service on the accumulated conversation.
    Extract,
    /// Dual-store prepare: open the relational transaction, insert, flush.
    Persist,
    /// Dual-store externalize + finalize: index write, then commit.
    Index,
    /// Best-effort notification and terminal bookkeeping.
    Finalize,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Extract, Stage::Persist, Stage::Index, Stage::Finalize];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Persist => "persist",
            Stage::Index => "index",
            Stage::Finalize => "finalize",
        }
    }

    /// Percent complete once this stage has finished.
    pub fn percent_complete(self) -> u8 {
        match self {
            Stage::Extract => 25,
            Stage::Persist => 50,
            Stage::Index => 75,
            Stage::Finalize => 100,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered_and_complete_at_100() {
        let percents: Vec<u8> = Stage::ALL.iter().map(|s| s.percent_complete()).collect();
        assert!(percents.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*percents.last().unwrap(), 100);
    }
}
