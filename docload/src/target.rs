//! Resolution of iteration indices to existing records.
//!
//! Targets are picked by using the global iteration index as an offset into the shuffled
//! [`FixtureSet`]. Because indices are unique across all virtual users, two concurrent iterations
//! never act on the same record within one pass over the fixtures, and no record is hit more
//! often than `iterations / fixtures` times.

use serde::{Deserialize, Serialize};

use crate::dataset::{FixtureSet, RecordRef};

/// What happens once the iteration index exceeds the number of fixtures.
///
/// Records touched by updates and deletes have moved on from the version token in the catalog,
/// so a second pass targets them with stale tokens. The target store rejects those writes, which
/// shows up as failed requests rather than engine errors.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOverflow {
    /// Start over at the first fixture.
    #[default]
    Wrap,
    /// Stop issuing targeted operations after one pass.
    Cap,
}

/// Maps iteration indices to records of a fixture set.
#[derive(Clone, Copy, Debug, Default)]
pub struct TargetResolver {
    overflow: TargetOverflow,
}

impl TargetResolver {
    /// Creates a resolver with the given overflow policy.
    pub fn new(overflow: TargetOverflow) -> Self {
        Self { overflow }
    }

    /// The configured overflow policy.
    pub fn overflow(&self) -> TargetOverflow {
        self.overflow
    }

    /// Returns the record for the given global iteration index.
    ///
    /// Returns `None` for an empty fixture set, or when the index lies beyond the first pass and
    /// the policy is [`TargetOverflow::Cap`].
    pub fn resolve<'a>(&self, iteration: u64, fixtures: &'a FixtureSet) -> Option<&'a RecordRef> {
        let len = fixtures.len() as u64;
        if len == 0 {
            return None;
        }

        let offset = match self.overflow {
            TargetOverflow::Wrap => iteration % len,
            TargetOverflow::Cap if iteration < len => iteration,
            TargetOverflow::Cap => return None,
        };

        fixtures.get(offset as usize)
    }
}
