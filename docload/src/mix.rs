//! Deterministic workload mixes.
//!
//! A [`Mix`] assigns an [`OperationKind`] to every iteration index. Instead of sampling kinds at
//! random, the mix lays out its slots over a fixed *period*: a mix of 9 by-id reads and 1 keyword
//! read has period 10, and indices `0..9` of every period map to by-id reads while index `9` maps
//! to the keyword read. Any window of iterations whose length is a multiple of the period
//! therefore contains the configured ratio exactly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The kind of request issued by one iteration.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Fetch a single document by its identifier.
    ReadById,
    /// Query the keyword view for a random keyword.
    ReadByKeyword,
    /// Store a new document.
    Create,
    /// Replace an existing document, conditioned on its version token.
    Update,
    /// Delete an existing document, conditioned on its version token.
    Delete,
}

impl OperationKind {
    /// All kinds, in reporting order.
    pub const ALL: [OperationKind; 5] = [
        OperationKind::ReadById,
        OperationKind::ReadByKeyword,
        OperationKind::Create,
        OperationKind::Update,
        OperationKind::Delete,
    ];

    /// Returns `true` if this operation acts on an existing record from the fixture set.
    pub fn needs_target(self) -> bool {
        matches!(self, Self::ReadById | Self::Update | Self::Delete)
    }

    /// Returns `true` if this operation sends a document body.
    pub fn needs_payload(self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }

    /// Returns `true` if this operation queries by keyword.
    pub fn needs_keyword(self) -> bool {
        matches!(self, Self::ReadByKeyword)
    }

    /// The name used in logs and summaries.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadById => "read_by_id",
            Self::ReadByKeyword => "read_by_keyword",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A consecutive run of indices within the mix period that map to the same kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Slot {
    /// The operation issued for indices in this slot.
    pub kind: OperationKind,
    /// How many indices of every period belong to this slot.
    pub weight: u32,
}

impl Slot {
    /// Creates a slot of `weight` indices for `kind`.
    pub fn new(kind: OperationKind, weight: u32) -> Self {
        Self { kind, weight }
    }
}

/// A deterministic, weighted mapping from iteration indices to operation kinds.
#[derive(Clone, Debug, PartialEq)]
pub struct Mix {
    /// Exclusive upper bound of each slot within the period, paired with its kind.
    bounds: Vec<(u64, OperationKind)>,
    period: u64,
}

impl Mix {
    /// Builds a mix from ordered slots.
    ///
    /// Slots are laid out in the given order, so `[ReadById x 9, ReadByKeyword x 1]` assigns the
    /// first nine indices of each period to by-id reads. Slots with zero weight are skipped.
    pub fn new(slots: impl IntoIterator<Item = Slot>) -> Result<Self> {
        let mut bounds = Vec::new();
        let mut period = 0u64;

        for slot in slots {
            if slot.weight == 0 {
                continue;
            }
            period += u64::from(slot.weight);
            bounds.push((period, slot.kind));
        }

        if period == 0 {
            return Err(Error::InvalidMix(
                "at least one slot needs a positive weight".into(),
            ));
        }

        Ok(Self { bounds, period })
    }

    /// 90% reads by id, 10% reads by keyword.
    pub fn read() -> Self {
        Self {
            bounds: vec![(9, OperationKind::ReadById), (10, OperationKind::ReadByKeyword)],
            period: 10,
        }
    }

    /// 30% creates, 60% conditional updates, 10% conditional deletes.
    pub fn write() -> Self {
        Self {
            bounds: vec![
                (3, OperationKind::Create),
                (9, OperationKind::Update),
                (10, OperationKind::Delete),
            ],
            period: 10,
        }
    }

    /// The number of indices after which the mix repeats.
    pub fn period(&self) -> u64 {
        self.period
    }

    /// Returns the operation for the given global iteration index.
    pub fn select(&self, iteration: u64) -> OperationKind {
        let position = iteration % self.period;
        self.bounds
            .iter()
            .find(|(bound, _)| position < *bound)
            .map(|(_, kind)| *kind)
            // The last bound equals the period, so every position falls into some slot.
            .unwrap_or(self.bounds[self.bounds.len() - 1].1)
    }

    /// Iterates over the distinct kinds this mix can select.
    pub fn kinds(&self) -> impl Iterator<Item = OperationKind> + '_ {
        self.bounds.iter().map(|(_, kind)| *kind)
    }

    /// Returns `true` if any selected operation acts on an existing record.
    pub fn needs_targets(&self) -> bool {
        self.kinds().any(OperationKind::needs_target)
    }

    /// Returns `true` if any selected operation sends a payload.
    pub fn needs_payloads(&self) -> bool {
        self.kinds().any(OperationKind::needs_payload)
    }

    /// Returns `true` if any selected operation queries by keyword.
    pub fn needs_keywords(&self) -> bool {
        self.kinds().any(OperationKind::needs_keyword)
    }
}
