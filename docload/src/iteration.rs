//! Allocation and planning of iterations.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use rand::Rng;

use crate::dataset::{Dataset, RecordRef};
use crate::mix::{Mix, OperationKind};
use crate::target::{TargetOverflow, TargetResolver};

/// Hands out globally unique, monotonically increasing iteration indices.
///
/// A single counter is shared by all virtual users of a run. Target resolution relies on no two
/// iterations ever observing the same index.
#[derive(Debug)]
pub struct IterationCounter {
    next: AtomicU64,
    limit: Option<u64>,
}

impl IterationCounter {
    /// Creates a counter that hands out indices until `limit` is reached, if given.
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            next: AtomicU64::new(0),
            limit,
        }
    }

    /// Allocates the next index, or `None` once the limit has been reached.
    pub fn next(&self) -> Option<u64> {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        match self.limit {
            Some(limit) if index >= limit => None,
            _ => Some(index),
        }
    }

    /// The number of indices handed out so far.
    pub fn issued(&self) -> u64 {
        let next = self.next.load(Ordering::Relaxed);
        match self.limit {
            Some(limit) => next.min(limit),
            None => next,
        }
    }

    /// Returns `true` if no further indices will be handed out.
    pub fn is_exhausted(&self) -> bool {
        self.limit
            .is_some_and(|limit| self.next.load(Ordering::Relaxed) >= limit)
    }
}

/// Everything a single iteration needs to issue its request.
///
/// Contexts are created per iteration and dropped once the request completes.
#[derive(Clone, Debug)]
pub struct IterationContext {
    /// The global iteration index.
    pub index: u64,
    /// The operation selected by the mix.
    pub kind: OperationKind,
    /// The existing record acted on by reads by id, updates and deletes.
    pub record: Option<RecordRef>,
    /// The document body of creates and updates.
    pub payload: Option<Bytes>,
    /// The keyword of keyword lookups.
    pub keyword: Option<String>,
}

/// Turns iteration indices into [`IterationContext`]s.
#[derive(Clone, Debug)]
pub struct Planner {
    mix: Mix,
    resolver: TargetResolver,
    dataset: Arc<Dataset>,
}

impl Planner {
    /// Creates a planner over a shared dataset.
    pub fn new(mix: Mix, resolver: TargetResolver, dataset: Arc<Dataset>) -> Self {
        Self {
            mix,
            resolver,
            dataset,
        }
    }

    /// The workload mix used for selection.
    pub fn mix(&self) -> &Mix {
        &self.mix
    }

    /// The number of iterations this planner can plan before running out of targets.
    ///
    /// Under [`TargetOverflow::Cap`], a mix that targets existing records makes at most one pass
    /// over the fixtures. Otherwise, indices never run out.
    pub fn pass_limit(&self) -> Option<u64> {
        (self.resolver.overflow() == TargetOverflow::Cap && self.mix.needs_targets())
            .then(|| self.dataset.fixtures.len() as u64)
    }

    /// Plans the iteration with the given index.
    ///
    /// Returns `None` if the operation needs data that is not available, which happens when the
    /// resolver refuses to target records beyond the first pass.
    pub fn plan(&self, index: u64, rng: &mut impl Rng) -> Option<IterationContext> {
        let kind = self.mix.select(index);

        let record = if kind.needs_target() {
            Some(self.resolver.resolve(index, &self.dataset.fixtures)?.clone())
        } else {
            None
        };

        let payload = if kind.needs_payload() {
            Some(self.dataset.payloads.sample(rng)?)
        } else {
            None
        };

        let keyword = if kind.needs_keyword() {
            Some(self.dataset.keywords.sample(rng)?.to_owned())
        } else {
            None
        };

        Some(IterationContext {
            index,
            kind,
            record,
            payload,
            keyword,
        })
    }
}
