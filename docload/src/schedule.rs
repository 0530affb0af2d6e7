//! The staged ramp profile that drives virtual user concurrency.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One segment of the ramp.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Stage {
    /// How long the stage lasts.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// The number of virtual users reached at the end of the stage.
    pub target: usize,
}

impl Stage {
    /// Creates a stage that ramps to `target` users over `duration`.
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

/// Where the run currently is within the profile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageInfo {
    /// Zero-based index of the current stage.
    pub index: usize,
    /// Total number of stages.
    pub count: usize,
    /// The number of virtual users the scheduler aims for right now.
    pub target: usize,
    /// The number of virtual users currently running.
    pub active: usize,
}

/// An ordered list of stages.
///
/// Within each stage, concurrency is interpolated linearly from the previous stage's target
/// (zero for the first stage) to the stage's own target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageProfile {
    stages: Vec<Stage>,
}

impl StageProfile {
    /// Creates a profile, rejecting an empty list of stages.
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(Error::NoStages);
        }
        Ok(Self { stages })
    }

    /// The stages in order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The combined duration of all stages.
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// The highest target across all stages.
    pub fn max_target(&self) -> usize {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Returns the index of the stage active at `elapsed`.
    ///
    /// Past the end of the profile, this returns the last stage.
    pub fn stage_at(&self, elapsed: Duration) -> usize {
        let mut end = Duration::ZERO;
        for (index, stage) in self.stages.iter().enumerate() {
            end += stage.duration;
            if elapsed < end {
                return index;
            }
        }
        self.stages.len() - 1
    }

    /// Returns the number of virtual users that should be active at `elapsed`.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        let mut start = Duration::ZERO;
        let mut previous = 0;

        for stage in &self.stages {
            let end = start + stage.duration;
            if elapsed < end {
                let progress = (elapsed - start).as_secs_f64() / stage.duration.as_secs_f64();
                let delta = stage.target as f64 - previous as f64;
                let target = (previous as f64 + delta * progress).floor();
                let (low, high) = (previous.min(stage.target), previous.max(stage.target));
                return (target.max(0.0) as usize).clamp(low, high);
            }
            start = end;
            previous = stage.target;
        }

        previous
    }

    /// Describes the profile position at `elapsed` with `active` running users.
    pub fn info_at(&self, elapsed: Duration, active: usize) -> StageInfo {
        StageInfo {
            index: self.stage_at(elapsed),
            count: self.stages.len(),
            target: self.target_at(elapsed),
            active,
        }
    }
}
