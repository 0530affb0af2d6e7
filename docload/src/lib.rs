//! A load generator for CouchDB-style document stores.
//!
//! `docload` ramps a number of concurrent virtual users up and down over a series of stages.
//! Every virtual user runs iterations back to back, and every iteration issues one request:
//!
//! - The global iteration index selects the operation from a weighted [`Mix`]. The selection is
//!   a pure function of the index, so any ten consecutive iterations of the read mix contain
//!   exactly nine reads by id and one keyword lookup.
//! - The same index selects the target record from a shuffled [`FixtureSet`](dataset::FixtureSet).
//!   Two iterations of the same pass never target the same record.
//! - Writes pick a pre-generated article from a payload pool, and keyword lookups a word from a
//!   small vocabulary.
//!
//! A [`Monitor`](monitor::Monitor) evaluates thresholds such as `p(95)<1000` against the
//! aggregated request metrics and aborts the run as soon as one of them is breached.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod http;
pub mod iteration;
pub mod mix;
pub mod monitor;
pub mod observability;
pub mod report;
pub mod run;
pub mod schedule;
pub mod target;
pub mod threshold;

pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::mix::{Mix, OperationKind};
pub use crate::run::{LoadTest, RunReport, Verdict, run};
