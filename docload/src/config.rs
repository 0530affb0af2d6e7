//! Configuration for a load test run.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `DOCLOAD__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! The defaults describe a read-heavy run against a CouchDB `wiki_articles` database on
//! `localhost`, ramping up to 1000 virtual users over five minutes.
//!
//! # Environment Variables
//!
//! Environment variables use `DOCLOAD__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `DOCLOAD__REMOTE__URL=http://10.0.0.5:5984` sets the target store
//! - `DOCLOAD__REMOTE__PASSWORD=hunter2` sets the basic auth password
//! - `DOCLOAD__SCENARIO=write` switches to the write mix
//!
//! # YAML Configuration File
//!
//! ```yaml
//! remote:
//!   url: http://10.0.0.5:5984
//!   username: admin
//!   password: hunter2
//! scenario: write
//! catalog: article.json
//! stages:
//!   - duration: 1m
//!     target: 100
//!   - duration: 5m
//!     target: 1000
//! thresholds:
//!   - metric: http_req_failed
//!     threshold: rate<0.01
//!     abort_on_fail: true
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::dataset::{DEFAULT_KEYWORDS, WordRange};
use crate::error::Result;
use crate::http::Endpoints;
use crate::mix::{Mix, Slot};
use crate::schedule::{Stage, StageProfile};
use crate::target::TargetOverflow;
use crate::threshold::{Threshold, ThresholdConfig};

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "DOCLOAD__";

/// Newtype around `String` that protects against accidental logging of secrets in our
/// configuration struct. Use with [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    /// Returns the secret value.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Connection settings for the target document store.
///
/// Used in: [`Config::remote`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Remote {
    /// Base URL of the store, such as `http://localhost:5984`.
    ///
    /// # Environment Variable
    ///
    /// `DOCLOAD__REMOTE__URL`
    pub url: String,

    /// User name for HTTP basic authentication.
    pub username: String,

    /// Password for HTTP basic authentication.
    ///
    /// # Environment Variable
    ///
    /// `DOCLOAD__REMOTE__PASSWORD`
    pub password: SecretBox<ConfigSecret>,

    /// Upper bound for a single request, including reading the response.
    ///
    /// Requests exceeding this budget are recorded as failed with a timeout.
    ///
    /// # Default
    ///
    /// `60s`
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// The header carrying the version token of conditional updates and deletes.
    ///
    /// # Default
    ///
    /// `If-Match`
    pub version_header: String,
}

impl Default for Remote {
    fn default() -> Self {
        Self {
            url: "http://localhost:5984".into(),
            username: String::new(),
            password: SecretBox::new(Box::default()),
            timeout: Duration::from_secs(60),
            version_header: "If-Match".into(),
        }
    }
}

/// Built-in workload mixes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    /// 90% reads by id, 10% keyword lookups.
    #[default]
    Read,
    /// 30% creates, 60% updates, 10% deletes.
    Write,
}

/// Settings for the pre-generated write payloads.
///
/// Used in: [`Config::payloads`]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Payloads {
    /// Number of documents generated during setup.
    ///
    /// # Default
    ///
    /// `10000`
    pub pool_size: usize,

    /// Number of random words in the article text.
    ///
    /// # Default
    ///
    /// `{ min: 500, max: 2000 }`
    pub text_words: WordRange,
}

impl Default for Payloads {
    fn default() -> Self {
        Self {
            pool_size: 10_000,
            text_words: WordRange::default(),
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    #[default]
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr, so they do not interleave with the run summary.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable provides more granular control per module if needed.
    /// Individual failed requests are logged at `DEBUG`.
    ///
    /// # Default
    ///
    /// `INFO`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, simplified otherwise)
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Main configuration struct for a load test run.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The target document store.
    pub remote: Remote,

    /// URL templates of the target store's operations.
    pub endpoints: Endpoints,

    /// The built-in workload mix, unless [`mix`](Self::mix) is set.
    ///
    /// # Default
    ///
    /// `read`
    pub scenario: Scenario,

    /// An explicit workload mix, laid out in order over its period.
    ///
    /// ```yaml
    /// mix:
    ///   - kind: read_by_id
    ///     weight: 8
    ///   - kind: update
    ///     weight: 2
    /// ```
    pub mix: Option<Vec<Slot>>,

    /// Path to the catalog of existing records, a CouchDB `_all_docs` response.
    ///
    /// Only read if the mix targets existing records.
    ///
    /// # Default
    ///
    /// `article.json`
    pub catalog: PathBuf,

    /// Behavior once the iteration count exceeds the number of records in the catalog.
    ///
    /// # Default
    ///
    /// `wrap`
    pub target_overflow: TargetOverflow,

    /// Upper bound for the total number of iterations across all virtual users.
    ///
    /// # Default
    ///
    /// Unbounded; the run lasts for the duration of all stages.
    pub iterations: Option<u64>,

    /// Pre-generated write payloads.
    pub payloads: Payloads,

    /// The vocabulary of keyword lookups.
    pub keywords: Vec<String>,

    /// The ramp profile.
    ///
    /// # Default
    ///
    /// A single stage ramping to 1000 users over 5 minutes.
    pub stages: Vec<Stage>,

    /// Service level thresholds.
    ///
    /// # Default
    ///
    /// Less than 1% failed requests and a p95 latency below one second, both aborting the run
    /// on violation.
    pub thresholds: Vec<ThresholdConfig>,

    /// Time allowed for loading the catalog and generating payloads.
    ///
    /// # Default
    ///
    /// `2m`
    #[serde(with = "humantime_serde")]
    pub setup_timeout: Duration,

    /// Time granted to in-flight iterations after the last stage or an abort.
    ///
    /// # Default
    ///
    /// `30s`
    #[serde(with = "humantime_serde")]
    pub graceful_stop: Duration,

    /// How often abort-on-fail thresholds are evaluated during the run.
    ///
    /// # Default
    ///
    /// `1s`
    #[serde(with = "humantime_serde")]
    pub threshold_interval: Duration,

    /// How often the scheduler adjusts the number of virtual users.
    ///
    /// # Default
    ///
    /// `100ms`
    #[serde(with = "humantime_serde")]
    pub scheduler_tick: Duration,

    /// Logging configuration.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: Remote::default(),
            endpoints: Endpoints::default(),
            scenario: Scenario::default(),
            mix: None,
            catalog: PathBuf::from("article.json"),
            target_overflow: TargetOverflow::default(),
            iterations: None,
            payloads: Payloads::default(),
            keywords: DEFAULT_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            stages: vec![Stage::new(Duration::from_secs(5 * 60), 1000)],
            thresholds: vec![
                ThresholdConfig::default_failure_rate(),
                ThresholdConfig::default_latency(),
            ],
            setup_timeout: Duration::from_secs(2 * 60),
            graceful_stop: Duration::from_secs(30),
            threshold_interval: Duration::from_secs(1),
            scheduler_tick: Duration::from_millis(100),
            logging: Logging::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided)
    /// 3. Environment variables (prefixed with `DOCLOAD__`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    /// Builds the workload mix from [`mix`](Self::mix) or [`scenario`](Self::scenario).
    pub fn mix(&self) -> Result<Mix> {
        match (&self.mix, self.scenario) {
            (Some(slots), _) => Mix::new(slots.iter().copied()),
            (None, Scenario::Read) => Ok(Mix::read()),
            (None, Scenario::Write) => Ok(Mix::write()),
        }
    }

    /// Builds the validated ramp profile.
    pub fn stage_profile(&self) -> Result<StageProfile> {
        StageProfile::new(self.stages.clone())
    }

    /// Parses and validates all thresholds.
    pub fn thresholds(&self) -> Result<Vec<Threshold>> {
        self.thresholds.iter().map(Threshold::try_from).collect()
    }
}
