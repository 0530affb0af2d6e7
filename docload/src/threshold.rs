//! Service level thresholds evaluated against run metrics.
//!
//! Thresholds use the expression syntax of k6: an aggregation, a comparison operator and a
//! limit. `rate<0.01` on `http_req_failed` passes while less than 1% of requests fail, and
//! `p(95)<1000` on `http_req_duration` passes while the 95th percentile latency stays below one
//! second.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A metric that thresholds can be defined on.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Whether a request failed, aggregated as a rate between `0` and `1`.
    HttpReqFailed,
    /// Request duration in milliseconds.
    HttpReqDuration,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpReqFailed => f.write_str("http_req_failed"),
            Self::HttpReqDuration => f.write_str("http_req_duration"),
        }
    }
}

/// How a metric is reduced to a single value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Aggregation {
    /// Fraction of failed requests.
    Rate,
    /// Mean duration.
    Avg,
    /// Median duration.
    Med,
    /// Smallest duration.
    Min,
    /// Largest duration.
    Max,
    /// Duration percentile, between `0` and `100`.
    Percentile(f64),
}

impl Aggregation {
    fn applies_to(self, metric: Metric) -> bool {
        match self {
            Self::Rate => metric == Metric::HttpReqFailed,
            _ => metric == Metric::HttpReqDuration,
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rate => f.write_str("rate"),
            Self::Avg => f.write_str("avg"),
            Self::Med => f.write_str("med"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Percentile(p) => write!(f, "p({p})"),
        }
    }
}

/// Comparison between the aggregated value and the limit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Comparison {
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterOrEqual,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
}

impl Comparison {
    fn holds(self, value: f64, limit: f64) -> bool {
        match self {
            Self::Less => value < limit,
            Self::LessOrEqual => value <= limit,
            Self::Greater => value > limit,
            Self::GreaterOrEqual => value >= limit,
            Self::Equal => value == limit,
            Self::NotEqual => value != limit,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        })
    }
}

/// A parsed threshold expression, such as `p(95)<1000`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Expression {
    /// The aggregation applied to the metric.
    pub aggregation: Aggregation,
    /// The comparison operator.
    pub comparison: Comparison,
    /// The right-hand side of the comparison.
    pub limit: f64,
}

impl Expression {
    /// Returns `true` if `value` satisfies the expression.
    pub fn holds(&self, value: f64) -> bool {
        self.comparison.holds(value, self.limit)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.aggregation, self.comparison, self.limit)
    }
}

fn invalid(expression: &str, reason: impl Into<String>) -> Error {
    Error::InvalidThreshold {
        expression: expression.to_owned(),
        reason: reason.into(),
    }
}

impl FromStr for Expression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();

        // Two-character operators first, so `<=` is not read as `<` followed by `=1`.
        let operators = [
            ("<=", Comparison::LessOrEqual),
            (">=", Comparison::GreaterOrEqual),
            ("==", Comparison::Equal),
            ("!=", Comparison::NotEqual),
            ("<", Comparison::Less),
            (">", Comparison::Greater),
        ];
        let (position, token, comparison) = operators
            .iter()
            .filter_map(|(token, comparison)| {
                compact.find(token).map(|pos| (pos, *token, *comparison))
            })
            .min_by_key(|(pos, token, _)| (*pos, usize::MAX - token.len()))
            .ok_or_else(|| invalid(s, "missing comparison operator"))?;

        let lhs = &compact[..position];
        let rhs = &compact[position + token.len()..];

        let aggregation = match lhs {
            "rate" => Aggregation::Rate,
            "avg" => Aggregation::Avg,
            "med" => Aggregation::Med,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            _ => {
                let inner = lhs
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| invalid(s, format!("unknown aggregation `{lhs}`")))?;
                let percentile: f64 = inner
                    .parse()
                    .map_err(|_| invalid(s, format!("invalid percentile `{inner}`")))?;
                if !(0.0..=100.0).contains(&percentile) {
                    return Err(invalid(s, "percentile must be between 0 and 100"));
                }
                Aggregation::Percentile(percentile)
            }
        };

        let limit: f64 = rhs
            .parse()
            .map_err(|_| invalid(s, format!("invalid limit `{rhs}`")))?;
        if !limit.is_finite() {
            return Err(invalid(s, "limit must be finite"));
        }

        Ok(Self {
            aggregation,
            comparison,
            limit,
        })
    }
}

/// Configuration of a single threshold.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ThresholdConfig {
    /// The metric the expression is evaluated on.
    pub metric: Metric,
    /// The k6-style expression, such as `rate<0.01`.
    pub threshold: String,
    /// Whether a violation during the run aborts it immediately.
    #[serde(default)]
    pub abort_on_fail: bool,
}

impl ThresholdConfig {
    /// Creates a threshold configuration.
    pub fn new(metric: Metric, threshold: impl Into<String>, abort_on_fail: bool) -> Self {
        Self {
            metric,
            threshold: threshold.into(),
            abort_on_fail,
        }
    }

    /// Less than 1% of requests may fail; aborts on violation.
    pub fn default_failure_rate() -> Self {
        Self::new(Metric::HttpReqFailed, "rate<0.01", true)
    }

    /// 95% of requests must finish within one second; aborts on violation.
    pub fn default_latency() -> Self {
        Self::new(Metric::HttpReqDuration, "p(95)<1000", true)
    }
}

/// A validated threshold, ready for evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct Threshold {
    /// The metric the expression is evaluated on.
    pub metric: Metric,
    /// The parsed expression.
    pub expression: Expression,
    /// Whether a violation during the run aborts it immediately.
    pub abort_on_fail: bool,
}

impl Threshold {
    /// Returns `true` if `value` satisfies this threshold.
    pub fn holds(&self, value: f64) -> bool {
        self.expression.holds(value)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.expression)
    }
}

impl TryFrom<&ThresholdConfig> for Threshold {
    type Error = Error;

    fn try_from(config: &ThresholdConfig) -> Result<Self> {
        let expression: Expression = config.threshold.parse()?;
        if !expression.aggregation.applies_to(config.metric) {
            return Err(invalid(
                &config.threshold,
                format!(
                    "`{}` cannot be applied to `{}`",
                    expression.aggregation, config.metric
                ),
            ));
        }

        Ok(Self {
            metric: config.metric,
            expression,
            abort_on_fail: config.abort_on_fail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_failure_rate() {
        let expr: Expression = "rate<0.01".parse().unwrap();
        assert_eq!(expr.aggregation, Aggregation::Rate);
        assert_eq!(expr.comparison, Comparison::Less);
        assert_eq!(expr.limit, 0.01);
        assert!(expr.holds(0.005));
        assert!(!expr.holds(0.01));
    }

    #[test]
    fn parses_percentile() {
        let expr: Expression = "p(95) < 1000".parse().unwrap();
        assert_eq!(expr.aggregation, Aggregation::Percentile(95.0));
        assert_eq!(expr.limit, 1000.0);

        let expr: Expression = "p(99.9)<=250".parse().unwrap();
        assert_eq!(expr.aggregation, Aggregation::Percentile(99.9));
        assert_eq!(expr.comparison, Comparison::LessOrEqual);
        assert!(expr.holds(250.0));
    }

    #[test]
    fn parses_all_operators() {
        for (input, comparison) in [
            ("max<1", Comparison::Less),
            ("max<=1", Comparison::LessOrEqual),
            ("max>1", Comparison::Greater),
            ("max>=1", Comparison::GreaterOrEqual),
            ("max==1", Comparison::Equal),
            ("max!=1", Comparison::NotEqual),
        ] {
            let expr: Expression = input.parse().unwrap();
            assert_eq!(expr.comparison, comparison, "{input}");
            assert_eq!(expr.limit, 1.0, "{input}");
        }
    }

    #[test]
    fn rejects_invalid_expressions() {
        for input in [
            "",
            "rate",
            "rate 0.01",
            "count<10",
            "p(95<1000",
            "p(abc)<1000",
            "p(101)<1000",
            "rate<abc",
            "rate<inf",
        ] {
            let result: Result<Expression> = input.parse();
            assert!(
                matches!(result, Err(Error::InvalidThreshold { .. })),
                "accepted {input:?}"
            );
        }
    }

    #[test]
    fn validates_metric_compatibility() {
        let config = ThresholdConfig::new(Metric::HttpReqDuration, "rate<0.01", true);
        assert!(Threshold::try_from(&config).is_err());

        let config = ThresholdConfig::new(Metric::HttpReqFailed, "p(95)<1000", true);
        assert!(Threshold::try_from(&config).is_err());

        let threshold = Threshold::try_from(&ThresholdConfig::default_latency()).unwrap();
        assert!(threshold.abort_on_fail);
        assert_eq!(threshold.to_string(), "http_req_duration: p(95)<1000");
    }

    #[test]
    fn deserializes_config() {
        let config: ThresholdConfig =
            serde_json::from_str(r#"{"metric": "http_req_failed", "threshold": "rate<0.05"}"#)
                .unwrap();
        assert_eq!(config.metric, Metric::HttpReqFailed);
        assert!(!config.abort_on_fail);
    }
}
