//! Verdict computation from the engine's log stream.
//!
//! The engine writes one record per line:
//!
//! ```json
//! {"dt": "2025-01-07T10:00:00.000", "lvl": "results", "msg": {"definition": "ltp-smoke", "case": "access01", "result": "pass"}}
//! ```
//!
//! Only `lvl == "results"` records carry test-case outcomes. Everything else
//! is passed through for display and never influences the verdict. A line
//! may carry the YAML list marker `- ` the engine uses in its own log files.
//!
//! [`Results`] moves through three states:
//!
//! ```text
//! NoResults ──first result──► Observing ──finalize()──► Finalized
//!     └──────────────────finalize()──────────────────────┘
//! ```
//!
//! Once finalized no further result is recorded, so a late or replayed line
//! can never be counted twice.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Outcome of a single test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Skip,
    Unknown,
}

impl Outcome {
    /// Maps an engine result string. Anything unrecognized is `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value {
            "pass" => Self::Pass,
            "fail" => Self::Fail,
            "skip" => Self::Skip,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed test case. Never revised once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCaseResult {
    pub suite: String,
    pub case: String,
    pub outcome: Outcome,
    pub timestamp: Option<String>,
}

/// A structured log record as emitted by the engine.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogRecord {
    pub lvl: String,
    pub msg: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dt: Option<String>,
}

impl LogRecord {
    pub fn is_result(&self) -> bool {
        self.lvl == "results"
    }

    /// The message as display text.
    pub fn text(&self) -> String {
        match &self.msg {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultsState {
    NoResults,
    Observing,
    Finalized,
}

/// Tallies by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub unknown: usize,
}

impl Counts {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.unknown
    }
}

/// Streaming result aggregator.
#[derive(Debug)]
pub struct Results {
    state: ResultsState,
    results: Vec<TestCaseResult>,
    anomalies: usize,
}

impl Default for Results {
    fn default() -> Self {
        Self::new()
    }
}

impl Results {
    pub fn new() -> Self {
        Self {
            state: ResultsState::NoResults,
            results: Vec::new(),
            anomalies: 0,
        }
    }

    /// Consumes one line of the log stream.
    ///
    /// Returns the decoded record so the caller can display or persist it.
    /// Blank lines return `None` silently; malformed lines return `None` and
    /// count as an anomaly.
    pub fn parse(&mut self, line: &str) -> Option<LogRecord> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let payload = trimmed.strip_prefix("- ").unwrap_or(trimmed);

        let record: LogRecord = match serde_json::from_str(payload) {
            Ok(record) => record,
            Err(e) => {
                self.anomaly(format_args!("unparsable log line ({}): {}", e, trimmed));
                return None;
            }
        };

        if record.is_result() {
            match Self::test_case(&record) {
                Some(result) => self.record(result),
                None => self.anomaly(format_args!("malformed result record: {}", trimmed)),
            }
        }
        Some(record)
    }

    fn test_case(record: &LogRecord) -> Option<TestCaseResult> {
        let msg = record.msg.as_object()?;
        let field = |key: &str| msg.get(key).and_then(Value::as_str);
        Some(TestCaseResult {
            suite: field("definition")?.to_string(),
            case: field("case")?.to_string(),
            outcome: Outcome::parse(field("result")?),
            timestamp: record.dt.clone(),
        })
    }

    fn record(&mut self, result: TestCaseResult) {
        match self.state {
            ResultsState::Finalized => {
                warn!(
                    "Ignoring result {}/{} received after finalization",
                    result.suite, result.case
                );
            }
            ResultsState::NoResults | ResultsState::Observing => {
                debug!("{}/{}: {}", result.suite, result.case, result.outcome);
                self.state = ResultsState::Observing;
                self.results.push(result);
            }
        }
    }

    fn anomaly(&mut self, message: fmt::Arguments<'_>) {
        self.anomalies += 1;
        warn!("{}", message);
    }

    /// 0 if every observed case passed or none was observed, 1 otherwise.
    ///
    /// Reflects only what has been seen so far; it is final once
    /// [`finalize`](Self::finalize) has been called.
    pub fn ret(&self) -> i32 {
        if self.results.iter().all(|r| r.outcome == Outcome::Pass) {
            0
        } else {
            1
        }
    }

    /// Stops recording. Called once the engine has exited or its stream
    /// ended, whichever way that happened.
    pub fn finalize(&mut self) {
        if self.state != ResultsState::Finalized {
            debug!(
                "Finalized with {} result(s), {} anomalie(s)",
                self.results.len(),
                self.anomalies
            );
            self.state = ResultsState::Finalized;
        }
    }

    pub fn state(&self) -> ResultsState {
        self.state
    }

    /// Results in arrival order.
    pub fn results(&self) -> &[TestCaseResult] {
        &self.results
    }

    /// Number of malformed lines seen.
    pub fn anomalies(&self) -> usize {
        self.anomalies
    }

    pub fn counts(&self) -> Counts {
        let mut counts = Counts::default();
        for result in &self.results {
            match result.outcome {
                Outcome::Pass => counts.passed += 1,
                Outcome::Fail => counts.failed += 1,
                Outcome::Skip => counts.skipped += 1,
                Outcome::Unknown => counts.unknown += 1,
            }
        }
        counts
    }

    /// `{suite: {case: {"result": outcome}}}`, empty when nothing was
    /// observed. A case reported twice keeps its latest outcome.
    pub fn summary(&self) -> Value {
        let mut suites: BTreeMap<&str, Map<String, Value>> = BTreeMap::new();
        for result in &self.results {
            let mut entry = Map::new();
            entry.insert("result".to_string(), Value::from(result.outcome.as_str()));
            suites
                .entry(&result.suite)
                .or_default()
                .insert(result.case.clone(), Value::Object(entry));
        }
        Value::Object(
            suites
                .into_iter()
                .map(|(suite, cases)| (suite.to_string(), Value::Object(cases)))
                .collect(),
        )
    }
}
