//! Serialized shape of a job definition.
//!
//! The document follows the LAVA job schema the execution engine consumes:
//!
//! ```yaml
//! device_type: qemu
//! job_name: "bootrun@qemu-x86_64: ltp-smoke"
//! timeouts: {job: {minutes: 32}, connection: {minutes: 2}}
//! priority: medium
//! visibility: public
//! context: {arch: x86_64, ...}
//! metadata: {execution_id: bootrun-..., device: qemu-x86_64, tests: [ltp-smoke]}
//! actions:
//! - deploy: {...}
//! - boot: {...}
//! - test: {...}
//! ```
//!
//! Free-form sections are `serde_yaml::Mapping`, which keeps insertion order,
//! so the output is byte-for-byte reproducible.

use serde::Serialize;
use serde_yaml::{Mapping, Value};

/// A duration in whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Minutes {
    pub minutes: u32,
}

impl Minutes {
    pub fn new(minutes: u32) -> Self {
        Self { minutes }
    }
}

/// Job-wide timeouts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobTimeouts {
    pub job: Minutes,
    pub connection: Minutes,
}

/// Bookkeeping carried with the job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobMetadata {
    pub execution_id: String,
    pub device: String,
    pub tests: Vec<String>,
}

/// One entry of `actions`. Exactly one field is set.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Action {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy: Option<DeployAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot: Option<BootAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<TestAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployAction {
    pub timeout: Minutes,
    pub to: String,
    /// Slot name → image description, in slot order.
    pub images: Mapping,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BootAction {
    pub timeout: Minutes,
    pub method: String,
    pub prompts: Vec<String>,
    /// Method-specific keys.
    #[serde(flatten)]
    pub options: Mapping,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestAction {
    pub timeout: Minutes,
    pub definitions: Vec<TestDefinitionEntry>,
}

/// One test definition inside a test action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestDefinitionEntry {
    pub from: String,
    pub name: String,
    pub path: String,
    pub repository: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    #[serde(skip_serializing_if = "Mapping::is_empty")]
    pub parameters: Mapping,
}

/// A rendered job, ready to hand to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobDefinition {
    pub device_type: String,
    pub job_name: String,
    pub timeouts: JobTimeouts,
    pub priority: String,
    pub visibility: String,
    pub context: Mapping,
    pub metadata: JobMetadata,
    pub actions: Vec<Action>,
}

impl JobDefinition {
    /// Serializes the job to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn execution_id(&self) -> &str {
        &self.metadata.execution_id
    }

    pub fn deploy(&self) -> Option<&DeployAction> {
        self.actions.iter().find_map(|a| a.deploy.as_ref())
    }

    pub fn boot(&self) -> Option<&BootAction> {
        self.actions.iter().find_map(|a| a.boot.as_ref())
    }

    /// Test actions in execution order.
    pub fn test_actions(&self) -> impl Iterator<Item = &TestAction> {
        self.actions.iter().filter_map(|a| a.test.as_ref())
    }
}

/// Builds a mapping from string keys.
pub(crate) fn mapping<I, V>(entries: I) -> Mapping
where
    I: IntoIterator<Item = (&'static str, V)>,
    V: Into<Value>,
{
    entries
        .into_iter()
        .map(|(k, v)| (Value::from(k), v.into()))
        .collect()
}
