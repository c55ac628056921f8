//! Plan domain types: the immutable, content-addressed step graph.
//!
//! A `Plan` is produced by evaluating a workflow definition and is never
//! mutated afterwards -- when the source changes, a new Plan with a new
//! content hash supersedes it. The dependency graph invariants (acyclic,
//! unique step ids, resolvable references) are enforced by
//! `forgeflow-core::graph` before a Plan is constructed.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::Schema;
use crate::worker::SandboxOverrides;

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// An immutable step graph, identified by the SHA-256 of its canonicalized
/// source bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Lowercase hex SHA-256 over the canonicalized workflow source.
    pub content_hash: String,
    /// Workflow name the plan was registered under (unique per source unit).
    pub name: String,
    /// Repository the defining source file belongs to.
    pub repository: String,
    /// Source path the plan was evaluated from.
    pub source_path: String,
    /// Ordered step definitions forming the DAG.
    pub steps: Vec<StepDefinition>,
    /// How runs of this plan may be started.
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    /// Schema the run inputs must satisfy before a run is admitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Schema>,
    /// Schema the aggregate step-output map must satisfy at completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Schema>,
    /// When the source was last evaluated into this plan.
    pub parsed_at: DateTime<Utc>,
}

impl Plan {
    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A node in the plan graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Stable, human-assigned step id (e.g. "build"). Unique within a plan.
    pub id: String,
    /// The kind of step.
    pub kind: StepKind,
    /// Kind-specific configuration, opaque to the graph layer.
    pub config: StepConfig,
    /// Step ids this step depends on (DAG edges).
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Hard wall-clock timeout for this step, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Schema the step's output must satisfy; a violation fails the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Schema>,
    /// Capacity labels a worker must carry to execute this step.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Sandbox adjustments. Merged onto the pool floor with tighten-only
    /// semantics at assignment time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxOverrides>,
}

/// The kind of a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Shell,
    LlmAgent,
    ParallelGroup,
}

/// Kind-specific step configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepConfig {
    /// Run a command inside the assigned worker's sandbox.
    Shell {
        command: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
    },
    /// Invoke an LLM agent task (the provider call is a pluggable step
    /// implementation, external to the engine).
    LlmAgent {
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    /// Coordinate a set of member steps that may run concurrently once the
    /// group's own dependencies are satisfied.
    ParallelGroup {
        members: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_concurrent: Option<u32>,
    },
}

impl StepConfig {
    /// The `StepKind` this config belongs to.
    pub fn kind(&self) -> StepKind {
        match self {
            StepConfig::Shell { .. } => StepKind::Shell,
            StepConfig::LlmAgent { .. } => StepKind::LlmAgent,
            StepConfig::ParallelGroup { .. } => StepKind::ParallelGroup,
        }
    }
}

// ---------------------------------------------------------------------------
// Trigger Configuration
// ---------------------------------------------------------------------------

/// How a plan's runs may be started. Trigger *firing* is wired by the outer
/// surface; the engine only records the configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Started explicitly via API.
    Manual,
    /// Started when matching refs are pushed.
    Push {
        #[serde(default)]
        branches: Vec<String>,
    },
    /// Started on a cron schedule.
    Cron { schedule: String },
    /// Started by an incoming webhook.
    Webhook { path: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_step(id: &str, depends_on: Vec<&str>) -> StepDefinition {
        StepDefinition {
            id: id.to_string(),
            kind: StepKind::Shell,
            config: StepConfig::Shell {
                command: "true".to_string(),
                env: HashMap::new(),
            },
            depends_on: depends_on.into_iter().map(String::from).collect(),
            timeout_secs: None,
            output_schema: None,
            requires: vec![],
            sandbox: None,
        }
    }

    fn sample_plan() -> Plan {
        Plan {
            content_hash: "a".repeat(64),
            name: "build".to_string(),
            repository: "acme/widgets".to_string(),
            source_path: "ci/build.flow".to_string(),
            steps: vec![shell_step("checkout", vec![]), shell_step("build", vec!["checkout"])],
            triggers: vec![TriggerConfig::Push { branches: vec!["main".to_string()] }],
            input_schema: None,
            output_schema: None,
            parsed_at: Utc::now(),
        }
    }

    #[test]
    fn test_step_lookup() {
        let plan = sample_plan();
        assert!(plan.step("build").is_some());
        assert!(plan.step("missing").is_none());
    }

    #[test]
    fn test_plan_serde_roundtrip() {
        let plan = sample_plan();
        let encoded = serde_json::to_string(&plan).unwrap();
        let decoded: Plan = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.content_hash, plan.content_hash);
        assert_eq!(decoded.steps.len(), 2);
        assert_eq!(decoded.triggers, plan.triggers);
    }

    #[test]
    fn test_step_config_kind() {
        let config = StepConfig::ParallelGroup {
            members: vec!["a".to_string()],
            max_concurrent: Some(2),
        };
        assert_eq!(config.kind(), StepKind::ParallelGroup);
    }

    #[test]
    fn test_step_config_tagged_encoding() {
        let config = StepConfig::Shell {
            command: "cargo test".to_string(),
            env: HashMap::new(),
        };
        let encoded = serde_json::to_value(&config).unwrap();
        assert_eq!(encoded["kind"], "shell");
        assert_eq!(encoded["command"], "cargo test");
    }
}
