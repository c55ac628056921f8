//! Worker pool entities and sandbox constraints.
//!
//! `WorkerInfo` records are owned exclusively by the runner pool manager;
//! other components read them through its API. `SandboxSpec` is the
//! non-negotiable floor applied to every assignment -- step overrides may
//! only tighten it, never loosen it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Stable worker identity, assigned at registration.
pub type WorkerId = String;

/// A sandboxed execution worker known to the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub status: WorkerStatus,
    /// Labels describing what this worker can run (e.g. "linux", "gpu").
    #[serde(default)]
    pub capacity_labels: Vec<String>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl WorkerInfo {
    /// Whether this worker's labels satisfy a step's requirements.
    pub fn satisfies(&self, requires: &[String]) -> bool {
        requires.iter().all(|r| self.capacity_labels.contains(r))
    }
}

/// Pool-visible worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Registered and idle, ready for immediate assignment.
    Warm,
    /// Executing a step (one at a time).
    Busy,
    /// Finishing its current step; accepts no new assignments.
    Draining,
    /// Missed its heartbeat deadline; excluded from assignment.
    Unhealthy,
}

// ---------------------------------------------------------------------------
// Sandbox spec
// ---------------------------------------------------------------------------

/// Resource, filesystem, and network constraints applied to a worker before
/// a step process starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxSpec {
    /// CPU quota in millicores.
    pub cpu_millis: u32,
    /// Memory ceiling in MiB.
    pub memory_mb: u32,
    /// Scratch disk ceiling in MiB.
    pub disk_mb: u32,
    /// Root filesystem is mounted read-only; this is the explicit writable
    /// scratch mount.
    pub scratch_mount: String,
    /// Hosts the step may reach. Always contains the callback/control
    /// endpoint; declared external APIs are appended per step.
    pub network_allowlist: Vec<String>,
}

impl SandboxSpec {
    /// The pool-wide default floor.
    pub fn floor(control_endpoint: impl Into<String>) -> Self {
        Self {
            cpu_millis: 2000,
            memory_mb: 4096,
            disk_mb: 10240,
            scratch_mount: "/workspace".to_string(),
            network_allowlist: vec![control_endpoint.into()],
        }
    }

    /// Apply step-level overrides with tighten-only semantics.
    ///
    /// Resource limits may only be lowered; the network allowlist may only
    /// gain hosts the step explicitly declares (the control endpoint is
    /// always retained). Attempts to raise a limit are clamped to the floor.
    pub fn tightened_by(&self, overrides: &SandboxOverrides) -> SandboxSpec {
        let mut spec = self.clone();
        if let Some(cpu) = overrides.cpu_millis {
            spec.cpu_millis = spec.cpu_millis.min(cpu);
        }
        if let Some(mem) = overrides.memory_mb {
            spec.memory_mb = spec.memory_mb.min(mem);
        }
        if let Some(disk) = overrides.disk_mb {
            spec.disk_mb = spec.disk_mb.min(disk);
        }
        for host in &overrides.allowed_hosts {
            if !spec.network_allowlist.contains(host) {
                spec.network_allowlist.push(host.clone());
            }
        }
        spec
    }
}

/// Step-level sandbox adjustments, declared in the workflow definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_millis: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_mb: Option<u32>,
    /// External APIs this step declares it needs to reach.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(labels: Vec<&str>) -> WorkerInfo {
        WorkerInfo {
            id: "worker-1".to_string(),
            status: WorkerStatus::Warm,
            capacity_labels: labels.into_iter().map(String::from).collect(),
            registered_at: Utc::now(),
            last_heartbeat_at: Utc::now(),
        }
    }

    #[test]
    fn test_capacity_label_matching() {
        let w = worker(vec!["linux", "x86_64", "gpu"]);
        assert!(w.satisfies(&["linux".to_string()]));
        assert!(w.satisfies(&["linux".to_string(), "gpu".to_string()]));
        assert!(!w.satisfies(&["macos".to_string()]));
        assert!(w.satisfies(&[]));
    }

    #[test]
    fn test_tighten_lowers_limits() {
        let floor = SandboxSpec::floor("https://control.internal");
        let tightened = floor.tightened_by(&SandboxOverrides {
            cpu_millis: Some(500),
            memory_mb: Some(1024),
            disk_mb: None,
            allowed_hosts: vec![],
        });
        assert_eq!(tightened.cpu_millis, 500);
        assert_eq!(tightened.memory_mb, 1024);
        assert_eq!(tightened.disk_mb, floor.disk_mb);
    }

    #[test]
    fn test_tighten_never_raises_limits() {
        let floor = SandboxSpec::floor("https://control.internal");
        let attempted = floor.tightened_by(&SandboxOverrides {
            cpu_millis: Some(64_000),
            memory_mb: Some(1_000_000),
            disk_mb: Some(1_000_000),
            allowed_hosts: vec![],
        });
        assert_eq!(attempted.cpu_millis, floor.cpu_millis);
        assert_eq!(attempted.memory_mb, floor.memory_mb);
        assert_eq!(attempted.disk_mb, floor.disk_mb);
    }

    #[test]
    fn test_allowlist_keeps_control_endpoint_and_adds_declared_hosts() {
        let floor = SandboxSpec::floor("https://control.internal");
        let spec = floor.tightened_by(&SandboxOverrides {
            allowed_hosts: vec!["api.example.com".to_string(), "api.example.com".to_string()],
            ..Default::default()
        });
        assert_eq!(
            spec.network_allowlist,
            vec!["https://control.internal".to_string(), "api.example.com".to_string()]
        );
    }
}
