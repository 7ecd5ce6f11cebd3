use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Serialize, Clone, Debug)]
pub struct CheckResult {
    pub name: String,
    pub state: HealthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: HealthState::Healthy,
            detail: None,
        }
    }

    pub fn degraded(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: HealthState::Degraded,
            detail: Some(detail.into()),
        }
    }

    pub fn unhealthy(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: HealthState::Unhealthy,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct HealthReport {
    pub state: HealthState,
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    pub fn healthy() -> Self {
        Self {
            state: HealthState::Healthy,
            checks: Vec::new(),
        }
    }

    /// Any unhealthy sub-check makes the whole report unhealthy; any
    /// degraded one (with none unhealthy) makes it degraded.
    pub fn aggregate(checks: Vec<CheckResult>) -> Self {
        let state = checks
            .iter()
            .map(|check| check.state)
            .max()
            .unwrap_or(HealthState::Healthy);
        Self { state, checks }
    }
}

/// The three probe kinds. Liveness is implied by answering at all;
/// readiness requires a completed startup plus healthy dependencies.
pub struct Probes {
    startup_complete: AtomicBool,
}

impl Probes {
    pub fn new() -> Self {
        Self {
            startup_complete: AtomicBool::new(false),
        }
    }

    pub fn mark_startup_complete(&self) {
        self.startup_complete.store(true, Ordering::Release);
    }

    pub fn liveness(&self) -> HealthReport {
        HealthReport::healthy()
    }

    pub fn readiness(&self, dependency_checks: Vec<CheckResult>) -> HealthReport {
        if !self.startup_complete.load(Ordering::Acquire) {
            return HealthReport::aggregate(vec![CheckResult::unhealthy(
                "startup",
                "startup has not completed",
            )]);
        }
        let mut checks = vec![CheckResult::healthy("startup")];
        checks.extend(dependency_checks);
        HealthReport::aggregate(checks)
    }
}

impl Default for Probes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_takes_the_worst_state() {
        let report = HealthReport::aggregate(vec![
            CheckResult::healthy("sqlite"),
            CheckResult::degraded("source", "slow"),
        ]);
        assert_eq!(report.state, HealthState::Degraded);

        let report = HealthReport::aggregate(vec![
            CheckResult::degraded("source", "slow"),
            CheckResult::unhealthy("fabric", "down"),
        ]);
        assert_eq!(report.state, HealthState::Unhealthy);

        assert_eq!(HealthReport::aggregate(vec![]).state, HealthState::Healthy);
    }

    #[test]
    fn readiness_gates_on_startup() {
        let probes = Probes::new();
        assert_eq!(probes.readiness(vec![]).state, HealthState::Unhealthy);
        assert_eq!(probes.liveness().state, HealthState::Healthy);

        probes.mark_startup_complete();
        assert_eq!(probes.readiness(vec![]).state, HealthState::Healthy);
    }
}
