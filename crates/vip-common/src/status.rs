//! Batch job status derived from the Job's `Complete` and `Failed` conditions

use k8s_openapi::api::batch::v1::JobCondition;

/// Condition type set when every pod of the job succeeded
pub const CONDITION_COMPLETE: &str = "Complete";
/// Condition type set when the job gave up
pub const CONDITION_FAILED: &str = "Failed";

/// Tri-state value of a single Kubernetes condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConditionState {
    /// Status is `"True"`
    True,
    /// Status is `"False"`
    False,
    /// Condition absent, empty, or `"Unknown"`
    #[default]
    Unknown,
}

impl ConditionState {
    /// Parse a condition status string. Anything but `True`/`False` is unknown.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "True" => Self::True,
            "False" => Self::False,
            _ => Self::Unknown,
        }
    }

    /// Whether the condition reads `"True"`
    pub fn is_true(self) -> bool {
        self == Self::True
    }
}

/// Terminal outcome of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The test run passed
    Succeeded,
    /// The test run failed
    Failed,
}

/// Snapshot of a job's terminal conditions, recomputed on every poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobStatus {
    /// The `Complete` condition
    pub complete: ConditionState,
    /// The `Failed` condition
    pub failed: ConditionState,
}

impl JobStatus {
    /// Build a status from raw `Complete` and `Failed` status strings.
    /// Empty strings stand for absent conditions.
    pub fn from_strings(complete: &str, failed: &str) -> Self {
        Self {
            complete: ConditionState::parse(complete),
            failed: ConditionState::parse(failed),
        }
    }

    /// Build a status from a Job's `status.conditions`
    pub fn from_conditions(conditions: Option<&[JobCondition]>) -> Self {
        let lookup = |kind: &str| {
            conditions
                .unwrap_or_default()
                .iter()
                .find(|c| c.type_ == kind)
                .map(|c| ConditionState::parse(&c.status))
                .unwrap_or_default()
        };
        Self {
            complete: lookup(CONDITION_COMPLETE),
            failed: lookup(CONDITION_FAILED),
        }
    }

    /// Terminal outcome, or `None` while the job is still running.
    ///
    /// `Complete=True` takes precedence over `Failed=True` when both are set.
    /// This tie-break is kept for compatibility with earlier runners.
    pub fn outcome(&self) -> Option<JobOutcome> {
        if self.complete.is_true() {
            Some(JobOutcome::Succeeded)
        } else if self.failed.is_true() {
            Some(JobOutcome::Failed)
        } else {
            None
        }
    }
}
