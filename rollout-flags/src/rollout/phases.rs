use serde::{Deserialize, Serialize};

use crate::flags::flag_models::FlagMetrics;

/// Gate a phase must pass before the rollout moves on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriteria {
    pub error_rate_threshold: f64,
    pub performance_threshold_ms: f64,
    pub satisfaction_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "criterion", rename_all = "snake_case")]
pub enum CriterionFailure {
    ErrorRate { actual: f64, max: f64 },
    ResponseTime { actual_ms: f64, max_ms: f64 },
    SuccessRate { actual: f64, min: f64 },
}

impl SuccessCriteria {
    /// Every criterion the metrics miss. Empty means the gate passes.
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn failures(&self, metrics: &FlagMetrics) -> Vec<CriterionFailure> {
        let mut failures = Vec::new();
        // written as negated passes so NaN readings fail closed
        if !(metrics.error_rate <= self.error_rate_threshold) {
            failures.push(CriterionFailure::ErrorRate {
                actual: metrics.error_rate,
                max: self.error_rate_threshold,
            });
        }
        if !(metrics.avg_response_time_ms <= self.performance_threshold_ms) {
            failures.push(CriterionFailure::ResponseTime {
                actual_ms: metrics.avg_response_time_ms,
                max_ms: self.performance_threshold_ms,
            });
        }
        if !(metrics.success_rate >= self.satisfaction_threshold) {
            failures.push(CriterionFailure::SuccessRate {
                actual: metrics.success_rate,
                min: self.satisfaction_threshold,
            });
        }
        failures
    }

    pub fn is_met(&self, metrics: &FlagMetrics) -> bool {
        self.failures(metrics).is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutPhase {
    pub phase: u8,
    pub percentage: u8,
    pub duration_hours: u32,
    pub success_criteria: SuccessCriteria,
}

pub static ROLLOUT_PHASES: [RolloutPhase; 4] = [
    RolloutPhase {
        phase: 1,
        percentage: 5,
        duration_hours: 24,
        success_criteria: SuccessCriteria {
            error_rate_threshold: 0.05,
            performance_threshold_ms: 3000.0,
            satisfaction_threshold: 0.85,
        },
    },
    RolloutPhase {
        phase: 2,
        percentage: 25,
        duration_hours: 48,
        success_criteria: SuccessCriteria {
            error_rate_threshold: 0.03,
            performance_threshold_ms: 2500.0,
            satisfaction_threshold: 0.90,
        },
    },
    RolloutPhase {
        phase: 3,
        percentage: 50,
        duration_hours: 72,
        success_criteria: SuccessCriteria {
            error_rate_threshold: 0.02,
            performance_threshold_ms: 2000.0,
            satisfaction_threshold: 0.92,
        },
    },
    RolloutPhase {
        phase: 4,
        percentage: 100,
        duration_hours: 0,
        success_criteria: SuccessCriteria {
            error_rate_threshold: 0.01,
            performance_threshold_ms: 2000.0,
            satisfaction_threshold: 0.95,
        },
    },
];

pub fn first_phase() -> &'static RolloutPhase {
    &ROLLOUT_PHASES[0]
}

/// The phase a rollout percentage corresponds to, if any.
pub fn phase_for_percentage(percentage: u8) -> Option<&'static RolloutPhase> {
    ROLLOUT_PHASES.iter().find(|p| p.percentage == percentage)
}

/// The phase after `phase`, or `None` when `phase` is the last one.
pub fn next_phase(phase: &RolloutPhase) -> Option<&'static RolloutPhase> {
    ROLLOUT_PHASES.iter().find(|p| p.phase == phase.phase + 1)
}

pub fn is_terminal(phase: &RolloutPhase) -> bool {
    next_phase(phase).is_none()
}
