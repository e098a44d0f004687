// Threshold evaluator: judges one fully populated snapshot against the active
// profile. Pure verdict-out logic; applying mitigations is the controller's
// job so this stays trivially testable.

use serde::Serialize;

use crate::monitor::{LatencyReading, MetricsSnapshot};
use crate::profile::PerformanceProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

/// Which monitored metric an alert refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Memory,
    Cpu,
    InputLatency,
    FrameRate,
}

/// Transient violation report. Published through the emitter, never retained.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub severity: Severity,
    pub metric: MetricKind,
    pub current_value: f64,
    pub threshold_value: f64,
    pub timestamp_ms: u64,
}

/// Verdict for one snapshot: alerts to publish plus requested mitigations.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Evaluation {
    pub alerts: Vec<Alert>,
    pub wants_cleanup: bool,
    pub wants_throttle: bool,
}

/// Critical begins at ceiling * 1.2, boundary inclusive.
const CRITICAL_FACTOR: f64 = 1.2;

/// Memory readings at or above this share of the ceiling request the cleanup
/// mitigation, ahead of the alert threshold.
const CLEANUP_FACTOR: f64 = 0.85;

pub struct ThresholdEvaluator;

impl ThresholdEvaluator {
    /// Evaluate a snapshot. `value <= ceiling` is silence, `(ceiling,
    /// 1.2*ceiling)` is a warning, `>= 1.2*ceiling` is critical. Frame rate is
    /// judged inverted against the profile floor.
    pub fn evaluate(profile: &PerformanceProfile, snapshot: &MetricsSnapshot) -> Evaluation {
        let mut eval = Evaluation::default();
        let at = snapshot.timestamp_ms;

        if let Some(memory) = snapshot.memory_usage_bytes {
            let ceiling = profile.memory_ceiling_bytes as f64;
            if let Some(severity) = ceiling_severity(memory as f64, ceiling) {
                eval.alerts.push(Alert {
                    severity,
                    metric: MetricKind::Memory,
                    current_value: memory as f64,
                    threshold_value: ceiling,
                    timestamp_ms: at,
                });
            }
            if memory as f64 >= ceiling * CLEANUP_FACTOR {
                eval.wants_cleanup = true;
            }
        }

        if let Some(severity) =
            ceiling_severity(snapshot.estimated_cpu_percent, profile.cpu_ceiling_percent)
        {
            eval.alerts.push(Alert {
                severity,
                metric: MetricKind::Cpu,
                current_value: snapshot.estimated_cpu_percent,
                threshold_value: profile.cpu_ceiling_percent,
                timestamp_ms: at,
            });
            eval.wants_throttle = true;
        }

        match snapshot.input_latency {
            LatencyReading::Measured { ms } => {
                if let Some(severity) = ceiling_severity(ms, profile.input_latency_target_ms) {
                    eval.alerts.push(Alert {
                        severity,
                        metric: MetricKind::InputLatency,
                        current_value: ms,
                        threshold_value: profile.input_latency_target_ms,
                        timestamp_ms: at,
                    });
                }
            }
            // A measurement that never resolved is itself a violation.
            LatencyReading::TimedOut { bound_ms } => {
                eval.alerts.push(Alert {
                    severity: Severity::Critical,
                    metric: MetricKind::InputLatency,
                    current_value: bound_ms,
                    threshold_value: profile.input_latency_target_ms,
                    timestamp_ms: at,
                });
            }
            LatencyReading::Unavailable => {}
        }

        if let Some(severity) = floor_severity(snapshot.frame_rate, profile.frame_rate_floor) {
            eval.alerts.push(Alert {
                severity,
                metric: MetricKind::FrameRate,
                current_value: snapshot.frame_rate,
                threshold_value: profile.frame_rate_floor,
                timestamp_ms: at,
            });
        }

        eval
    }
}

fn ceiling_severity(value: f64, ceiling: f64) -> Option<Severity> {
    if value <= ceiling {
        None
    } else if value >= ceiling * CRITICAL_FACTOR {
        Some(Severity::Critical)
    } else {
        Some(Severity::Warning)
    }
}

/// Inverse of [`ceiling_severity`] for floor-bounded metrics: silence at or
/// above the floor, critical once the value drops to floor/1.2 or below.
fn floor_severity(value: f64, floor: f64) -> Option<Severity> {
    if value >= floor {
        None
    } else if value <= floor / CRITICAL_FACTOR {
        Some(Severity::Critical)
    } else {
        Some(Severity::Warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{DeviceClass, ProfileOverrides, resolve_profile};

    fn profile_with_memory_mb(mb: f64) -> PerformanceProfile {
        resolve_profile(
            DeviceClass::Tv,
            &ProfileOverrides {
                memory_ceiling_mb: Some(mb),
                cpu_ceiling_percent: None,
            },
        )
    }

    fn quiet_snapshot(profile: &PerformanceProfile) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp_ms: 1,
            memory_usage_bytes: Some(profile.memory_ceiling_bytes / 2),
            estimated_cpu_percent: 0.0,
            input_latency: LatencyReading::Unavailable,
            frame_rate: profile.frame_rate_floor + 10.0,
            buffer_ratio: 1.0,
        }
    }

    #[test]
    fn value_at_ceiling_is_silent() {
        let profile = profile_with_memory_mb(100.0);
        let mut snapshot = quiet_snapshot(&profile);
        snapshot.memory_usage_bytes = Some(profile.memory_ceiling_bytes);
        let eval = ThresholdEvaluator::evaluate(&profile, &snapshot);
        assert!(eval.alerts.is_empty());
        // At the ceiling we are past 85%, so cleanup is still requested.
        assert!(eval.wants_cleanup);
    }

    #[test]
    fn value_just_above_ceiling_is_warning() {
        let profile = profile_with_memory_mb(100.0);
        let mut snapshot = quiet_snapshot(&profile);
        snapshot.memory_usage_bytes =
            Some((profile.memory_ceiling_bytes as f64 * 1.0001) as u64);
        let eval = ThresholdEvaluator::evaluate(&profile, &snapshot);
        assert_eq!(eval.alerts.len(), 1);
        assert_eq!(eval.alerts[0].severity, Severity::Warning);
        assert_eq!(eval.alerts[0].metric, MetricKind::Memory);
    }

    #[test]
    fn boundary_value_is_critical() {
        let profile = profile_with_memory_mb(100.0);
        let mut snapshot = quiet_snapshot(&profile);
        snapshot.memory_usage_bytes =
            Some((profile.memory_ceiling_bytes as f64 * 1.2) as u64);
        let eval = ThresholdEvaluator::evaluate(&profile, &snapshot);
        assert_eq!(eval.alerts.len(), 1);
        assert_eq!(eval.alerts[0].severity, Severity::Critical);
    }

    #[test]
    fn cleanup_requested_from_85_percent() {
        let profile = profile_with_memory_mb(100.0);
        let mut snapshot = quiet_snapshot(&profile);

        snapshot.memory_usage_bytes =
            Some((profile.memory_ceiling_bytes as f64 * 0.84) as u64);
        assert!(!ThresholdEvaluator::evaluate(&profile, &snapshot).wants_cleanup);

        snapshot.memory_usage_bytes =
            Some((profile.memory_ceiling_bytes as f64 * 0.85).ceil() as u64);
        let eval = ThresholdEvaluator::evaluate(&profile, &snapshot);
        assert!(eval.wants_cleanup);
        // Below the ceiling there is no alert yet.
        assert!(eval.alerts.is_empty());
    }

    #[test]
    fn cpu_breach_requests_throttle() {
        let profile = resolve_profile(DeviceClass::Tv, &ProfileOverrides::default());
        let mut snapshot = quiet_snapshot(&profile);
        snapshot.estimated_cpu_percent = profile.cpu_ceiling_percent * 1.1;
        let eval = ThresholdEvaluator::evaluate(&profile, &snapshot);
        assert!(eval.wants_throttle);
        assert_eq!(eval.alerts[0].metric, MetricKind::Cpu);
        assert_eq!(eval.alerts[0].severity, Severity::Warning);
    }

    #[test]
    fn timed_out_latency_is_a_critical_violation() {
        let profile = resolve_profile(DeviceClass::Mobile, &ProfileOverrides::default());
        let mut snapshot = quiet_snapshot(&profile);
        snapshot.input_latency = LatencyReading::TimedOut {
            bound_ms: profile.input_latency_target_ms * 2.0,
        };
        let eval = ThresholdEvaluator::evaluate(&profile, &snapshot);
        assert_eq!(eval.alerts.len(), 1);
        assert_eq!(eval.alerts[0].metric, MetricKind::InputLatency);
        assert_eq!(eval.alerts[0].severity, Severity::Critical);
    }

    #[test]
    fn frame_rate_below_floor_alerts_inverted() {
        let profile = resolve_profile(DeviceClass::Tv, &ProfileOverrides::default());
        let mut snapshot = quiet_snapshot(&profile);

        snapshot.frame_rate = profile.frame_rate_floor;
        assert!(
            ThresholdEvaluator::evaluate(&profile, &snapshot)
                .alerts
                .is_empty()
        );

        snapshot.frame_rate = profile.frame_rate_floor * 0.95;
        let eval = ThresholdEvaluator::evaluate(&profile, &snapshot);
        assert_eq!(eval.alerts[0].severity, Severity::Warning);

        snapshot.frame_rate = profile.frame_rate_floor / 2.0;
        let eval = ThresholdEvaluator::evaluate(&profile, &snapshot);
        assert_eq!(eval.alerts[0].severity, Severity::Critical);
    }

    #[test]
    fn missing_memory_reading_skips_memory_evaluation() {
        let profile = profile_with_memory_mb(100.0);
        let mut snapshot = quiet_snapshot(&profile);
        snapshot.memory_usage_bytes = None;
        let eval = ThresholdEvaluator::evaluate(&profile, &snapshot);
        assert!(eval.alerts.is_empty());
        assert!(!eval.wants_cleanup);
    }
}
