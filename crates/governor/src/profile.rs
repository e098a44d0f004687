// Performance profile resolution: device-class defaults plus host overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Coarse performance tier of the device running playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// Embedded smart-TV chipsets, the most constrained tier.
    Tv,
    Mobile,
    /// Least restrictive tier, also the fallback for unknown tags.
    #[default]
    Desktop,
}

impl DeviceClass {
    /// Parse a host-provided tag. Unknown tags fall back to the
    /// least-restrictive desktop defaults rather than failing.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "tv" => Self::Tv,
            "mobile" => Self::Mobile,
            "desktop" => Self::Desktop,
            other => {
                warn!(tag = other, "unknown device class, falling back to desktop");
                Self::Desktop
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tv => "tv",
            Self::Mobile => "mobile",
            Self::Desktop => "desktop",
        }
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource ceilings and playback targets for one device class.
///
/// Immutable once resolved; a new profile is produced only by an explicit
/// configuration change, and exactly one profile is active per session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceProfile {
    pub device_class: DeviceClass,
    pub memory_ceiling_bytes: u64,
    pub cpu_ceiling_percent: f64,
    pub input_latency_target_ms: f64,
    pub frame_rate_floor: f64,
    pub buffer_target_seconds: f64,
    pub back_buffer_seconds: f64,
    /// Sampling cadence for the resource monitor. Tighter for constrained
    /// classes so violations are caught before they stall playback.
    #[serde(skip)]
    pub sample_interval: Duration,
}

/// Optional numeric overrides supplied by the host configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileOverrides {
    pub memory_ceiling_mb: Option<f64>,
    pub cpu_ceiling_percent: Option<f64>,
}

const MIB: u64 = 1024 * 1024;

/// Floor for a clamped memory-ceiling override. Anything below this cannot
/// hold a single decoded GOP worth of frames.
const MIN_MEMORY_CEILING_BYTES: u64 = 16 * MIB;

const MIN_CPU_CEILING_PERCENT: f64 = 1.0;
const MAX_CPU_CEILING_PERCENT: f64 = 100.0;

/// Map a device class plus optional overrides to the active profile.
///
/// Pure and deterministic. Invalid overrides (zero, negative, out of range)
/// are clamped to a minimum sane value rather than rejected, so a bad host
/// configuration degrades to conservative defaults instead of failing.
pub fn resolve_profile(class: DeviceClass, overrides: &ProfileOverrides) -> PerformanceProfile {
    let mut profile = class_defaults(class);

    if let Some(mb) = overrides.memory_ceiling_mb {
        let bytes = if mb > 0.0 {
            ((mb * MIB as f64) as u64).max(MIN_MEMORY_CEILING_BYTES)
        } else {
            warn!(
                requested_mb = mb,
                "non-positive memory ceiling override, clamping to minimum"
            );
            MIN_MEMORY_CEILING_BYTES
        };
        profile.memory_ceiling_bytes = bytes;
    }

    if let Some(pct) = overrides.cpu_ceiling_percent {
        let clamped = if pct > 0.0 && pct <= MAX_CPU_CEILING_PERCENT {
            pct
        } else {
            warn!(
                requested_percent = pct,
                "cpu ceiling override out of (0, 100], clamping"
            );
            pct.clamp(MIN_CPU_CEILING_PERCENT, MAX_CPU_CEILING_PERCENT)
        };
        profile.cpu_ceiling_percent = clamped;
    }

    profile
}

fn class_defaults(class: DeviceClass) -> PerformanceProfile {
    match class {
        DeviceClass::Tv => PerformanceProfile {
            device_class: class,
            memory_ceiling_bytes: 250 * MIB,
            cpu_ceiling_percent: 60.0,
            input_latency_target_ms: 200.0,
            frame_rate_floor: 24.0,
            buffer_target_seconds: 8.0,
            back_buffer_seconds: 4.0,
            sample_interval: Duration::from_secs(1),
        },
        DeviceClass::Mobile => PerformanceProfile {
            device_class: class,
            memory_ceiling_bytes: 400 * MIB,
            cpu_ceiling_percent: 70.0,
            input_latency_target_ms: 120.0,
            frame_rate_floor: 24.0,
            buffer_target_seconds: 15.0,
            back_buffer_seconds: 10.0,
            sample_interval: Duration::from_secs(2),
        },
        DeviceClass::Desktop => PerformanceProfile {
            device_class: class,
            memory_ceiling_bytes: 1024 * MIB,
            cpu_ceiling_percent: 85.0,
            input_latency_target_ms: 80.0,
            frame_rate_floor: 30.0,
            buffer_target_seconds: 30.0,
            back_buffer_seconds: 30.0,
            sample_interval: Duration::from_secs(5),
        },
    }
}
