// Degradation bookkeeping: which mitigations are active, when cleanup may be
// re-applied, and the divisor-based redraw throttle shared with the host.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Automatic corrective action taken when a resource ceiling is breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MitigationKind {
    /// Shrink the buffer target, release engine back-buffer, drop cached
    /// frame data.
    MemoryCleanup,
    /// Coalesce redraw callbacks down to the profile frame-rate floor.
    AnimationThrottle,
}

impl MitigationKind {
    pub fn action(&self) -> &'static str {
        match self {
            Self::MemoryCleanup => "cleanup",
            Self::AnimationThrottle => "throttle",
        }
    }
}

/// Fixed amount the buffer target shrinks per cleanup application.
pub const BUFFER_SHRINK_STEP_SECONDS: f64 = 2.0;

/// The buffer target never shrinks below this; starving the buffer entirely
/// would trade a memory problem for a rebuffering one.
pub const BUFFER_TARGET_FLOOR_SECONDS: f64 = 2.0;

/// Default re-application window for the cleanup mitigation.
pub const DEFAULT_CLEANUP_COOLDOWN: Duration = Duration::from_secs(30);

/// Session-scoped mitigation state.
///
/// Mitigations are monotonic: once applied they stay active and the shrunk
/// buffer target is never restored automatically. Only an explicit profile
/// change resets the ledger to the new profile's targets.
#[derive(Debug)]
pub struct MitigationLedger {
    active: BTreeSet<MitigationKind>,
    last_cleanup: Option<Instant>,
    cooldown: Duration,
    buffer_target_seconds: f64,
}

impl MitigationLedger {
    pub fn new(buffer_target_seconds: f64) -> Self {
        Self::with_cooldown(buffer_target_seconds, DEFAULT_CLEANUP_COOLDOWN)
    }

    pub fn with_cooldown(buffer_target_seconds: f64, cooldown: Duration) -> Self {
        Self {
            active: BTreeSet::new(),
            last_cleanup: None,
            cooldown,
            buffer_target_seconds,
        }
    }

    pub fn active(&self) -> &BTreeSet<MitigationKind> {
        &self.active
    }

    pub fn is_degraded(&self) -> bool {
        !self.active.is_empty()
    }

    /// Current (possibly shrunk) buffer target.
    pub fn buffer_target_seconds(&self) -> f64 {
        self.buffer_target_seconds
    }

    /// Whether a cleanup may be applied now. False inside the cooldown
    /// window, which makes re-detection of a persisting violation a no-op.
    pub fn cleanup_due(&self, now: Instant) -> bool {
        match self.last_cleanup {
            None => true,
            Some(applied_at) => now.duration_since(applied_at) >= self.cooldown,
        }
    }

    /// Record a successful cleanup and return the new shrunk buffer target.
    pub fn record_cleanup(&mut self, now: Instant) -> f64 {
        self.buffer_target_seconds = (self.buffer_target_seconds
            - BUFFER_SHRINK_STEP_SECONDS)
            .max(BUFFER_TARGET_FLOOR_SECONDS);
        self.last_cleanup = Some(now);
        self.active.insert(MitigationKind::MemoryCleanup);
        self.buffer_target_seconds
    }

    /// The shrunk target to apply on this attempt, without recording it.
    /// Used so a failed engine call leaves the ledger unchanged and the
    /// evaluator retries next tick.
    pub fn next_cleanup_target(&self) -> f64 {
        (self.buffer_target_seconds - BUFFER_SHRINK_STEP_SECONDS)
            .max(BUFFER_TARGET_FLOOR_SECONDS)
    }

    pub fn throttle_active(&self) -> bool {
        self.active.contains(&MitigationKind::AnimationThrottle)
    }

    pub fn record_throttle(&mut self) {
        self.active.insert(MitigationKind::AnimationThrottle);
    }

    /// An explicit profile change is the only path that restores a
    /// less-restrictive target and clears active mitigations.
    pub fn reset_for_profile(&mut self, buffer_target_seconds: f64) {
        self.active.clear();
        self.last_cleanup = None;
        self.buffer_target_seconds = buffer_target_seconds;
    }
}

/// Divisor-based redraw gate shared with the host render loop.
///
/// The host calls [`ThrottleGate::admit`] once per scheduled redraw callback
/// and skips rendering when it returns false. A divisor of 1 (the default)
/// admits everything; the throttle mitigation raises it so only every Nth
/// callback is acted on.
#[derive(Debug)]
pub struct ThrottleGate {
    divisor: AtomicU32,
    counter: AtomicU64,
}

impl ThrottleGate {
    pub fn new() -> Self {
        Self {
            divisor: AtomicU32::new(1),
            counter: AtomicU64::new(0),
        }
    }

    pub fn divisor(&self) -> u32 {
        self.divisor.load(Ordering::Relaxed)
    }

    pub fn set_divisor(&self, divisor: u32) {
        self.divisor.store(divisor.max(1), Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.set_divisor(1);
    }

    /// True when this callback should be acted on.
    pub fn admit(&self) -> bool {
        let divisor = self.divisor.load(Ordering::Relaxed) as u64;
        if divisor <= 1 {
            return true;
        }
        self.counter.fetch_add(1, Ordering::Relaxed) % divisor == 0
    }
}

impl Default for ThrottleGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Divisor that coalesces `nominal_rate` callbacks down toward `floor`,
/// keeping the acted-on rate at or above it. The floor is the minimum
/// acceptable frame rate, so the throttle must never undershoot it.
pub fn throttle_divisor(nominal_rate: f64, floor: f64) -> u32 {
    if nominal_rate <= 0.0 || floor <= 0.0 || nominal_rate <= floor {
        return 1;
    }
    ((nominal_rate / floor).floor() as u32).max(1)
}
