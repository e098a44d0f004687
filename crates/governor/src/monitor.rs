// Resource monitor: samples host introspection capabilities into one
// MetricsSnapshot per tick and keeps a bounded history for trend detection.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::events::unix_now_ms;
use crate::profile::PerformanceProfile;

/// Optional host capability reporting current memory usage.
///
/// Absence of the capability degrades monitoring gracefully: the snapshot
/// carries no memory reading and memory thresholds are simply not evaluated.
pub trait MemoryProbe: Send + Sync {
    fn usage_bytes(&self) -> Option<u64>;
}

/// Host clock counting scheduled redraw callbacks. The monitor derives the
/// observed frame rate from the count delta over each tick window.
pub trait FrameClock: Send + Sync {
    fn frame_count(&self) -> u64;
}

/// Optional host capability measuring input latency: elapsed time between an
/// interaction intent and its completion signal (focus/activation).
#[async_trait]
pub trait InputProbe: Send + Sync {
    /// Resolves with the measured latency, or `None` when no interaction
    /// occurred during the window. The monitor bounds this with a timeout; an
    /// unresolved measurement is reported as a violation, never left pending.
    async fn measure(&self) -> Option<Duration>;
}

/// Host playback element. Read-only for metrics; mutating calls are reserved
/// for the host and the cleanup mitigation.
pub trait PlaybackElement: Send + Sync {
    fn play(&self);
    fn pause(&self);
    fn current_time(&self) -> f64;
    fn set_current_time(&self, seconds: f64);
    fn ready_state(&self) -> u8;
    /// Seconds of media buffered ahead of the playhead.
    fn buffered_ahead_seconds(&self) -> f64;
    /// Drop any cached frame data. Invoked by the memory-cleanup mitigation.
    fn drop_frame_cache(&self);
}

/// One input-latency observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum LatencyReading {
    Measured { ms: f64 },
    /// The measurement did not resolve within the bound. Reported as a
    /// latency violation by the evaluator.
    TimedOut { bound_ms: f64 },
    /// No input probe capability, or no interaction during the window.
    Unavailable,
}

/// Ephemeral point-in-time readings for one monitor tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp_ms: u64,
    /// `None` when the host offers no memory introspection capability.
    pub memory_usage_bytes: Option<u64>,
    pub estimated_cpu_percent: f64,
    pub input_latency: LatencyReading,
    pub frame_rate: f64,
    /// Buffered-ahead seconds over the profile's buffer target.
    pub buffer_ratio: f64,
}

/// Bounded FIFO history of snapshots, sized for trend detection.
#[derive(Debug)]
pub struct MetricsHistory {
    capacity: usize,
    snapshots: VecDeque<MetricsSnapshot>,
}

impl MetricsHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            snapshots: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Append a snapshot, evicting the oldest when at capacity.
    pub fn push(&mut self, snapshot: MetricsSnapshot) {
        if self.snapshots.len() >= self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn latest(&self) -> Option<&MetricsSnapshot> {
        self.snapshots.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricsSnapshot> {
        self.snapshots.iter()
    }

    /// Leak heuristic: true when the window is full and memory readings grew
    /// monotonically across it. A single plateau or dip resets the suspicion.
    pub fn memory_trend_rising(&self) -> bool {
        if self.snapshots.len() < self.capacity {
            return false;
        }
        let mut readings = self.snapshots.iter().filter_map(|s| s.memory_usage_bytes);
        let Some(first) = readings.next() else {
            return false;
        };
        let mut prev = first;
        let mut count = 1usize;
        for value in readings {
            if value <= prev {
                return false;
            }
            prev = value;
            count += 1;
        }
        count == self.capacity && prev > first
    }
}

/// Periodic sampler over the host probes. Produces exactly one snapshot per
/// tick; the tick cadence itself is owned by the session controller so that a
/// single timer exists per session.
pub struct ResourceMonitor {
    memory_probe: Option<Box<dyn MemoryProbe>>,
    frame_clock: Box<dyn FrameClock>,
    input_probe: Option<Box<dyn InputProbe>>,
    last_frame_count: u64,
    last_sample_at: Option<Instant>,
    degraded_logged: bool,
}

/// Latency probes are bounded at twice the profile target: anything beyond
/// that is already deep in violation territory, so waiting longer only delays
/// the alert.
const LATENCY_TIMEOUT_FACTOR: f64 = 2.0;

impl ResourceMonitor {
    pub fn new(
        memory_probe: Option<Box<dyn MemoryProbe>>,
        frame_clock: Box<dyn FrameClock>,
        input_probe: Option<Box<dyn InputProbe>>,
    ) -> Self {
        let last_frame_count = frame_clock.frame_count();
        Self {
            memory_probe,
            frame_clock,
            input_probe,
            last_frame_count,
            last_sample_at: None,
            degraded_logged: false,
        }
    }

    /// Take one snapshot.
    ///
    /// `busy` is the controller's synchronous processing time for the
    /// previous tick and feeds the CPU duty-cycle estimate. The input-latency measurement is
    /// timeout-bounded so no await-chain outlives the tick.
    pub async fn sample(
        &mut self,
        profile: &PerformanceProfile,
        media: &dyn PlaybackElement,
        busy: Duration,
    ) -> MetricsSnapshot {
        let now = Instant::now();

        let memory_usage_bytes = match &self.memory_probe {
            Some(probe) => probe.usage_bytes(),
            None => None,
        };
        if memory_usage_bytes.is_none() && !self.degraded_logged {
            self.degraded_logged = true;
            warn!("memory introspection unavailable, monitoring continues with partial data");
        }

        let frame_count = self.frame_clock.frame_count();
        let elapsed = self
            .last_sample_at
            .map(|t| now.duration_since(t))
            .unwrap_or(profile.sample_interval);
        let frame_rate = if elapsed.as_secs_f64() > 0.0 {
            frame_count.saturating_sub(self.last_frame_count) as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        self.last_frame_count = frame_count;
        self.last_sample_at = Some(now);

        let interval = profile.sample_interval.as_secs_f64();
        let estimated_cpu_percent = if interval > 0.0 {
            (busy.as_secs_f64() / interval * 100.0).min(100.0)
        } else {
            0.0
        };

        let input_latency = self.sample_input_latency(profile).await;

        let buffer_ratio = if profile.buffer_target_seconds > 0.0 {
            media.buffered_ahead_seconds() / profile.buffer_target_seconds
        } else {
            0.0
        };

        let snapshot = MetricsSnapshot {
            timestamp_ms: unix_now_ms(),
            memory_usage_bytes,
            estimated_cpu_percent,
            input_latency,
            frame_rate,
            buffer_ratio,
        };
        debug!(
            memory = ?snapshot.memory_usage_bytes,
            cpu = snapshot.estimated_cpu_percent,
            fps = snapshot.frame_rate,
            buffer_ratio = snapshot.buffer_ratio,
            "sampled metrics"
        );
        snapshot
    }

    async fn sample_input_latency(&self, profile: &PerformanceProfile) -> LatencyReading {
        let Some(probe) = &self.input_probe else {
            return LatencyReading::Unavailable;
        };
        let bound_ms = profile.input_latency_target_ms * LATENCY_TIMEOUT_FACTOR;
        let bound = Duration::from_secs_f64(bound_ms / 1000.0);
        match tokio::time::timeout(bound, probe.measure()).await {
            Ok(Some(latency)) => LatencyReading::Measured {
                ms: latency.as_secs_f64() * 1000.0,
            },
            Ok(None) => LatencyReading::Unavailable,
            Err(_) => LatencyReading::TimedOut { bound_ms },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{DeviceClass, ProfileOverrides, resolve_profile};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct FixedMemory(u64);
    impl MemoryProbe for FixedMemory {
        fn usage_bytes(&self) -> Option<u64> {
            Some(self.0)
        }
    }

    struct Frames(Arc<AtomicU64>);
    impl FrameClock for Frames {
        fn frame_count(&self) -> u64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    struct StallingProbe;
    #[async_trait]
    impl InputProbe for StallingProbe {
        async fn measure(&self) -> Option<Duration> {
            std::future::pending().await
        }
    }

    struct QuickProbe(Duration);
    #[async_trait]
    impl InputProbe for QuickProbe {
        async fn measure(&self) -> Option<Duration> {
            Some(self.0)
        }
    }

    struct StubMedia {
        buffered: f64,
    }
    impl PlaybackElement for StubMedia {
        fn play(&self) {}
        fn pause(&self) {}
        fn current_time(&self) -> f64 {
            0.0
        }
        fn set_current_time(&self, _seconds: f64) {}
        fn ready_state(&self) -> u8 {
            4
        }
        fn buffered_ahead_seconds(&self) -> f64 {
            self.buffered
        }
        fn drop_frame_cache(&self) {}
    }

    fn tv_profile() -> PerformanceProfile {
        resolve_profile(DeviceClass::Tv, &ProfileOverrides::default())
    }

    fn snapshot_with_memory(bytes: Option<u64>) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp_ms: 0,
            memory_usage_bytes: bytes,
            estimated_cpu_percent: 0.0,
            input_latency: LatencyReading::Unavailable,
            frame_rate: 30.0,
            buffer_ratio: 1.0,
        }
    }

    #[test]
    fn history_is_fifo_bounded() {
        let mut history = MetricsHistory::new(3);
        for i in 0..5u64 {
            history.push(snapshot_with_memory(Some(i)));
        }
        assert_eq!(history.len(), 3);
        let oldest = history.iter().next().unwrap();
        assert_eq!(oldest.memory_usage_bytes, Some(2));
        assert_eq!(history.latest().unwrap().memory_usage_bytes, Some(4));
    }

    #[test]
    fn rising_memory_trend_requires_full_window() {
        let mut history = MetricsHistory::new(4);
        for i in 0..3u64 {
            history.push(snapshot_with_memory(Some(i * 100)));
        }
        assert!(!history.memory_trend_rising());
        history.push(snapshot_with_memory(Some(300)));
        assert!(history.memory_trend_rising());
    }

    #[test]
    fn plateau_resets_leak_suspicion() {
        let mut history = MetricsHistory::new(3);
        history.push(snapshot_with_memory(Some(100)));
        history.push(snapshot_with_memory(Some(100)));
        history.push(snapshot_with_memory(Some(200)));
        assert!(!history.memory_trend_rising());
    }

    #[test]
    fn missing_readings_disable_trend_detection() {
        let mut history = MetricsHistory::new(2);
        history.push(snapshot_with_memory(None));
        history.push(snapshot_with_memory(None));
        assert!(!history.memory_trend_rising());
    }

    #[tokio::test]
    async fn absent_memory_probe_yields_none_not_failure() {
        let frames = Arc::new(AtomicU64::new(0));
        let mut monitor = ResourceMonitor::new(None, Box::new(Frames(frames)), None);
        let media = StubMedia { buffered: 8.0 };
        let snapshot = monitor
            .sample(&tv_profile(), &media, Duration::ZERO)
            .await;
        assert_eq!(snapshot.memory_usage_bytes, None);
        assert_eq!(snapshot.input_latency, LatencyReading::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_latency_probe_times_out() {
        let frames = Arc::new(AtomicU64::new(0));
        let mut monitor = ResourceMonitor::new(
            Some(Box::new(FixedMemory(1024))),
            Box::new(Frames(frames)),
            Some(Box::new(StallingProbe)),
        );
        let media = StubMedia { buffered: 4.0 };
        let profile = tv_profile();
        let snapshot = monitor.sample(&profile, &media, Duration::ZERO).await;
        assert_eq!(
            snapshot.input_latency,
            LatencyReading::TimedOut {
                bound_ms: profile.input_latency_target_ms * 2.0
            }
        );
    }

    #[tokio::test]
    async fn measured_latency_is_reported_in_ms() {
        let frames = Arc::new(AtomicU64::new(0));
        let mut monitor = ResourceMonitor::new(
            Some(Box::new(FixedMemory(1024))),
            Box::new(Frames(frames)),
            Some(Box::new(QuickProbe(Duration::from_millis(42)))),
        );
        let media = StubMedia { buffered: 4.0 };
        let snapshot = monitor
            .sample(&tv_profile(), &media, Duration::ZERO)
            .await;
        match snapshot.input_latency {
            LatencyReading::Measured { ms } => assert!((ms - 42.0).abs() < 0.5),
            other => panic!("expected measured latency, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn frame_rate_derives_from_count_delta() {
        let frames = Arc::new(AtomicU64::new(0));
        let clock = Frames(Arc::clone(&frames));
        let mut monitor =
            ResourceMonitor::new(Some(Box::new(FixedMemory(0))), Box::new(clock), None);
        let media = StubMedia { buffered: 0.0 };
        let profile = tv_profile();

        // Establish a baseline tick, then 30 frames over one second.
        monitor.sample(&profile, &media, Duration::ZERO).await;
        frames.fetch_add(30, Ordering::Relaxed);
        tokio::time::advance(Duration::from_secs(1)).await;
        let snapshot = monitor.sample(&profile, &media, Duration::ZERO).await;
        assert!((snapshot.frame_rate - 30.0).abs() < 0.5);
    }

    #[tokio::test]
    async fn cpu_estimate_is_duty_cycle_clamped_to_100() {
        let frames = Arc::new(AtomicU64::new(0));
        let mut monitor = ResourceMonitor::new(None, Box::new(Frames(frames)), None);
        let media = StubMedia { buffered: 0.0 };
        let profile = tv_profile();
        let snapshot = monitor
            .sample(&profile, &media, Duration::from_millis(500))
            .await;
        assert!((snapshot.estimated_cpu_percent - 50.0).abs() < 0.01);
        let snapshot = monitor
            .sample(&profile, &media, Duration::from_secs(10))
            .await;
        assert_eq!(snapshot.estimated_cpu_percent, 100.0);
    }
}
