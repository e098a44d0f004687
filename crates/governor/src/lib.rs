//! # Governor Engine
//!
//! Performance-governance core for adaptive-bitrate playback sessions on
//! resource-constrained devices. It resolves a device-class profile, samples
//! host resource capabilities on a cadence, judges each snapshot against the
//! profile's ceilings, applies automatic mitigations when ceilings are
//! breached, and publishes every state change as one uniform event shape on
//! the `"performance"` channel.
//!
//! The streaming engine itself is an external collaborator reached through
//! the [`StreamingEngine`] trait; this crate configures and supervises it but
//! implements no streaming protocol.
//!
//! ## Usage
//!
//! Attach a session with a [`GovernorConfig`] and [`HostBindings`], spawn
//! [`SessionController::run`], subscribe to events through the returned
//! [`SessionHandle`], and call [`SessionHandle::detach`] to tear down.

pub mod adapter;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod mitigation;
pub mod monitor;
pub mod profile;
pub mod retry;

pub use adapter::{AdapterVerdict, EngineAdapter};
pub use config::{GovernorConfig, GovernorConfigBuilder};
pub use controller::{Command, HostBindings, SessionController, SessionHandle, SessionState};
pub use engine::{
    EngineConfig, EngineError, EngineEvent, EngineFactory, FatalErrorClass, StreamingEngine,
};
pub use error::GovernorError;
pub use evaluator::{Alert, Evaluation, MetricKind, Severity, ThresholdEvaluator};
pub use events::{EventData, EventEmitter, EventKind, PERFORMANCE_CHANNEL, PerformanceEvent};
pub use mitigation::{MitigationKind, MitigationLedger, ThrottleGate};
pub use monitor::{
    FrameClock, InputProbe, LatencyReading, MemoryProbe, MetricsHistory, MetricsSnapshot,
    PlaybackElement, ResourceMonitor,
};
pub use profile::{DeviceClass, PerformanceProfile, ProfileOverrides, resolve_profile};
pub use retry::RetryPolicy;
