// Streaming-engine seam: the adaptive-bitrate engine is an external
// collaborator reached through a narrow trait so it stays swappable and
// mockable. Lifecycle events arrive over an mpsc channel the governor owns.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::monitor::PlaybackElement;
use crate::profile::{DeviceClass, PerformanceProfile};

/// Engine configuration derived from the active profile.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub buffer_target_seconds: f64,
    pub back_buffer_seconds: f64,
    /// Offload demux/transmux work to a worker where the engine supports it.
    /// Disabled on TV chipsets where the extra thread starves the decoder.
    pub worker_enabled: bool,
    /// Initial quality level hint; `None` lets the engine's ABR start freely.
    pub initial_quality_cap: Option<u32>,
    pub live_sync_window_seconds: f64,
}

impl EngineConfig {
    /// Pure mapping from profile to engine configuration.
    pub fn from_profile(profile: &PerformanceProfile) -> Self {
        let (worker_enabled, initial_quality_cap, live_sync_window_seconds) =
            match profile.device_class {
                DeviceClass::Tv => (false, Some(1), 12.0),
                DeviceClass::Mobile => (true, Some(2), 9.0),
                DeviceClass::Desktop => (true, None, 6.0),
            };
        Self {
            buffer_target_seconds: profile.buffer_target_seconds,
            back_buffer_seconds: profile.back_buffer_seconds,
            worker_enabled,
            initial_quality_cap,
            live_sync_window_seconds,
        }
    }
}

/// Classification of a fatal engine error, driving the recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalErrorClass {
    /// Retried with bounded backoff before surfacing.
    Network,
    /// One engine-level recovery attempt before surfacing.
    MediaDecode,
    /// Surfaced immediately without retry.
    Other,
}

impl std::fmt::Display for FatalErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => f.write_str("network"),
            Self::MediaDecode => f.write_str("media_decode"),
            Self::Other => f.write_str("other"),
        }
    }
}

/// Lifecycle notifications forwarded by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Manifest parsed, playback can begin.
    ManifestParsed,
    /// The engine switched quality level (informational).
    LevelSwitched { level: u32 },
    FatalError {
        class: FatalErrorClass,
        detail: String,
    },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("engine construction failed: {reason}")]
    Construction { reason: String },

    #[error("source load failed: {reason}")]
    Source { reason: String },

    #[error("media attach failed: {reason}")]
    Attach { reason: String },

    #[error("engine call rejected: {reason}")]
    Rejected { reason: String },
}

impl EngineError {
    pub fn construction(reason: impl Into<String>) -> Self {
        Self::Construction {
            reason: reason.into(),
        }
    }

    pub fn source(reason: impl Into<String>) -> Self {
        Self::Source {
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Constructs engine instances. A fresh instance is built on attach and on
/// explicit reload after a terminal error.
pub trait EngineFactory: Send + Sync {
    fn construct(
        &self,
        config: &EngineConfig,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<Arc<dyn StreamingEngine>, EngineError>;
}

/// The narrow surface the governor needs from any adaptive-bitrate engine.
#[async_trait]
pub trait StreamingEngine: Send + Sync {
    async fn load_source(&self, url: &str) -> Result<(), EngineError>;

    fn attach_media(&self, element: Arc<dyn PlaybackElement>) -> Result<(), EngineError>;

    fn current_level(&self) -> Option<u32>;

    /// `None` returns level selection to the engine's ABR.
    fn set_current_level(&self, level: Option<u32>) -> Result<(), EngineError>;

    /// Forward buffer the engine should maintain ahead of the playhead.
    fn set_buffer_target(&self, seconds: f64) -> Result<(), EngineError>;

    /// Release retained back-buffer. Part of the memory-cleanup mitigation.
    fn release_back_buffer(&self) -> Result<(), EngineError>;

    /// Engine-level recovery for media-decode errors (codec swap / flush).
    async fn recover_media(&self) -> Result<(), EngineError>;

    fn destroy(&self);
}
