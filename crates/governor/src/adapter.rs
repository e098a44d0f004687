// Engine adapter: translates the active profile into engine configuration and
// folds the engine's lifecycle into governor verdicts. Fatal errors are
// classified here: network-class gets bounded backoff retries, media-decode
// gets one engine-level recovery call, anything else surfaces immediately.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{
    EngineConfig, EngineEvent, EngineFactory, FatalErrorClass, StreamingEngine,
};
use crate::error::GovernorError;
use crate::monitor::PlaybackElement;
use crate::profile::PerformanceProfile;
use crate::retry::RetryPolicy;

/// Engine lifecycle channel depth. Lifecycle events are sparse; a small
/// buffer only has to absorb bursts around error storms.
const ENGINE_EVENT_BUFFER: usize = 16;

/// What the controller should do with a handled engine event.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterVerdict {
    /// Manifest parsed; publish the ready milestone.
    Ready { time_to_ready_ms: u64 },
    /// Per-class recovery succeeded; nothing to surface.
    Recovered { class: FatalErrorClass },
    /// Recovery exhausted or not applicable; surface a terminal error.
    Fatal {
        class: FatalErrorClass,
        detail: String,
    },
}

pub struct EngineAdapter {
    factory: Arc<dyn EngineFactory>,
    media: Arc<dyn PlaybackElement>,
    engine: Option<Arc<dyn StreamingEngine>>,
    retry: RetryPolicy,
    token: CancellationToken,
    source_url: String,
    load_started: Option<Instant>,
    /// Reload attempts consumed by the current network outage.
    network_attempts: u32,
    media_recovery_used: bool,
}

impl EngineAdapter {
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        media: Arc<dyn PlaybackElement>,
        retry: RetryPolicy,
        token: CancellationToken,
    ) -> Self {
        Self {
            factory,
            media,
            engine: None,
            retry,
            token,
            source_url: String::new(),
            load_started: None,
            network_attempts: 0,
            media_recovery_used: false,
        }
    }

    /// Construct a fresh engine for the profile and attach the playback
    /// element. Any previous engine is destroyed first. Returns the lifecycle
    /// receiver the controller selects on.
    pub fn configure(
        &mut self,
        profile: &PerformanceProfile,
    ) -> Result<mpsc::Receiver<EngineEvent>, GovernorError> {
        self.teardown_engine();

        let config = EngineConfig::from_profile(profile);
        let (events_tx, events_rx) = mpsc::channel(ENGINE_EVENT_BUFFER);
        let engine = self.factory.construct(&config, events_tx)?;
        engine.attach_media(Arc::clone(&self.media))?;
        debug!(device_class = %profile.device_class, ?config, "engine configured");

        self.engine = Some(engine);
        self.network_attempts = 0;
        self.media_recovery_used = false;
        Ok(events_rx)
    }

    /// Replace the retry policy for subsequent loads and reloads. Applied on
    /// configuration changes so a retuned host policy is not ignored.
    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    /// Load the source, retrying load failures as network-class errors with
    /// backoff. Exhaustion yields a single terminal `StreamingFatal`.
    pub async fn load(&mut self, url: &str) -> Result<(), GovernorError> {
        self.source_url = url.to_string();
        self.load_started = Some(Instant::now());

        for attempt in 0..=self.retry.max_retries {
            if self.token.is_cancelled() {
                return Err(GovernorError::TornDown);
            }
            let engine = self.engine()?;
            match engine.load_source(url).await {
                Ok(()) => {
                    self.network_attempts = 0;
                    return Ok(());
                }
                Err(e) => {
                    if attempt >= self.retry.max_retries {
                        return Err(GovernorError::streaming_fatal(
                            FatalErrorClass::Network,
                            format!("source load failed after {attempt} retries: {e}"),
                        ));
                    }
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying source load after transient failure"
                    );
                    tokio::select! {
                        _ = self.token.cancelled() => return Err(GovernorError::TornDown),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        unreachable!("load loop returns on the final attempt")
    }

    /// Fold one engine lifecycle event into a verdict for the controller.
    pub async fn on_engine_event(&mut self, event: EngineEvent) -> Option<AdapterVerdict> {
        match event {
            EngineEvent::ManifestParsed => {
                let time_to_ready_ms = self
                    .load_started
                    .map(|t| t.elapsed().as_millis() as u64)
                    .unwrap_or(0);
                self.network_attempts = 0;
                Some(AdapterVerdict::Ready { time_to_ready_ms })
            }
            EngineEvent::LevelSwitched { level } => {
                debug!(level, "engine switched quality level");
                None
            }
            EngineEvent::FatalError { class, detail } => self.recover_fatal(class, detail).await,
        }
    }

    async fn recover_fatal(
        &mut self,
        class: FatalErrorClass,
        detail: String,
    ) -> Option<AdapterVerdict> {
        match class {
            FatalErrorClass::Network => {
                while self.network_attempts < self.retry.max_retries {
                    let attempt = self.network_attempts;
                    self.network_attempts += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        detail = %detail,
                        "network-class fatal, retrying source"
                    );
                    tokio::select! {
                        _ = self.token.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    let Ok(engine) = self.engine() else {
                        return None;
                    };
                    if engine.load_source(&self.source_url).await.is_ok() {
                        return Some(AdapterVerdict::Recovered { class });
                    }
                }
                Some(AdapterVerdict::Fatal { class, detail })
            }
            FatalErrorClass::MediaDecode => {
                if self.media_recovery_used {
                    return Some(AdapterVerdict::Fatal { class, detail });
                }
                self.media_recovery_used = true;
                let Ok(engine) = self.engine() else {
                    return None;
                };
                match engine.recover_media().await {
                    Ok(()) => {
                        info!(detail = %detail, "media-decode error recovered");
                        Some(AdapterVerdict::Recovered { class })
                    }
                    Err(e) => Some(AdapterVerdict::Fatal {
                        class,
                        detail: format!("{detail}; recovery failed: {e}"),
                    }),
                }
            }
            FatalErrorClass::Other => Some(AdapterVerdict::Fatal { class, detail }),
        }
    }

    /// Push a new buffer target to the running engine, used both on profile
    /// change and by the cleanup mitigation.
    pub fn apply_buffer_target(&self, seconds: f64) -> Result<(), GovernorError> {
        self.engine()?
            .set_buffer_target(seconds)
            .map_err(GovernorError::from)
    }

    /// Apply the memory-cleanup mitigation: shrink the forward buffer,
    /// release retained back-buffer, drop cached frame data.
    pub fn apply_cleanup(&self, shrunk_target_seconds: f64) -> Result<(), GovernorError> {
        let engine = self.engine()?;
        engine
            .set_buffer_target(shrunk_target_seconds)
            .map_err(|e| GovernorError::mitigation_failed("cleanup", e.to_string()))?;
        engine
            .release_back_buffer()
            .map_err(|e| GovernorError::mitigation_failed("cleanup", e.to_string()))?;
        self.media.drop_frame_cache();
        Ok(())
    }

    pub fn teardown(&mut self) {
        self.teardown_engine();
    }

    fn teardown_engine(&mut self) {
        if let Some(engine) = self.engine.take() {
            engine.destroy();
        }
    }

    fn engine(&self) -> Result<Arc<dyn StreamingEngine>, GovernorError> {
        self.engine
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| GovernorError::configuration("engine not constructed"))
    }
}
