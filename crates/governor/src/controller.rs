// Session controller: one cooperative task owning the whole governance loop.
// A single interval timer drives sampling; staged commands are applied at tick
// boundaries; teardown cancels the timer synchronously and gates every
// subsequent side effect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::{AdapterVerdict, EngineAdapter};
use crate::config::GovernorConfig;
use crate::engine::{EngineEvent, EngineFactory};
use crate::error::GovernorError;
use crate::evaluator::ThresholdEvaluator;
use crate::events::{EventData, EventEmitter, EventKind, PerformanceEvent};
use crate::mitigation::{MitigationKind, MitigationLedger, ThrottleGate, throttle_divisor};
use crate::monitor::{
    FrameClock, InputProbe, MemoryProbe, MetricsHistory, MetricsSnapshot, PlaybackElement,
    ResourceMonitor,
};
use crate::profile::{PerformanceProfile, resolve_profile};

/// Command channel depth; commands are rare host actions.
const COMMAND_BUFFER: usize = 8;

/// Display refresh assumed for the throttle divisor when the observed frame
/// rate is already at or below the floor and thus useless as a nominal rate.
const DEFAULT_REFRESH_RATE_HZ: f64 = 60.0;

/// Session lifecycle. `Degraded` is not a variant: it is derived from the
/// mitigation ledger and composes with `Playing`/`Paused`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Configuring,
    Loading,
    Ready,
    Playing,
    Paused,
    /// Terminal unless an explicit reload reinitializes the engine.
    Error,
    TornDown,
}

/// Host actions staged onto the controller's cooperative thread.
#[derive(Debug)]
pub enum Command {
    /// Applied atomically at the next tick boundary, never mid-evaluation.
    Reconfigure(GovernorConfig),
    /// Play/pause is toggled externally; the controller only mirrors it.
    PlaybackStateChanged { playing: bool },
    /// Reinitialize the engine after a terminal error.
    Reload,
}

/// Host-provided collaborators bound at attach time.
pub struct HostBindings {
    pub engine_factory: Arc<dyn EngineFactory>,
    pub media: Arc<dyn PlaybackElement>,
    /// Optional; absence degrades monitoring gracefully.
    pub memory_probe: Option<Box<dyn MemoryProbe>>,
    pub frame_clock: Box<dyn FrameClock>,
    /// Optional; absence leaves latency unmeasured.
    pub input_probe: Option<Box<dyn InputProbe>>,
}

/// Handle held by the host after attach.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    token: CancellationToken,
    emitter: Arc<EventEmitter>,
    throttle: Arc<ThrottleGate>,
}

impl SessionHandle {
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&PerformanceEvent) + Send + Sync + 'static,
    {
        self.emitter.subscribe(listener);
    }

    /// Gate the host render loop consults once per scheduled redraw callback.
    pub fn throttle_gate(&self) -> Arc<ThrottleGate> {
        Arc::clone(&self.throttle)
    }

    pub async fn reconfigure(&self, config: GovernorConfig) -> Result<(), GovernorError> {
        self.send(Command::Reconfigure(config)).await
    }

    pub async fn set_playing(&self, playing: bool) -> Result<(), GovernorError> {
        self.send(Command::PlaybackStateChanged { playing }).await
    }

    pub async fn reload(&self) -> Result<(), GovernorError> {
        self.send(Command::Reload).await
    }

    /// Synchronous teardown: the cancellation is observable immediately, the
    /// run loop exits at its next await point, and every emit after this call
    /// is suppressed.
    pub fn detach(&self) {
        self.token.cancel();
    }

    pub fn is_detached(&self) -> bool {
        self.token.is_cancelled()
    }

    async fn send(&self, command: Command) -> Result<(), GovernorError> {
        if self.token.is_cancelled() {
            return Err(GovernorError::TornDown);
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| GovernorError::TornDown)
    }
}

/// State owned exclusively by the controller; mutated only by the tick
/// handler and the staged configuration path, both on the same task.
#[derive(Debug)]
struct ControllerState {
    profile: PerformanceProfile,
    last_snapshot: Option<MetricsSnapshot>,
    session: SessionState,
}

pub struct SessionController {
    config: GovernorConfig,
    state: ControllerState,
    history: MetricsHistory,
    monitor: ResourceMonitor,
    ledger: MitigationLedger,
    adapter: EngineAdapter,
    emitter: Arc<EventEmitter>,
    throttle: Arc<ThrottleGate>,
    media: Arc<dyn PlaybackElement>,
    commands: mpsc::Receiver<Command>,
    engine_events: Option<mpsc::Receiver<EngineEvent>>,
    token: CancellationToken,
    staged_config: Option<GovernorConfig>,
    last_busy: Duration,
    leak_logged: bool,
}

impl SessionController {
    /// Create the controller and its host handle. The session starts
    /// uninitialized; [`SessionController::run`] performs configure + load.
    pub fn attach(config: GovernorConfig, host: HostBindings) -> (Self, SessionHandle) {
        let profile = resolve_profile(config.device_class, &config.overrides());
        let token = CancellationToken::new();
        let emitter = Arc::new(EventEmitter::new(profile.device_class));
        let throttle = Arc::new(ThrottleGate::new());
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);

        let adapter = EngineAdapter::new(
            host.engine_factory,
            Arc::clone(&host.media),
            config.retry.clone(),
            token.clone(),
        );
        let monitor = ResourceMonitor::new(host.memory_probe, host.frame_clock, host.input_probe);

        let handle = SessionHandle {
            commands: commands_tx,
            token: token.clone(),
            emitter: Arc::clone(&emitter),
            throttle: Arc::clone(&throttle),
        };

        let controller = Self {
            history: MetricsHistory::new(config.history_capacity),
            ledger: MitigationLedger::new(profile.buffer_target_seconds),
            state: ControllerState {
                profile,
                last_snapshot: None,
                session: SessionState::Uninitialized,
            },
            config,
            monitor,
            adapter,
            emitter,
            throttle,
            media: host.media,
            commands: commands_rx,
            engine_events: None,
            token,
            staged_config: None,
            last_busy: Duration::ZERO,
            leak_logged: false,
        };
        (controller, handle)
    }

    /// Drive the session until teardown. Single timer, single task.
    pub async fn run(mut self) {
        self.initialize().await;

        let mut ticker = tokio::time::interval(self.state.profile.sample_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first interval tick fires immediately; skip it so the first
        // sample happens one full cadence after attach.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {
                    let interval_before = self.state.profile.sample_interval;
                    self.on_tick().await;
                    if self.state.profile.sample_interval != interval_before {
                        ticker = tokio::time::interval(self.state.profile.sample_interval);
                        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                        ticker.tick().await;
                    }
                }
                Some(command) = self.commands.recv() => {
                    self.on_command(command).await;
                }
                event = Self::next_engine_event(&mut self.engine_events) => {
                    match event {
                        Some(event) => self.on_engine_event(event).await,
                        None => self.engine_events = None,
                    }
                }
            }
        }

        self.teardown();
    }

    async fn initialize(&mut self) {
        self.state.session = SessionState::Configuring;
        match self.adapter.configure(&self.state.profile) {
            Ok(events) => self.engine_events = Some(events),
            Err(e) => {
                self.surface_error(&e);
                return;
            }
        }

        self.state.session = SessionState::Loading;
        let url = self.config.source_url.clone();
        match self.adapter.load(&url).await {
            Ok(()) => {}
            Err(GovernorError::TornDown) => {}
            Err(e) => self.surface_error(&e),
        }
    }

    async fn on_tick(&mut self) {
        if self.token.is_cancelled() {
            return;
        }
        if let Some(config) = self.staged_config.take() {
            self.apply_config(config).await;
        }

        let snapshot = self
            .monitor
            .sample(&self.state.profile, &*self.media, self.last_busy)
            .await;
        // Busy time covers only the synchronous judgement and mitigation work
        // below; the latency-probe wait inside the sample is idle time and
        // must not inflate the duty-cycle estimate.
        let started = tokio::time::Instant::now();

        // The snapshot is fully populated before any judgement happens.
        self.state.last_snapshot = Some(snapshot.clone());
        self.history.push(snapshot.clone());
        self.emit(EventKind::Metrics, EventData::Metrics(snapshot.clone()));

        let evaluation = ThresholdEvaluator::evaluate(&self.state.profile, &snapshot);
        for alert in &evaluation.alerts {
            self.emit(EventKind::Alert, EventData::Alert(alert.clone()));
        }

        if evaluation.wants_cleanup {
            self.apply_cleanup();
        }
        if evaluation.wants_throttle && !self.ledger.throttle_active() {
            self.apply_throttle(snapshot.frame_rate);
        }

        if self.history.memory_trend_rising() && !self.leak_logged {
            self.leak_logged = true;
            warn!(
                window = self.history.len(),
                "memory usage rising monotonically across the full history window, \
                 suspected leak"
            );
        }

        self.last_busy = started.elapsed();
    }

    fn apply_cleanup(&mut self) {
        let now = Instant::now();
        // Idempotent under a persisting violation: inside the cooldown window
        // re-detection is a no-op.
        if !self.ledger.cleanup_due(now) {
            return;
        }
        let target = self.ledger.next_cleanup_target();
        match self.adapter.apply_cleanup(target) {
            Ok(()) => {
                let applied = self.ledger.record_cleanup(now);
                info!(buffer_target_s = applied, "memory cleanup applied");
                self.emit(
                    EventKind::Mitigation,
                    EventData::Mitigation {
                        action: MitigationKind::MemoryCleanup,
                        applied_value: applied,
                    },
                );
            }
            // Alert already emitted; the ledger is untouched so the next tick
            // retries.
            Err(e) => warn!(error = %e, "cleanup mitigation failed, will retry next tick"),
        }
    }

    fn apply_throttle(&mut self, observed_rate: f64) {
        let floor = self.state.profile.frame_rate_floor;
        let nominal = if observed_rate > floor {
            observed_rate
        } else {
            DEFAULT_REFRESH_RATE_HZ
        };
        let divisor = throttle_divisor(nominal, floor);
        self.throttle.set_divisor(divisor);
        self.ledger.record_throttle();
        info!(divisor, "animation throttle applied");
        self.emit(
            EventKind::Mitigation,
            EventData::Mitigation {
                action: MitigationKind::AnimationThrottle,
                applied_value: divisor as f64,
            },
        );
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Reconfigure(config) => {
                debug!(device_class = %config.device_class, "configuration change staged");
                self.staged_config = Some(config);
            }
            Command::PlaybackStateChanged { playing } => {
                self.state.session = playback_transition(self.state.session, playing);
            }
            Command::Reload => {
                if self.state.session == SessionState::Error {
                    info!("explicit reload after terminal error");
                    self.initialize().await;
                } else {
                    debug!(state = ?self.state.session, "reload ignored outside error state");
                }
            }
        }
    }

    /// Apply a staged configuration at a tick boundary. The engine keeps
    /// running: only its tunables change, so the playback position is never
    /// disturbed.
    async fn apply_config(&mut self, config: GovernorConfig) {
        let profile = resolve_profile(config.device_class, &config.overrides());
        info!(
            device_class = %profile.device_class,
            buffer_target_s = profile.buffer_target_seconds,
            "applying configuration change"
        );

        self.emitter.set_device_class(profile.device_class);
        self.ledger.reset_for_profile(profile.buffer_target_seconds);
        self.throttle.reset();
        self.leak_logged = false;

        if let Err(e) = self.adapter.apply_buffer_target(profile.buffer_target_seconds) {
            warn!(error = %e, "could not push new buffer target to engine");
        }
        self.adapter.set_retry_policy(config.retry.clone());

        let source_changed =
            !config.source_url.is_empty() && config.source_url != self.config.source_url;
        self.state.profile = profile;
        self.config = config;

        if source_changed {
            self.initialize().await;
        }
    }

    async fn on_engine_event(&mut self, event: EngineEvent) {
        let Some(verdict) = self.adapter.on_engine_event(event).await else {
            return;
        };
        match verdict {
            AdapterVerdict::Ready { time_to_ready_ms } => {
                if matches!(
                    self.state.session,
                    SessionState::Configuring | SessionState::Loading
                ) {
                    self.state.session = SessionState::Ready;
                }
                self.emit(EventKind::Ready, EventData::Ready { time_to_ready_ms });
            }
            AdapterVerdict::Recovered { class } => {
                debug!(%class, "engine recovered without surfacing");
            }
            AdapterVerdict::Fatal { class, detail } => {
                self.surface_error(&GovernorError::streaming_fatal(class, detail));
            }
        }
    }

    /// Nothing throws across the public boundary; every failure resolves to
    /// one emitted error-typed event.
    fn surface_error(&mut self, error: &GovernorError) {
        error!(error = %error, "surfacing error");
        let (class, terminal) = match error {
            GovernorError::StreamingFatal { class, .. } => (*class, true),
            _ => (crate::engine::FatalErrorClass::Other, error.is_terminal()),
        };
        if terminal {
            self.state.session = SessionState::Error;
        }
        self.emit(
            EventKind::Error,
            EventData::Error {
                class,
                message: error.to_string(),
                terminal,
            },
        );
    }

    /// Every emission is gated on liveness so no event escapes after detach,
    /// even from a tick that was already in flight.
    fn emit(&self, kind: EventKind, data: EventData) {
        if self.token.is_cancelled() {
            return;
        }
        self.emitter.emit(kind, data);
    }

    fn teardown(&mut self) {
        self.state.session = SessionState::TornDown;
        self.adapter.teardown();
        debug!("session torn down");
    }

    async fn next_engine_event(
        events: &mut Option<mpsc::Receiver<EngineEvent>>,
    ) -> Option<EngineEvent> {
        match events {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }
}

/// Play/pause is owned by the host; the controller only mirrors the toggle
/// between the states it has already reached.
fn playback_transition(state: SessionState, playing: bool) -> SessionState {
    match (state, playing) {
        (SessionState::Ready | SessionState::Paused, true) => SessionState::Playing,
        (SessionState::Ready | SessionState::Playing, false) => SessionState::Paused,
        (other, _) => other,
    }
}
