use crate::engine::{EngineError, FatalErrorClass};

#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("streaming fatal ({class}): {reason}")]
    StreamingFatal {
        class: FatalErrorClass,
        reason: String,
    },

    #[error("monitoring degraded: {reason}")]
    MonitoringDegraded { reason: String },

    #[error("mitigation `{action}` failed: {reason}")]
    MitigationFailed {
        action: &'static str,
        reason: String,
    },

    #[error("engine error: {source}")]
    Engine {
        #[from]
        source: EngineError,
    },

    #[error("session torn down")]
    TornDown,
}

impl GovernorError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn streaming_fatal(class: FatalErrorClass, reason: impl Into<String>) -> Self {
        Self::StreamingFatal {
            class,
            reason: reason.into(),
        }
    }

    pub fn mitigation_failed(action: &'static str, reason: impl Into<String>) -> Self {
        Self::MitigationFailed {
            action,
            reason: reason.into(),
        }
    }

    /// Whether the adapter may retry the underlying operation with backoff.
    ///
    /// Only network-class fatal errors are retryable; media-decode errors get
    /// a single recovery attempt instead, and everything else surfaces as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StreamingFatal {
                class: FatalErrorClass::Network,
                ..
            }
        )
    }

    /// Whether this failure ends the session.
    ///
    /// Configuration problems are recovered locally via fallback, degraded
    /// monitoring keeps sampling with partial data, and failed mitigations are
    /// retried on the next tick. Only streaming fatals are terminal, and then
    /// only once per-class recovery is exhausted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StreamingFatal { .. } | Self::TornDown)
    }
}
