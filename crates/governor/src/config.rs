use serde::Deserialize;

use crate::profile::{DeviceClass, ProfileOverrides};
use crate::retry::RetryPolicy;

/// Recognized host configuration for one governor session.
///
/// Unrecognized device-class tags and out-of-range overrides are recovered
/// locally (fallback / clamping) during profile resolution; configuration is
/// never a fatal error.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GovernorConfig {
    /// Device class tag, default `desktop`.
    pub device_class: DeviceClass,
    /// Optional memory ceiling override in MB. Must be > 0; clamped otherwise.
    #[serde(rename = "memoryCeilingOverrideMB")]
    pub memory_ceiling_override_mb: Option<f64>,
    /// Optional CPU ceiling override in percent. Must be in (0, 100];
    /// clamped otherwise.
    pub cpu_ceiling_override_percent: Option<f64>,
    /// Stream manifest URL handed to the streaming engine.
    pub source_url: String,
    /// Retry behavior for network-class fatal errors.
    #[serde(skip)]
    pub retry: RetryPolicy,
    /// Capacity of the bounded snapshot history used for trend detection.
    #[serde(skip)]
    pub history_capacity: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            device_class: DeviceClass::Desktop,
            memory_ceiling_override_mb: None,
            cpu_ceiling_override_percent: None,
            source_url: String::new(),
            retry: RetryPolicy::default(),
            history_capacity: 60,
        }
    }
}

impl GovernorConfig {
    pub fn builder() -> GovernorConfigBuilder {
        GovernorConfigBuilder::default()
    }

    /// Overrides as consumed by the profile resolver.
    pub fn overrides(&self) -> ProfileOverrides {
        ProfileOverrides {
            memory_ceiling_mb: self.memory_ceiling_override_mb,
            cpu_ceiling_percent: self.cpu_ceiling_override_percent,
        }
    }
}

#[derive(Debug, Default)]
pub struct GovernorConfigBuilder {
    config: GovernorConfig,
}

impl GovernorConfigBuilder {
    pub fn with_device_class(mut self, class: DeviceClass) -> Self {
        self.config.device_class = class;
        self
    }

    /// Accepts the raw host tag; unknown tags fall back to desktop.
    pub fn with_device_tag(mut self, tag: &str) -> Self {
        self.config.device_class = DeviceClass::from_tag(tag);
        self
    }

    pub fn with_memory_ceiling_mb(mut self, mb: f64) -> Self {
        self.config.memory_ceiling_override_mb = Some(mb);
        self
    }

    pub fn with_cpu_ceiling_percent(mut self, percent: f64) -> Self {
        self.config.cpu_ceiling_override_percent = Some(percent);
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.config.source_url = url.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.config.history_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> GovernorConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_device_class_is_desktop() {
        let config = GovernorConfig::default();
        assert_eq!(config.device_class, DeviceClass::Desktop);
        assert!(config.memory_ceiling_override_mb.is_none());
    }

    #[test]
    fn builder_sets_recognized_options() {
        let config = GovernorConfig::builder()
            .with_device_tag("tv")
            .with_memory_ceiling_mb(100.0)
            .with_cpu_ceiling_percent(55.0)
            .with_source_url("https://cdn.example/live.m3u8")
            .build();
        assert_eq!(config.device_class, DeviceClass::Tv);
        assert_eq!(config.memory_ceiling_override_mb, Some(100.0));
        assert_eq!(config.cpu_ceiling_override_percent, Some(55.0));
        assert_eq!(config.source_url, "https://cdn.example/live.m3u8");
    }

    #[test]
    fn deserializes_host_options() {
        let config: GovernorConfig = serde_json::from_str(
            r#"{"deviceClass":"mobile","memoryCeilingOverrideMB":256,"sourceUrl":"u"}"#,
        )
        .unwrap();
        assert_eq!(config.device_class, DeviceClass::Mobile);
        assert_eq!(config.memory_ceiling_override_mb, Some(256.0));
        assert_eq!(config.source_url, "u");
    }
}
