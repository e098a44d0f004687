// Event emitter: every observable occurrence surfaces as one uniform shape on
// the "performance" channel. Emission is synchronous and at-least-once;
// batching is the host's concern.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::engine::FatalErrorClass;
use crate::evaluator::Alert;
use crate::mitigation::MitigationKind;
use crate::monitor::MetricsSnapshot;
use crate::profile::DeviceClass;

/// Channel name the host subscribes on.
pub const PERFORMANCE_CHANNEL: &str = "performance";

pub(crate) fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Ready,
    Metrics,
    Alert,
    Mitigation,
    Error,
}

/// Payload carried by [`PerformanceEvent`], one variant per event kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventData {
    Ready {
        time_to_ready_ms: u64,
    },
    Metrics(MetricsSnapshot),
    Alert(Alert),
    Mitigation {
        action: MitigationKind,
        /// Buffer target after a cleanup, redraw divisor after a throttle.
        applied_value: f64,
    },
    Error {
        class: FatalErrorClass,
        message: String,
        terminal: bool,
    },
}

/// The one structured shape every state change is published as.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: EventData,
    pub timestamp_ms: u64,
    pub device_class: DeviceClass,
}

type Listener = Box<dyn Fn(&PerformanceEvent) + Send + Sync>;

/// Synchronous fan-out to host listeners.
///
/// A listener that panics is caught and logged; it never interrupts the
/// remaining listeners or subsequent controller logic.
pub struct EventEmitter {
    listeners: Mutex<Vec<Listener>>,
    device_class: Mutex<DeviceClass>,
}

impl EventEmitter {
    pub fn new(device_class: DeviceClass) -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            device_class: Mutex::new(device_class),
        }
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&PerformanceEvent) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Box::new(listener));
    }

    /// Events are stamped with the device class active at emission time; a
    /// reconfiguration updates the stamp for subsequent events.
    pub fn set_device_class(&self, device_class: DeviceClass) {
        *self.device_class.lock() = device_class;
    }

    pub fn emit(&self, kind: EventKind, data: EventData) {
        let event = PerformanceEvent {
            kind,
            data,
            timestamp_ms: unix_now_ms(),
            device_class: *self.device_class.lock(),
        };
        for listener in self.listeners.lock().iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(
                    channel = PERFORMANCE_CHANNEL,
                    kind = ?event.kind,
                    "listener panicked, continuing"
                );
            }
        }
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listeners.lock().len())
            .field("device_class", &*self.device_class.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emits_to_all_listeners_synchronously() {
        let emitter = EventEmitter::new(DeviceClass::Tv);
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            emitter.subscribe(move |event| {
                assert_eq!(event.device_class, DeviceClass::Tv);
                hits.fetch_add(1, Ordering::Relaxed);
            });
        }
        emitter.emit(
            EventKind::Ready,
            EventData::Ready {
                time_to_ready_ms: 120,
            },
        );
        assert_eq!(hits.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn panicking_listener_does_not_interrupt_the_rest() {
        let emitter = EventEmitter::new(DeviceClass::Desktop);
        let hits = Arc::new(AtomicUsize::new(0));
        emitter.subscribe(|_| panic!("host listener bug"));
        {
            let hits = Arc::clone(&hits);
            emitter.subscribe(move |_| {
                hits.fetch_add(1, Ordering::Relaxed);
            });
        }
        emitter.emit(
            EventKind::Mitigation,
            EventData::Mitigation {
                action: MitigationKind::MemoryCleanup,
                applied_value: 8.0,
            },
        );
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn device_class_stamp_follows_reconfiguration() {
        let emitter = EventEmitter::new(DeviceClass::Tv);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            emitter.subscribe(move |event| seen.lock().push(event.device_class));
        }
        emitter.emit(
            EventKind::Ready,
            EventData::Ready {
                time_to_ready_ms: 1,
            },
        );
        emitter.set_device_class(DeviceClass::Desktop);
        emitter.emit(
            EventKind::Ready,
            EventData::Ready {
                time_to_ready_ms: 2,
            },
        );
        assert_eq!(*seen.lock(), vec![DeviceClass::Tv, DeviceClass::Desktop]);
    }

    #[test]
    fn events_serialize_with_uniform_shape() {
        let event = PerformanceEvent {
            kind: EventKind::Alert,
            data: EventData::Error {
                class: FatalErrorClass::Network,
                message: "dns failure".into(),
                terminal: true,
            },
            timestamp_ms: 42,
            device_class: DeviceClass::Mobile,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "alert");
        assert_eq!(json["timestamp_ms"], 42);
        assert_eq!(json["device_class"], "mobile");
        assert_eq!(json["data"]["class"], "network");
    }
}
