//! Metrics and observability infrastructure.
//!
//! - `events`: internal event types and the `InternalEvent` trait
//! - `server`: Prometheus recorder and HTTP endpoint

pub mod events;
pub mod server;

pub use server::{DEFAULT_METRICS_ADDR, MetricsController, init_global, init_test};

/// Macro for emitting metric events (Vector-style pattern).
///
/// Calls `InternalEvent::emit()` on the given event, which records the
/// corresponding metric through the `metrics` facade.
///
/// # Example
///
/// ```ignore
/// use drift_core::metrics::events::FilesWritten;
///
/// emit!(FilesWritten { count: 3, bytes: 1024, target: "dataset.events".into() });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
