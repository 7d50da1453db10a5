//! Tracing initialization for applications embedding drift.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is unset. Object store clients log every
/// retried request at info, which drowns out per-job lines.
const DEFAULT_FILTER: &str = "info,object_store=warn,reqwest=warn,hyper=warn";

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Log lines carry the module target; per-destination fields use the
/// `target` key so a single table can be grepped out of a run.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(env_filter)
        .init();
}
