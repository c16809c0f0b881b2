//! Optional `tracing` subscriber for hosts that don't install their own.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub fn default_directives(debug: bool) -> &'static str {
    if debug {
        "frame_proxy=debug,gpu_interop=debug"
    } else {
        "frame_proxy=info,gpu_interop=info"
    }
}

/// Install a fmt subscriber filtered by `RUST_LOG`, or by
/// [`default_directives`] when it is unset or invalid.
///
/// Returns false if a global subscriber was already installed, in which case
/// nothing changes.
pub fn init(debug: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(debug)));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}
