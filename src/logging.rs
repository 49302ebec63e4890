use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber from the configured level,
/// honoring `RUST_LOG` when set. Safe to call more than once; later calls are
/// no-ops.
pub fn init(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let builder = fmt().with_env_filter(filter).with_target(false);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    // An already-set subscriber (tests initialize eagerly) is fine.
    let _ = result;
}
