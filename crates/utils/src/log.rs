use tracing_subscriber::{EnvFilter, prelude::*};

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG`; defaults to `info` for our crates and `warn` for
/// everything else.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("warn,server=info,services=info,orchestrator=info,db=info,utils=info")
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(filter)
        .init();
}
