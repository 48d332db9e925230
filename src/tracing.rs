use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// - Filter using the `RUST_LOG` env variable if set.
/// - Otherwise filter using the `verbose` argument:
///     - 0: error
///     - 1: warn
///     - 2: info
///     - 3: debug
///     - 4+: trace
/// - When `explain` is set (the `-d` flag), always surface the
///   `bulk::explain` target at debug level regardless of the base
///   filter, so `-d` works even when run without `-v`.
pub fn init(verbose: u8, explain: bool) {
    let mut env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "error",
            1 => "warn",
            2 => "info",
            3 => "debug",
            _ => "trace",
        })
    });

    if explain {
        env_filter = env_filter.add_directive(
            "bulk::explain=debug"
                .parse()
                .expect("static directive always parses"),
        );
    }

    let env_layer = tracing_subscriber::fmt::layer().with_filter(env_filter);

    tracing_subscriber::registry().with(env_layer).init();
}
