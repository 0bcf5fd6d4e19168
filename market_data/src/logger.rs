use env_logger::{Builder, Env};

/// Initialise the process-wide logger.
///
/// Defaults to `info`; `RUST_LOG` overrides it. Output goes to stderr so
/// stdout stays reserved for command results.
pub fn init_logger() {
    let env = Env::default().filter_or("RUST_LOG", "info");
    // A second call (e.g. from tests) is not an error.
    let _ = Builder::from_env(env).format_timestamp_millis().try_init();
}
