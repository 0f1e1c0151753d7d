//! Logger setup for the binary and tests

/// Install `env_logger` at `level`
///
/// `RUST_LOG` takes precedence over `level` when it is set.
pub fn init_logger(level: &str) {
    let env = env_logger::Env::default()
        .filter_or("RUST_LOG", level);

    // A second initialisation (tests, embedding) is not an error worth reporting
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}
