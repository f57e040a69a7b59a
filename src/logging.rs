//! Log subscriber setup for the binary.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
///
/// `-v` turns on debug output for the crate, `-vv` traces everything it logs.
/// `--quiet` keeps warnings and the conversation transcript.
pub fn default_directives(verbose: u8, quiet: bool) -> String {
    if quiet {
        return "warn,leadline::transcript=info".to_string();
    }
    match verbose {
        0 => "warn,leadline=info".to_string(),
        1 => "warn,leadline=debug".to_string(),
        _ => "info,leadline=trace".to_string(),
    }
}

/// Install the global subscriber. Logs go to stderr.
pub fn init(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose, quiet)));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 0)
        .try_init();
    if installed.is_err() {
        tracing::debug!("Log subscriber already installed");
    }
}
