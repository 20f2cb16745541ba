//! Diagnostic logging setup.
//!
//! Filtering comes from `CHIMERA_LOG` (falling back to `RUST_LOG`), so a
//! chat session stays quiet unless asked otherwise. Output goes to stderr
//! to keep stdout clean for streamed replies.

use tracing_subscriber::EnvFilter;

pub fn init() {
    let filter = EnvFilter::try_from_env("CHIMERA_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
