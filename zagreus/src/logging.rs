//! Tracing subscriber setup for the binaries.

use tracing_subscriber::EnvFilter;

/// Initialize logging for the server binary.
///
/// `RUST_LOG` wins when set; otherwise `--debug` picks between info and
/// debug level.
pub fn init(debug: bool) {
    let fallback = if debug { "zagreus=debug,info" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Initialize logging only when `RUST_LOG` is set.
///
/// The client owns the terminal, so by default it logs nothing; set
/// `RUST_LOG` to debug it. No-op when a global subscriber is already
/// installed.
pub fn init_if_env() {
    if std::env::var("RUST_LOG").is_ok() {
        // Best-effort: try to init a fmt subscriber from env filter.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .try_init();
    }
}
