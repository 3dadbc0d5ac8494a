//! Tracing initialization for hosts that bring no subscriber of their own.

use tracing_subscriber::EnvFilter;

/// Debug-level filter covering every crate in this workspace.
const DEBUG_FILTER: &str = "gavel_core=debug,gavel_env=debug,gavel_process=debug,\
                            gavel_judge=debug,gavel_session=debug,gavel_engine=debug";

/// Install a stderr subscriber. `RUST_LOG` wins when set; otherwise
/// `CODEX_DEBUG=1` turns on debug logging for the audit pipeline. Calling
/// this more than once is harmless.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if matches!(
        std::env::var("CODEX_DEBUG").as_deref(),
        Ok("1") | Ok("true")
    ) {
        EnvFilter::new(DEBUG_FILTER)
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
