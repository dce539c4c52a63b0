//! Tracing setup shared by both binaries

use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt;

/// Directives used when `RUST_LOG` is unset
pub fn default_directives(debug: bool) -> &'static str {
    if debug {
        "binpatch_lib=debug,binpatch=debug,binpatch_server=debug,tower_http=debug"
    } else {
        "binpatch_lib=info,binpatch=info,binpatch_server=info,tower_http=warn"
    }
}

/// Install the global subscriber; a second call is a no-op. Output goes to stderr.
pub fn init(debug: bool) {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.is_empty() => EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .parse_lossy(directives),
        _ => EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .parse_lossy(default_directives(debug)),
    };

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(debug)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init(false);
        init(true);
    }

    #[test]
    fn test_debug_directives() {
        assert!(default_directives(true).contains("binpatch_lib=debug"));
        assert!(default_directives(false).contains("binpatch_lib=info"));
    }
}
