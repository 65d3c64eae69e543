//! Logging setup shared by the kernel binaries

use tracing_subscriber::EnvFilter;

/// Maps the operator log level (DEBUG, INFO, WARN, WARNING, ERROR) to a tracing directive
pub fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_uppercase().as_str() {
        "DEBUG" => "debug",
        "WARN" | "WARNING" => "warn",
        "ERROR" => "error",
        _ => "info",
    }
}

/// `RUST_LOG` wins when set, otherwise the operator level
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_directive(level)))
}

pub fn init(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directive() {
        assert_eq!(level_directive("debug"), "debug");
        assert_eq!(level_directive("WARNING"), "warn");
        assert_eq!(level_directive("Warn"), "warn");
        assert_eq!(level_directive("ERROR"), "error");
        assert_eq!(level_directive("verbose"), "info");
    }
}
