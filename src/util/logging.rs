//! Structured logging setup
//!
//! Logs always go to stderr so stdout stays free for the run summary.
//! The level comes from `--log-level`, `-v`/`-q` or `HOSTRIG_LOG_LEVEL`,
//! in that order; `HOSTRIG_LOG_JSON=true` switches to JSON lines. When
//! `RUST_LOG` is set it replaces the computed filter entirely.

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Dependencies that are chatty at the level hostrig runs at
const QUIET_DEPENDENCIES: &[&str] = &["h2", "hyper", "reqwest", "bollard"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Minimum level for hostrig's own events
    pub level: Level,

    /// Emit JSON lines instead of the human format
    pub use_json: bool,

    /// Colour the human format; ignored for JSON
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            ansi: false,
        }
    }
}

impl LoggingConfig {
    /// Resolve the configuration from command-line flags and the environment
    pub fn from_args(log_level: Option<&str>, verbose: bool, quiet: bool) -> Self {
        let level = if let Some(level_str) = log_level {
            parse_level(level_str)
        } else if verbose {
            Level::DEBUG
        } else if quiet {
            Level::ERROR
        } else {
            env::var("HOSTRIG_LOG_LEVEL")
                .map(|s| parse_level(&s))
                .unwrap_or(Level::INFO)
        };

        let use_json = env::var("HOSTRIG_LOG_JSON")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);

        Self {
            level,
            use_json,
            ansi: atty::is(atty::Stream::Stderr),
        }
    }

    /// Filter directives applied when `RUST_LOG` is absent
    pub fn directives(&self) -> Vec<String> {
        let mut directives = vec![format!("hostrig={}", self.level)];
        directives.extend(QUIET_DEPENDENCIES.iter().map(|dep| format!("{}=warn", dep)));
        directives
    }

    fn filter(&self) -> EnvFilter {
        if env::var("RUST_LOG").is_ok() {
            return EnvFilter::from_default_env();
        }
        self.directives()
            .iter()
            .filter_map(|d| d.parse().ok())
            .fold(EnvFilter::default(), |filter, d| filter.add_directive(d))
    }
}

/// Parse a level name, case-insensitively; unknown names fall back to INFO
pub fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

/// Install the global subscriber. Only the first call has an effect.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = config.filter();
        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_ansi(config.ansi)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        env::remove_var("HOSTRIG_LOG_LEVEL");
        env::remove_var("HOSTRIG_LOG_JSON");
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("Debug"), Level::DEBUG);
        assert_eq!(parse_level("WARN"), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level("loud"), Level::INFO);
    }

    #[test]
    #[serial]
    fn test_flag_precedence() {
        clear_env();
        env::set_var("HOSTRIG_LOG_LEVEL", "warn");

        assert_eq!(LoggingConfig::from_args(Some("trace"), true, false).level, Level::TRACE);
        assert_eq!(LoggingConfig::from_args(None, true, true).level, Level::DEBUG);
        assert_eq!(LoggingConfig::from_args(None, false, true).level, Level::ERROR);
        assert_eq!(LoggingConfig::from_args(None, false, false).level, Level::WARN);

        clear_env();
        assert_eq!(LoggingConfig::from_args(None, false, false).level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_json_from_env() {
        clear_env();
        assert!(!LoggingConfig::from_args(None, false, false).use_json);

        env::set_var("HOSTRIG_LOG_JSON", "true");
        assert!(LoggingConfig::from_args(None, false, false).use_json);

        env::set_var("HOSTRIG_LOG_JSON", "yes");
        assert!(!LoggingConfig::from_args(None, false, false).use_json);
        clear_env();
    }

    #[test]
    fn test_directives_quiet_dependencies() {
        let config = LoggingConfig {
            level: Level::DEBUG,
            ..Default::default()
        };
        assert_eq!(
            config.directives(),
            vec!["hostrig=debug", "h2=warn", "hyper=warn", "reqwest=warn", "bollard=warn"]
        );
        for directive in config.directives() {
            assert!(directive.parse::<tracing_subscriber::filter::Directive>().is_ok());
        }
    }
}
