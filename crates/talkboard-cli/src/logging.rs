//! Tracing subscriber setup from the `logging` config section.

use tracing_subscriber::EnvFilter;

use talkboard_core::config::LoggingConfig;

/// Filter directives: base level (debug under `--verbose`) plus per-crate
/// overrides from config.
pub fn filter_directives(config: &LoggingConfig, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        config.level.as_deref().unwrap_or("info")
    };

    let mut directives = vec![level.to_string()];
    directives.extend(
        config
            .filters
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty()),
    );
    directives.join(",")
}

/// Install the global subscriber. `RUST_LOG` takes precedence over config.
pub fn init(config: &LoggingConfig, verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(filter_directives(config, verbose))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let json = config.format.eq_ignore_ascii_case("json");
    let stdout = config.output.eq_ignore_ascii_case("stdout");

    match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(filter_directives(&LoggingConfig::default(), false), "info");
    }

    #[test]
    fn test_verbose_overrides_level_and_keeps_filters() {
        let config = LoggingConfig {
            level: Some("warn".into()),
            filters: vec!["talkboard_pipeline=trace".into(), " ".into()],
            ..LoggingConfig::default()
        };
        assert_eq!(filter_directives(&config, false), "warn,talkboard_pipeline=trace");
        assert_eq!(filter_directives(&config, true), "debug,talkboard_pipeline=trace");
    }
}
