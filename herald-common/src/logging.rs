//! Log setup and the span-scoped logging macros.
//!
//! Engine messages are tagged with the direction they concern:
//! `internal!` for lifecycle, `outgoing!` for provider calls and `incoming!`
//! for events pushed to us by providers.

use std::str::FromStr;

use serde::Deserialize;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

/// Environment variable that overrides the configured level.
pub const LEVEL_ENV: &str = "LOG_LEVEL";

/// Emit `$msg` at `$level` inside a span called `$span`.
#[macro_export]
macro_rules! spanned_event {
    ($level:expr, $span:literal, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::spanned_event!($crate::tracing::Level::$level, "internal", $($msg),*)
    };
    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::spanned_event!($crate::tracing::Level::$level, "outgoing", $($msg),*)
    };
    ($($msg:expr),*) => {
        $crate::outgoing!(level = TRACE, $($msg),*)
    };
}

#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::spanned_event!($crate::tracing::Level::$level, "incoming", $($msg),*)
    };
    ($($msg:expr),*) => {
        $crate::incoming!(level = TRACE, $($msg),*)
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn`, `error` or `off`. Unset means TRACE
    /// in debug builds and INFO in release builds.
    #[serde(default)]
    pub level: Option<String>,

    /// Colour the output
    #[serde(default = "default_ansi")]
    pub ansi: bool,

    /// Also show events from third-party crates (reqwest, axum, ...)
    #[serde(default)]
    pub include_dependencies: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            ansi: default_ansi(),
            include_dependencies: false,
        }
    }
}

const fn default_ansi() -> bool {
    true
}

const fn build_default() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    }
}

/// Pick the level: `LOG_LEVEL` beats the config file, which beats the build
/// default. Unparseable values fall through to the next source.
pub fn resolve_level(configured: Option<&str>, env: Option<&str>) -> LevelFilter {
    let parse = |source: &str, value: &str| {
        LevelFilter::from_str(value)
            .inspect_err(|_| eprintln!("Ignoring invalid {source} log level {value:?}"))
            .ok()
    };

    env.and_then(|value| parse(LEVEL_ENV, value))
        .or_else(|| configured.and_then(|value| parse("configured", value)))
        .unwrap_or_else(build_default)
}

fn is_herald_target(target: &str) -> bool {
    target.starts_with("herald")
}

/// Install the global subscriber. Call once, from the binary.
pub fn init(config: &LoggingConfig) {
    let env = std::env::var(LEVEL_ENV).ok();
    let level = resolve_level(config.level.as_deref(), env.as_deref());
    let include_dependencies = config.include_dependencies;

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(false)
                .with_line_number(false)
                .with_ansi(config.ansi)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(move |metadata| {
                    include_dependencies || is_herald_target(metadata.target())
                })),
        )
        .init();
}
