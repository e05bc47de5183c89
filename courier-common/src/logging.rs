//! Logging macros and subscriber setup.

use tracing_subscriber::EnvFilter;

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!(target: "courier", $level, $span);
        let _enter = span.enter();

        $crate::tracing::event!(target: "courier", $level, $($msg),*)
    }};
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = INFO, $($msg),*)
    };
}

/// Install the global subscriber.
///
/// `LOG_LEVEL` takes full `EnvFilter` directives (`debug`,
/// `courier=trace,sqlx=warn`, ...). Without it, debug builds trace the
/// relay's own targets and release builds log them at info; everything else
/// stays at warn.
pub fn init() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| {
        let own_level = if cfg!(debug_assertions) { "trace" } else { "info" };
        EnvFilter::new(format!("warn,courier={own_level}"))
    });

    tracing_subscriber::fmt()
        .compact()
        .with_target(false)
        .with_env_filter(filter)
        .init();
}
