//! Logging subsystem.
use std::sync::{Mutex, Once, PoisonError};

use lazy_static::lazy_static;
use slog::{o, Drain};

lazy_static! {
    static ref LOGGER: slog::Logger = slog::Logger::root(
        Mutex::new(slog_json::Json::default(std::io::stderr())).map(slog::Fuse),
        o!()
    );
    static ref GLOBAL_LOGGER_SCOPE_GUARD: Mutex<Option<slog_scope::GlobalLoggerGuard>> =
        Mutex::new(None);
}

static INIT_GLOBAL_LOGGER: Once = Once::new();

/// Get the logger.
pub fn get_logger(module: &'static str) -> slog::Logger {
    LOGGER.new(o!("module" => module))
}

/// Initialize the global slog_stdlog adapter to allow logging with the log crate (instead of slog).
pub fn init_logger(level: log::Level) {
    INIT_GLOBAL_LOGGER.call_once(|| {
        let global_logger = LOGGER.new(o!("module" => "global"));
        GLOBAL_LOGGER_SCOPE_GUARD
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(slog_scope::set_global_logger(global_logger));

        // Another logger may already be installed by the embedding process.
        let _ = slog_stdlog::init_with_level(level);
    });
}

#[cfg(test)]
mod tests {
    use slog::info;

    use super::*;

    #[test]
    fn test_init_logger_idempotent() {
        init_logger(log::Level::Info);
        init_logger(log::Level::Debug);

        let logger = get_logger("security/logger");
        info!(logger, "logger initialized"; "stage" => "test");
        log::info!("bridged through the log facade");
    }
}
