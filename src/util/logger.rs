//! This module provides a built-in logger implementation.
//!
//! The built-in logger implementation uses the `env_logger` crate. It is
//! enabled by the Cargo feature "builtin_env_logger" which is enabled by
//! default. When enabled, it is initialized when a
//! [`MemoryManager`](crate::heap::MemoryManager) is created and shows logs of
//! levels INFO or lower (the lower, the more important).
//!
//! Embedders that already route the `log` crate elsewhere can disable the
//! feature and register their own implementation.

/// Attempt to init an env_logger for the crate.
/// Does nothing if the "builtin_env_logger" feature is disabled.
pub(crate) fn try_init() {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            let result = env_logger::try_init_from_env(
                // By default, show info level logging.
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            );

            match result {
                Ok(()) => {
                    debug!("Kite initialized the logger.");
                }
                Err(e) => {
                    // Currently `log::SetLoggerError` can only be raised for one reason: the logger has already been initialized.
                    debug!("Kite failed to initialize the built-in env_logger: {e}");
                }
            }
        } else {
            debug!("Kite didn't initialize the built-in env_logger. The Cargo feature \"builtin_env_logger\" is not enabled.");
        }
    }
}
