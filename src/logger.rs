pub use ::log;

/// Diagnostics are compiled out unless the matching feature is enabled, so
/// the hot paths carry no logging cost by default.
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log_trace")]
        $crate::logger::log::trace!($($arg)*);
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log_debug")]
        $crate::logger::log::debug!($($arg)*);
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log_info")]
        $crate::logger::log::info!($($arg)*);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log_warn")]
        $crate::logger::log::warn!($($arg)*);
    }};
}
