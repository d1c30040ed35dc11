//! Small free functions and the logging macros used throughout the crate.

use std::sync::LockResult;

/// Recovers a poisoned lock's inner guard instead of panicking.
///
/// A panic while holding a trunk-wide lock (registries, listener table, a
/// stream's free-list) should not permanently wedge every other stream on
/// the trunk, so lock acquisitions that can't easily propagate an error go
/// through this helper instead of `.unwrap()`.
pub fn unwrap_poison<T>(result: LockResult<T>) -> T {
  match result {
    Ok(guard) => guard,
    Err(poisoned) => poisoned.into_inner(),
  }
}

#[cfg(feature = "log")]
#[macro_export]
/// Calls `log::trace!`.
macro_rules! trace_log {
    (target: $target:expr, $($arg:tt)+) => (log::log!(target: $target, log::Level::Trace, $($arg)+));
    ($($arg:tt)+) => (log::log!(log::Level::Trace, $($arg)+))
}

#[cfg(not(feature = "log"))]
#[macro_export]
/// Calls `log::trace!`.
macro_rules! trace_log {
  (target: $target:expr, $($arg:tt)+) => {
      if false { let _ = format_args!($($arg)+); }
  };
  ($($arg:tt)+) => {
      if false { let _ = format_args!($($arg)+); }
  }
}

#[cfg(feature = "log")]
#[macro_export]
/// Calls `log::debug!`.
macro_rules! debug_log {
    (target: $target:expr, $($arg:tt)+) => (log::log!(target: $target, log::Level::Debug, $($arg)+));
    ($($arg:tt)+) => (log::log!(log::Level::Debug, $($arg)+))
}

#[cfg(not(feature = "log"))]
#[macro_export]
/// Calls `log::debug!`.
macro_rules! debug_log {
  (target: $target:expr, $($arg:tt)+) => {
      if false { let _ = format_args!($($arg)+); }
  };
  ($($arg:tt)+) => {
      if false { let _ = format_args!($($arg)+); }
  }
}

#[cfg(feature = "log")]
#[macro_export]
/// Calls `log::info!`.
macro_rules! info_log {
    (target: $target:expr, $($arg:tt)+) => (log::log!(target: $target, log::Level::Info, $($arg)+));
    ($($arg:tt)+) => (log::log!(log::Level::Info, $($arg)+))
}

#[cfg(not(feature = "log"))]
#[macro_export]
/// Calls `log::info!`.
macro_rules! info_log {
  (target: $target:expr, $($arg:tt)+) => {
      if false { let _ = format_args!($($arg)+); }
  };
  ($($arg:tt)+) => {
      if false { let _ = format_args!($($arg)+); }
  }
}

#[cfg(feature = "log")]
#[macro_export]
/// Calls `log::warn!`.
macro_rules! warn_log {
    (target: $target:expr, $($arg:tt)+) => (log::log!(target: $target, log::Level::Warn, $($arg)+));
    ($($arg:tt)+) => (log::log!(log::Level::Warn, $($arg)+))
}

#[cfg(not(feature = "log"))]
#[macro_export]
/// Calls `log::warn!`.
macro_rules! warn_log {
  (target: $target:expr, $($arg:tt)+) => {
      if false { let _ = format_args!($($arg)+); }
  };
  ($($arg:tt)+) => {
      if false { let _ = format_args!($($arg)+); }
  }
}

#[cfg(feature = "log")]
#[macro_export]
/// Calls `log::error!`.
macro_rules! error_log {
    (target: $target:expr, $($arg:tt)+) => (log::log!(target: $target, log::Level::Error, $($arg)+));
    ($($arg:tt)+) => (log::log!(log::Level::Error, $($arg)+))
}

#[cfg(not(feature = "log"))]
#[macro_export]
/// Calls `log::error!`.
macro_rules! error_log {
  (target: $target:expr, $($arg:tt)+) => {
      if false { let _ = format_args!($($arg)+); }
  };
  ($($arg:tt)+) => {
      if false { let _ = format_args!($($arg)+); }
  }
}
