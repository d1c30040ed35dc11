//! Thread-spawning helper shared by listeners, streams, and trunks.
//!
//! Grounded on `tiipotto-tii/src/functional_traits.rs` (`ThreadAdapter`) and
//! `tiipotto-tii/src/thread/recovery.rs`: every worker in this crate runs on
//! its own OS thread (no async runtime), and a panic in one stream's reader
//! or writer must not take down the trunk — it is caught and logged instead.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crate::{error_log, warn_log};

/// Spawns `f` on a new OS thread, catching panics so a single misbehaving
/// stream cannot poison a shared lock by unwinding through it.
pub fn spawn_guarded<F>(name: impl Into<String>, f: F) -> JoinHandle<()>
where
  F: FnOnce() + Send + 'static,
{
  let name = name.into();
  let thread_name = name.clone();
  let spawn_err_name = name.clone();
  #[allow(clippy::unwrap_used)]
  thread::Builder::new()
    .name(name)
    .spawn(move || {
      let result = panic::catch_unwind(AssertUnwindSafe(f));
      if let Err(payload) = result {
        error_log!("thread {} panicked: {}", thread_name, panic_message(&payload));
      }
    })
    .unwrap_or_else(|e| {
      warn_log!("failed to spawn thread {}: {}", spawn_err_name, e);
      thread::spawn(|| {})
    })
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
