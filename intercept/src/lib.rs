//! propshield-intercept: import-table (GOT/PLT) rebinding for the property filter.

pub mod interceptor;
pub mod module;
pub mod pattern;
pub mod slot;
pub mod types;

// Re-exports for convenience (flattened imports)
pub use interceptor::{CommitSummary, CommittedPatch, PltInterceptor};
pub use pattern::LibrarySelector;
pub use slot::OriginalSlot;
pub use types::{HookError, ImportSlot};

/// Process-global lock for tests that rebind import slots of the test binary.
///
/// Tests that patch libc imports (or assert on their current value) must hold
/// this lock so they do not observe each other's rebinding.
#[cfg(test)]
pub(crate) fn lock_hook_tests() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
}
