//! Which system properties are hidden from the filtered process.

use core::ffi::c_char;

/// Hides every property whose name starts with a fixed prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExclusionPolicy {
    prefix: &'static str,
}

impl ExclusionPolicy {
    /// Hides the `persist.sys.pihooks*` family.
    pub const PIHOOKS: ExclusionPolicy = ExclusionPolicy::new("persist.sys.pihooks");

    /// `prefix` must not contain a NUL byte.
    pub const fn new(prefix: &'static str) -> Self {
        Self { prefix }
    }

    pub fn prefix(&self) -> &'static str {
        self.prefix
    }

    pub fn excludes(&self, name: &[u8]) -> bool {
        name.starts_with(self.prefix.as_bytes())
    }

    /// Prefix test on a C string, reading at most `prefix.len()` bytes.
    /// A null `name` is never excluded.
    ///
    /// # Safety
    /// A non-null `name` must point to a NUL-terminated string.
    #[inline]
    pub unsafe fn excludes_raw(&self, name: *const c_char) -> bool {
        if name.is_null() {
            return false;
        }
        // Stops at the first mismatch, which includes name's terminator.
        self.prefix
            .bytes()
            .enumerate()
            .all(|(i, b)| unsafe { *name.add(i) } as u8 == b)
    }
}
