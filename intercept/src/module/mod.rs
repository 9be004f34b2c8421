#[cfg(not(all(
    any(target_os = "linux", target_os = "android"),
    target_pointer_width = "64"
)))]
use crate::pattern::LibrarySelector;
#[cfg(not(all(
    any(target_os = "linux", target_os = "android"),
    target_pointer_width = "64"
)))]
use crate::types::{HookError, ImportSlot};

#[cfg(all(
    any(target_os = "linux", target_os = "android"),
    target_pointer_width = "64"
))]
mod linux;

#[cfg(all(
    any(target_os = "linux", target_os = "android"),
    target_pointer_width = "64"
))]
pub use linux::*;

/// File name the platform C library is opened under.
#[cfg(target_os = "android")]
pub const LIBC_NAME: &str = "libc.so";
#[cfg(not(target_os = "android"))]
pub const LIBC_NAME: &str = "libc.so.6";

#[cfg(not(all(
    any(target_os = "linux", target_os = "android"),
    target_pointer_width = "64"
)))]
mod unsupported {
    use super::*;

    pub fn find_global_export_by_name(_symbol: &str) -> Result<usize, HookError> {
        Err(HookError::Unsupported)
    }

    #[derive(Debug)]
    pub struct Library {
        _private: (),
    }

    impl Library {
        pub fn open(_name: &str) -> Result<Self, HookError> {
            Err(HookError::Unsupported)
        }

        pub fn name(&self) -> &str {
            ""
        }

        pub fn symbol(&self, _symbol: &str) -> Result<usize, HookError> {
            Err(HookError::Unsupported)
        }
    }

    pub fn find_import_slots(_selector: &LibrarySelector, _target: usize) -> Vec<ImportSlot> {
        Vec::new()
    }

    pub fn page_start(address: usize) -> usize {
        address
    }

    /// # Safety
    /// Never touches memory on this platform.
    pub unsafe fn make_writable(_slot: &ImportSlot) -> Result<(), HookError> {
        Err(HookError::Unsupported)
    }

    /// # Safety
    /// Never touches memory on this platform.
    pub unsafe fn restore_protection(_slot: &ImportSlot) {}

    /// # Safety
    /// Never touches memory on this platform.
    pub unsafe fn write_slot(_slot: &ImportSlot, _value: usize) {}

    /// # Safety
    /// Never touches memory on this platform.
    pub unsafe fn read_slot(_slot: &ImportSlot) -> usize {
        0
    }
}

#[cfg(not(all(
    any(target_os = "linux", target_os = "android"),
    target_pointer_width = "64"
)))]
pub use unsupported::*;
