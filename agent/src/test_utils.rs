//! Shared test utilities for the agent crate.
//!
//! Provides an in-memory property store exposing libc-compatible accessor and
//! enumerator functions, a fake [`HookApi`] that "patches" by publishing the
//! store functions into the original slots, and the [`hook_scope!`] macro
//! declaring isolated hook contexts.

use core::ffi::{c_char, c_int, c_void};
use std::cell::Cell;
use std::ffi::CStr;
use std::rc::Rc;

use propshield_intercept::HookError;

use crate::hooks::{CommitOutcome, HookApi, HookBinding};
use crate::properties::{
    PropertyCallback, PropertyForeachFn, PropertyGetFn, PROPERTY_FOREACH_SYMBOL,
    PROPERTY_GET_SYMBOL,
};

pub const PROP_VALUE_MAX: usize = 92;

/// Backing entries, in enumeration order.
pub const STORE: &[(&CStr, &CStr)] = &[
    (c"ro.build.version.sdk", c"34"),
    (c"persist.sys.pihooks.rom", c"spoofed"),
    (c"persist.sys.unrelated", c"42"),
    (c"persist.sys.pihooks_first_api_level", c"32"),
    (c"persist.sys.pihook", c"not-quite"),
    (c"ro.product.model", c"Pixel 8"),
    (c"persist.sys.pihooks", c"1"),
];

/// Store accessor with libcutils `property_get` semantics: a missing name
/// yields `default_value` when one is given.
pub unsafe extern "C" fn store_get(
    name: *const c_char,
    value: *mut c_char,
    default_value: *const c_char,
) -> c_int {
    let found = if name.is_null() {
        None
    } else {
        let name = unsafe { CStr::from_ptr(name) };
        STORE.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
    };
    let result = found.or_else(|| {
        (!default_value.is_null()).then(|| unsafe { CStr::from_ptr(default_value) })
    });

    match result {
        Some(v) => {
            let bytes = v.to_bytes_with_nul();
            unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, value, bytes.len()) };
            v.to_bytes().len() as c_int
        }
        None => {
            unsafe { *value = 0 };
            0
        }
    }
}

/// Store enumerator. Rejects a null callback with -1.
pub unsafe extern "C" fn store_foreach(callback: Option<PropertyCallback>, cookie: *mut c_void) -> c_int {
    let Some(callback) = callback else {
        return -1;
    };
    for (name, value) in STORE {
        unsafe { callback(name.as_ptr(), value.as_ptr(), cookie) };
    }
    0
}

/// Read `name` through `get` into a garbage-filled buffer.
pub fn read_property(get: PropertyGetFn, name: &CStr, default: Option<&CStr>) -> (c_int, String) {
    let mut buf = [0x55 as c_char; PROP_VALUE_MAX];
    let default = default.map_or(core::ptr::null(), |d| d.as_ptr());
    let n = unsafe { get(name.as_ptr(), buf.as_mut_ptr(), default) };
    let value = unsafe { CStr::from_ptr(buf.as_ptr()) };
    (n, value.to_string_lossy().into_owned())
}

struct Collected {
    entries: Vec<(String, String)>,
    cookies: Vec<usize>,
}

unsafe extern "C" fn collect(name: *const c_char, value: *const c_char, cookie: *mut c_void) {
    let collected = unsafe { &mut *(cookie as *mut Collected) };
    let text = |p: *const c_char| {
        if p.is_null() {
            String::new()
        } else {
            unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned()
        }
    };
    collected.entries.push((text(name), text(value)));
    collected.cookies.push(cookie as usize);
}

/// Enumerate through `foreach`. Returns the result code, the delivered
/// entries, and the cookie each callback invocation received.
pub fn enumerate(foreach: PropertyForeachFn) -> (c_int, Vec<(String, String)>, Vec<usize>) {
    let mut collected = Collected {
        entries: Vec::new(),
        cookies: Vec::new(),
    };
    let cookie = &mut collected as *mut Collected as *mut c_void;
    let rc = unsafe { foreach(Some(collect), cookie) };
    assert!(collected.cookies.iter().all(|c| *c == cookie as usize));
    (rc, collected.entries, collected.cookies)
}

/// Declare a unit struct implementing `HookScope` with its own
/// `PropertyHooks` context using the pihooks policy.
macro_rules! hook_scope {
    ($name:ident) => {
        struct $name;

        impl $crate::properties::HookScope for $name {
            fn hooks() -> &'static $crate::properties::PropertyHooks {
                static HOOKS: $crate::properties::PropertyHooks =
                    $crate::properties::PropertyHooks::new(
                        $crate::property_filter::ExclusionPolicy::PIHOOKS,
                    );
                &HOOKS
            }
        }
    };
}
pub(crate) use hook_scope;

/// Library handle handed out by [`FakeHookApi`]; counts its own release.
pub struct FakeLibrary {
    released: Rc<Cell<usize>>,
}

impl Drop for FakeLibrary {
    fn drop(&mut self) {
        self.released.set(self.released.get() + 1);
    }
}

/// In-memory stand-in for the host's linkage-patching capability.
///
/// Symbols resolve to the store functions. A successful commit publishes
/// those addresses into the registered bindings' original slots, except for
/// symbols marked as having no import to patch.
pub struct FakeHookApi {
    pub symbols: Vec<(&'static str, usize)>,
    pub library_available: bool,
    pub rejected: Vec<&'static str>,
    pub not_imported: Vec<&'static str>,
    pub commit_succeeds: bool,
    pub opened: Rc<Cell<usize>>,
    pub released: Rc<Cell<usize>>,
    pub registered: Vec<HookBinding>,
    pub commits: usize,
}

impl FakeHookApi {
    pub fn new() -> Self {
        Self {
            symbols: vec![
                (PROPERTY_GET_SYMBOL, store_get as PropertyGetFn as usize),
                (PROPERTY_FOREACH_SYMBOL, store_foreach as PropertyForeachFn as usize),
            ],
            library_available: true,
            rejected: Vec::new(),
            not_imported: Vec::new(),
            commit_succeeds: true,
            opened: Rc::new(Cell::new(0)),
            released: Rc::new(Cell::new(0)),
            registered: Vec::new(),
            commits: 0,
        }
    }

    pub fn without_symbol(mut self, symbol: &str) -> Self {
        self.symbols.retain(|(s, _)| *s != symbol);
        self
    }

    pub fn rejecting(mut self, symbol: &'static str) -> Self {
        self.rejected.push(symbol);
        self
    }

    /// Registers `symbol` but leaves it unpatched on commit.
    pub fn without_import(mut self, symbol: &'static str) -> Self {
        self.not_imported.push(symbol);
        self
    }

    pub fn failing_commit(mut self) -> Self {
        self.commit_succeeds = false;
        self
    }

    pub fn without_library(mut self) -> Self {
        self.library_available = false;
        self
    }

    fn address_of(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().find(|(s, _)| *s == symbol).map(|(_, a)| *a)
    }

    /// Replacement registered for `symbol`, if any.
    pub fn replacement(&self, symbol: &str) -> Option<usize> {
        self.registered
            .iter()
            .find(|b| b.symbol == symbol)
            .map(|b| b.replacement)
    }
}

impl HookApi for FakeHookApi {
    type Library = FakeLibrary;

    fn open_library(&mut self, name: &str) -> Result<FakeLibrary, HookError> {
        if !self.library_available {
            return Err(HookError::LibraryNotFound(name.to_string()));
        }
        self.opened.set(self.opened.get() + 1);
        Ok(FakeLibrary {
            released: Rc::clone(&self.released),
        })
    }

    fn resolve_symbol(&self, _library: &FakeLibrary, symbol: &str) -> Option<usize> {
        self.address_of(symbol)
    }

    fn register_hook(&mut self, binding: &HookBinding) -> bool {
        if self.rejected.contains(&binding.symbol) || self.address_of(binding.symbol).is_none() {
            return false;
        }
        self.registered.push(binding.clone());
        true
    }

    fn commit_hooks(&mut self) -> Result<CommitOutcome, HookError> {
        self.commits += 1;
        if !self.commit_succeeds {
            return Err(HookError::ProtectFailed {
                address: 0,
                reason: "commit refused".into(),
            });
        }
        let mut outcome = CommitOutcome::default();
        for binding in &self.registered {
            if self.not_imported.contains(&binding.symbol) {
                outcome.unpatched.push(binding.symbol.to_string());
            } else if let Some(address) = self.address_of(binding.symbol) {
                binding.original.publish(address);
            }
        }
        Ok(outcome)
    }
}

/// Process-global lock for tests that rebind import slots of the test binary.
pub fn lock_hook_tests() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
}
