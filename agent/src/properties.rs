//! Filtering replacements for the system property accessor and enumerator.
//!
//! The replacements are plain `extern "C"` functions with the exact signatures
//! of the libc entry points they stand in for. Each is generic over a
//! [`HookScope`], which names the [`PropertyHooks`] context holding the
//! exclusion policy and the original entry points. The production scope is
//! [`ProcessScope`]; tests declare their own scopes so each gets an isolated
//! set of original slots.

use core::ffi::{c_char, c_int, c_void};

use propshield_intercept::OriginalSlot;

use crate::property_filter::ExclusionPolicy;

pub const PROPERTY_GET_SYMBOL: &str = "__system_property_get";
pub const PROPERTY_FOREACH_SYMBOL: &str = "__system_property_foreach";

/// Length reported for a property that does not exist.
pub const PROPERTY_NOT_FOUND: c_int = 0;

/// `int __system_property_get(const char* name, char* value, const char* default_value)`
pub type PropertyGetFn =
    unsafe extern "C" fn(name: *const c_char, value: *mut c_char, default_value: *const c_char) -> c_int;

/// Per-entry callback handed to the enumerator.
pub type PropertyCallback =
    unsafe extern "C" fn(name: *const c_char, value: *const c_char, cookie: *mut c_void);

/// `int __system_property_foreach(callback, void* cookie)`
pub type PropertyForeachFn =
    unsafe extern "C" fn(callback: Option<PropertyCallback>, cookie: *mut c_void) -> c_int;

/// Shared state of one installation: the policy and the original entry
/// points the replacements delegate to.
#[derive(Debug)]
pub struct PropertyHooks {
    policy: ExclusionPolicy,
    original_get: OriginalSlot,
    original_foreach: OriginalSlot,
}

impl PropertyHooks {
    pub const fn new(policy: ExclusionPolicy) -> Self {
        Self {
            policy,
            original_get: OriginalSlot::new(),
            original_foreach: OriginalSlot::new(),
        }
    }

    pub fn policy(&self) -> &ExclusionPolicy {
        &self.policy
    }

    pub fn original_get(&self) -> &OriginalSlot {
        &self.original_get
    }

    pub fn original_foreach(&self) -> &OriginalSlot {
        &self.original_foreach
    }

    /// Filtered accessor.
    ///
    /// An excluded name reads back as a property that was never set: empty
    /// value, [`PROPERTY_NOT_FOUND`], and `default_value` is ignored.
    ///
    /// # Safety
    /// Same contract as the libc accessor: `name` is null or NUL-terminated
    /// and `value` is null or points to at least `PROP_VALUE_MAX` bytes.
    pub unsafe fn get(
        &self,
        name: *const c_char,
        value: *mut c_char,
        default_value: *const c_char,
    ) -> c_int {
        if unsafe { self.policy.excludes_raw(name) } {
            return unsafe { report_absent(value) };
        }
        let Some(original) = self.original_get.get() else {
            return unsafe { report_absent(value) };
        };
        let original: PropertyGetFn = unsafe { core::mem::transmute(original) };
        unsafe { original(name, value, default_value) }
    }

    /// Filtered enumerator.
    ///
    /// The original enumerator sees a substitute callback and a pointer to a
    /// stack-local [`EnumerationDelegate`] as its cookie. The substitute drops
    /// excluded names and forwards everything else, in order, to the caller's
    /// callback with the caller's own cookie.
    ///
    /// # Safety
    /// Same contract as the libc enumerator.
    pub unsafe fn foreach(&self, callback: Option<PropertyCallback>, cookie: *mut c_void) -> c_int {
        let Some(original) = self.original_foreach.get() else {
            return -1;
        };
        let original: PropertyForeachFn = unsafe { core::mem::transmute(original) };

        let Some(callback) = callback else {
            return unsafe { original(None, cookie) };
        };
        let delegate = EnumerationDelegate {
            callback,
            cookie,
            policy: &self.policy,
        };
        unsafe {
            original(
                Some(forward_unexcluded),
                &delegate as *const EnumerationDelegate<'_> as *mut c_void,
            )
        }
    }
}

unsafe fn report_absent(value: *mut c_char) -> c_int {
    if !value.is_null() {
        unsafe { *value = 0 };
    }
    PROPERTY_NOT_FOUND
}

/// The caller's callback and cookie, carried through the enumerator's single
/// cookie argument for the duration of one `foreach` call.
struct EnumerationDelegate<'a> {
    callback: PropertyCallback,
    cookie: *mut c_void,
    policy: &'a ExclusionPolicy,
}

unsafe extern "C" fn forward_unexcluded(name: *const c_char, value: *const c_char, cookie: *mut c_void) {
    let delegate = unsafe { &*(cookie as *const EnumerationDelegate<'_>) };
    if unsafe { delegate.policy.excludes_raw(name) } {
        return;
    }
    unsafe { (delegate.callback)(name, value, delegate.cookie) };
}

/// Names the [`PropertyHooks`] context a set of replacement functions uses.
pub trait HookScope: 'static {
    fn hooks() -> &'static PropertyHooks;
}

/// Replacement for `__system_property_get`.
///
/// # Safety
/// Installed in place of the libc accessor; callers uphold its contract.
pub unsafe extern "C" fn property_get_hook<S: HookScope>(
    name: *const c_char,
    value: *mut c_char,
    default_value: *const c_char,
) -> c_int {
    unsafe { S::hooks().get(name, value, default_value) }
}

/// Replacement for `__system_property_foreach`.
///
/// # Safety
/// Installed in place of the libc enumerator; callers uphold its contract.
pub unsafe extern "C" fn property_foreach_hook<S: HookScope>(
    callback: Option<PropertyCallback>,
    cookie: *mut c_void,
) -> c_int {
    unsafe { S::hooks().foreach(callback, cookie) }
}

static PROCESS_HOOKS: PropertyHooks = PropertyHooks::new(ExclusionPolicy::PIHOOKS);

/// The scope installed into the host process.
pub struct ProcessScope;

impl HookScope for ProcessScope {
    fn hooks() -> &'static PropertyHooks {
        &PROCESS_HOOKS
    }
}
