//! Propshield agent - loaded into a freshly specialized application process.
//!
//! For target processes, rebinds `__system_property_get` and
//! `__system_property_foreach` in every loaded module so that properties in
//! the `persist.sys.pihooks` family read as unset and never show up in
//! enumeration. Every other process is left untouched.
//!
//! The host loader calls [`propshield_pre_app_specialize`] with the process
//! name; with `PROPSHIELD_PRELOAD` set the library instead runs the same path
//! from its constructor, using `/proc/self/cmdline`.

pub mod error;
pub mod hooks;
pub mod plt;
pub mod properties;
pub mod property_filter;
pub mod target;

#[cfg(test)]
mod test_utils;

pub use error::InstallError;
pub use hooks::{
    install_property_hooks, BindingState, CommitOutcome, HookApi, HookBinding, InstallReport,
};
pub use plt::PltHookApi;
pub use properties::{HookScope, ProcessScope, PropertyHooks};
pub use property_filter::ExclusionPolicy;

use core::ffi::{c_char, c_int};
use std::ffi::CStr;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};

/// Environment variable enabling installation from the library constructor.
pub const PRELOAD_ENV: &str = "PROPSHIELD_PRELOAD";

/// What one specialization did.
#[derive(Debug)]
pub enum Specialization {
    /// Not a target; nothing was touched.
    Skipped,
    Installed(InstallReport),
    Failed(InstallError),
}

impl Specialization {
    /// True when patched import slots point into this library.
    pub fn keeps_module_loaded(&self) -> bool {
        matches!(self, Specialization::Installed(_))
    }
}

/// Classify `identity` and, for a target, install the property hooks of
/// scope `S` through `api`.
pub fn on_specialize<S: HookScope, A: HookApi>(identity: &str, api: &mut A) -> Specialization {
    if !target::is_target(identity) {
        debug!("{} is not a target, skipping", identity);
        return Specialization::Skipped;
    }

    info!("Target process {}, installing property hooks", identity);
    match install_property_hooks::<S, A>(api) {
        Ok(report) => {
            info!("Property hooks active in {}", identity);
            Specialization::Installed(report)
        }
        Err(e) => {
            warn!("Property hooks not installed in {}: {}", identity, e);
            Specialization::Failed(e)
        }
    }
}

fn identity_from_nice_name(nice_name: *const c_char) -> Result<String> {
    anyhow::ensure!(!nice_name.is_null(), "null process name");
    let name = unsafe { CStr::from_ptr(nice_name) }
        .to_str()
        .context("process name is not UTF-8")?;
    Ok(name.to_string())
}

/// Name of the current process: the first NUL-terminated field of
/// `/proc/self/cmdline`.
pub fn process_name_from_cmdline() -> Result<String> {
    let cmdline = std::fs::read("/proc/self/cmdline").context("failed to read /proc/self/cmdline")?;
    let first = cmdline.split(|b| *b == 0).next().unwrap_or_default();
    let name = std::str::from_utf8(first).context("process name is not UTF-8")?;
    anyhow::ensure!(!name.is_empty(), "empty process name");
    Ok(name.to_string())
}

fn specialize_process(identity: &str) -> Specialization {
    let mut api = PltHookApi::new();
    on_specialize::<ProcessScope, _>(identity, &mut api)
}

/// Host entry point, called once during application specialization.
///
/// Returns 1 when hooks were installed and the library must stay loaded,
/// 0 when the host may unload it.
///
/// # Safety
/// `nice_name` must be null or point to a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn propshield_pre_app_specialize(nice_name: *const c_char) -> c_int {
    let _ = env_logger::try_init();

    let identity = match identity_from_nice_name(nice_name) {
        Ok(identity) => identity,
        Err(e) => {
            error!("Cannot classify process: {:#}", e);
            return 0;
        }
    };

    c_int::from(specialize_process(&identity).keeps_module_loaded())
}

/// Constructor path for preload hosting, gated on [`PRELOAD_ENV`].
pub extern "C" fn propshield_preload_init() -> c_int {
    if std::env::var_os(PRELOAD_ENV).is_none() {
        return 0;
    }

    let _ = env_logger::try_init();

    let identity = match process_name_from_cmdline() {
        Ok(identity) => identity,
        Err(e) => {
            error!("Cannot classify process: {:#}", e);
            return 0;
        }
    };

    c_int::from(specialize_process(&identity).keeps_module_loaded())
}

/// Constructor for automatic initialization on library load.
#[cfg(all(any(target_os = "linux", target_os = "android"), not(test)))]
#[unsafe(link_section = ".init_array")]
#[used]
static INIT: extern "C" fn() = {
    extern "C" fn init() {
        propshield_preload_init();
    }
    init
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{hook_scope, FakeHookApi};

    #[test]
    fn test_non_target_touches_nothing() {
        hook_scope!(OtherScope);
        let mut api = FakeHookApi::new();
        let outcome = on_specialize::<OtherScope, _>("com.other.app", &mut api);

        assert!(matches!(outcome, Specialization::Skipped));
        assert!(!outcome.keeps_module_loaded());
        assert_eq!(api.opened.get(), 0);
        assert!(api.registered.is_empty());
        assert_eq!(api.commits, 0);
        assert!(!OtherScope::hooks().original_get().is_populated());
    }

    #[test]
    fn test_target_installs_and_stays_loaded() {
        hook_scope!(TargetScope);
        let mut api = FakeHookApi::new();
        let outcome = on_specialize::<TargetScope, _>("com.target.app2", &mut api);

        let Specialization::Installed(report) = &outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert_eq!(report.count(BindingState::Committed), 2);
        assert!(outcome.keeps_module_loaded());
    }

    #[test]
    fn test_failed_install_lets_module_unload() {
        hook_scope!(FailScope);
        let mut api = FakeHookApi::new().failing_commit();
        let outcome = on_specialize::<FailScope, _>("com.target.app1", &mut api);

        assert!(matches!(outcome, Specialization::Failed(InstallError::CommitRejected(_))));
        assert!(!outcome.keeps_module_loaded());
    }

    #[test]
    fn test_identity_from_nice_name() {
        assert_eq!(identity_from_nice_name(c"com.target.app1".as_ptr()).unwrap(), "com.target.app1");
        assert!(identity_from_nice_name(core::ptr::null()).is_err());
    }

    #[test]
    fn test_null_nice_name_lets_module_unload() {
        assert_eq!(unsafe { propshield_pre_app_specialize(core::ptr::null()) }, 0);
    }

    #[test]
    fn test_non_target_nice_name_lets_module_unload() {
        assert_eq!(unsafe { propshield_pre_app_specialize(c"com.other.app".as_ptr()) }, 0);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_process_name_from_cmdline() {
        let name = process_name_from_cmdline().unwrap();
        assert!(!name.is_empty());
        assert!(!name.contains('\0'));
    }
}
