//! Hook registration and commit for the two property entry points.

use log::{debug, info, warn};
use propshield_intercept::module::LIBC_NAME;
use propshield_intercept::{HookError, OriginalSlot};

use crate::error::{InstallError, Result};
use crate::properties::{
    property_foreach_hook, property_get_hook, HookScope, PropertyForeachFn, PropertyGetFn,
    PROPERTY_FOREACH_SYMBOL, PROPERTY_GET_SYMBOL,
};

/// Selects every loaded module: the runtime libraries read properties too.
pub const ALL_LIBRARIES: &str = ".*";

/// Linkage-patching capability supplied by the host.
///
/// Registration only queues a substitution; nothing is observable until
/// [`HookApi::commit_hooks`] succeeds, and a failed commit leaves every
/// original slot empty.
pub trait HookApi {
    /// Scoped library handle, released on drop.
    type Library;

    fn open_library(&mut self, name: &str) -> std::result::Result<Self::Library, HookError>;

    fn resolve_symbol(&self, library: &Self::Library, symbol: &str) -> Option<usize>;

    /// Queue `binding`. Returns false if it could not be queued.
    fn register_hook(&mut self, binding: &HookBinding) -> bool;

    /// Apply every queued binding that can be patched, publishing each
    /// original slot. An error means nothing was applied.
    fn commit_hooks(&mut self) -> std::result::Result<CommitOutcome, HookError>;
}

/// What a successful [`HookApi::commit_hooks`] left out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Registered symbols with nothing to patch; their originals stay empty.
    pub unpatched: Vec<String>,
}

/// One symbol substitution request.
#[derive(Debug, Clone)]
pub struct HookBinding {
    /// Regex over module paths whose import slots get rebound.
    pub library_selector: &'static str,
    pub symbol: &'static str,
    pub replacement: usize,
    /// Receives the pre-patch address on commit.
    pub original: &'static OriginalSlot,
}

impl HookBinding {
    /// The accessor and enumerator bindings for scope `S`.
    pub fn for_scope<S: HookScope>() -> [HookBinding; 2] {
        let hooks = S::hooks();
        [
            HookBinding {
                library_selector: ALL_LIBRARIES,
                symbol: PROPERTY_GET_SYMBOL,
                replacement: property_get_hook::<S> as PropertyGetFn as usize,
                original: hooks.original_get(),
            },
            HookBinding {
                library_selector: ALL_LIBRARIES,
                symbol: PROPERTY_FOREACH_SYMBOL,
                replacement: property_foreach_hook::<S> as PropertyForeachFn as usize,
                original: hooks.original_foreach(),
            },
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// Never handed to the registry (symbol not found).
    Unregistered,
    Staged,
    Committed,
    Failed,
}

/// Final state of every binding of one installation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    bindings: Vec<(&'static str, BindingState)>,
}

impl InstallReport {
    fn new(bindings: &[HookBinding]) -> Self {
        Self {
            bindings: bindings
                .iter()
                .map(|b| (b.symbol, BindingState::Unregistered))
                .collect(),
        }
    }

    fn set(&mut self, symbol: &str, state: BindingState) {
        if let Some(entry) = self.bindings.iter_mut().find(|(s, _)| *s == symbol) {
            entry.1 = state;
        }
    }

    fn settle_staged(&mut self, state: BindingState) {
        for entry in &mut self.bindings {
            if entry.1 == BindingState::Staged {
                entry.1 = state;
            }
        }
    }

    pub fn state(&self, symbol: &str) -> Option<BindingState> {
        self.bindings
            .iter()
            .find(|(s, _)| *s == symbol)
            .map(|(_, state)| *state)
    }

    pub fn bindings(&self) -> &[(&'static str, BindingState)] {
        &self.bindings
    }

    pub fn count(&self, state: BindingState) -> usize {
        self.bindings.iter().filter(|(_, s)| *s == state).count()
    }

    pub fn is_installed(&self) -> bool {
        self.count(BindingState::Committed) > 0
    }
}

/// Install the property filter for scope `S` through `api`.
///
/// Each binding whose symbol is missing from libc, that the registry
/// refuses, or that has nothing to patch fails on its own; the rest are
/// committed together. The libc
/// handle is held for the whole attempt and released on every path.
pub fn install_property_hooks<S: HookScope, A: HookApi>(api: &mut A) -> Result<InstallReport> {
    let library = api
        .open_library(LIBC_NAME)
        .map_err(|source| InstallError::LibraryUnavailable {
            library: LIBC_NAME,
            source,
        })?;

    let bindings = HookBinding::for_scope::<S>();
    let mut report = InstallReport::new(&bindings);

    for binding in &bindings {
        let Some(address) = api.resolve_symbol(&library, binding.symbol) else {
            warn!("Failed to find {} in {}", binding.symbol, LIBC_NAME);
            continue;
        };
        debug!("Found {} at {:#x}", binding.symbol, address);

        if api.register_hook(binding) {
            report.set(binding.symbol, BindingState::Staged);
        } else {
            warn!("Failed to register hook for {}", binding.symbol);
            report.set(binding.symbol, BindingState::Failed);
        }
    }

    if report.count(BindingState::Staged) == 0 {
        return Err(InstallError::NothingStaged(report));
    }

    let outcome = match api.commit_hooks() {
        Ok(outcome) => outcome,
        Err(e) => {
            report.settle_staged(BindingState::Failed);
            warn!("Failed to commit hooks: {}", e);
            return Err(InstallError::CommitRejected(report));
        }
    };
    for symbol in &outcome.unpatched {
        warn!("Nothing to patch for {}", symbol);
        report.set(symbol, BindingState::Failed);
    }
    report.settle_staged(BindingState::Committed);
    if !report.is_installed() {
        return Err(InstallError::CommitRejected(report));
    }
    info!("Hooks committed successfully: {:?}", report.bindings());

    drop(library);
    Ok(report)
}
