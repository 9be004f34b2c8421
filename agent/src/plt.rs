//! [`HookApi`] backed by in-process import-table rebinding.

use log::{debug, info, warn};
use propshield_intercept::module::Library;
use propshield_intercept::{HookError, LibrarySelector, PltInterceptor};

use crate::hooks::{CommitOutcome, HookApi, HookBinding};

/// Patches the GOT/PLT slots of the loaded modules directly.
#[derive(Default)]
pub struct PltHookApi {
    interceptor: PltInterceptor,
}

impl PltHookApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interceptor(&self) -> &PltInterceptor {
        &self.interceptor
    }

    pub fn interceptor_mut(&mut self) -> &mut PltInterceptor {
        &mut self.interceptor
    }
}

impl HookApi for PltHookApi {
    type Library = Library;

    fn open_library(&mut self, name: &str) -> Result<Library, HookError> {
        Library::open(name)
    }

    fn resolve_symbol(&self, library: &Library, symbol: &str) -> Option<usize> {
        match library.symbol(symbol) {
            Ok(address) => Some(address),
            Err(e) => {
                debug!("{}: {}", library.name(), e);
                None
            }
        }
    }

    fn register_hook(&mut self, binding: &HookBinding) -> bool {
        let selector = match LibrarySelector::new(binding.library_selector) {
            Ok(s) => s,
            Err(e) => {
                warn!("{}: {}", binding.symbol, e);
                return false;
            }
        };
        match self
            .interceptor
            .stage(selector, binding.symbol, binding.replacement, binding.original)
        {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to stage {}: {}", binding.symbol, e);
                false
            }
        }
    }

    fn commit_hooks(&mut self) -> Result<CommitOutcome, HookError> {
        let summary = self.interceptor.commit()?;
        info!("Rebound {} import slot(s)", summary.rebound);
        Ok(CommitOutcome {
            unpatched: summary.unpatched,
        })
    }
}
