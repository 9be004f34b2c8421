use std::collections::HashSet;

use crate::module;
use crate::pattern::LibrarySelector;
use crate::slot::OriginalSlot;
use crate::types::{HookError, ImportSlot};
use log::{debug, info, warn};

struct StagedHook {
    selector: LibrarySelector,
    symbol: String,
    target: usize,
    replacement: usize,
    original: &'static OriginalSlot,
}

/// A staged hook together with every import slot it will rebind.
struct PlannedHook {
    symbol: String,
    target: usize,
    replacement: usize,
    original: &'static OriginalSlot,
    slots: Vec<ImportSlot>,
}

/// One rebound import slot and the value it held before the commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedPatch {
    pub symbol: String,
    pub slot: ImportSlot,
    pub previous: usize,
}

/// Outcome of a successful [`PltInterceptor::commit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Import slots rebound across all committed hooks.
    pub rebound: usize,
    /// Staged symbols left out because no selected module imports them.
    /// Their original slots stay empty.
    pub unpatched: Vec<String>,
}

/// Import-table interceptor with transactional commits.
///
/// Hooks are staged with [`PltInterceptor::stage`] and become visible only
/// through [`PltInterceptor::commit`]. A staged hook that has no import slot
/// is dropped on its own; every other hook is rebound in all of its slots,
/// with its original published, or nothing changes at all.
pub struct PltInterceptor {
    staged: Vec<StagedHook>,
    patches: Vec<CommittedPatch>,
}

impl PltInterceptor {
    pub fn new() -> Self {
        Self {
            staged: Vec::new(),
            patches: Vec::new(),
        }
    }

    /// Queue a rebinding of `symbol` to `replacement` in every module whose
    /// path matches `selector`. `original` receives the pre-patch address on
    /// commit.
    pub fn stage(
        &mut self,
        selector: LibrarySelector,
        symbol: &str,
        replacement: usize,
        original: &'static OriginalSlot,
    ) -> Result<(), HookError> {
        let target = module::find_global_export_by_name(symbol)?;
        if original.is_populated() || self.staged.iter().any(|s| core::ptr::eq(s.original, original)) {
            return Err(HookError::AlreadyAttached(symbol.to_string()));
        }

        debug!(
            "Staged {} ({:#x} -> {:#x}) for modules matching '{}'",
            symbol,
            target,
            replacement,
            selector.original()
        );
        self.staged.push(StagedHook {
            selector,
            symbol: symbol.to_string(),
            target,
            replacement,
            original,
        });
        Ok(())
    }

    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    /// Apply every staged hook that has at least one import slot.
    ///
    /// Fails without touching anything when no staged hook has a slot. The
    /// staging queue is drained whether or not the commit succeeds.
    pub fn commit(&mut self) -> Result<CommitSummary, HookError> {
        let staged = core::mem::take(&mut self.staged);
        if staged.is_empty() {
            return Err(HookError::NothingStaged);
        }

        let mut plan = Vec::with_capacity(staged.len());
        let mut unpatched = Vec::new();
        let mut missing = None;
        for hook in staged {
            let slots = module::find_import_slots(&hook.selector, hook.target);
            if slots.is_empty() {
                warn!(
                    "{}: no import slot in modules matching '{}'",
                    hook.symbol,
                    hook.selector.original()
                );
                missing.get_or_insert_with(|| HookError::NoImportSlots {
                    symbol: hook.symbol.clone(),
                    selector: hook.selector.original().to_string(),
                });
                unpatched.push(hook.symbol);
                continue;
            }
            debug!("{}: {} import slot(s)", hook.symbol, slots.len());
            plan.push(PlannedHook {
                symbol: hook.symbol,
                target: hook.target,
                replacement: hook.replacement,
                original: hook.original,
                slots,
            });
        }

        if plan.is_empty() {
            return Err(missing.unwrap_or(HookError::NothingStaged));
        }

        let rebound = self.apply(plan)?;
        Ok(CommitSummary { rebound, unpatched })
    }

    fn apply(&mut self, plan: Vec<PlannedHook>) -> Result<usize, HookError> {
        for (i, hook) in plan.iter().enumerate() {
            let shared = plan[..i].iter().any(|h| core::ptr::eq(h.original, hook.original));
            if shared || hook.original.is_populated() {
                return Err(HookError::AlreadyAttached(hook.symbol.clone()));
            }
        }

        let pages = distinct_pages(plan.iter().flat_map(|h| &h.slots));
        unsafe { make_pages_writable(&pages)? };

        // Originals go out before any slot is rebound, so a replacement
        // reached through a patched slot always finds its original.
        for hook in &plan {
            if !hook.original.publish(hook.target) {
                // Only reachable through a concurrent publisher.
                unsafe { restore_pages(&pages) };
                return Err(HookError::AlreadyAttached(hook.symbol.clone()));
            }
        }

        let mut count = 0;
        for hook in &plan {
            for slot in &hook.slots {
                let previous = unsafe { module::read_slot(slot) };
                unsafe { module::write_slot(slot, hook.replacement) };
                self.patches.push(CommittedPatch {
                    symbol: hook.symbol.clone(),
                    slot: slot.clone(),
                    previous,
                });
                count += 1;
            }
        }
        unsafe { restore_pages(&pages) };

        info!(
            "Committed {} hook(s), {} import slot(s) rebound on {} page(s)",
            plan.len(),
            count,
            pages.len()
        );
        Ok(count)
    }

    pub fn patches(&self) -> &[CommittedPatch] {
        &self.patches
    }

    /// Write every committed slot back to its previous value.
    ///
    /// Original slots stay populated; they are write-once.
    ///
    /// # Safety
    /// No thread may be executing through a rebound slot concurrently with
    /// code that expects the replacement to be active.
    pub unsafe fn revert(&mut self) -> Result<(), HookError> {
        let pages = distinct_pages(self.patches.iter().map(|p| &p.slot));
        unsafe { make_pages_writable(&pages)? };
        for patch in self.patches.drain(..).rev() {
            unsafe { module::write_slot(&patch.slot, patch.previous) };
        }
        unsafe { restore_pages(&pages) };
        Ok(())
    }
}

impl Default for PltInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

/// One slot per distinct page; its recorded protection stands for the page.
fn distinct_pages<'a>(slots: impl IntoIterator<Item = &'a ImportSlot>) -> Vec<ImportSlot> {
    let mut seen = HashSet::new();
    slots
        .into_iter()
        .filter(|slot| seen.insert(module::page_start(slot.address)))
        .cloned()
        .collect()
}

/// All or nothing: on failure the pages already opened are restored.
unsafe fn make_pages_writable(pages: &[ImportSlot]) -> Result<(), HookError> {
    for (i, page) in pages.iter().enumerate() {
        if let Err(e) = unsafe { module::make_writable(page) } {
            unsafe { restore_pages(&pages[..i]) };
            return Err(e);
        }
    }
    Ok(())
}

unsafe fn restore_pages(pages: &[ImportSlot]) {
    for page in pages {
        unsafe { module::restore_protection(page) };
    }
}
