use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("library not loadable: {0}")]
    LibraryNotFound(String),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("invalid library selector '{pattern}': {reason}")]
    InvalidSelector { pattern: String, reason: String },

    #[error("no import slot for {symbol} in libraries matching '{selector}'")]
    NoImportSlots { symbol: String, selector: String },

    #[error("original slot for {0} is already populated")]
    AlreadyAttached(String),

    #[error("mprotect failed at {address:#x}: {reason}")]
    ProtectFailed { address: usize, reason: String },

    #[error("no hooks staged")]
    NothingStaged,

    #[error("operation not supported on this platform")]
    Unsupported,
}

/// A pointer-sized linkage slot (GOT entry) that currently holds the address
/// of an imported function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSlot {
    /// Path of the module owning the slot.
    pub module: String,
    pub address: usize,
    /// Protection of the containing PT_LOAD segment (`PROT_*` bits).
    pub protection: i32,
}
