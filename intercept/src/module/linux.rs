use crate::pattern::LibrarySelector;
use crate::types::{HookError, ImportSlot};
use core::ffi::{c_char, c_void};
use std::collections::HashSet;
use std::ffi::{CStr, CString};

/// Path of the object described by `info`. The main executable reports an
/// empty name, so fall back to `/proc/self/exe`.
unsafe fn module_path(info: &libc::dl_phdr_info) -> String {
    if info.dlpi_name.is_null() || unsafe { *info.dlpi_name } == 0 {
        match std::fs::read_link("/proc/self/exe") {
            Ok(p) => p.to_string_lossy().into_owned(),
            Err(_) => String::new(),
        }
    } else {
        unsafe { CStr::from_ptr(info.dlpi_name) }
            .to_string_lossy()
            .into_owned()
    }
}

unsafe fn program_headers(info: &libc::dl_phdr_info) -> &[libc::Elf64_Phdr] {
    if info.dlpi_phdr.is_null() || info.dlpi_phnum == 0 {
        return &[];
    }
    unsafe { core::slice::from_raw_parts(info.dlpi_phdr, info.dlpi_phnum as usize) }
}

/// Resolve a symbol globally (across all loaded modules) using `dlsym(RTLD_DEFAULT, ...)`.
pub fn find_global_export_by_name(symbol: &str) -> Result<usize, HookError> {
    let cstr = CString::new(symbol).map_err(|_| HookError::SymbolNotFound(symbol.to_string()))?;
    let p = unsafe { libc::dlsym(libc::RTLD_DEFAULT, cstr.as_ptr()) };
    if p.is_null() {
        Err(HookError::SymbolNotFound(symbol.to_string()))
    } else {
        Ok(p as usize)
    }
}

/// A `dlopen` handle that is closed when dropped.
#[derive(Debug)]
pub struct Library {
    name: String,
    handle: *mut c_void,
}

impl Library {
    pub fn open(name: &str) -> Result<Self, HookError> {
        let cstr = CString::new(name).map_err(|_| HookError::LibraryNotFound(name.to_string()))?;
        let handle = unsafe { libc::dlopen(cstr.as_ptr(), libc::RTLD_LAZY) };
        if handle.is_null() {
            return Err(HookError::LibraryNotFound(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            handle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve `symbol` through this handle with `dlsym`.
    pub fn symbol(&self, symbol: &str) -> Result<usize, HookError> {
        let cstr =
            CString::new(symbol).map_err(|_| HookError::SymbolNotFound(symbol.to_string()))?;
        let p = unsafe { libc::dlsym(self.handle, cstr.as_ptr() as *const c_char) };
        if p.is_null() {
            Err(HookError::SymbolNotFound(symbol.to_string()))
        } else {
            Ok(p as usize)
        }
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

// ELF definitions needed to walk the dynamic section of a loaded image.
mod elf {
    pub const PT_LOAD: u32 = 1;
    pub const PT_DYNAMIC: u32 = 2;
    pub const PT_GNU_RELRO: u32 = 0x6474_e552;

    pub const PF_X: u32 = 1;
    pub const PF_W: u32 = 2;
    pub const PF_R: u32 = 4;

    pub const DT_NULL: i64 = 0;
    pub const DT_PLTRELSZ: i64 = 2;
    pub const DT_STRTAB: i64 = 5;
    pub const DT_SYMTAB: i64 = 6;
    pub const DT_RELA: i64 = 7;
    pub const DT_RELASZ: i64 = 8;
    pub const DT_JMPREL: i64 = 23;

    pub const RELA_ENTRY_SIZE: usize = 24;

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct Elf64Dyn {
        pub d_tag: i64,
        pub d_val: u64, // d_un union, d_val / d_ptr
    }
}

struct Segment {
    start: usize,
    end: usize,
    protection: i32,
}

fn segment_protection(flags: u32) -> i32 {
    let mut prot = 0;
    if flags & elf::PF_R != 0 {
        prot |= libc::PROT_READ;
    }
    if flags & elf::PF_W != 0 {
        prot |= libc::PROT_WRITE;
    }
    if flags & elf::PF_X != 0 {
        prot |= libc::PROT_EXEC;
    }
    prot
}

/// Find every import slot in modules matching `selector` that currently
/// holds `target`.
///
/// Slots are reached through the `DT_JMPREL` (`.got.plt`) and `DT_RELA`
/// (`.got`) relocation tables. Slots inside `PT_GNU_RELRO` report
/// `PROT_READ` as their protection so callers can re-seal them after writing.
///
/// A slot is recognized by its current value only. Under lazy binding
/// (glibc without `BIND_NOW`) a `DT_JMPREL` slot whose symbol has not been
/// called yet still holds its PLT stub address and is not found. Bionic
/// always binds eagerly.
pub fn find_import_slots(selector: &LibrarySelector, target: usize) -> Vec<ImportSlot> {
    struct Ctx<'a> {
        selector: &'a LibrarySelector,
        target: usize,
        seen: HashSet<usize>,
        slots: Vec<ImportSlot>,
    }

    unsafe extern "C" fn callback(
        info: *mut libc::dl_phdr_info,
        _size: libc::size_t,
        data: *mut c_void,
    ) -> libc::c_int {
        let ctx = unsafe { &mut *(data as *mut Ctx) };
        let info = unsafe { &*info };
        let path = unsafe { module_path(info) };
        if !ctx.selector.matches(&path) {
            return 0;
        }

        let base = info.dlpi_addr as usize;
        let mut dynamic_ptr: *const elf::Elf64Dyn = core::ptr::null();
        let mut segments = Vec::new();
        let mut relro: Option<(usize, usize)> = None;
        for phdr in unsafe { program_headers(info) } {
            let start = base + phdr.p_vaddr as usize;
            let end = start + phdr.p_memsz as usize;
            match phdr.p_type {
                elf::PT_DYNAMIC => dynamic_ptr = start as *const elf::Elf64Dyn,
                elf::PT_LOAD if phdr.p_memsz > 0 => segments.push(Segment {
                    start,
                    end,
                    protection: segment_protection(phdr.p_flags),
                }),
                elf::PT_GNU_RELRO => relro = Some((start, end)),
                _ => {}
            }
        }
        if dynamic_ptr.is_null() {
            return 0;
        }

        let mut jmprel_val: u64 = 0;
        let mut jmprel_size: usize = 0;
        let mut rela_val: u64 = 0;
        let mut rela_size: usize = 0;
        let mut symtab_val: u64 = 0;
        let mut strtab_val: u64 = 0;

        let mut dyn_entry = dynamic_ptr;
        loop {
            let entry = unsafe { &*dyn_entry };
            if entry.d_tag == elf::DT_NULL {
                break;
            }
            match entry.d_tag {
                elf::DT_JMPREL => jmprel_val = entry.d_val,
                elf::DT_PLTRELSZ => jmprel_size = entry.d_val as usize,
                elf::DT_RELA => rela_val = entry.d_val,
                elf::DT_RELASZ => rela_size = entry.d_val as usize,
                elf::DT_SYMTAB => symtab_val = entry.d_val,
                elf::DT_STRTAB => strtab_val = entry.d_val,
                _ => {}
            }
            dyn_entry = unsafe { dyn_entry.add(1) };
        }

        // glibc rewrites d_ptr entries to absolute addresses; bionic leaves
        // them as offsets from the load bias.
        let base_u64 = info.dlpi_addr;
        let adjusted = symtab_val > base_u64 || strtab_val > base_u64;
        let resolve = |val: u64| -> *const u8 {
            if val == 0 {
                core::ptr::null()
            } else if adjusted {
                val as *const u8
            } else {
                (base_u64 + val) as *const u8
            }
        };

        for (rel_ptr, rel_size) in [(resolve(jmprel_val), jmprel_size), (resolve(rela_val), rela_size)] {
            if rel_ptr.is_null() || rel_size == 0 {
                continue;
            }
            for i in 0..rel_size / elf::RELA_ENTRY_SIZE {
                // r_offset is the first field of Elf64_Rela.
                let r_offset =
                    unsafe { core::ptr::read_unaligned(rel_ptr.add(i * elf::RELA_ENTRY_SIZE) as *const u64) };
                let slot_addr = base + r_offset as usize;

                let Some(segment) = segments
                    .iter()
                    .find(|s| slot_addr >= s.start && slot_addr + size_of::<usize>() <= s.end)
                else {
                    continue;
                };
                let current = unsafe { core::ptr::read_unaligned(slot_addr as *const usize) };
                if current != ctx.target || !ctx.seen.insert(slot_addr) {
                    continue;
                }

                let protection = match relro {
                    Some((start, end)) if slot_addr >= start && slot_addr < end => libc::PROT_READ,
                    _ => segment.protection,
                };
                ctx.slots.push(ImportSlot {
                    module: path.clone(),
                    address: slot_addr,
                    protection,
                });
            }
        }

        0
    }

    let mut ctx = Ctx {
        selector,
        target,
        seen: HashSet::new(),
        slots: Vec::new(),
    };
    unsafe {
        libc::dl_iterate_phdr(Some(callback), &mut ctx as *mut Ctx as *mut c_void);
    }
    ctx.slots
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Start of the page holding `address`.
pub fn page_start(address: usize) -> usize {
    address & !(page_size() - 1)
}

fn page_of(address: usize) -> (*mut c_void, usize) {
    (page_start(address) as *mut c_void, page_size())
}

/// Make the page holding `slot` writable while keeping its other permissions.
///
/// # Safety
/// `slot.address` must lie inside a mapped segment of a loaded module.
pub unsafe fn make_writable(slot: &ImportSlot) -> Result<(), HookError> {
    let (page, len) = page_of(slot.address);
    if unsafe { libc::mprotect(page, len, slot.protection | libc::PROT_WRITE) } != 0 {
        return Err(HookError::ProtectFailed {
            address: slot.address,
            reason: std::io::Error::last_os_error().to_string(),
        });
    }
    Ok(())
}

/// Put the page holding `slot` back to the protection recorded for it.
///
/// # Safety
/// Same requirements as [`make_writable`].
pub unsafe fn restore_protection(slot: &ImportSlot) {
    let (page, len) = page_of(slot.address);
    if unsafe { libc::mprotect(page, len, slot.protection) } != 0 {
        log::debug!(
            "Could not restore protection {:#x} for slot {:#x} in {}",
            slot.protection,
            slot.address,
            slot.module
        );
    }
}

/// # Safety
/// The slot's page must be writable and `value` must be a function with the
/// signature the slot's callers expect.
pub unsafe fn write_slot(slot: &ImportSlot, value: usize) {
    unsafe { core::ptr::write_unaligned(slot.address as *mut usize, value) };
}

/// # Safety
/// `slot.address` must be mapped readable.
pub unsafe fn read_slot(slot: &ImportSlot) -> usize {
    unsafe { core::ptr::read_unaligned(slot.address as *const usize) }
}
