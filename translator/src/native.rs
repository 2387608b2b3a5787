//! Loads a per-architecture translator shared object and binds the
//! `Translator` trait to its exported symbols.
//!
//! The `.so` is expected to live packaged as a byte blob (e.g. embedded
//! via `include_bytes!` in a downstream crate, or read from an install
//! directory) and is handed to `NativeTranslator::load` as raw bytes; it
//! is extracted to a uniquely-named temporary file before `dlopen`, since
//! `dlopen` needs a path, and removed on drop. The FFI + `Drop`-cleanup
//! shape here is the same one `backend`'s `CodeBuffer` uses for its raw
//! `mmap`/`munmap` pair, adapted to `dlopen`/`dlclose`.
//!
//! Binding the translator's own callbacks into managed code (the
//! `TranslatorCallbacks` exports) requires the host binary to have been
//! linked with its dynamic symbol table exported (`-rdynamic` /
//! `-Wl,--export-dynamic`), since the `.so` resolves `harness_*` symbols
//! against the process's own symbol table rather than against this crate
//! directly.

use std::ffi::CString;
use std::io::Write;
use std::os::raw::{c_char, c_void};

use harness_core::error::CpuError;
use harness_core::mem_block::HostMemoryBlock;
use harness_core::traits::{Translator, WordSize};

type InitFn = unsafe extern "C" fn(*const c_char) -> i32;
type VoidFn = unsafe extern "C" fn();
type ExecuteFn = unsafe extern "C" fn() -> i32;
type GetU32Fn = unsafe extern "C" fn() -> u32;
type GetBoolFn = unsafe extern "C" fn() -> u32;
type GetU64Fn = unsafe extern "C" fn() -> u64;
type SetU64Fn = unsafe extern "C" fn(u64);
type RangeFn = unsafe extern "C" fn(u32, u32);
type RangeQueryFn = unsafe extern "C" fn(u32, u32) -> u32;
type AddrFn = unsafe extern "C" fn(u32);
type AddrU32Fn = unsafe extern "C" fn(u32) -> u32;
type SetHostBlocksFn = unsafe extern "C" fn(*const HostBlockFfi, i32);
type SetThresholdFn = unsafe extern "C" fn(i32);
type SetIrqFn = unsafe extern "C" fn(i32, i32);
type SetBoolFn = unsafe extern "C" fn(u32);
type SetSizeFn = unsafe extern "C" fn(usize);
type SetMaxBlockSizeFn = unsafe extern "C" fn(u32) -> u32;
type ExportStateFn = unsafe extern "C" fn() -> *mut u8;

/// Matches the native `set_host_blocks` ABI: one fixed-layout record per
/// host memory block, passed as a pointer + count pair.
#[repr(C)]
struct HostBlockFfi {
    start: u32,
    size: u32,
    host_pointer: u64,
    host_block_start: i32,
}

macro_rules! bind {
    ($lib:expr, $name:literal, $ty:ty) => {{
        let sym = CString::new($name).unwrap();
        let ptr = unsafe { libc::dlsym($lib, sym.as_ptr()) };
        if ptr.is_null() {
            return Err(CpuError::TranslatorLoad(format!("unresolved symbol {:?}", $name)));
        }
        unsafe { std::mem::transmute::<*mut c_void, $ty>(ptr) }
    }};
}

struct Symbols {
    init: InitFn,
    dispose: VoidFn,
    reset: VoidFn,
    execute: ExecuteFn,
    set_paused: VoidFn,
    clear_paused: VoidFn,
    is_wfi: GetBoolFn,
    get_pc: GetU64Fn,
    set_pc: SetU64Fn,
    get_page_size: GetU32Fn,
    map_range: RangeFn,
    unmap_range: RangeFn,
    is_range_mapped: RangeQueryFn,
    invalidate_translation_blocks: RangeFn,
    translate_to_physical: AddrU32Fn,
    set_host_blocks: SetHostBlocksFn,
    free_host_blocks: VoidFn,
    set_count_threshold: SetThresholdFn,
    set_irq: SetIrqFn,
    is_irq_set: GetBoolFn,
    add_breakpoint: AddrFn,
    remove_breakpoint: AddrFn,
    attach_log_block_fetch: SetBoolFn,
    set_on_block_translation_enabled: SetBoolFn,
    set_translation_cache_size: SetSizeFn,
    invalidate_translation_cache: VoidFn,
    set_max_block_size: SetMaxBlockSizeFn,
    get_max_block_size: GetU32Fn,
    restore_context: VoidFn,
    export_state: ExportStateFn,
    get_state_size: GetU32Fn,
}

/// A loaded, bound, per-CPU translator shared object.
///
/// `host_blocks_buffer` keeps the last `HostBlockFfi` array alive: the
/// native side holds a raw pointer into it between `set_host_blocks` and
/// the next rebuild or `free_host_blocks`, so dropping it early would
/// leave a dangling pointer on the native side.
pub struct NativeTranslator {
    handle: *mut c_void,
    symbols: Symbols,
    _tempfile: tempfile::TempPath,
    host_blocks_buffer: Option<Box<[HostBlockFfi]>>,
}

// SAFETY: the translator `.so` is single-entrant per CPU (see
// `Translator::execute`'s doc comment) and this handle is never shared
// across threads concurrently; `harness-exec` owns exactly one
// `NativeTranslator` per CPU and only ever calls it from that CPU's own
// thread.
unsafe impl Send for NativeTranslator {}

impl NativeTranslator {
    /// Extracts `shared_object_bytes` to a temporary file, `dlopen`s it,
    /// and resolves every import `Translator` needs. `word_size` and
    /// `architecture`/`big_endian` only drive the caller's choice of which
    /// blob to pass in; this constructor does not itself apply the
    /// `translate_<bits>-<architecture>-<be|le>.so` naming convention,
    /// since the blob has already been selected by the time it gets here.
    pub fn load(shared_object_bytes: &[u8], word_size: WordSize) -> Result<Self, CpuError> {
        let mut file = tempfile::Builder::new()
            .prefix("harness-translator-")
            .suffix(".so")
            .tempfile()
            .map_err(|e| CpuError::TranslatorLoad(format!("creating temp file: {e}")))?;
        file.write_all(shared_object_bytes)
            .map_err(|e| CpuError::TranslatorLoad(format!("writing shared object: {e}")))?;
        file.flush().map_err(|e| CpuError::TranslatorLoad(format!("flushing shared object: {e}")))?;
        let path = file.into_temp_path();

        let path_str = path
            .as_os_str()
            .to_str()
            .ok_or_else(|| CpuError::TranslatorLoad("temp path is not valid UTF-8".to_string()))?;
        let c_path = CString::new(path_str)
            .map_err(|_| CpuError::TranslatorLoad("temp path contains a NUL byte".to_string()))?;
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW) };
        if handle.is_null() {
            return Err(CpuError::TranslatorLoad("dlopen failed".to_string()));
        }

        let symbols = Self::bind_symbols(handle)?;
        log::debug!("loaded {word_size:?} translator shared object at {path_str:?}");
        Ok(Self { handle, symbols, _tempfile: path, host_blocks_buffer: None })
    }

    fn bind_symbols(lib: *mut c_void) -> Result<Symbols, CpuError> {
        Ok(Symbols {
            init: bind!(lib, "init\0", InitFn),
            dispose: bind!(lib, "dispose\0", VoidFn),
            reset: bind!(lib, "reset\0", VoidFn),
            execute: bind!(lib, "execute\0", ExecuteFn),
            set_paused: bind!(lib, "set_paused\0", VoidFn),
            clear_paused: bind!(lib, "clear_paused\0", VoidFn),
            is_wfi: bind!(lib, "is_wfi\0", GetBoolFn),
            get_pc: bind!(lib, "get_pc\0", GetU64Fn),
            set_pc: bind!(lib, "set_pc\0", SetU64Fn),
            get_page_size: bind!(lib, "get_page_size\0", GetU32Fn),
            map_range: bind!(lib, "map_range\0", RangeFn),
            unmap_range: bind!(lib, "unmap_range\0", RangeFn),
            is_range_mapped: bind!(lib, "is_range_mapped\0", RangeQueryFn),
            invalidate_translation_blocks: bind!(lib, "invalidate_translation_blocks\0", RangeFn),
            translate_to_physical: bind!(lib, "translate_to_physical\0", AddrU32Fn),
            set_host_blocks: bind!(lib, "set_host_blocks\0", SetHostBlocksFn),
            free_host_blocks: bind!(lib, "free_host_blocks\0", VoidFn),
            set_count_threshold: bind!(lib, "set_count_threshold\0", SetThresholdFn),
            set_irq: bind!(lib, "set_irq\0", SetIrqFn),
            is_irq_set: bind!(lib, "is_irq_set\0", GetBoolFn),
            add_breakpoint: bind!(lib, "add_breakpoint\0", AddrFn),
            remove_breakpoint: bind!(lib, "remove_breakpoint\0", AddrFn),
            attach_log_block_fetch: bind!(lib, "attach_log_block_fetch\0", SetBoolFn),
            set_on_block_translation_enabled: bind!(lib, "set_on_block_translation_enabled\0", SetBoolFn),
            set_translation_cache_size: bind!(lib, "set_translation_cache_size\0", SetSizeFn),
            invalidate_translation_cache: bind!(lib, "invalidate_translation_cache\0", VoidFn),
            set_max_block_size: bind!(lib, "set_max_block_size\0", SetMaxBlockSizeFn),
            get_max_block_size: bind!(lib, "get_max_block_size\0", GetU32Fn),
            restore_context: bind!(lib, "restore_context\0", VoidFn),
            export_state: bind!(lib, "export_state\0", ExportStateFn),
            get_state_size: bind!(lib, "get_state_size\0", GetU32Fn),
        })
    }
}

impl Drop for NativeTranslator {
    fn drop(&mut self) {
        unsafe {
            (self.symbols.dispose)();
            libc::dlclose(self.handle);
        }
        // _tempfile's own Drop removes the extracted file from disk.
    }
}

impl Translator for NativeTranslator {
    fn init(&mut self, cpu_type: &str) -> Result<(), CpuError> {
        let c_cpu_type = CString::new(cpu_type)
            .map_err(|_| CpuError::UnknownCpuType(cpu_type.to_string()))?;
        let rc = unsafe { (self.symbols.init)(c_cpu_type.as_ptr()) };
        if rc < 0 {
            Err(CpuError::UnknownCpuType(cpu_type.to_string()))
        } else {
            Ok(())
        }
    }

    fn dispose(&mut self) {
        unsafe { (self.symbols.dispose)() }
    }

    fn reset(&mut self) {
        unsafe { (self.symbols.reset)() }
    }

    /// Calling through `with_callbacks` here would require threading a
    /// `&dyn TranslatorCallbacks` into `execute`, but `Translator::execute`
    /// takes none — the caller installs callbacks once via
    /// `crate::exports::with_callbacks` around its own call to this method
    /// (see `harness-exec::loop_`), not inside it.
    fn execute(&mut self) -> i32 {
        unsafe { (self.symbols.execute)() }
    }

    fn set_paused(&mut self) {
        unsafe { (self.symbols.set_paused)() }
    }

    fn clear_paused(&mut self) {
        unsafe { (self.symbols.clear_paused)() }
    }

    fn is_wfi(&self) -> bool {
        unsafe { (self.symbols.is_wfi)() != 0 }
    }

    fn get_pc(&self) -> u64 {
        unsafe { (self.symbols.get_pc)() }
    }

    fn set_pc(&mut self, pc: u64) {
        unsafe { (self.symbols.set_pc)(pc) }
    }

    fn get_page_size(&self) -> u32 {
        unsafe { (self.symbols.get_page_size)() }
    }

    fn map_range(&mut self, start: u32, size: u32) {
        unsafe { (self.symbols.map_range)(start, size) }
    }

    fn unmap_range(&mut self, start: u32, end: u32) {
        unsafe { (self.symbols.unmap_range)(start, end) }
    }

    fn is_range_mapped(&self, start: u32, end: u32) -> bool {
        unsafe { (self.symbols.is_range_mapped)(start, end) != 0 }
    }

    fn invalidate_translation_blocks(&mut self, start: u32, end: u32) {
        unsafe { (self.symbols.invalidate_translation_blocks)(start, end) }
    }

    fn translate_to_physical(&self, addr: u32) -> u32 {
        unsafe { (self.symbols.translate_to_physical)(addr) }
    }

    fn set_host_blocks(&mut self, blocks: &[HostMemoryBlock]) {
        let ffi_blocks: Box<[HostBlockFfi]> = blocks
            .iter()
            .map(|b| HostBlockFfi {
                start: b.start,
                size: b.size,
                host_pointer: b.host_pointer as u64,
                host_block_start: b.host_block_start as i32,
            })
            .collect();
        unsafe { (self.symbols.set_host_blocks)(ffi_blocks.as_ptr(), ffi_blocks.len() as i32) };
        // The previous buffer, if any, is only safe to drop once the
        // native side has moved on to the one just installed.
        self.host_blocks_buffer = Some(ffi_blocks);
    }

    fn free_host_blocks(&mut self) {
        unsafe { (self.symbols.free_host_blocks)() }
        self.host_blocks_buffer = None;
    }

    fn set_count_threshold(&mut self, threshold: i32) {
        unsafe { (self.symbols.set_count_threshold)(threshold) }
    }

    fn set_irq(&mut self, line: i32, level: i32) {
        unsafe { (self.symbols.set_irq)(line, level) }
    }

    fn is_irq_set(&self) -> bool {
        unsafe { (self.symbols.is_irq_set)() != 0 }
    }

    fn add_breakpoint(&mut self, addr: u32) {
        unsafe { (self.symbols.add_breakpoint)(addr) }
    }

    fn remove_breakpoint(&mut self, addr: u32) {
        unsafe { (self.symbols.remove_breakpoint)(addr) }
    }

    fn attach_log_block_fetch(&mut self, enabled: bool) {
        unsafe { (self.symbols.attach_log_block_fetch)(enabled as u32) }
    }

    fn set_on_block_translation_enabled(&mut self, enabled: bool) {
        unsafe { (self.symbols.set_on_block_translation_enabled)(enabled as u32) }
    }

    fn set_translation_cache_size(&mut self, size: usize) {
        unsafe { (self.symbols.set_translation_cache_size)(size) }
    }

    fn invalidate_translation_cache(&mut self) {
        unsafe { (self.symbols.invalidate_translation_cache)() }
    }

    fn set_max_block_size(&mut self, size: u32) -> u32 {
        unsafe { (self.symbols.set_max_block_size)(size) }
    }

    fn get_max_block_size(&self) -> u32 {
        unsafe { (self.symbols.get_max_block_size)() }
    }

    fn restore_context(&mut self) {
        unsafe { (self.symbols.restore_context)() }
    }

    fn export_state(&self) -> Vec<u8> {
        let size = unsafe { (self.symbols.get_state_size)() } as usize;
        let ptr = unsafe { (self.symbols.export_state)() };
        if ptr.is_null() || size == 0 {
            return Vec::new();
        }
        unsafe { std::slice::from_raw_parts(ptr, size) }.to_vec()
    }

    fn import_state(&mut self, blob: &[u8]) {
        let size = unsafe { (self.symbols.get_state_size)() } as usize;
        assert_eq!(blob.len(), size, "translator state blob size mismatch on import");
        let ptr = unsafe { (self.symbols.export_state)() };
        if !ptr.is_null() && size > 0 {
            unsafe { std::ptr::copy_nonoverlapping(blob.as_ptr(), ptr, size) };
        }
        unsafe { (self.symbols.restore_context)() }
    }
}

/// Builds the per-architecture shared object file name this workspace's
/// native translator binaries are expected to be published under.
pub fn shared_object_name(word_size: WordSize, architecture: &str, big_endian: bool) -> String {
    let bits = match word_size {
        WordSize::Bits32 => 32,
        WordSize::Bits64 => 64,
    };
    let endian = if big_endian { "be" } else { "le" };
    format!("translate_{bits}-{architecture}-{endian}.so")
}
