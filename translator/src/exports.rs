//! The *exports* side of the FFI boundary: `extern "C"` trampolines the
//! translator shared object calls back into, and the thread-local slot
//! they read through.
//!
//! A translator is single-entrant per CPU (see `Translator::execute`'s
//! doc comment), so one thread-local "current callbacks" pointer per OS
//! thread is sufficient: `with_callbacks` installs it for the duration of
//! one `execute()` call and clears it on the way out, including on
//! unwind.

use std::cell::Cell;
use std::ffi::CStr;
use std::os::raw::c_char;

use harness_core::traits::TranslatorCallbacks;

thread_local! {
    static CURRENT: Cell<Option<*const dyn TranslatorCallbacks>> = Cell::new(None);
}

struct ClearOnDrop;

impl Drop for ClearOnDrop {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(None));
    }
}

/// Installs `callbacks` as the current thread's active translator
/// callbacks for the duration of `f`, which must be the `execute()` call
/// (direct or FFI-mediated) that may invoke the exported trampolines
/// below. Cleared on the way out even if `f` panics (as
/// `RestartTranslationBlock` does), since the panic is expected to
/// propagate through and be caught above this frame.
pub fn with_callbacks<R>(callbacks: &dyn TranslatorCallbacks, f: impl FnOnce() -> R) -> R {
    let ptr: *const dyn TranslatorCallbacks = callbacks;
    CURRENT.with(|c| c.set(Some(ptr)));
    let _clear = ClearOnDrop;
    f()
}

pub(crate) fn with_current<R>(f: impl FnOnce(&dyn TranslatorCallbacks) -> R) -> R {
    let ptr = CURRENT
        .with(|c| c.get())
        .expect("translator callback invoked with no active execute() call on this thread");
    // SAFETY: the pointer is installed by `with_callbacks` for exactly the
    // duration of the `execute()` call the translator is presently inside,
    // and cleared (even on unwind) before that call's frame returns.
    f(unsafe { &*ptr })
}

unsafe fn c_str_or_empty<'a>(ptr: *const c_char) -> &'a str {
    if ptr.is_null() {
        ""
    } else {
        CStr::from_ptr(ptr).to_str().unwrap_or("")
    }
}

#[no_mangle]
pub extern "C" fn harness_read_byte_from_bus(addr: u32) -> u32 {
    with_current(|cb| cb.read_byte_from_bus(addr))
}

#[no_mangle]
pub extern "C" fn harness_read_word_from_bus(addr: u32) -> u32 {
    with_current(|cb| cb.read_word_from_bus(addr))
}

#[no_mangle]
pub extern "C" fn harness_read_dword_from_bus(addr: u32) -> u32 {
    with_current(|cb| cb.read_dword_from_bus(addr))
}

#[no_mangle]
pub extern "C" fn harness_write_byte_to_bus(addr: u32, value: u32) {
    with_current(|cb| cb.write_byte_to_bus(addr, value))
}

#[no_mangle]
pub extern "C" fn harness_write_word_to_bus(addr: u32, value: u32) {
    with_current(|cb| cb.write_word_to_bus(addr, value))
}

#[no_mangle]
pub extern "C" fn harness_write_dword_to_bus(addr: u32, value: u32) {
    with_current(|cb| cb.write_dword_to_bus(addr, value))
}

#[no_mangle]
pub extern "C" fn harness_on_block_begin(pc: u32, flags: u32) {
    with_current(|cb| cb.on_block_begin(pc, flags))
}

/// # Safety
/// `message` must be a valid NUL-terminated C string pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn harness_report_abort(message: *const c_char) {
    let message = c_str_or_empty(message);
    with_current(|cb| cb.report_abort(message));
}

#[no_mangle]
pub extern "C" fn harness_is_io_accessed(addr: u32) -> u32 {
    with_current(|cb| cb.is_io_accessed(addr)) as u32
}

#[no_mangle]
pub extern "C" fn harness_update_instruction_counter(delta: i32) {
    with_current(|cb| cb.update_instruction_counter(delta))
}

#[no_mangle]
pub extern "C" fn harness_is_instruction_count_enabled() -> u32 {
    with_current(|cb| cb.is_instruction_count_enabled()) as u32
}

#[no_mangle]
pub extern "C" fn harness_is_block_begin_event_enabled() -> u32 {
    with_current(|cb| cb.is_block_begin_event_enabled()) as u32
}

#[no_mangle]
pub extern "C" fn harness_touch_host_block(offset: u32) {
    with_current(|cb| cb.touch_host_block(offset))
}

#[no_mangle]
pub extern "C" fn harness_invalidate_tb_in_other_cpus(start: u32, end: u32) {
    with_current(|cb| cb.invalidate_tb_in_other_cpus(start, end))
}

#[no_mangle]
pub extern "C" fn harness_allocate(size: usize) -> usize {
    with_current(|cb| cb.allocate(size))
}

#[no_mangle]
pub extern "C" fn harness_reallocate(ptr: usize, size: usize) -> usize {
    with_current(|cb| cb.reallocate(ptr, size))
}

#[no_mangle]
pub extern "C" fn harness_free(ptr: usize) {
    with_current(|cb| cb.free(ptr))
}

/// # Safety
/// `message` must be a valid NUL-terminated C string pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn harness_log_as_cpu(level: i32, message: *const c_char) {
    let message = c_str_or_empty(message);
    with_current(|cb| cb.log_as_cpu(level, message));
}

#[no_mangle]
pub extern "C" fn harness_log_disassembly(pc: u32, len: u32, flags: u32) {
    with_current(|cb| cb.log_disassembly(pc, len, flags))
}

#[no_mangle]
pub extern "C" fn harness_get_cpu_index() -> i32 {
    with_current(|cb| cb.get_cpu_index())
}

#[no_mangle]
pub extern "C" fn harness_on_translation_cache_size_change(new_size: i32) {
    with_current(|cb| cb.on_translation_cache_size_change(new_size))
}
