//! Native Translator Binding: loads a per-architecture translator shared
//! object, binds its imports, and exposes the thread-local "current CPU"
//! slot the translator's exported callbacks read through.
//!
//! Grounded on `backend`'s FFI + `Drop`-based cleanup idiom (raw `libc`
//! calls paired with a destructor that undoes them) and on
//! `oxidecomputer-hubris/cfpa-update`'s use of `tempfile` for exactly this
//! kind of "extract an opaque blob to disk, use it, delete it" lifecycle.

pub mod exports;
pub mod mock;
mod native;

pub use exports::with_callbacks;
pub use mock::{MockInsn, MockTranslator};
pub use native::{shared_object_name, NativeTranslator};
