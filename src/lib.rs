//! Kite is the runtime core of an embedded JavaScript engine intended for a
//! declarative UI framework. It is not a complete engine: the source parser,
//! the built-in prototypes and the host object system are external
//! collaborators reached through traits and plain data contracts.
//!
//! Logically, this crate includes three subsystems:
//! * The managed heap ([`heap`]): a precise, non-moving mark-sweep collector
//!   over bitmap-tracked 64 KiB chunks, with size-class free-lists, a
//!   dedicated allocator for huge objects, a LIFO allocator for call-context
//!   frames, and an optional Steele-style incremental mode driven by a
//!   tri-color write barrier.
//! * The baseline JIT ([`jit`]): an instruction selector that lowers a
//!   three-address IR to native code for x86-32, x86-64 and ARM32 through an
//!   architecture-abstracted macro-assembler, calling back into a fixed table
//!   of runtime helpers.
//! * The declarative compiler ([`compiler`]): semantic validation of a parsed
//!   declarative object tree, synthesis of per-instance meta-descriptors
//!   (including alias properties), and emission of a typed instruction stream
//!   for the object-construction VM.
//!
//! The [`vm`] module holds the small slice of the runtime object model the
//! three subsystems agree on: 64-bit tagged values and the per-type virtual
//! table with its GC mark descriptor.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[macro_use]
extern crate static_assertions;

pub mod util;
pub mod compiler;
pub mod heap;
pub mod jit;
pub mod vm;
