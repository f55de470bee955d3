//! The baseline JIT: a three-address IR, an architecture-abstracted
//! macro-assembler, and the instruction selector that lowers IR statements to
//! native code calling back into the runtime helper table.
//!
//! There is deliberately no optimizer here: every temp lives at a fixed
//! stack-frame offset, every operation is a runtime-helper call, and the only
//! registers in play are the frame registers, the argument registers of the
//! native ABI, and one scratch.

pub mod assembler;
pub mod ir;
pub mod isel;
pub mod runtime;

pub use self::isel::CompiledFunction;
pub use self::isel::InstructionSelection;
