//! The declarative-to-bytecode compiler.
//!
//! Input is an already-parsed declarative object tree ([`ast`]) plus the
//! resolved type table and import set ([`types`]). The compiler validates the
//! tree, synthesizes per-instance meta-descriptors ([`meta`]), and emits the
//! typed instruction stream ([`instructions`]) the object-construction VM
//! replays at instantiation time.
//!
//! Compilation is recovered at the unit boundary: on any error the output
//! unit is reset and the errors, each carrying url/line/column, are available
//! from [`ObjectTreeCompiler::errors`].

pub mod ast;
pub mod codegen;
pub mod converters;
pub mod errors;
pub mod instructions;
pub mod meta;
pub mod types;

pub use self::codegen::ObjectTreeCompiler;
pub use self::errors::CompileError;
pub use self::instructions::CompiledUnit;
pub use self::instructions::Instruction;
