//! The runtime helper table.
//!
//! JIT-compiled code never manipulates objects directly: every operation is
//! an absolute call into one of these C-ABI helpers, provided by the
//! embedding engine at registration time. Every helper takes the execution
//! context as its first argument; tagged values are passed by 64-bit value
//! where they fit a register and by reference elsewhere.

use enum_map::{Enum, EnumMap};
use strum_macros::IntoStaticStr;

/// Every runtime helper JIT-compiled code may call.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, IntoStaticStr)]
pub enum RuntimeFunction {
    // Literal constructors.
    InitClosure,
    NewObject,
    NewArray,
    NewBooleanObject,
    NewNumberObject,
    NewStringObject,
    NewRegExpObject,

    // Unary and binary operators.
    UPlus,
    UMinus,
    Compl,
    Not,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    UShr,
    BitAnd,
    BitOr,
    BitXor,
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    InstanceOf,
    In,
    TypeofValue,
    TypeofName,
    ToBoolean,

    // Property access.
    GetActivationProperty,
    SetActivationProperty,
    GetProperty,
    SetProperty,
    GetElement,
    SetElement,
    GetPropertyLookup,
    SetPropertyLookup,

    // Calls.
    CallActivationProperty,
    CallProperty,
    CallValue,
    CallElement,
    ConstructActivationProperty,
    ConstructProperty,
    ConstructValue,

    // Exceptions.
    Throw,
    CreateExceptionHandler,
    DeleteExceptionHandler,
    GetException,

    // Scopes.
    PushWithScope,
    PushCatchScope,
    PopScope,

    // Post-increment/decrement.
    PostIncrementName,
    PostIncrementMember,
    PostIncrementElement,
    PostDecrementName,
    PostDecrementMember,
    PostDecrementElement,

    // GC-visible allocation.
    AllocString,
    AllocData,
    AllocObjectWithMemberData,
}

impl RuntimeFunction {
    /// The helper's symbol-ish name, for diagnostics and disassembly dumps.
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// A one-slot monomorphic inline cache for property access by lookup index.
#[derive(Clone, Debug, Default)]
#[repr(C)]
pub struct Lookup {
    /// Internal class of the base object on the last hit.
    pub main_class: usize,
    /// Internal class of the prototype holding the property, or zero.
    pub proto_class: usize,
    /// Property slot index within the hit class.
    pub index: u32,
    /// Interned name, for the slow path.
    pub name: usize,
}

/// The absolute-address table the selector resolves helper calls against.
///
/// The engine registers each helper's address before compiling any code; a
/// call to an unregistered helper is a programming error caught at lookup.
pub struct RuntimeHelpers {
    table: EnumMap<RuntimeFunction, usize>,
}

impl RuntimeHelpers {
    pub fn new() -> Self {
        RuntimeHelpers {
            table: EnumMap::default(),
        }
    }

    pub fn register(&mut self, f: RuntimeFunction, address: usize) {
        debug_assert!(address != 0);
        self.table[f] = address;
    }

    pub fn address(&self, f: RuntimeFunction) -> usize {
        let addr = self.table[f];
        debug_assert!(addr != 0, "runtime helper {} not registered", f.name());
        addr
    }
}

impl Default for RuntimeHelpers {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte offset of the engine's exception flag, relative to the execution
/// context the context register points at. Part of the engine contract: the
/// flag is a 32-bit word that is non-zero while an exception is in flight.
pub const CONTEXT_EXCEPTION_FLAG_OFFSET: i32 = 2 * std::mem::size_of::<usize>() as i32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helper_names() {
        assert_eq!(RuntimeFunction::CallValue.name(), "CallValue");
        assert_eq!(RuntimeFunction::AllocString.name(), "AllocString");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "not registered")]
    fn unregistered_helper_is_caught() {
        let helpers = RuntimeHelpers::new();
        let _ = helpers.address(RuntimeFunction::Add);
    }
}
