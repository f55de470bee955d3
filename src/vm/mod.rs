//! The slice of the runtime object model shared by the heap, the JIT and the
//! compiler: 64-bit tagged values and the per-type virtual table the collector
//! drives destruction and marking through.
//!
//! The full object model (prototypes, property storage, string machinery)
//! lives in the embedding engine; this crate only needs the shape of an
//! object's first word and a description of where its pointers are.

pub mod object;
pub mod value;

pub use self::object::HeapRef;
pub use self::object::MarkEntry;
pub use self::object::MarkTable;
pub use self::object::MemberData;
pub use self::object::VTable;
pub use self::object::ValueArray;
pub use self::value::Value;
