//! The typed instruction stream and the compiled unit that carries it.
//!
//! One [`CompiledUnit`] is produced per document. Instantiation replays the
//! instruction stream against an object stack and a list stack; instructions
//! reference the unit's side tables (strings, urls, byte arrays, property
//! caches) by index.

use crate::compiler::types::{MetaObject, PropertyType, TypeReference};
use std::collections::HashMap;
use std::rc::Rc;

/// One entry of a property cache.
#[derive(Clone, Debug)]
pub struct PropertyCacheEntry {
    pub name: String,
    pub index: u32,
    pub property_type: PropertyType,
    pub writable: bool,
    pub resettable: bool,
    pub is_alias: bool,
    pub notify_index: i32,
}

/// The per-type property cache instantiation consults instead of walking
/// meta-object chains.
#[derive(Clone, Debug, Default)]
pub struct PropertyCache {
    pub entries: Vec<PropertyCacheEntry>,
}

impl PropertyCache {
    /// Build a cache from a (possibly synthesized) meta-object chain.
    pub fn from_meta(meta: &MetaObject) -> PropertyCache {
        let mut entries = Vec::new();
        fn collect(meta: &MetaObject, entries: &mut Vec<PropertyCacheEntry>) {
            if let Some(s) = &meta.super_class {
                collect(s, entries);
            }
            for p in &meta.properties {
                entries.push(PropertyCacheEntry {
                    name: p.name.clone(),
                    index: entries.len() as u32,
                    property_type: p.property_type.clone(),
                    writable: p.writable,
                    resettable: p.resettable,
                    is_alias: false,
                    notify_index: -1,
                });
            }
        }
        collect(meta, &mut entries);
        PropertyCache { entries }
    }

    /// Look up an entry by name. Later entries shadow earlier ones, matching
    /// meta-object resolution order (a synthesized property hides an
    /// inherited one of the same name).
    pub fn property(&self, name: &str) -> Option<&PropertyCacheEntry> {
        self.entries.iter().rev().find(|e| e.name == name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut PropertyCacheEntry> {
        self.entries.iter_mut().rev().find(|e| e.name == name)
    }
}

/// Which store variant a binding targets (a plain property, or a sub-property
/// of a fetched value type).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BindingTarget {
    pub property_index: u32,
    /// Sub-property index within the value type, or -1.
    pub value_type_index: i32,
    /// Set when the binding's owner is the fetched value-type object.
    pub owner: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Init {
        bindings_count: u32,
        parser_status_count: u32,
        object_stack_depth: u32,
        list_stack_depth: u32,
        /// Byte-array index of the optimized-binding program, or -1.
        compiled_binding: i32,
    },
    CreateSimpleObject {
        create_fn: usize,
        type_size: usize,
        type_index: u32,
        line: u32,
        column: u32,
    },
    CreateCppObject {
        type_index: u32,
        /// Byte-array index of custom data, or -1.
        data: i32,
        is_root: bool,
        line: u32,
        column: u32,
    },
    CreateQMLObject {
        type_index: u32,
        is_root: bool,
        /// Byte-array index of the binding bitmask, or -1.
        binding_bits: i32,
    },
    CompleteQMLObject {
        line: u32,
        column: u32,
        is_root: bool,
    },
    StoreMetaObject {
        /// Byte-array index of the packed meta-descriptor.
        data: u32,
        /// Byte-array index of the alias/method auxiliary data.
        alias_data: u32,
        /// Property-cache index, or -1 for grouped sub-objects.
        property_cache: i32,
    },
    SetId {
        string_index: u32,
        index: u32,
    },
    BeginObject {
        cast_value: i32,
    },
    StoreInteger {
        property_index: u32,
        value: i32,
    },
    StoreDouble {
        property_index: u32,
        value: f64,
    },
    StoreFloat {
        property_index: u32,
        value: f32,
    },
    StoreString {
        property_index: u32,
        string_index: u32,
    },
    StoreStringList {
        property_index: u32,
        string_index: u32,
    },
    StoreByteArray {
        property_index: u32,
        byte_array_index: u32,
    },
    StoreUrl {
        property_index: u32,
        url_index: u32,
    },
    StoreUrlQList {
        property_index: u32,
        url_index: u32,
    },
    StoreBool {
        property_index: u32,
        value: bool,
    },
    StoreColor {
        property_index: u32,
        /// AARRGGBB.
        value: u32,
    },
    StoreDate {
        property_index: u32,
        julian_day: i64,
    },
    StoreTime {
        property_index: u32,
        msecs_since_midnight: u32,
    },
    StoreDateTime {
        property_index: u32,
        julian_day: i64,
        msecs_since_midnight: u32,
    },
    StorePoint {
        property_index: u32,
        x: i32,
        y: i32,
    },
    StorePointF {
        property_index: u32,
        x: f64,
        y: f64,
    },
    StoreSize {
        property_index: u32,
        width: i32,
        height: i32,
    },
    StoreSizeF {
        property_index: u32,
        width: f64,
        height: f64,
    },
    StoreRect {
        property_index: u32,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },
    StoreRectF {
        property_index: u32,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    StoreVector3D {
        property_index: u32,
        x: f32,
        y: f32,
        z: f32,
    },
    StoreVector4D {
        property_index: u32,
        x: f32,
        y: f32,
        z: f32,
        w: f32,
    },
    StoreVariant {
        property_index: u32,
        string_index: u32,
    },
    StoreVariantInteger {
        property_index: u32,
        value: i32,
    },
    StoreVariantDouble {
        property_index: u32,
        value: f64,
    },
    StoreVariantBool {
        property_index: u32,
        value: bool,
    },
    StoreVariantObject {
        property_index: u32,
        line: u32,
    },
    StoreObject {
        property_index: u32,
        line: u32,
    },
    StoreInterface {
        property_index: u32,
        line: u32,
    },
    AssignObjectList {
        line: u32,
    },
    StoreObjectQList,
    FetchObject {
        property_index: u32,
        line: u32,
    },
    FetchValueType {
        property_index: u32,
        /// Bit `n` set suppresses the default binding of sub-property `n`.
        binding_skip_list: u32,
    },
    PopFetchedObject,
    PopValueType {
        property_index: u32,
    },
    FetchQList {
        property_index: u32,
    },
    PopQList,
    FetchAttached {
        attached_id: u32,
        line: u32,
    },
    StoreSignal {
        signal_index: u32,
        /// Byte-array index of the rewritten handler source.
        value: u32,
        context: u32,
        line: u32,
        column: u32,
    },
    AssignSignalObject {
        signal_name_index: u32,
        line: u32,
    },
    StoreScriptString {
        property_index: u32,
        string_index: u32,
        scope: u32,
        binding_id: u32,
        line: u32,
        column: u32,
    },
    StoreTrString {
        property_index: u32,
        context_index: u32,
        text_index: u32,
    },
    StoreTrIdString {
        property_index: u32,
        text_index: u32,
    },
    StoreV4Binding {
        target: BindingTarget,
        /// Index within the compiled-binding program.
        value: u32,
        context: u32,
        line: u32,
        column: u32,
    },
    StoreV8Binding {
        target: BindingTarget,
        /// Index into the unit's shared binding programs.
        value: u32,
        context: u32,
        line: u32,
        column: u32,
    },
    StoreBinding {
        target: BindingTarget,
        /// Byte-array index of the binding script.
        value: u32,
        context: u32,
        line: u32,
        column: u32,
    },
    StoreValueSource {
        target: BindingTarget,
        cast_value: i32,
    },
    StoreValueInterceptor {
        target: BindingTarget,
        cast_value: i32,
    },
    CreateComponent {
        line: u32,
        column: u32,
        end_line: u32,
        is_root: bool,
        /// Number of instructions in the component body, back-patched.
        count: u32,
    },
    Defer {
        /// Number of deferred instructions, back-patched.
        defer_count: u32,
    },
    DeferInit {
        bindings_count: u32,
        parser_status_count: u32,
        object_stack_depth: u32,
        list_stack_depth: u32,
    },
    SetDefault,
    Done,
}

/// The output of compiling one document.
#[derive(Default, Debug)]
pub struct CompiledUnit {
    pub url: String,
    pub types: Vec<TypeReference>,
    pub primitives: Vec<String>,
    pub urls: Vec<String>,
    pub byte_arrays: Vec<Vec<u8>>,
    /// Shared binding programs (source text).
    pub programs: Vec<String>,
    pub instructions: Vec<Instruction>,
    pub property_caches: Vec<Rc<PropertyCache>>,
    pub root_property_cache: Option<Rc<PropertyCache>>,
    /// The meta-object instances of this unit are built from; referenced
    /// when another document uses this unit as a type.
    pub root_meta: Rc<MetaObject>,

    string_indices: HashMap<String, u32>,
    url_indices: HashMap<String, u32>,
    byte_array_indices: HashMap<Vec<u8>, u32>,
}

impl CompiledUnit {
    pub fn new(url: impl Into<String>) -> Self {
        CompiledUnit {
            url: url.into(),
            ..CompiledUnit::default()
        }
    }

    /// Clear everything the compiler populates, keeping the url.
    pub fn reset(&mut self) {
        let url = std::mem::take(&mut self.url);
        *self = CompiledUnit::new(url);
    }

    pub fn index_for_string(&mut self, s: &str) -> u32 {
        if let Some(&i) = self.string_indices.get(s) {
            return i;
        }
        let i = self.primitives.len() as u32;
        self.primitives.push(s.to_owned());
        self.string_indices.insert(s.to_owned(), i);
        i
    }

    pub fn index_for_url(&mut self, url: &str) -> u32 {
        if let Some(&i) = self.url_indices.get(url) {
            return i;
        }
        let i = self.urls.len() as u32;
        self.urls.push(url.to_owned());
        self.url_indices.insert(url.to_owned(), i);
        i
    }

    pub fn index_for_byte_array(&mut self, data: Vec<u8>) -> u32 {
        if let Some(&i) = self.byte_array_indices.get(&data) {
            return i;
        }
        let i = self.byte_arrays.len() as u32;
        self.byte_array_indices.insert(data.clone(), i);
        self.byte_arrays.push(data);
        i
    }

    pub fn add_instruction(&mut self, instruction: Instruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    pub fn next_instruction_index(&self) -> usize {
        self.instructions.len()
    }

    /// The stack-depth accounting of a nested unit, read from its leading
    /// `Init` instruction.
    pub fn init_instruction(&self) -> Option<&Instruction> {
        match self.instructions.first() {
            Some(init @ Instruction::Init { .. }) => Some(init),
            _ => None,
        }
    }
}
