//! The host type system as the compiler sees it.
//!
//! The engine's object model is an external collaborator; what the compiler
//! needs from it is the static shape of each referenced type: its properties
//! with declared types and flags, its signals, enumerations, default
//! property, and the per-type casts the construction VM uses. A referenced
//! type resolves either to a native (host-backed) type or to another
//! compiled unit.

use crate::compiler::instructions::CompiledUnit;
use std::rc::Rc;

/// The declared type of a native property.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyType {
    Bool,
    Int,
    UInt,
    Float,
    Double,
    String,
    Url,
    ByteArray,
    Color,
    Date,
    Time,
    DateTime,
    Point,
    PointF,
    Size,
    SizeF,
    Rect,
    RectF,
    Vector3D,
    Vector4D,
    StringList,
    UrlList,
    Variant,
    RegExp,
    ScriptString,
    /// An enum declared on the owning class.
    Enum(String),
    /// A pointer to an object of the named class.
    Object(String),
    /// A pointer stored through a named interface.
    Interface(String),
    /// A list of objects of the named class.
    List(String),
    /// A component (re-instantiable sub-tree).
    Component,
}

impl PropertyType {
    /// Value types support grouped sub-property access (`pos.x: 3`).
    pub fn is_value_type(&self) -> bool {
        matches!(
            self,
            PropertyType::Point
                | PropertyType::PointF
                | PropertyType::Size
                | PropertyType::SizeF
                | PropertyType::Rect
                | PropertyType::RectF
                | PropertyType::Vector3D
                | PropertyType::Vector4D
        )
    }

    pub fn is_list(&self) -> bool {
        matches!(self, PropertyType::List(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(
            self,
            PropertyType::Object(_) | PropertyType::Interface(_) | PropertyType::Component
        )
    }
}

/// A stable numeric code for a property type, used in packed meta-data.
pub fn meta_type_code(t: &PropertyType) -> u32 {
    match t {
        PropertyType::Bool => 1,
        PropertyType::Int => 2,
        PropertyType::UInt => 3,
        PropertyType::Float => 4,
        PropertyType::Double => 5,
        PropertyType::String => 6,
        PropertyType::Url => 7,
        PropertyType::ByteArray => 8,
        PropertyType::Color => 9,
        PropertyType::Date => 10,
        PropertyType::Time => 11,
        PropertyType::DateTime => 12,
        PropertyType::Point => 13,
        PropertyType::PointF => 14,
        PropertyType::Size => 15,
        PropertyType::SizeF => 16,
        PropertyType::Rect => 17,
        PropertyType::RectF => 18,
        PropertyType::Vector3D => 19,
        PropertyType::Vector4D => 20,
        PropertyType::StringList => 21,
        PropertyType::UrlList => 22,
        PropertyType::Variant => 23,
        PropertyType::RegExp => 24,
        PropertyType::ScriptString => 25,
        PropertyType::Enum(_) => 26,
        PropertyType::Object(_) => 27,
        PropertyType::Interface(_) => 28,
        PropertyType::List(_) => 29,
        PropertyType::Component => 30,
    }
}

#[derive(Clone, Debug)]
pub struct MetaProperty {
    pub name: String,
    pub property_type: PropertyType,
    pub writable: bool,
    pub resettable: bool,
    pub is_final: bool,
    pub scriptable: bool,
    /// Minor version the property appeared in, if revisioned.
    pub revision: Option<u16>,
}

impl MetaProperty {
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        MetaProperty {
            name: name.into(),
            property_type,
            writable: true,
            resettable: false,
            is_final: false,
            scriptable: true,
            revision: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MetaSignal {
    pub name: String,
    pub parameter_names: Vec<String>,
    pub revision: Option<u16>,
}

#[derive(Clone, Debug)]
pub struct MetaEnum {
    pub name: String,
    pub is_flag: bool,
    pub values: Vec<(String, i32)>,
}

impl MetaEnum {
    pub fn key_to_value(&self, key: &str) -> Option<i32> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }
}

/// The static meta-object of a class: properties, signals and enums, chained
/// through the super class.
#[derive(Clone, Debug, Default)]
pub struct MetaObject {
    pub class_name: String,
    pub super_class: Option<Rc<MetaObject>>,
    pub properties: Vec<MetaProperty>,
    pub signals: Vec<MetaSignal>,
    pub enums: Vec<MetaEnum>,
    /// Name of the default property, if the class declares one.
    pub default_property: Option<String>,
}

impl MetaObject {
    /// Property index of the first own property (number of inherited ones).
    pub fn property_offset(&self) -> usize {
        self.super_class
            .as_ref()
            .map_or(0, |s| s.property_count())
    }

    pub fn property_count(&self) -> usize {
        self.property_offset() + self.properties.len()
    }

    /// Find a property by name, walking the super chain. Returns the global
    /// index and the record.
    pub fn property(&self, name: &str) -> Option<(usize, &MetaProperty)> {
        if let Some(i) = self.properties.iter().position(|p| p.name == name) {
            return Some((self.property_offset() + i, &self.properties[i]));
        }
        self.super_class.as_ref().and_then(|s| s.property(name))
    }

    pub fn property_by_index(&self, index: usize) -> Option<&MetaProperty> {
        let offset = self.property_offset();
        if index >= offset {
            self.properties.get(index - offset)
        } else {
            self.super_class
                .as_ref()
                .and_then(|s| s.property_by_index(index))
        }
    }

    pub fn signal_offset(&self) -> usize {
        self.super_class.as_ref().map_or(0, |s| s.signal_count())
    }

    pub fn signal_count(&self) -> usize {
        self.signal_offset() + self.signals.len()
    }

    pub fn signal(&self, name: &str) -> Option<(usize, &MetaSignal)> {
        if let Some(i) = self.signals.iter().position(|s| s.name == name) {
            return Some((self.signal_offset() + i, &self.signals[i]));
        }
        self.super_class.as_ref().and_then(|s| s.signal(name))
    }

    /// Find an enumeration by name, walking the super chain.
    pub fn enums_named(&self, name: &str) -> Option<&MetaEnum> {
        self.enums
            .iter()
            .find(|e| e.name == name)
            .or_else(|| self.super_class.as_ref().and_then(|s| s.enums_named(name)))
    }

    /// Search the enums of this class only, last declared first (shadowing).
    pub fn enum_value(&self, key: &str) -> Option<i32> {
        for e in self.enums.iter().rev() {
            if let Some(v) = e.key_to_value(key) {
                return Some(v);
            }
        }
        self.super_class.as_ref().and_then(|s| s.enum_value(key))
    }

    /// The default property name, walking the super chain.
    pub fn default_property_name(&self) -> Option<&str> {
        self.default_property.as_deref().or_else(|| {
            self.super_class
                .as_ref()
                .and_then(|s| s.default_property_name())
        })
    }

    /// Does this class (or a super class) have the given class name?
    pub fn inherits(&self, class_name: &str) -> bool {
        if self.class_name == class_name {
            return true;
        }
        self.super_class
            .as_ref()
            .is_some_and(|s| s.inherits(class_name))
    }
}

/// A native (host-backed) element type.
#[derive(Clone, Debug)]
pub struct NativeType {
    /// The element name, e.g. `Item`.
    pub name: String,
    pub module: String,
    pub major_version: u16,
    pub minor_version: u16,
    pub meta: Rc<MetaObject>,
    pub creatable: bool,
    pub no_creation_reason: String,
    /// Construction-VM hooks.
    pub create_fn: usize,
    pub create_size: usize,
    /// Cast offsets, -1 when the type does not implement the interface.
    pub parser_status_cast: i32,
    pub value_source_cast: i32,
    pub value_interceptor_cast: i32,
    /// Extended types cannot take the simple-creation fast path.
    pub extended: bool,
    /// The `Component` pseudo-element.
    pub is_component: bool,
    /// Attached-property namespace, if the type provides one.
    pub attached_meta: Option<Rc<MetaObject>>,
    pub attached_id: i32,
    /// Interfaces the type implements, for interface-typed assignment.
    pub interfaces: Vec<String>,
    /// Property names instantiation defers (from the type's class info).
    pub deferred_property_names: Vec<String>,
}

impl NativeType {
    pub fn new(name: impl Into<String>, meta: Rc<MetaObject>) -> Self {
        NativeType {
            name: name.into(),
            module: String::new(),
            major_version: 1,
            minor_version: 0,
            meta,
            creatable: true,
            no_creation_reason: String::new(),
            create_fn: 0,
            create_size: 0,
            parser_status_cast: -1,
            value_source_cast: -1,
            value_interceptor_cast: -1,
            extended: false,
            is_component: false,
            attached_meta: None,
            attached_id: -1,
            interfaces: Vec::new(),
            deferred_property_names: Vec::new(),
        }
    }
}

/// A resolved reference to an element type: native, or another compiled
/// unit.
#[derive(Clone)]
pub enum TypeReference {
    Native(Rc<NativeType>),
    Composite(Rc<CompiledUnit>),
}

impl TypeReference {
    pub fn native(&self) -> Option<&Rc<NativeType>> {
        match self {
            TypeReference::Native(t) => Some(t),
            TypeReference::Composite(_) => None,
        }
    }

    pub fn composite(&self) -> Option<&Rc<CompiledUnit>> {
        match self {
            TypeReference::Composite(c) => Some(c),
            TypeReference::Native(_) => None,
        }
    }

    /// The meta-object instances of this type are built from.
    pub fn meta(&self) -> Rc<MetaObject> {
        match self {
            TypeReference::Native(t) => t.meta.clone(),
            TypeReference::Composite(c) => c.root_meta.clone(),
        }
    }
}

impl std::fmt::Debug for TypeReference {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TypeReference::Native(t) => write!(f, "Native({})", t.name),
            TypeReference::Composite(c) => write!(f, "Composite({})", c.url),
        }
    }
}

/// The import table: type names visible in this document, plus the value
/// type meta-objects for grouped access and alias resolution.
#[derive(Clone, Default)]
pub struct ImportTable {
    types: Vec<Rc<NativeType>>,
    value_types: Vec<(PropertyType, Rc<MetaObject>)>,
}

impl ImportTable {
    pub fn new() -> Self {
        ImportTable::default()
    }

    pub fn add_type(&mut self, t: Rc<NativeType>) {
        self.types.push(t);
    }

    pub fn add_value_type(&mut self, property_type: PropertyType, meta: Rc<MetaObject>) {
        self.value_types.push((property_type, meta));
    }

    pub fn resolve_type(&self, name: &str) -> Option<&Rc<NativeType>> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Resolve a qualified `Type.Enumerator` name to its integer value.
    pub fn resolve_enum(&self, type_name: &str, enumerator: &str) -> Option<i32> {
        let t = self.resolve_type(type_name)?;
        t.meta.enum_value(enumerator)
    }

    /// The meta-object describing a value type's sub-properties.
    pub fn value_type_meta(&self, t: &PropertyType) -> Option<&Rc<MetaObject>> {
        self.value_types
            .iter()
            .find(|(vt, _)| vt == t)
            .map(|(_, meta)| meta)
    }
}

/// Everything the compiler needs for one document.
pub struct CompileInput {
    pub url: String,
    pub tree: crate::compiler::ast::Tree,
    /// One entry per type referenced by the tree, in reference order.
    pub resolved_types: Vec<TypeReference>,
    pub imports: ImportTable,
}
