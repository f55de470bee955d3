//! The parsed declarative object tree the compiler consumes.
//!
//! The parser is an external collaborator; it hands the compiler a [`Tree`]
//! of object nodes with their properties, declared (dynamic) members and
//! source locations. Script expressions arrive as source text plus, when the
//! expression is a plain dotted-name chain, the pre-split path the alias and
//! optimized-binding machinery needs.

/// A line/column pair, 1-based as reported by the parser.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(line: u32, column: u32) -> Location {
        Location { line, column }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LocationSpan {
    pub start: Location,
    pub end: Location,
}

impl LocationSpan {
    pub fn at(line: u32, column: u32) -> LocationSpan {
        LocationSpan {
            start: Location::new(line, column),
            end: Location::new(line, column),
        }
    }
}

/// Index of an object node within its [`Tree`].
pub type ObjectId = usize;

/// A literal or expression value assigned to a property.
#[derive(Clone, Debug)]
pub enum Variant {
    Boolean(bool),
    Number(f64),
    String(String),
    /// A script expression. `path` is set when the expression is a plain
    /// identifier or dotted member chain (`a`, `a.b`, `a.b.c`).
    Script {
        source: String,
        path: Option<Vec<String>>,
    },
    Object(ObjectId),
}

impl Variant {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Variant::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn object(&self) -> Option<ObjectId> {
        match self {
            Variant::Object(o) => Some(*o),
            _ => None,
        }
    }

    pub fn is_script(&self) -> bool {
        matches!(self, Variant::Script { .. })
    }
}

#[derive(Clone, Debug)]
pub struct ValueNode {
    pub location: LocationSpan,
    pub value: Variant,
}

impl ValueNode {
    pub fn new(location: LocationSpan, value: Variant) -> Self {
        ValueNode { location, value }
    }
}

/// One `name: value`, `name { ... }` or `Type on name { ... }` entry.
#[derive(Clone, Debug, Default)]
pub struct Property {
    pub name: String,
    /// Location of the property name.
    pub location: LocationSpan,
    pub values: Vec<ValueNode>,
    /// A nested object block (grouped or attached property).
    pub value: Option<ObjectId>,
    /// Values assigned with the `on` syntax (value sources/interceptors).
    pub on_values: Vec<ValueNode>,
}

impl Property {
    pub fn named(name: impl Into<String>, location: LocationSpan) -> Property {
        Property {
            name: name.into(),
            location,
            ..Property::default()
        }
    }
}

/// Type of a declared (dynamic) property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DynamicPropertyType {
    Var,
    Variant,
    Int,
    Bool,
    Real,
    String,
    Url,
    Color,
    Time,
    Date,
    DateTime,
    Rect,
    Alias,
    /// `property SomeType name`
    Custom(String),
    /// `property list<SomeType> name`
    CustomList(String),
}

#[derive(Clone, Debug)]
pub struct DynamicProperty {
    pub property_type: DynamicPropertyType,
    pub name: String,
    pub is_default: bool,
    pub is_read_only: bool,
    pub default_value: Option<Vec<ValueNode>>,
    pub location: LocationSpan,
    pub name_location: Location,
}

#[derive(Clone, Debug)]
pub struct DynamicSignal {
    pub name: String,
    pub parameter_types: Vec<DynamicPropertyType>,
    pub parameter_names: Vec<String>,
    pub location: LocationSpan,
}

#[derive(Clone, Debug)]
pub struct DynamicSlot {
    pub name: String,
    pub parameter_names: Vec<String>,
    pub body: String,
    pub location: LocationSpan,
}

#[derive(Clone, Debug, Default)]
pub struct ObjectNode {
    /// Index into the unit's resolved type table. `None` for synthetic value
    /// objects such as grouped-property blocks.
    pub type_ref: Option<usize>,
    /// The element name as written, for diagnostics.
    pub type_name: String,
    pub location: LocationSpan,
    pub properties: Vec<Property>,
    /// Values not assigned to any named property.
    pub default_property: Option<Property>,
    pub dynamic_properties: Vec<DynamicProperty>,
    pub dynamic_signals: Vec<DynamicSignal>,
    pub dynamic_slots: Vec<DynamicSlot>,
}

/// The whole parsed document: an object arena plus the root index.
#[derive(Clone, Debug, Default)]
pub struct Tree {
    pub objects: Vec<ObjectNode>,
    pub root: ObjectId,
}

impl Tree {
    pub fn object(&self, id: ObjectId) -> &ObjectNode {
        &self.objects[id]
    }

    pub fn add_object(&mut self, node: ObjectNode) -> ObjectId {
        self.objects.push(node);
        self.objects.len() - 1
    }
}
