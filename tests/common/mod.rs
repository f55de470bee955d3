//! Shared fixtures for compiler tests: a small host type system and tree
//! construction helpers standing in for the engine and the parser.

#![allow(dead_code)]

use kite::compiler::ast::*;
use kite::compiler::types::*;
use std::rc::Rc;

pub fn object_meta() -> Rc<MetaObject> {
    Rc::new(MetaObject {
        class_name: "QObject".to_owned(),
        super_class: None,
        properties: vec![MetaProperty::new("objectName", PropertyType::String)],
        signals: Vec::new(),
        enums: Vec::new(),
        default_property: None,
    })
}

pub fn item_meta() -> Rc<MetaObject> {
    let mut read_only = MetaProperty::new("frozen", PropertyType::Int);
    read_only.writable = false;
    Rc::new(MetaObject {
        class_name: "QQuickItem".to_owned(),
        super_class: Some(object_meta()),
        properties: vec![
            MetaProperty::new("x", PropertyType::Double),
            MetaProperty::new("y", PropertyType::Double),
            MetaProperty::new("width", PropertyType::Double),
            MetaProperty::new("height", PropertyType::Double),
            MetaProperty::new("count", PropertyType::Int),
            MetaProperty::new("visible", PropertyType::Bool),
            MetaProperty::new("color", PropertyType::Color),
            MetaProperty::new("name", PropertyType::String),
            MetaProperty::new("pos", PropertyType::PointF),
            MetaProperty::new("data", PropertyType::List("QObject".to_owned())),
            read_only,
        ],
        signals: vec![MetaSignal {
            name: "clicked".to_owned(),
            parameter_names: Vec::new(),
            revision: None,
        }],
        enums: Vec::new(),
        default_property: Some("data".to_owned()),
    })
}

pub fn pointf_meta() -> Rc<MetaObject> {
    Rc::new(MetaObject {
        class_name: "QPointF".to_owned(),
        super_class: None,
        properties: vec![
            MetaProperty::new("x", PropertyType::Double),
            MetaProperty::new("y", PropertyType::Double),
        ],
        signals: Vec::new(),
        enums: Vec::new(),
        default_property: None,
    })
}

pub fn item_type() -> Rc<NativeType> {
    let mut t = NativeType::new("Item", item_meta());
    t.module = "QtQuick".to_owned();
    t.major_version = 2;
    t.create_fn = 0x1000;
    t.create_size = 96;
    Rc::new(t)
}

pub fn component_type() -> Rc<NativeType> {
    let meta = Rc::new(MetaObject {
        class_name: "QQmlComponent".to_owned(),
        super_class: Some(object_meta()),
        properties: Vec::new(),
        signals: Vec::new(),
        enums: Vec::new(),
        default_property: None,
    });
    let mut t = NativeType::new("Component", meta);
    t.is_component = true;
    Rc::new(t)
}

pub fn qt_namespace() -> Rc<NativeType> {
    let meta = Rc::new(MetaObject {
        class_name: "Qt".to_owned(),
        super_class: None,
        properties: Vec::new(),
        signals: Vec::new(),
        enums: vec![MetaEnum {
            name: "Orientation".to_owned(),
            is_flag: false,
            values: vec![
                ("Horizontal".to_owned(), 1),
                ("Vertical".to_owned(), 2),
            ],
        }],
        default_property: None,
    });
    let mut t = NativeType::new("Qt", meta);
    t.creatable = false;
    t.no_creation_reason = "Qt is a namespace".to_owned();
    Rc::new(t)
}

pub fn foo_type() -> Rc<NativeType> {
    let meta = Rc::new(MetaObject {
        class_name: "Foo".to_owned(),
        super_class: Some(object_meta()),
        properties: vec![MetaProperty::new(
            "orientation",
            PropertyType::Enum("Orientation".to_owned()),
        )],
        signals: Vec::new(),
        enums: vec![MetaEnum {
            name: "Orientation".to_owned(),
            is_flag: false,
            values: vec![
                ("Horizontal".to_owned(), 1),
                ("Vertical".to_owned(), 2),
            ],
        }],
        default_property: None,
    });
    Rc::new(NativeType::new("Foo", meta))
}

pub fn view_type() -> Rc<NativeType> {
    let meta = Rc::new(MetaObject {
        class_name: "QQuickView".to_owned(),
        super_class: Some(item_meta()),
        properties: vec![MetaProperty::new("delegate", PropertyType::Component)],
        signals: Vec::new(),
        enums: Vec::new(),
        default_property: None,
    });
    Rc::new(NativeType::new("View", meta))
}

pub fn imports() -> ImportTable {
    let mut imports = ImportTable::new();
    imports.add_type(item_type());
    imports.add_type(component_type());
    imports.add_type(qt_namespace());
    imports.add_type(foo_type());
    imports.add_type(view_type());
    imports.add_value_type(PropertyType::PointF, pointf_meta());
    imports
}

pub fn input(tree: Tree, resolved_types: Vec<TypeReference>) -> CompileInput {
    CompileInput {
        url: "qrc:/Test.qml".to_owned(),
        tree,
        resolved_types,
        imports: imports(),
    }
}

// ----- tree construction -----

pub fn at(line: u32, column: u32) -> LocationSpan {
    LocationSpan::at(line, column)
}

pub fn object_node(type_ref: usize, type_name: &str, line: u32) -> ObjectNode {
    ObjectNode {
        type_ref: Some(type_ref),
        type_name: type_name.to_owned(),
        location: at(line, 1),
        ..ObjectNode::default()
    }
}

pub fn literal_prop(name: &str, value: Variant, line: u32) -> Property {
    let mut p = Property::named(name, at(line, 5));
    p.values.push(ValueNode::new(at(line, 5), value));
    p
}

pub fn script_prop(name: &str, source: &str, path: Option<&[&str]>, line: u32) -> Property {
    literal_prop(
        name,
        Variant::Script {
            source: source.to_owned(),
            path: path.map(|p| p.iter().map(|s| s.to_string()).collect()),
        },
        line,
    )
}

pub fn id_prop(id: &str, line: u32) -> Property {
    script_prop("id", id, Some(&[id]), line)
}

pub fn object_value_prop(name: &str, object: ObjectId, line: u32) -> Property {
    literal_prop(name, Variant::Object(object), line)
}

pub fn default_object(object: ObjectId, line: u32) -> Property {
    let mut p = Property::named("", at(line, 1));
    p.values.push(ValueNode::new(at(line, 1), Variant::Object(object)));
    p
}

pub fn dynamic_int(name: &str, value: f64, line: u32) -> DynamicProperty {
    DynamicProperty {
        property_type: DynamicPropertyType::Int,
        name: name.to_owned(),
        is_default: false,
        is_read_only: false,
        default_value: Some(vec![ValueNode::new(at(line, 20), Variant::Number(value))]),
        location: at(line, 5),
        name_location: Location::new(line, 14),
    }
}

pub fn dynamic_alias(name: &str, target: &[&str], line: u32) -> DynamicProperty {
    DynamicProperty {
        property_type: DynamicPropertyType::Alias,
        name: name.to_owned(),
        is_default: false,
        is_read_only: false,
        default_value: Some(vec![ValueNode::new(
            at(line, 20),
            Variant::Script {
                source: target.join("."),
                path: Some(target.iter().map(|s| s.to_string()).collect()),
            },
        )]),
        location: at(line, 5),
        name_location: Location::new(line, 16),
    }
}
