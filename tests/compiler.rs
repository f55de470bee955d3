//! Object-tree compiler integration tests.

mod common;

use common::*;
use kite::compiler::ast::*;
use kite::compiler::instructions::{BindingTarget, CompiledUnit, Instruction};
use kite::compiler::types::TypeReference;
use kite::compiler::ObjectTreeCompiler;

fn compile(tree: Tree, types: Vec<TypeReference>) -> Result<CompiledUnit, String> {
    let input = input(tree, types);
    let mut out = CompiledUnit::new(input.url.clone());
    let mut compiler = ObjectTreeCompiler::new();
    if compiler.compile(&input, &mut out) {
        Ok(out)
    } else {
        Err(compiler.errors()[0].to_string())
    }
}

fn item_types() -> Vec<TypeReference> {
    vec![TypeReference::Native(item_type())]
}

#[test]
fn empty_item_compiles() {
    let mut tree = Tree::default();
    tree.root = tree.add_object(object_node(0, "Item", 1));
    let unit = compile(tree, item_types()).unwrap();

    assert!(matches!(unit.instructions[0], Instruction::Init { .. }));
    // The root is created as a C++ object, then the unit is finished.
    assert!(unit
        .instructions
        .iter()
        .any(|i| matches!(i, Instruction::CreateCppObject { is_root: true, .. })));
    assert!(matches!(
        &unit.instructions[unit.instructions.len() - 2..],
        [Instruction::SetDefault, Instruction::Done]
    ));
    assert!(unit.root_property_cache.is_some());
}

#[test]
fn literal_stores() {
    let mut tree = Tree::default();
    let mut root = object_node(0, "Item", 1);
    root.properties.push(literal_prop("width", Variant::Number(120.0), 2));
    root.properties.push(literal_prop("count", Variant::Number(3.0), 3));
    root.properties.push(literal_prop("visible", Variant::Boolean(true), 4));
    root.properties
        .push(literal_prop("color", Variant::String("#ff0000".to_owned()), 5));
    root.properties
        .push(literal_prop("name", Variant::String("hello".to_owned()), 6));
    tree.root = tree.add_object(root);

    let unit = compile(tree, item_types()).unwrap();
    let has = |instr: &Instruction| unit.instructions.contains(instr);

    // Property indices are offset by the one QObject property.
    assert!(has(&Instruction::StoreDouble {
        property_index: 3,
        value: 120.0
    }));
    assert!(has(&Instruction::StoreInteger {
        property_index: 5,
        value: 3
    }));
    assert!(has(&Instruction::StoreBool {
        property_index: 6,
        value: true
    }));
    assert!(has(&Instruction::StoreColor {
        property_index: 7,
        value: 0xFFFF0000
    }));
    let name_index = unit.primitives.iter().position(|s| s == "hello").unwrap() as u32;
    assert!(has(&Instruction::StoreString {
        property_index: 8,
        string_index: name_index
    }));
}

#[test]
fn literal_type_mismatches_are_errors() {
    let cases: Vec<(&str, Variant, &str)> = vec![
        ("name", Variant::Number(7.0), "string expected"),
        ("count", Variant::Number(1.5), "int expected"),
        ("visible", Variant::Number(1.0), "boolean expected"),
        ("width", Variant::Boolean(true), "number expected"),
        ("color", Variant::String("no-such-color".to_owned()), "color expected"),
    ];
    for (name, value, expected) in cases {
        let mut tree = Tree::default();
        let mut root = object_node(0, "Item", 1);
        root.properties.push(literal_prop(name, value, 2));
        tree.root = tree.add_object(root);
        let err = compile(tree, item_types()).unwrap_err();
        assert!(
            err.contains(expected),
            "assigning to {}: expected {:?} in {:?}",
            name,
            expected,
            err
        );
    }
}

#[test]
fn read_only_property_rejected() {
    let mut tree = Tree::default();
    let mut root = object_node(0, "Item", 1);
    root.properties.push(literal_prop("frozen", Variant::Number(1.0), 2));
    tree.root = tree.add_object(root);
    let err = compile(tree, item_types()).unwrap_err();
    assert!(err.contains("read-only property"));
}

#[test]
fn nonexistent_property_rejected() {
    let mut tree = Tree::default();
    let mut root = object_node(0, "Item", 1);
    root.properties.push(literal_prop("bogus", Variant::Number(1.0), 2));
    tree.root = tree.add_object(root);
    let err = compile(tree, item_types()).unwrap_err();
    assert!(err.contains("non-existent property"));
}

#[test]
fn duplicate_id_fails_with_location() {
    let mut tree = Tree::default();
    let mut child = object_node(0, "Item", 5);
    child.properties.push(id_prop("foo", 6));
    let child_id = tree.add_object(child);

    let mut root = object_node(0, "Item", 1);
    root.properties.push(id_prop("foo", 2));
    root.default_property = Some(default_object(child_id, 5));
    tree.root = tree.add_object(root);

    let input = input(tree, item_types());
    let mut out = CompiledUnit::new(input.url.clone());
    let mut compiler = ObjectTreeCompiler::new();
    assert!(!compiler.compile(&input, &mut out));
    let e = &compiler.errors()[0];
    assert!(e.description.contains("id is not unique"));
    assert_eq!(e.line, 6);
    // The failed unit is reset.
    assert!(out.instructions.is_empty());
}

#[test]
fn id_validity_rules() {
    for (id, expected) in [
        ("Foo", "IDs cannot start with an uppercase letter"),
        ("9lives", "IDs must start with a letter or underscore"),
        ("has-dash", "IDs must contain only letters, numbers, and underscores"),
        ("function", "ID illegally masks global JavaScript property"),
    ] {
        let mut tree = Tree::default();
        let mut root = object_node(0, "Item", 1);
        root.properties.push(id_prop(id, 2));
        tree.root = tree.add_object(root);
        let err = compile(tree, item_types()).unwrap_err();
        assert!(err.contains(expected), "id {:?}: got {:?}", id, err);
    }
}

/// S5: a component with an alias property.
fn alias_tree() -> Tree {
    let mut tree = Tree::default();

    let mut child = object_node(0, "Item", 4);
    child.properties.push(id_prop("child", 4));
    child.dynamic_properties.push(dynamic_int("x", 7.0, 4));
    let child_id = tree.add_object(child);

    let mut root = object_node(0, "Item", 1);
    root.properties.push(id_prop("root", 2));
    root.dynamic_properties
        .push(dynamic_alias("x", &["child", "x"], 3));
    root.default_property = Some(default_object(child_id, 4));
    tree.root = tree.add_object(root);
    tree
}

#[test]
fn component_with_alias() {
    let unit = compile(alias_tree(), item_types()).unwrap();

    // Two synthesized meta-objects: the root (alias) and the child
    // (declared int property).
    let metas: Vec<&Instruction> = unit
        .instructions
        .iter()
        .filter(|i| matches!(i, Instruction::StoreMetaObject { .. }))
        .collect();
    assert_eq!(metas.len(), 2);

    // The root's meta-object is emitted first; its alias table holds one
    // entry targeting child.x through id index 1.
    let Instruction::StoreMetaObject { alias_data, .. } = metas[0] else {
        unreachable!()
    };
    let alias_blob = &unit.byte_arrays[*alias_data as usize];
    assert_eq!(alias_blob.len(), 12);
    let target_id = u32::from_le_bytes(alias_blob[0..4].try_into().unwrap());
    let encoded = u32::from_le_bytes(alias_blob[4..8].try_into().unwrap());
    assert_eq!(target_id, 1);
    // The aliased property is the child's declared `x`, the first property
    // after the inherited ones; no value-type coordinates are packed.
    assert_eq!(encoded, item_meta().property_count() as u32);

    // The declared default value on the child was stored.
    assert!(unit.instructions.contains(&Instruction::StoreInteger {
        property_index: item_meta().property_count() as u32,
        value: 7
    }));

    // The root property cache flags the alias slot.
    let cache = unit.root_property_cache.as_ref().unwrap();
    let entry = cache.property("x").unwrap();
    assert!(entry.is_alias);
    // Sanity: the inherited x is shadowed by the alias entry; the base
    // slots are not flagged.
    assert!(cache.entries.iter().filter(|e| e.is_alias).count() == 1);
}

/// Recompiling the same tree yields identical meta-data and instructions.
#[test]
fn meta_determinism() {
    let a = compile(alias_tree(), item_types()).unwrap();
    let b = compile(alias_tree(), item_types()).unwrap();
    assert_eq!(a.instructions, b.instructions);
    assert_eq!(a.byte_arrays, b.byte_arrays);
    assert_eq!(a.primitives, b.primitives);
    assert_eq!(a.urls, b.urls);
}

/// S6: a qualified enum assigns as a plain integer store.
#[test]
fn qualified_enum_assignment() {
    let mut tree = Tree::default();
    let mut root = object_node(0, "Foo", 1);
    root.properties.push(script_prop(
        "orientation",
        "Qt.Horizontal",
        Some(&["Qt", "Horizontal"]),
        2,
    ));
    tree.root = tree.add_object(root);

    let unit = compile(tree, vec![TypeReference::Native(foo_type())]).unwrap();
    assert!(unit.instructions.contains(&Instruction::StoreInteger {
        property_index: 1,
        value: 1
    }));
    // No binding fallback was taken.
    assert!(!unit.instructions.iter().any(|i| matches!(
        i,
        Instruction::StoreBinding { .. }
            | Instruction::StoreV4Binding { .. }
            | Instruction::StoreV8Binding { .. }
    )));
    assert!(unit.programs.is_empty());
}

#[test]
fn grouped_value_type_property() {
    let mut tree = Tree::default();
    let mut pos_block = ObjectNode {
        type_ref: None,
        type_name: String::new(),
        location: at(2, 5),
        ..ObjectNode::default()
    };
    pos_block
        .properties
        .push(literal_prop("x", Variant::Number(3.0), 2));
    let pos_id = tree.add_object(pos_block);

    let mut root = object_node(0, "Item", 1);
    let mut pos = Property::named("pos", at(2, 5));
    pos.value = Some(pos_id);
    root.properties.push(pos);
    tree.root = tree.add_object(root);

    let unit = compile(tree, item_types()).unwrap();
    let pos_index = item_meta().property("pos").unwrap().0 as u32;
    assert!(unit.instructions.contains(&Instruction::FetchValueType {
        property_index: pos_index,
        binding_skip_list: 0
    }));
    assert!(unit.instructions.contains(&Instruction::StoreDouble {
        property_index: 0,
        value: 3.0
    }));
    assert!(unit.instructions.contains(&Instruction::PopValueType {
        property_index: pos_index
    }));
}

#[test]
fn signal_handler_is_rewritten() {
    let mut tree = Tree::default();
    let mut root = object_node(0, "Item", 1);
    root.properties
        .push(script_prop("onClicked", "doSomething()", None, 2));
    tree.root = tree.add_object(root);

    let unit = compile(tree, item_types()).unwrap();
    let store = unit
        .instructions
        .iter()
        .find_map(|i| match i {
            Instruction::StoreSignal { value, .. } => Some(*value),
            _ => None,
        })
        .expect("signal handler stored");
    let source = String::from_utf8(unit.byte_arrays[store as usize].clone()).unwrap();
    assert_eq!(source, "(function onClicked() { doSomething() })");
}

#[test]
fn signal_value_must_be_script() {
    let mut tree = Tree::default();
    let mut root = object_node(0, "Item", 1);
    root.properties
        .push(literal_prop("onClicked", Variant::Number(1.0), 2));
    tree.root = tree.add_object(root);
    let err = compile(tree, item_types()).unwrap_err();
    assert!(err.contains("Cannot assign a value to a signal"));
}

#[test]
fn list_properties_take_objects_not_primitives() {
    let mut tree = Tree::default();
    let child = tree.add_object(object_node(0, "Item", 2));
    let mut root = object_node(0, "Item", 1);
    let mut data = Property::named("data", at(2, 3));
    data.values.push(ValueNode::new(at(2, 3), Variant::Object(child)));
    data.values.push(ValueNode::new(at(3, 3), Variant::Number(7.0)));
    root.properties.push(data);
    tree.root = tree.add_object(root);
    let err = compile(tree, item_types()).unwrap_err();
    assert!(err.contains("Cannot assign primitives to lists"));
}

#[test]
fn list_property_emits_fetch_assign_pop() {
    let mut tree = Tree::default();
    let child = tree.add_object(object_node(0, "Item", 2));
    let mut root = object_node(0, "Item", 1);
    root.default_property = Some(default_object(child, 2));
    tree.root = tree.add_object(root);

    let unit = compile(tree, item_types()).unwrap();
    let data_index = item_meta().property("data").unwrap().0 as u32;
    let fetch = unit
        .instructions
        .iter()
        .position(|i| *i == Instruction::FetchQList { property_index: data_index })
        .expect("list fetched");
    let assign = unit.instructions[fetch..]
        .iter()
        .position(|i| matches!(i, Instruction::AssignObjectList { .. }))
        .expect("object assigned to list");
    assert!(unit.instructions[fetch + assign..]
        .iter()
        .any(|i| *i == Instruction::PopQList));
}

/// A bare object assigned to a Component-typed property is wrapped in a
/// synthetic Component whose location mirrors the wrapped object's.
#[test]
fn automatic_component_insertion() {
    let mut tree = Tree::default();
    let delegate = tree.add_object(object_node(1, "Item", 7));
    let mut root = object_node(0, "View", 1);
    root.properties
        .push(object_value_prop("delegate", delegate, 7));
    tree.root = tree.add_object(root);

    let unit = compile(
        tree,
        vec![
            TypeReference::Native(view_type()),
            TypeReference::Native(item_type()),
        ],
    )
    .unwrap();

    let create = unit
        .instructions
        .iter()
        .find(|i| matches!(i, Instruction::CreateComponent { .. }))
        .expect("synthetic component created");
    let Instruction::CreateComponent { line, count, .. } = create else {
        unreachable!()
    };
    assert_eq!(*line, 7);
    assert!(*count > 0);
    // The Component type reference was appended for the wrapper.
    assert!(unit
        .types
        .iter()
        .any(|t| t.native().is_some_and(|n| n.is_component)));
    // The wrapped item is built inside the component body.
    assert!(unit
        .instructions
        .iter()
        .any(|i| matches!(i, Instruction::StoreObject { .. })));
}

#[test]
fn component_rejects_extra_properties() {
    let mut tree = Tree::default();
    let body = tree.add_object(object_node(0, "Item", 3));
    let mut component = object_node(1, "Component", 2);
    component
        .properties
        .push(literal_prop("width", Variant::Number(1.0), 2));
    component.default_property = Some(default_object(body, 3));
    let component_id = tree.add_object(component);

    let mut root = object_node(0, "View", 1);
    root.properties
        .push(object_value_prop("delegate", component_id, 2));
    tree.root = tree.add_object(root);

    let err = compile(
        tree,
        vec![
            TypeReference::Native(view_type()),
            TypeReference::Native(component_type()),
        ],
    )
    .unwrap_err();
    assert!(err.contains("may not contain properties other than id"));
}

#[test]
fn binding_compiles_to_shared_program() {
    let mut tree = Tree::default();
    let mut root = object_node(0, "Item", 1);
    root.properties.push(script_prop(
        "width",
        "parent.width",
        Some(&["parent", "width"]),
        2,
    ));
    tree.root = tree.add_object(root);

    let unit = compile(tree, item_types()).unwrap();
    let width_index = item_meta().property("width").unwrap().0 as u32;
    let store = unit
        .instructions
        .iter()
        .find_map(|i| match i {
            Instruction::StoreV8Binding { target, value, .. } => Some((*target, *value)),
            _ => None,
        })
        .expect("shared-program binding stored");
    assert_eq!(
        store.0,
        BindingTarget {
            property_index: width_index,
            value_type_index: -1,
            owner: 0
        }
    );
    assert_eq!(
        unit.programs[store.1 as usize],
        "(function() { return parent.width })"
    );
}

/// A plain `<id>.<property>` reference with matching types takes the
/// optimized binding path.
#[test]
fn binding_compiles_to_optimized_program() {
    let mut tree = Tree::default();
    let mut other = object_node(0, "Item", 3);
    other.properties.push(id_prop("other", 3));
    let other_id = tree.add_object(other);

    let mut root = object_node(0, "Item", 1);
    root.properties.push(id_prop("root", 1));
    root.properties.push(script_prop(
        "width",
        "other.width",
        Some(&["other", "width"]),
        2,
    ));
    root.default_property = Some(default_object(other_id, 3));
    tree.root = tree.add_object(root);

    let unit = compile(tree, item_types()).unwrap();
    assert!(unit
        .instructions
        .iter()
        .any(|i| matches!(i, Instruction::StoreV4Binding { .. })));
    // The Init instruction carries the compiled-binding program.
    let Instruction::Init {
        compiled_binding, ..
    } = &unit.instructions[0]
    else {
        unreachable!()
    };
    assert!(*compiled_binding >= 0);
}

#[test]
fn deferred_properties_are_wrapped() {
    let mut deferred_item = (*item_type()).clone();
    deferred_item.deferred_property_names = vec!["name".to_owned()];

    let mut tree = Tree::default();
    let mut root = object_node(0, "Item", 1);
    root.properties
        .push(literal_prop("name", Variant::String("late".to_owned()), 2));
    tree.root = tree.add_object(root);

    let unit = compile(
        tree,
        vec![TypeReference::Native(std::rc::Rc::new(deferred_item))],
    )
    .unwrap();

    let defer = unit
        .instructions
        .iter()
        .position(|i| matches!(i, Instruction::Defer { .. }))
        .expect("deferred region emitted");
    let Instruction::Defer { defer_count } = &unit.instructions[defer] else {
        unreachable!()
    };
    // DeferInit, the store, and the region's Done.
    assert_eq!(*defer_count, 3);
    assert!(matches!(
        unit.instructions[defer + 1],
        Instruction::DeferInit { .. }
    ));
}

#[test]
fn non_creatable_type_is_rejected() {
    let mut tree = Tree::default();
    tree.root = tree.add_object(object_node(0, "Qt", 1));
    let err = compile(tree, vec![TypeReference::Native(qt_namespace())]).unwrap_err();
    assert!(err.contains("Qt is a namespace"));
}

#[test]
fn duplicate_declared_property_rejected() {
    let mut tree = Tree::default();
    let mut root = object_node(0, "Item", 1);
    root.dynamic_properties.push(dynamic_int("n", 1.0, 2));
    root.dynamic_properties.push(dynamic_int("n", 2.0, 3));
    tree.root = tree.add_object(root);
    let err = compile(tree, item_types()).unwrap_err();
    assert!(err.contains("Duplicate property name"));
}

#[test]
fn declared_property_names_must_start_lowercase() {
    let mut tree = Tree::default();
    let mut root = object_node(0, "Item", 1);
    root.dynamic_properties.push(dynamic_int("Nope", 1.0, 2));
    tree.root = tree.add_object(root);
    let err = compile(tree, item_types()).unwrap_err();
    assert!(err.contains("cannot begin with an upper case letter"));
}
