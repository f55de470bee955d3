//! The object-tree compiler: validation, meta-object synthesis, and
//! instruction emission.
//!
//! Compilation runs in two phases over each component. The *build* phase
//! walks the tree, resolves every property against its target meta-object,
//! synthesizes extended meta-objects for objects with declared members, and
//! classifies each assignment (literal, object, binding, signal handler,
//! grouped, attached, list, script string). The *gen* phase then emits the
//! instruction stream from the classified data. Ids are numbered in
//! tree-walk order during build; alias properties resolve strictly after the
//! build phase, when every id of the component is known.

use crate::compiler::ast::*;
use crate::compiler::converters;
use crate::compiler::errors::{CompileError, ILLEGAL_NAMES};
use crate::compiler::instructions::*;
use crate::compiler::meta::{
    encode_alias_property, MetaBuilder, StringRef, ALIAS_FLAG_PTR, PROPERTY_RESETTABLE,
    PROPERTY_WRITABLE,
};
use crate::compiler::types::*;
use std::collections::HashMap;
use std::rc::Rc;

type BuildResult<T = ()> = Result<T, CompileError>;

const ID_PROPERTY: &str = "id";

/// Is `name` an attached-property namespace use (`GridView.row: ...`)?
fn is_attached_property_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

/// Is `name` a signal-handler property (`onClicked: ...`)?
fn is_signal_property_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next() == Some('o')
        && chars.next() == Some('n')
        && chars.next().is_some_and(|c| c.is_ascii_uppercase())
}

/// `onFooBar` -> `fooBar`: strip the prefix and lower-case the first
/// alphabetic character.
fn signal_name_from_handler(handler: &str) -> String {
    let mut name: Vec<char> = handler.chars().skip(2).collect();
    for c in name.iter_mut() {
        if c.is_alphabetic() {
            *c = c.to_ascii_lowercase();
            break;
        }
    }
    name.into_iter().collect()
}

/// Binding context: how many object scopes deep the expression sits.
#[derive(Copy, Clone, Debug, Default)]
struct BindingContext {
    stack: u32,
    is_sub_context: bool,
}

impl BindingContext {
    fn incr(self) -> BindingContext {
        BindingContext {
            stack: self.stack + 1,
            is_sub_context: true,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct DepthTracker {
    current: u32,
    max: u32,
}

impl DepthTracker {
    fn push(&mut self) {
        self.current += 1;
        self.max = self.max.max(self.current);
    }

    fn pop(&mut self) {
        debug_assert!(self.current > 0);
        self.current -= 1;
    }

    /// Account for a nested component's own depth without keeping it.
    fn push_pop(&mut self, depth: u32) {
        self.max = self.max.max(self.current + depth);
    }
}

/// How a classified binding will be stored.
#[derive(Clone, Debug)]
enum BindingKind {
    /// Optimized: an entry in the unit's compiled-binding program.
    V4 { index: u32 },
    /// A function in the shared binding program.
    V8 { index: u32 },
    /// A per-binding script, stored as source.
    Script { byte_array: u32 },
}

#[derive(Clone, Debug)]
struct BindingReference {
    location: LocationSpan,
    source: String,
    path: Option<Vec<String>>,
    target: BindingTarget,
    /// Property type of the binding target, for the optimizer.
    target_type: PropertyType,
    context_stack: u32,
    kind: Option<BindingKind>,
}

#[derive(Clone, Debug, Default)]
struct ComponentCompileState {
    root: ObjectId,
    nested: bool,
    ids: Vec<ObjectId>,
    id_names: HashMap<String, ObjectId>,
    object_depth: DepthTracker,
    list_depth: DepthTracker,
    parser_status_count: u32,
    total_bindings_count: u32,
    aliasing_objects: Vec<ObjectId>,
    bindings: Vec<BindingReference>,
    compiled_binding_data: Vec<u8>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ValueKind {
    Literal,
    CreatedObject,
    PropertyBinding,
    SignalObject,
    SignalExpression,
    ValueSource,
    ValueInterceptor,
    TrString,
    TrIdString,
}

#[derive(Clone, Debug)]
struct BuiltValue {
    kind: ValueKind,
    variant: Variant,
    location: LocationSpan,
    object: Option<ObjectId>,
    binding: Option<usize>,
    context_stack: u32,
}

#[derive(Clone, Debug)]
struct BuiltProperty {
    name: String,
    location: LocationSpan,
    index: u32,
    property_type: PropertyType,
    writable: bool,
    resettable: bool,
    is_read_only_declaration: bool,
    is_deferred: bool,
    is_alias: bool,
    values: Vec<BuiltValue>,
    on_values: Vec<BuiltValue>,
    value_object: Option<ObjectId>,
    scope_depth: u32,
}

impl BuiltProperty {
    fn resolved(name: &str, location: LocationSpan, index: usize, meta: &MetaProperty) -> Self {
        BuiltProperty {
            name: name.to_owned(),
            location,
            index: index as u32,
            property_type: meta.property_type.clone(),
            writable: meta.writable,
            resettable: meta.resettable,
            is_read_only_declaration: false,
            is_deferred: false,
            is_alias: false,
            values: Vec::new(),
            on_values: Vec::new(),
            value_object: None,
            scope_depth: 0,
        }
    }
}

/// Everything the compiler learns about one object node.
#[derive(Clone, Default)]
struct ObjectData {
    /// The meta-object instances are built from: the type's own, or the
    /// synthesized extension when the object declares members.
    meta: Option<Rc<MetaObject>>,
    /// The unextended meta-object of the object's type.
    base_meta: Option<Rc<MetaObject>>,
    /// Serialized alias table, stored next to the meta-descriptor.
    alias_metadata: Vec<u8>,
    id: Option<String>,
    id_index: u32,
    /// Packed meta-descriptor, empty when nothing was synthesized.
    metadata: Vec<u8>,
    synth_cache: Option<PropertyCache>,
    parser_status_cast: i32,
    binding_bitmask: Vec<u8>,
    alias_count: usize,
    value_properties: Vec<BuiltProperty>,
    list_properties: Vec<BuiltProperty>,
    signal_properties: Vec<BuiltProperty>,
    attached_properties: Vec<BuiltProperty>,
    grouped_properties: Vec<BuiltProperty>,
    value_type_properties: Vec<BuiltProperty>,
    script_string_properties: Vec<BuiltProperty>,
    /// For `Component` elements: the nested component's compile state.
    component_state: Option<Box<ComponentCompileState>>,
}

/// Compiles parsed object trees into [`CompiledUnit`]s.
#[derive(Default)]
pub struct ObjectTreeCompiler {
    errors: Vec<CompileError>,
}

impl ObjectTreeCompiler {
    pub fn new() -> Self {
        ObjectTreeCompiler::default()
    }

    /// Compile `input` into `output`. Returns false on failure, in which
    /// case the unit is reset and the errors are available from
    /// [`Self::errors`].
    pub fn compile(&mut self, input: &CompileInput, output: &mut CompiledUnit) -> bool {
        self.errors.clear();
        output.reset();
        output.types = input.resolved_types.clone();

        let mut session = Compilation {
            input,
            output,
            object_data: vec![ObjectData::default(); input.tree.objects.len()],
            synthetic_objects: Vec::new(),
            state: ComponentCompileState::default(),
            component_type_ref: None,
            class_counter: 0,
        };

        let result = session
            .check_types()
            .and_then(|_| session.compile_tree());

        if let Err(e) = result {
            self.errors.push(e);
            output.reset();
            return false;
        }
        true
    }

    pub fn is_error(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }
}

struct Compilation<'a> {
    input: &'a CompileInput,
    output: &'a mut CompiledUnit,
    object_data: Vec<ObjectData>,
    /// Nodes synthesized during compilation (automatic Component wrappers);
    /// their ids continue past the input tree's.
    synthetic_objects: Vec<ObjectNode>,
    state: ComponentCompileState,
    component_type_ref: Option<usize>,
    class_counter: u32,
}

impl<'a> Compilation<'a> {
    fn error(&self, location: LocationSpan, message: impl Into<String>) -> CompileError {
        CompileError::new(&self.input.url, location.start, message)
    }

    fn tree(&self) -> &'a Tree {
        &self.input.tree
    }

    fn node(&self, obj: ObjectId) -> &ObjectNode {
        let n = self.input.tree.objects.len();
        if obj < n {
            &self.input.tree.objects[obj]
        } else {
            &self.synthetic_objects[obj - n]
        }
    }

    // Type lookups go through the output table: it starts as a copy of the
    // input's resolved types and grows when a synthetic Component wrapper
    // needs the Component type appended.
    fn type_reference(&self, obj: ObjectId) -> BuildResult<&TypeReference> {
        let node = self.node(obj);
        let type_ref = node.type_ref.ok_or_else(|| {
            self.error(node.location, format!("{} is not a type", node.type_name))
        })?;
        Ok(&self.output.types[type_ref])
    }

    fn native_type(&self, obj: ObjectId) -> Option<Rc<NativeType>> {
        let node = self.node(obj);
        node.type_ref
            .and_then(|t| self.output.types[t].native().cloned())
    }

    fn meta(&self, obj: ObjectId) -> Rc<MetaObject> {
        self.object_data[obj]
            .meta
            .clone()
            .expect("object meta resolved during build")
    }

    // ----- type resolution -----

    /// Per-unit type validation: every referenced native type must be
    /// creatable.
    fn check_types(&mut self) -> BuildResult {
        for (index, t) in self.input.resolved_types.iter().enumerate() {
            let Some(native) = t.native() else { continue };
            if !native.creatable {
                let location = self.first_use_of(index);
                let reason = if native.no_creation_reason.is_empty() {
                    "Element is not creatable.".to_owned()
                } else {
                    native.no_creation_reason.clone()
                };
                return Err(self.error(location, reason));
            }
        }
        Ok(())
    }

    fn first_use_of(&self, type_index: usize) -> LocationSpan {
        self.tree()
            .objects
            .iter()
            .find(|o| o.type_ref == Some(type_index))
            .map_or_else(LocationSpan::default, |o| o.location)
    }

    // ----- top level -----

    fn compile_tree(&mut self) -> BuildResult {
        let root = self.tree().root;
        self.state = ComponentCompileState {
            root,
            ..ComponentCompileState::default()
        };

        self.build_object(root, BindingContext::default())?;
        self.complete_component_build()?;

        let init = Instruction::Init {
            bindings_count: self.state.total_bindings_count,
            parser_status_count: self.state.parser_status_count,
            object_stack_depth: self.state.object_depth.max,
            list_stack_depth: self.state.list_depth.max,
            compiled_binding: if self.state.compiled_binding_data.is_empty() {
                -1
            } else {
                let data = std::mem::take(&mut self.state.compiled_binding_data);
                self.output.index_for_byte_array(data) as i32
            },
        };
        self.output.add_instruction(init);

        self.gen_object(root);

        self.output.add_instruction(Instruction::SetDefault);
        self.output.add_instruction(Instruction::Done);

        self.output.root_meta = self.meta(root);
        if self.output.root_property_cache.is_none() {
            // genObject installs the root cache for synthesized roots; plain
            // roots fall back to the static meta-object.
            let cache = PropertyCache::from_meta(&self.meta(root));
            self.output.root_property_cache = Some(Rc::new(cache));
        }
        Ok(())
    }

    // ----- build phase -----

    fn build_object(&mut self, obj: ObjectId, ctxt: BindingContext) -> BuildResult {
        let tr = self.type_reference(obj)?.clone();
        self.object_data[obj].meta = Some(tr.meta());
        self.object_data[obj].base_meta = Some(tr.meta());

        // The "Component" pseudo-element compiles its body as a separate
        // component.
        if tr.native().is_some_and(|t| t.is_component) {
            return self.build_component(obj, ctxt);
        }

        if let Some(unit) = tr.composite() {
            // Adjust stack depths to include nested components.
            if let Some(Instruction::Init {
                bindings_count,
                parser_status_count,
                object_stack_depth,
                list_stack_depth,
                ..
            }) = unit.init_instruction()
            {
                self.state.object_depth.push_pop(*object_stack_depth);
                self.state.list_depth.push_pop(*list_stack_depth);
                self.state.parser_status_count += parser_status_count;
                self.state.total_bindings_count += bindings_count;
            }
        }

        self.state.object_depth.push();

        // Object instantiations reset the binding context.
        let obj_ctxt = BindingContext::default();

        // Create the synthesized meta object, ignoring aliases.
        self.check_dynamic_meta(obj)?;
        self.build_dynamic_meta(obj, false)?;

        if let Some(native) = tr.native() {
            self.object_data[obj].parser_status_cast = native.parser_status_cast;
            if native.parser_status_cast != -1 {
                self.state.parser_status_count += 1;
            }
        }

        let deferred_names = self
            .native_type(obj)
            .map(|t| t.deferred_property_names.clone())
            .unwrap_or_default();

        // The id property must be built first so id indices follow
        // instantiation order.
        let id_prop = self
            .node(obj)
            .properties
            .iter()
            .find(|p| p.name == ID_PROPERTY)
            .cloned();
        if let Some(prop) = id_prop {
            self.build_property(obj, &prop, obj_ctxt)?;
        }

        let (properties, default_property) = self.merge_dynamic_defaults(obj)?;

        for prop in &properties {
            if prop.name == ID_PROPERTY {
                continue;
            }
            let ids_before = self.state.ids.len();
            if is_signal_property_name(&prop.name) {
                self.build_signal(obj, prop, obj_ctxt)?;
            } else {
                self.build_property(obj, prop, obj_ctxt)?;
            }
            let can_defer = ids_before == self.state.ids.len();
            if can_defer && deferred_names.iter().any(|d| *d == prop.name) {
                self.mark_deferred(obj, &prop.name);
            }
        }

        if let Some(prop) = default_property {
            let ids_before = self.state.ids.len();
            self.build_property(obj, &prop, obj_ctxt)?;
            let can_defer = ids_before == self.state.ids.len();
            if can_defer && deferred_names.iter().any(|d| *d == prop.name) {
                self.mark_deferred(obj, &prop.name);
            }
        }

        self.state.object_depth.pop();
        Ok(())
    }

    /// Merge declared-property default values into the property list, and
    /// resolve the default property's real name from the type's
    /// default-property class info.
    fn merge_dynamic_defaults(
        &mut self,
        obj: ObjectId,
    ) -> BuildResult<(Vec<Property>, Option<Property>)> {
        let node = self.node(obj);
        let mut properties = node.properties.clone();
        let mut default_property = node.default_property.clone();

        // An explicit assignment to the type's default property merges into
        // the collected default values, ordered by source location.
        if let Some(def) = &mut default_property {
            if let Some(name) = self.meta(obj).default_property_name() {
                let name = name.to_owned();
                if let Some(pos) = properties.iter().position(|p| p.name == name) {
                    let explicit = properties.remove(pos);
                    if explicit.value.is_none() && !explicit.values.is_empty() {
                        let mut merged = def.values.clone();
                        let insert_at = merged
                            .iter()
                            .position(|v| {
                                explicit.values[0].location.start < v.location.start
                            })
                            .unwrap_or(merged.len());
                        merged.splice(insert_at..insert_at, explicit.values);
                        def.values = merged;
                    } else {
                        properties.insert(pos, explicit);
                    }
                } else {
                    def.name = name;
                }
            }
        }

        // Declared properties with inline default values become ordinary
        // assignments to the declared property.
        for p in &node.dynamic_properties {
            let Some(values) = &p.default_value else { continue };
            if p.property_type == DynamicPropertyType::Alias {
                continue;
            }
            if p.is_default {
                let def = default_property.get_or_insert_with(|| {
                    Property::named(p.name.clone(), p.location)
                });
                def.values.extend(values.iter().cloned());
                continue;
            }
            if let Some(existing) = properties.iter_mut().find(|e| e.name == p.name) {
                if !existing.values.is_empty() {
                    return Err(
                        self.error(existing.location, "Property value set multiple times")
                    );
                }
                if existing.value.is_some() {
                    return Err(self.error(existing.location, "Invalid property nesting"));
                }
                existing.values.extend(values.iter().cloned());
            } else {
                let mut prop = Property::named(p.name.clone(), p.location);
                prop.values = values.clone();
                properties.push(prop);
            }
        }

        Ok((properties, default_property))
    }

    fn mark_deferred(&mut self, obj: ObjectId, name: &str) {
        for p in self.object_data[obj].value_properties.iter_mut() {
            if p.name == name {
                p.is_deferred = true;
            }
        }
    }

    // ----- Component elements -----

    fn build_component(&mut self, obj: ObjectId, ctxt: BindingContext) -> BuildResult {
        // The special "Component" element can only have the id property and
        // a default property that defines the component's tree.
        self.state.object_depth.push();

        let node = self.node(obj).clone();
        let node = &node;
        let mut id_prop = None;
        for prop in &node.properties {
            if prop.name != ID_PROPERTY {
                return Err(self.error(
                    prop.location,
                    "Component elements may not contain properties other than id",
                ));
            }
            id_prop = Some(prop);
        }

        if let Some(prop) = id_prop {
            if prop.value.is_some()
                || prop.values.len() != 1
                || prop.values[0].value.object().is_some()
            {
                return Err(self.error(prop.location, "Invalid component id specification"));
            }
            let val = match &prop.values[0].value {
                Variant::String(s) => s.clone(),
                Variant::Script { source, .. } => source.clone(),
                _ => {
                    return Err(
                        self.error(prop.location, "Invalid component id specification")
                    )
                }
            };
            self.check_valid_id(prop.values[0].location, &val)?;
            if self.state.id_names.contains_key(&val) {
                return Err(self.error(prop.location, "id is not unique"));
            }
            self.add_id(val, obj);
        }

        if !node.dynamic_properties.is_empty() {
            return Err(self.error(
                node.location,
                "Component objects cannot declare new properties.",
            ));
        }
        if !node.dynamic_signals.is_empty() {
            return Err(self.error(
                node.location,
                "Component objects cannot declare new signals.",
            ));
        }
        if !node.dynamic_slots.is_empty() {
            return Err(self.error(
                node.location,
                "Component objects cannot declare new functions.",
            ));
        }

        let root = match &node.default_property {
            Some(def) if def.value.is_none() && def.values.len() == 1 => {
                def.values[0].value.object()
            }
            Some(def) => {
                return Err(self.error(
                    def.location,
                    "Invalid component body specification",
                ))
            }
            None => None,
        };
        let Some(root) = root else {
            return Err(self.error(node.location, "Cannot create empty component specification"));
        };

        self.build_component_from_root(obj, root, ctxt)?;
        self.state.object_depth.pop();
        Ok(())
    }

    fn build_component_from_root(
        &mut self,
        component: ObjectId,
        root: ObjectId,
        ctxt: BindingContext,
    ) -> BuildResult {
        let outer = std::mem::take(&mut self.state);
        self.state = ComponentCompileState {
            root,
            nested: true,
            ..ComponentCompileState::default()
        };

        let result = self
            .build_object(root, ctxt)
            .and_then(|_| self.complete_component_build());

        let inner = std::mem::replace(&mut self.state, outer);
        self.object_data[component].component_state = Some(Box::new(inner));
        result
    }

    /// A sub-object: a grouped or attached property block. No ids, no new
    /// declarations; only property assignments and signal handlers.
    fn build_sub_object(&mut self, obj: ObjectId, ctxt: BindingContext) -> BuildResult {
        debug_assert!(ctxt.is_sub_context);
        let properties = self.node(obj).properties.clone();
        for prop in &properties {
            if prop.name == ID_PROPERTY {
                return Err(self.error(
                    prop.location,
                    "id is not allowed in this context",
                ));
            }
            if is_signal_property_name(&prop.name) {
                self.build_signal(obj, prop, ctxt)?;
            } else {
                self.build_property(obj, prop, ctxt)?;
            }
        }
        Ok(())
    }

    // ----- signal handlers -----

    fn build_signal(&mut self, obj: ObjectId, prop: &Property, ctxt: BindingContext) -> BuildResult {
        let name = signal_name_from_handler(&prop.name);
        let meta = self.meta(obj);

        let Some((signal_index, signal)) = meta.signal(&name) else {
            // If the "on<Signal>" name doesn't resolve into a signal, try it
            // as a property.
            return self.build_property(obj, prop, ctxt);
        };
        let parameter_names = signal.parameter_names.clone();

        if prop.value.is_some() || prop.values.len() != 1 {
            return Err(self.error(prop.location, "Incorrectly specified signal assignment"));
        }

        let mut built = BuiltProperty {
            name: name.clone(),
            location: prop.location,
            index: signal_index as u32,
            property_type: PropertyType::Variant,
            writable: false,
            resettable: false,
            is_read_only_declaration: false,
            is_deferred: false,
            is_alias: false,
            values: Vec::new(),
            on_values: Vec::new(),
            value_object: None,
            scope_depth: ctxt.stack,
        };

        let v = &prop.values[0];
        if let Some(o) = v.value.object() {
            self.build_object(o, ctxt)?;
            built.values.push(BuiltValue {
                kind: ValueKind::SignalObject,
                variant: v.value.clone(),
                location: v.location,
                object: Some(o),
                binding: None,
                context_stack: ctxt.stack,
            });
        } else {
            let Variant::Script { source, .. } = &v.value else {
                return Err(self.error(
                    v.location,
                    "Cannot assign a value to a signal (expecting a script to be run)",
                ));
            };
            if source.trim().is_empty() {
                return Err(self.error(v.location, "Empty signal assignment"));
            }
            // Rewrite the handler into a named function expression carrying
            // the signal parameters.
            let rewritten = format!(
                "(function {}({}) {{ {} }})",
                prop.name,
                parameter_names.join(", "),
                source
            );
            built.values.push(BuiltValue {
                kind: ValueKind::SignalExpression,
                variant: Variant::String(rewritten),
                location: v.location,
                object: None,
                binding: None,
                context_stack: ctxt.stack,
            });
        }

        self.object_data[obj].signal_properties.push(built);
        Ok(())
    }

    // ----- property dispatch -----

    fn build_property(&mut self, obj: ObjectId, prop: &Property, ctxt: BindingContext) -> BuildResult {
        if prop.name == ID_PROPERTY {
            if ctxt.is_sub_context {
                return Err(self.error(prop.location, "id is not allowed in this context"));
            }
            return self.build_id_property(obj, prop);
        }

        if is_attached_property_name(&prop.name) {
            return self.build_attached_property(obj, prop, ctxt);
        }

        let meta = self.meta(obj);
        let Some((index, meta_prop)) = meta.property(&prop.name) else {
            return Err(self.error(
                prop.location,
                format!("Cannot assign to non-existent property \"{}\"", prop.name),
            ));
        };
        if !meta_prop.scriptable {
            return Err(self.error(
                prop.location,
                format!("Cannot assign to non-scriptable property \"{}\"", prop.name),
            ));
        }

        // Revisioned properties are invisible below the imported minor
        // version.
        if let (Some(revision), Some(native)) = (meta_prop.revision, self.native_type(obj)) {
            if revision > native.minor_version {
                return Err(self.error(
                    prop.location,
                    format!(
                        "\"{}.{}\" is not available in {} {}.{}.",
                        self.node(obj).type_name,
                        prop.name,
                        native.module,
                        native.major_version,
                        native.minor_version
                    ),
                ));
            }
        }

        let mut built = BuiltProperty::resolved(&prop.name, prop.location, index, meta_prop);
        built.is_alias = self.is_declared_alias(obj, &prop.name);

        if prop.value.is_some() {
            return self.build_grouped_property(obj, prop, built, ctxt);
        }

        if built.property_type == PropertyType::ScriptString {
            return self.build_script_string_property(obj, prop, built, ctxt);
        }

        if built.property_type.is_list() {
            return self.build_list_property(obj, prop, built, ctxt);
        }

        self.build_property_assignment(obj, prop, built, ctxt)
    }

    fn is_declared_alias(&self, obj: ObjectId, name: &str) -> bool {
        self.node(obj)
            .dynamic_properties
            .iter()
            .any(|p| p.property_type == DynamicPropertyType::Alias && p.name == name)
    }

    // ----- id -----

    fn build_id_property(&mut self, obj: ObjectId, prop: &Property) -> BuildResult {
        if prop.value.is_some()
            || prop.values.len() != 1
            || prop.values[0].value.object().is_some()
        {
            return Err(self.error(prop.location, "Invalid use of id property"));
        }

        let id_value = &prop.values[0];
        let val = match &id_value.value {
            Variant::String(s) => s.clone(),
            Variant::Script { source, .. } => source.clone(),
            _ => return Err(self.error(id_value.location, "Invalid use of id property")),
        };

        self.check_valid_id(id_value.location, &val)?;

        if self.state.id_names.contains_key(&val) {
            return Err(self.error(prop.location, "id is not unique"));
        }

        self.add_id(val, obj);
        Ok(())
    }

    fn add_id(&mut self, id: String, obj: ObjectId) {
        debug_assert!(!self.state.id_names.contains_key(&id));
        self.object_data[obj].id = Some(id.clone());
        self.object_data[obj].id_index = self.state.ids.len() as u32;
        self.state.id_names.insert(id, obj);
        self.state.ids.push(obj);
    }

    fn check_valid_id(&self, location: LocationSpan, val: &str) -> BuildResult {
        if val.is_empty() {
            return Err(self.error(location, "Invalid empty ID"));
        }

        let first = val.chars().next().unwrap();
        if first.is_alphabetic() && !first.is_lowercase() {
            return Err(self.error(location, "IDs cannot start with an uppercase letter"));
        }
        if !first.is_alphabetic() && first != '_' {
            return Err(self.error(location, "IDs must start with a letter or underscore"));
        }
        for c in val.chars().skip(1) {
            if !c.is_alphanumeric() && c != '_' {
                return Err(self.error(
                    location,
                    "IDs must contain only letters, numbers, and underscores",
                ));
            }
        }

        if ILLEGAL_NAMES.contains(val) {
            return Err(self.error(location, "ID illegally masks global JavaScript property"));
        }
        Ok(())
    }

    // ----- attached, grouped, value-type -----

    fn build_attached_property(
        &mut self,
        obj: ObjectId,
        prop: &Property,
        ctxt: BindingContext,
    ) -> BuildResult {
        let Some(value) = prop.value else {
            return Err(self.error(prop.location, "Invalid attached object assignment"));
        };
        let Some(attached_type) = self.input.imports.resolve_type(&prop.name).cloned() else {
            return Err(self.error(
                prop.location,
                format!("Non-existent attached object \"{}\"", prop.name),
            ));
        };
        let Some(attached_meta) = attached_type.attached_meta.clone() else {
            return Err(self.error(prop.location, "Invalid attached object assignment"));
        };

        self.state.object_depth.push();
        self.object_data[value].meta = Some(attached_meta);
        self.build_sub_object(value, ctxt.incr())?;
        self.state.object_depth.pop();

        self.object_data[obj].attached_properties.push(BuiltProperty {
            name: prop.name.clone(),
            location: prop.location,
            index: attached_type.attached_id as u32,
            property_type: PropertyType::Variant,
            writable: false,
            resettable: false,
            is_read_only_declaration: false,
            is_deferred: false,
            is_alias: false,
            values: Vec::new(),
            on_values: Vec::new(),
            value_object: Some(value),
            scope_depth: ctxt.stack,
        });
        Ok(())
    }

    fn build_grouped_property(
        &mut self,
        obj: ObjectId,
        prop: &Property,
        mut built: BuiltProperty,
        ctxt: BindingContext,
    ) -> BuildResult {
        let value = prop.value.expect("grouped property has a value object");

        if built.property_type.is_value_type() {
            let Some(vt_meta) = self
                .input
                .imports
                .value_type_meta(&built.property_type)
                .cloned()
            else {
                return Err(self.error(prop.location, "Invalid grouped property access"));
            };

            if !prop.values.is_empty() {
                return Err(self.error(
                    prop.values[0].location,
                    "Property has already been assigned a value",
                ));
            }
            if !built.writable && !built.is_read_only_declaration {
                return Err(self.error(
                    prop.location,
                    format!(
                        "Invalid property assignment: \"{}\" is a read-only property",
                        prop.name
                    ),
                ));
            }

            self.object_data[value].meta = Some(vt_meta);
            self.build_value_type_sub_object(value, built.is_alias, ctxt.incr())?;
            built.value_object = Some(value);
            self.object_data[obj].value_type_properties.push(built);
            return Ok(());
        }

        // An object grouped property: the nested block configures the
        // existing object held by the property.
        let PropertyType::Object(class) = &built.property_type else {
            return Err(self.error(prop.location, "Invalid grouped property access"));
        };
        let Some(group_meta) = self.meta_for_class(class) else {
            return Err(self.error(prop.location, "Invalid grouped property access"));
        };
        if !prop.values.is_empty() {
            return Err(self.error(
                prop.values[0].location,
                "Cannot assign a value directly to a grouped property",
            ));
        }

        self.object_data[value].meta = Some(group_meta);
        self.state.object_depth.push();
        self.build_sub_object(value, ctxt.incr())?;
        self.state.object_depth.pop();

        built.value_object = Some(value);
        self.object_data[obj].grouped_properties.push(built);
        Ok(())
    }

    fn meta_for_class(&self, class: &str) -> Option<Rc<MetaObject>> {
        self.input
            .resolved_types
            .iter()
            .filter_map(|t| t.native())
            .find(|t| t.meta.inherits(class))
            .map(|t| t.meta.clone())
    }

    /// Sub-properties of a value-type grouped block. They resolve against
    /// the value type's meta and are emitted between fetch/pop.
    fn build_value_type_sub_object(
        &mut self,
        obj: ObjectId,
        is_alias: bool,
        ctxt: BindingContext,
    ) -> BuildResult {
        let properties = self.node(obj).properties.clone();
        for prop in &properties {
            if prop.name == ID_PROPERTY {
                return Err(self.error(prop.location, "id is not allowed in this context"));
            }
            let meta = self.meta(obj);
            let Some((index, meta_prop)) = meta.property(&prop.name) else {
                return Err(self.error(
                    prop.location,
                    format!("Cannot assign to non-existent property \"{}\"", prop.name),
                ));
            };
            if prop.value.is_some() {
                return Err(self.error(prop.location, "Invalid grouped property access"));
            }
            let mut built = BuiltProperty::resolved(&prop.name, prop.location, index, meta_prop);
            built.is_alias = is_alias;
            self.build_property_assignment(obj, prop, built, ctxt)?;
        }
        Ok(())
    }

    // ----- lists, script strings -----

    fn build_list_property(
        &mut self,
        obj: ObjectId,
        prop: &Property,
        mut built: BuiltProperty,
        ctxt: BindingContext,
    ) -> BuildResult {
        self.state.list_depth.push();

        for v in &prop.values {
            match &v.value {
                Variant::Object(o) => {
                    self.build_object(*o, ctxt)?;
                    built.values.push(BuiltValue {
                        kind: ValueKind::CreatedObject,
                        variant: v.value.clone(),
                        location: v.location,
                        object: Some(*o),
                        binding: None,
                        context_stack: ctxt.stack,
                    });
                }
                Variant::Script { source, path } => {
                    // A single binding is allowed for the whole list.
                    if prop.values.len() != 1 {
                        return Err(self.error(
                            v.location,
                            "Can only assign one binding to lists",
                        ));
                    }
                    let binding = self.add_binding_reference(
                        v.location,
                        source.clone(),
                        path.clone(),
                        BindingTarget {
                            property_index: built.index,
                            value_type_index: -1,
                            owner: 0,
                        },
                        built.property_type.clone(),
                        ctxt,
                    );
                    built.values.push(BuiltValue {
                        kind: ValueKind::PropertyBinding,
                        variant: v.value.clone(),
                        location: v.location,
                        object: None,
                        binding: Some(binding),
                        context_stack: ctxt.stack,
                    });
                }
                _ => {
                    return Err(self.error(
                        v.location,
                        "Cannot assign primitives to lists",
                    ));
                }
            }
        }

        self.state.list_depth.pop();
        self.object_data[obj].list_properties.push(built);
        Ok(())
    }

    fn build_script_string_property(
        &mut self,
        obj: ObjectId,
        prop: &Property,
        mut built: BuiltProperty,
        ctxt: BindingContext,
    ) -> BuildResult {
        if prop.values.len() != 1 {
            return Err(self.error(prop.location, "Invalid property assignment: script expected"));
        }
        let v = &prop.values[0];
        let source = match &v.value {
            Variant::Script { source, .. } => source.clone(),
            Variant::String(s) => s.clone(),
            Variant::Number(n) => n.to_string(),
            Variant::Boolean(b) => b.to_string(),
            Variant::Object(_) => {
                return Err(self.error(v.location, "Invalid property assignment: script expected"))
            }
        };
        built.scope_depth = ctxt.stack;
        built.values.push(BuiltValue {
            kind: ValueKind::Literal,
            variant: Variant::String(source),
            location: v.location,
            object: None,
            binding: None,
            context_stack: ctxt.stack,
        });
        self.object_data[obj].script_string_properties.push(built);
        Ok(())
    }

    // ----- plain assignments -----

    fn build_property_assignment(
        &mut self,
        obj: ObjectId,
        prop: &Property,
        mut built: BuiltProperty,
        ctxt: BindingContext,
    ) -> BuildResult {
        if prop.values.len() > 1 {
            return Err(self.error(prop.location, "Property value set multiple times"));
        }

        for v in &prop.values {
            if let Some(o) = v.value.object() {
                self.build_property_object_assignment(obj, &mut built, v, o, ctxt)?;
            } else {
                self.build_property_literal_assignment(obj, &mut built, v, ctxt)?;
            }
        }

        for v in &prop.on_values {
            let Some(o) = v.value.object() else {
                return Err(self.error(v.location, "Invalid on-assignment"));
            };
            self.build_property_on_assignment(obj, &mut built, v, o, ctxt)?;
        }

        let bucket = &mut self.object_data[obj];
        if built.property_type.is_list() {
            bucket.list_properties.push(built);
        } else {
            bucket.value_properties.push(built);
        }
        Ok(())
    }

    fn build_property_object_assignment(
        &mut self,
        obj: ObjectId,
        built: &mut BuiltProperty,
        v: &ValueNode,
        o: ObjectId,
        ctxt: BindingContext,
    ) -> BuildResult {
        if !built.writable && !built.is_read_only_declaration {
            return Err(self.error(
                v.location,
                format!(
                    "Invalid property assignment: \"{}\" is a read-only property",
                    built.name
                ),
            ));
        }

        let assignable = match &built.property_type {
            PropertyType::Interface(interface) => self
                .native_type(o)
                .is_some_and(|t| t.interfaces.iter().any(|i| i == interface)),
            PropertyType::Variant => true,
            PropertyType::Object(class) => {
                let target_meta = self.type_reference(o)?.meta();
                target_meta.inherits(class)
            }
            PropertyType::Component => {
                // Components assign directly; everything else is wrapped
                // below.
                self.type_reference(o)?
                    .native()
                    .is_some_and(|t| t.is_component)
            }
            _ => {
                return Err(self.error(v.location, "Cannot assign object to property"));
            }
        };

        if assignable {
            self.build_object(o, ctxt)?;
            built.values.push(BuiltValue {
                kind: ValueKind::CreatedObject,
                variant: v.value.clone(),
                location: v.location,
                object: Some(o),
                binding: None,
                context_stack: ctxt.stack,
            });
            return Ok(());
        }

        if built.property_type == PropertyType::Component {
            // Automatic "Component" insertion: wrap the object in a
            // synthetic Component element mirroring its location, so error
            // messages keep pointing at the wrapped object.
            let component = self.synthesize_component(o)?;
            self.build_object(component, ctxt)?;
            built.values.push(BuiltValue {
                kind: ValueKind::CreatedObject,
                variant: Variant::Object(component),
                location: v.location,
                object: Some(component),
                binding: None,
                context_stack: ctxt.stack,
            });
            return Ok(());
        }

        Err(self.error(v.location, "Cannot assign object to property"))
    }

    /// Wrap `root` into a synthetic `Component { }` node carrying the
    /// wrapped node's source location.
    fn synthesize_component(&mut self, root: ObjectId) -> BuildResult<ObjectId> {
        let type_ref = self.component_type_ref()?;
        let root_location = self.node(root).location;

        // The tree is immutable input; synthetic nodes live in a shadow
        // extension of the object-data table.
        let mut default_property = Property::named("", root_location);
        default_property
            .values
            .push(ValueNode::new(root_location, Variant::Object(root)));

        let node = ObjectNode {
            type_ref: Some(type_ref),
            type_name: "Component".to_owned(),
            location: root_location,
            default_property: Some(default_property),
            ..ObjectNode::default()
        };
        Ok(self.add_synthetic_object(node))
    }

    fn add_synthetic_object(&mut self, node: ObjectNode) -> ObjectId {
        self.synthetic_objects.push(node);
        self.object_data.push(ObjectData::default());
        self.input.tree.objects.len() + self.synthetic_objects.len() - 1
    }

    fn component_type_ref(&mut self) -> BuildResult<usize> {
        if let Some(i) = self.component_type_ref {
            return Ok(i);
        }
        if let Some(i) = self
            .output
            .types
            .iter()
            .position(|t| t.native().is_some_and(|n| n.is_component))
        {
            self.component_type_ref = Some(i);
            return Ok(i);
        }
        let Some(t) = self
            .input
            .imports
            .resolve_type("Component")
            .filter(|t| t.is_component)
            .cloned()
        else {
            return Err(self.error(LocationSpan::default(), "Cannot assign object to property"));
        };
        self.output.types.push(TypeReference::Native(t));
        let i = self.output.types.len() - 1;
        self.component_type_ref = Some(i);
        Ok(i)
    }

    fn build_property_on_assignment(
        &mut self,
        _obj: ObjectId,
        built: &mut BuiltProperty,
        v: &ValueNode,
        o: ObjectId,
        ctxt: BindingContext,
    ) -> BuildResult {
        if !built.writable {
            return Err(self.error(
                v.location,
                format!(
                    "Invalid property assignment: \"{}\" is a read-only property",
                    built.name
                ),
            ));
        }

        let Some(native) = self
            .node(o)
            .type_ref
            .and_then(|t| self.output.types[t].native().cloned())
        else {
            return Err(self.error(v.location, "Invalid on-assignment"));
        };

        let is_value_source = native.value_source_cast != -1;
        let is_interceptor = native.value_interceptor_cast != -1;
        if !is_value_source && !is_interceptor {
            return Err(self.error(
                v.location,
                format!("\"{}\" cannot operate on \"{}\"", self.node(o).type_name, built.name),
            ));
        }

        self.build_object(o, ctxt)?;
        built.on_values.push(BuiltValue {
            kind: if is_value_source {
                ValueKind::ValueSource
            } else {
                ValueKind::ValueInterceptor
            },
            variant: v.value.clone(),
            location: v.location,
            object: Some(o),
            binding: None,
            context_stack: ctxt.stack,
        });
        Ok(())
    }

    fn build_property_literal_assignment(
        &mut self,
        obj: ObjectId,
        built: &mut BuiltProperty,
        v: &ValueNode,
        ctxt: BindingContext,
    ) -> BuildResult {
        if let Variant::Script { source, path } = &v.value {
            // A qualified enum name assigns as a literal, not a binding.
            if let Some(value) = self.test_qualified_enum_assignment(obj, built, v)? {
                built.values.push(BuiltValue {
                    kind: ValueKind::Literal,
                    variant: Variant::Number(f64::from(value)),
                    location: v.location,
                    object: None,
                    binding: None,
                    context_stack: ctxt.stack,
                });
                return Ok(());
            }

            // Translation calls store their text directly.
            if let Some(text) = extract_call_literal(source, "qsTr") {
                built.values.push(BuiltValue {
                    kind: ValueKind::TrString,
                    variant: Variant::String(text),
                    location: v.location,
                    object: None,
                    binding: None,
                    context_stack: ctxt.stack,
                });
                return Ok(());
            }
            if let Some(text) = extract_call_literal(source, "qsTrId") {
                built.values.push(BuiltValue {
                    kind: ValueKind::TrIdString,
                    variant: Variant::String(text),
                    location: v.location,
                    object: None,
                    binding: None,
                    context_stack: ctxt.stack,
                });
                return Ok(());
            }

            if !built.writable && !built.property_type.is_list() && !built.is_read_only_declaration
            {
                return Err(self.error(
                    v.location,
                    format!(
                        "Invalid property assignment: \"{}\" is a read-only property",
                        built.name
                    ),
                ));
            }

            self.set_binding_bit(obj, built.index);
            let binding = self.add_binding_reference(
                v.location,
                source.clone(),
                path.clone(),
                BindingTarget {
                    property_index: built.index,
                    value_type_index: -1,
                    owner: 0,
                },
                built.property_type.clone(),
                ctxt,
            );
            built.values.push(BuiltValue {
                kind: ValueKind::PropertyBinding,
                variant: v.value.clone(),
                location: v.location,
                object: None,
                binding: Some(binding),
                context_stack: ctxt.stack,
            });
            return Ok(());
        }

        // A plain literal: validate now, emit later.
        let variant = self.test_literal_assignment(obj, built, v)?;
        built.values.push(BuiltValue {
            kind: ValueKind::Literal,
            variant,
            location: v.location,
            object: None,
            binding: None,
            context_stack: ctxt.stack,
        });
        Ok(())
    }

    /// Mark a bound property in the binding bitmask of composite-typed
    /// objects, so instantiation skips the nested unit's default binding.
    fn set_binding_bit(&mut self, obj: ObjectId, property_index: u32) {
        let is_composite = self
            .node(obj)
            .type_ref
            .is_some_and(|t| self.output.types[t].composite().is_some());
        if !is_composite {
            return;
        }
        let mask = &mut self.object_data[obj].binding_bitmask;
        let byte = (property_index / 8) as usize;
        let needed = (byte / 4 + 1) * 4;
        if mask.len() < needed {
            mask.resize(needed, 0);
        }
        mask[byte] |= 1 << (property_index % 8);
    }

    fn add_binding_reference(
        &mut self,
        location: LocationSpan,
        source: String,
        path: Option<Vec<String>>,
        target: BindingTarget,
        target_type: PropertyType,
        ctxt: BindingContext,
    ) -> usize {
        self.state.total_bindings_count += 1;
        self.state.bindings.push(BindingReference {
            location,
            source,
            path,
            target,
            target_type,
            context_stack: ctxt.stack,
            kind: None,
        });
        self.state.bindings.len() - 1
    }

    // ----- enum and literal validation -----

    /// Try to resolve a script as a qualified `<Type>.<Enumerator>` literal.
    /// Returns the value when the assignment is an enum literal; `None`
    /// means "not an enum assignment, treat as a binding".
    fn test_qualified_enum_assignment(
        &mut self,
        obj: ObjectId,
        built: &BuiltProperty,
        v: &ValueNode,
    ) -> BuildResult<Option<i32>> {
        let is_int_prop = built.property_type == PropertyType::Int;
        let is_enum_prop = matches!(built.property_type, PropertyType::Enum(_));
        if !is_int_prop && !is_enum_prop {
            return Ok(None);
        }

        let Variant::Script { source, path } = &v.value else {
            return Ok(None);
        };
        let string = source.trim();
        if !string.chars().next().is_some_and(|c| c.is_uppercase()) {
            return Ok(None);
        }

        if !built.writable && !built.is_read_only_declaration {
            return Err(self.error(
                v.location,
                format!(
                    "Invalid property assignment: \"{}\" is a read-only property",
                    built.name
                ),
            ));
        }

        if is_int_prop {
            // Allow enum assignment to ints.
            return Ok(self.evaluate_enum(string));
        }

        let parts: Vec<&str> = match path {
            Some(p) if p.len() == 2 => p.iter().map(String::as_str).collect(),
            _ => {
                let split: Vec<&str> = string.split('.').collect();
                if split.len() != 2 {
                    return Ok(None);
                }
                split
            }
        };

        // When the qualifier names the object's own type, the target
        // enumerator can be searched directly; otherwise the whole imported
        // type is searched.
        if let Some(value) = self.input.imports.resolve_enum(parts[0], parts[1]) {
            return Ok(Some(value));
        }
        if self
            .node(obj)
            .type_name
            .as_str()
            == parts[0]
        {
            if let Some(value) = self.meta(obj).enum_value(parts[1]) {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Similar logic, but without a known target property: any resolvable
    /// qualified enum name.
    fn evaluate_enum(&self, script: &str) -> Option<i32> {
        let (scope, key) = script.split_once('.')?;
        self.input.imports.resolve_enum(scope, key)
    }

    /// Validate a literal against the property's declared type and return
    /// the (possibly pre-resolved) variant to store.
    fn test_literal_assignment(
        &self,
        obj: ObjectId,
        built: &BuiltProperty,
        v: &ValueNode,
    ) -> BuildResult<Variant> {
        if !built.writable && !built.is_read_only_declaration {
            return Err(self.error(
                v.location,
                format!(
                    "Invalid property assignment: \"{}\" is a read-only property",
                    built.name
                ),
            ));
        }

        let err = |msg: &str| Err(self.error(v.location, format!("Invalid property assignment: {}", msg)));

        let value = &v.value;
        match &built.property_type {
            PropertyType::Enum(enum_name) => {
                let Some(s) = value.as_string() else {
                    return err("unknown enumeration");
                };
                let meta = self.meta(obj);
                let resolved = meta
                    .enums_named(enum_name)
                    .and_then(|e| e.key_to_value(s))
                    .or_else(|| meta.enum_value(s));
                match resolved {
                    Some(e) => Ok(Variant::Number(f64::from(e))),
                    None => err("unknown enumeration"),
                }
            }
            PropertyType::Variant => Ok(value.clone()),
            PropertyType::String => match value.as_string() {
                Some(_) => Ok(value.clone()),
                None => err("string expected"),
            },
            PropertyType::StringList => match value.as_string() {
                Some(_) => Ok(value.clone()),
                None => err("string or string list expected"),
            },
            PropertyType::ByteArray => match value.as_string() {
                Some(_) => Ok(value.clone()),
                None => err("byte array expected"),
            },
            PropertyType::Url | PropertyType::UrlList => match value.as_string() {
                Some(_) => Ok(value.clone()),
                None => err("url expected"),
            },
            PropertyType::RegExp => {
                err("regular expression expected; use /pattern/ syntax")
            }
            PropertyType::UInt => match value.as_number() {
                Some(n) if (n as u32) as f64 == n => Ok(value.clone()),
                _ => err("unsigned int expected"),
            },
            PropertyType::Int => match value.as_number() {
                Some(n) if (n as i32) as f64 == n => Ok(value.clone()),
                _ => err("int expected"),
            },
            PropertyType::Float | PropertyType::Double => match value.as_number() {
                Some(_) => Ok(value.clone()),
                None => err("number expected"),
            },
            PropertyType::Color => match value.as_string().and_then(converters::color_from_string) {
                Some(_) => Ok(value.clone()),
                None => err("color expected"),
            },
            PropertyType::Date => match value.as_string().and_then(converters::date_from_string) {
                Some(_) => Ok(value.clone()),
                None => err("date expected"),
            },
            PropertyType::Time => match value.as_string().and_then(converters::time_from_string) {
                Some(_) => Ok(value.clone()),
                None => err("time expected"),
            },
            PropertyType::DateTime => {
                match value.as_string().and_then(converters::date_time_from_string) {
                    Some(_) => Ok(value.clone()),
                    None => err("datetime expected"),
                }
            }
            PropertyType::Point | PropertyType::PointF => {
                match value.as_string().and_then(converters::point_from_string) {
                    Some(_) => Ok(value.clone()),
                    None => err("point expected"),
                }
            }
            PropertyType::Size | PropertyType::SizeF => {
                match value.as_string().and_then(converters::size_from_string) {
                    Some(_) => Ok(value.clone()),
                    None => err("size expected"),
                }
            }
            PropertyType::Rect | PropertyType::RectF => {
                match value.as_string().and_then(converters::rect_from_string) {
                    Some(_) => Ok(value.clone()),
                    None => err("rect expected"),
                }
            }
            PropertyType::Bool => match value {
                Variant::Boolean(_) => Ok(value.clone()),
                _ => err("boolean expected"),
            },
            PropertyType::Vector3D => {
                match value.as_string().and_then(converters::vector3d_from_string) {
                    Some(_) => Ok(value.clone()),
                    None => err("3D vector expected"),
                }
            }
            PropertyType::Vector4D => {
                match value.as_string().and_then(converters::vector4d_from_string) {
                    Some(_) => Ok(value.clone()),
                    None => err("4D vector expected"),
                }
            }
            t => err(&format!("unsupported type \"{:?}\"", t)),
        }
    }
}

/// Result of resolving one alias declaration.
struct AliasResolution {
    property_type: PropertyType,
    writable: bool,
    resettable: bool,
    target_id: u32,
    encoded_prop_idx: u32,
    is_ptr: bool,
}

impl<'a> Compilation<'a> {
    // ----- dynamic meta synthesis -----

    /// Validate declared members: uniqueness, lower-case initials, and no
    /// shadowing of reserved names.
    fn check_dynamic_meta(&mut self, obj: ObjectId) -> BuildResult {
        let node = self.node(obj);
        let mut seen_default = false;

        for (i, p) in node.dynamic_properties.iter().enumerate() {
            if p.is_default {
                if seen_default {
                    return Err(self.error(p.location, "Duplicate default property"));
                }
                seen_default = true;
            }
            if node.dynamic_properties[..i].iter().any(|q| q.name == p.name) {
                return Err(CompileError::new(
                    &self.input.url,
                    p.name_location,
                    "Duplicate property name",
                ));
            }
            if p.name.chars().next().is_some_and(|c| c.is_uppercase()) {
                return Err(CompileError::new(
                    &self.input.url,
                    p.name_location,
                    "Property names cannot begin with an upper case letter",
                ));
            }
            if ILLEGAL_NAMES.contains(p.name.as_str()) {
                return Err(CompileError::new(
                    &self.input.url,
                    p.name_location,
                    "Illegal property name",
                ));
            }
        }

        for (i, s) in node.dynamic_signals.iter().enumerate() {
            if node.dynamic_signals[..i].iter().any(|q| q.name == s.name) {
                return Err(self.error(s.location, "Duplicate signal name"));
            }
            if s.name.chars().next().is_some_and(|c| c.is_uppercase()) {
                return Err(self.error(
                    s.location,
                    "Signal names cannot begin with an upper case letter",
                ));
            }
            if ILLEGAL_NAMES.contains(s.name.as_str()) {
                return Err(self.error(s.location, "Illegal signal name"));
            }
        }

        for (i, m) in node.dynamic_slots.iter().enumerate() {
            if node.dynamic_signals.iter().any(|q| q.name == m.name)
                || node.dynamic_slots[..i].iter().any(|q| q.name == m.name)
            {
                return Err(self.error(m.location, "Duplicate method name"));
            }
            if m.name.chars().next().is_some_and(|c| c.is_uppercase()) {
                return Err(self.error(
                    m.location,
                    "Method names cannot begin with an upper case letter",
                ));
            }
            if ILLEGAL_NAMES.contains(m.name.as_str()) {
                return Err(self.error(m.location, "Illegal method name"));
            }
        }

        Ok(())
    }

    /// Synthesize the extended meta-object for an object with declared
    /// members. The first pass skips alias resolution (ids may not all be
    /// known yet) but keeps the record layout identical; the second pass,
    /// run from [`Self::complete_component_build`], fills the alias records
    /// and the final descriptor.
    fn build_dynamic_meta(&mut self, obj: ObjectId, resolve_aliases: bool) -> BuildResult {
        let node = self.node(obj).clone();
        if node.dynamic_properties.is_empty()
            && node.dynamic_signals.is_empty()
            && node.dynamic_slots.is_empty()
        {
            return Ok(());
        }

        let base = self.object_data[obj]
            .base_meta
            .clone()
            .expect("base meta resolved");

        let alias_count = node
            .dynamic_properties
            .iter()
            .filter(|p| p.property_type == DynamicPropertyType::Alias)
            .count();

        if !resolve_aliases {
            // No point doing this for both the alias and non alias passes.
            for p in &node.dynamic_properties {
                if let Some((_, mp)) = base.property(&p.name) {
                    if mp.is_final {
                        return Err(self.error(p.location, "Cannot override FINAL property"));
                    }
                }
            }
        }

        let build_data = resolve_aliases || alias_count == 0;

        let class_id = self.class_counter;
        self.class_counter += 1;
        let mut class_name = format!("{}_QML_{}", base.class_name, class_id);
        if self.state.root == obj && !self.state.nested {
            let path = &self.input.url;
            let basename = path
                .rsplit('/')
                .next()
                .map(|n| n.split('.').next().unwrap_or(n))
                .unwrap_or("");
            if basename.chars().next().is_some_and(|c| c.is_uppercase()) {
                class_name = format!("{}_QMLTYPE_{}", basename, class_id);
            }
        }

        // Aliases sit after the other declared properties so their indices
        // stay stable between the two passes.
        let plain: Vec<&DynamicProperty> = node
            .dynamic_properties
            .iter()
            .filter(|p| p.property_type != DynamicPropertyType::Alias)
            .collect();
        let aliases: Vec<&DynamicProperty> = node
            .dynamic_properties
            .iter()
            .filter(|p| p.property_type == DynamicPropertyType::Alias)
            .collect();

        let n_props = node.dynamic_properties.len();
        let mut builder = MetaBuilder::new(
            n_props,
            n_props + node.dynamic_signals.len(),
            node.dynamic_slots.len(),
            alias_count,
        );
        let class_ref = builder.new_string(class_name.clone());
        builder.set_class_name(class_ref);

        let mut ext_properties = Vec::with_capacity(n_props);
        let mut ext_signals = Vec::with_capacity(n_props + node.dynamic_signals.len());

        let mut effective_index = 0usize;
        for p in &plain {
            let name_ref = builder.new_string(p.name.as_str());
            let changed_ref = builder.new_string(format!("{}Changed", p.name));
            let property_type = self.declared_property_type(p)?;
            let writable = !p.is_read_only && !property_type.is_list();
            builder.set_property(
                effective_index,
                name_ref,
                meta_type_code(&property_type),
                if writable { PROPERTY_WRITABLE } else { 0 },
                effective_index as u32,
            );
            builder.set_signal(effective_index, changed_ref, &[]);
            ext_signals.push(MetaSignal {
                name: format!("{}Changed", p.name),
                parameter_names: Vec::new(),
                revision: None,
            });
            ext_properties.push(MetaProperty {
                name: p.name.clone(),
                property_type,
                writable,
                resettable: false,
                is_final: false,
                scriptable: true,
                revision: None,
            });
            effective_index += 1;
        }

        for (alias_index, p) in aliases.iter().enumerate() {
            let name_ref = builder.new_string(p.name.as_str());
            let changed_ref = builder.new_string(format!("{}Changed", p.name));
            if resolve_aliases {
                let r = self.compile_alias(p)?;
                let mut flags = 0;
                if r.writable {
                    flags |= PROPERTY_WRITABLE;
                }
                if r.resettable {
                    flags |= PROPERTY_RESETTABLE;
                }
                builder.set_property(
                    effective_index,
                    name_ref,
                    meta_type_code(&r.property_type),
                    flags,
                    effective_index as u32,
                );
                builder.set_alias(
                    alias_index,
                    r.target_id,
                    r.encoded_prop_idx,
                    if r.is_ptr { ALIAS_FLAG_PTR } else { 0 },
                );
                ext_properties.push(MetaProperty {
                    name: p.name.clone(),
                    property_type: r.property_type,
                    writable: r.writable,
                    resettable: r.resettable,
                    is_final: false,
                    scriptable: true,
                    revision: None,
                });
            } else {
                // Placeholder keeping the layout consistent across passes.
                builder.set_property(
                    effective_index,
                    name_ref,
                    meta_type_code(&PropertyType::Variant),
                    PROPERTY_WRITABLE,
                    effective_index as u32,
                );
                ext_properties.push(MetaProperty::new(p.name.as_str(), PropertyType::Variant));
            }
            builder.set_signal(effective_index, changed_ref, &[]);
            ext_signals.push(MetaSignal {
                name: format!("{}Changed", p.name),
                parameter_names: Vec::new(),
                revision: None,
            });
            effective_index += 1;
        }

        for (i, s) in node.dynamic_signals.iter().enumerate() {
            let name_ref = builder.new_string(s.name.as_str());
            let params: Vec<StringRef> = s
                .parameter_names
                .iter()
                .map(|n| builder.new_string(n.as_str()))
                .collect();
            builder.set_signal(n_props + i, name_ref, &params);
            ext_signals.push(MetaSignal {
                name: s.name.clone(),
                parameter_names: s.parameter_names.clone(),
                revision: None,
            });
        }

        for (i, m) in node.dynamic_slots.iter().enumerate() {
            let name_ref = builder.new_string(m.name.as_str());
            let params: Vec<StringRef> = m
                .parameter_names
                .iter()
                .map(|n| builder.new_string(n.as_str()))
                .collect();
            let func = format!(
                "(function {}({}) {{ {} }})",
                m.name,
                m.parameter_names.join(", "),
                m.body
            );
            builder.set_method(i, name_ref, &params, func, m.location.start.line);
        }

        let ext = Rc::new(MetaObject {
            class_name,
            super_class: Some(base),
            properties: ext_properties,
            signals: ext_signals,
            enums: Vec::new(),
            default_property: node
                .dynamic_properties
                .iter()
                .find(|p| p.is_default)
                .map(|p| p.name.clone()),
        });

        let data = &mut self.object_data[obj];
        data.meta = Some(ext.clone());
        data.alias_count = alias_count;
        data.synth_cache = Some(PropertyCache::from_meta(&ext));
        if build_data {
            data.metadata = builder.build();
            data.alias_metadata = builder.build_alias_data();
        }

        if !resolve_aliases && alias_count > 0 {
            self.state.aliasing_objects.push(obj);
        }
        Ok(())
    }

    fn declared_property_type(&self, p: &DynamicProperty) -> BuildResult<PropertyType> {
        Ok(match &p.property_type {
            DynamicPropertyType::Var | DynamicPropertyType::Variant => PropertyType::Variant,
            DynamicPropertyType::Int => PropertyType::Int,
            DynamicPropertyType::Bool => PropertyType::Bool,
            DynamicPropertyType::Real => PropertyType::Double,
            DynamicPropertyType::String => PropertyType::String,
            DynamicPropertyType::Url => PropertyType::Url,
            DynamicPropertyType::Color => PropertyType::Color,
            DynamicPropertyType::Time => PropertyType::Time,
            DynamicPropertyType::Date => PropertyType::Date,
            DynamicPropertyType::DateTime => PropertyType::DateTime,
            DynamicPropertyType::Rect => PropertyType::RectF,
            DynamicPropertyType::Custom(name) => {
                let Some(t) = self.input.imports.resolve_type(name) else {
                    return Err(self.error(p.location, "Invalid property type"));
                };
                PropertyType::Object(t.meta.class_name.clone())
            }
            DynamicPropertyType::CustomList(name) => {
                let Some(t) = self.input.imports.resolve_type(name) else {
                    return Err(self.error(p.location, "Invalid property type"));
                };
                PropertyType::List(t.meta.class_name.clone())
            }
            DynamicPropertyType::Alias => unreachable!("aliases resolved separately"),
        })
    }

    // ----- alias resolution -----

    fn compile_alias(&mut self, p: &DynamicProperty) -> BuildResult<AliasResolution> {
        let Some(values) = &p.default_value else {
            return Err(self.error(p.location, "No property alias location"));
        };
        if values.len() != 1 || !values[0].value.is_script() {
            return Err(self.error(p.location, "Invalid alias location"));
        }
        let Variant::Script { source, path } = &values[0].value else {
            unreachable!()
        };
        let location = values[0].location;

        let parts: Vec<String> = match path {
            Some(p) => p.clone(),
            None => source.split('.').map(str::to_owned).collect(),
        };
        if parts.is_empty() || parts.len() > 3 || parts.iter().any(String::is_empty) {
            return Err(self.error(
                location,
                "Invalid alias reference. An alias reference must be specified as <id>, \
                 <id>.<property> or <id>.<value property>.<property>",
            ));
        }

        let Some(&id_object) = self.state.id_names.get(&parts[0]) else {
            return Err(self.error(
                location,
                format!("Invalid alias reference. Unable to find id \"{}\"", parts[0]),
            ));
        };
        let target_id = self.object_data[id_object].id_index;

        if parts.len() == 1 {
            // An alias to the object itself.
            let class_name = self.meta(id_object).class_name.clone();
            return Ok(AliasResolution {
                property_type: PropertyType::Object(class_name),
                writable: false,
                resettable: false,
                target_id,
                encoded_prop_idx: u32::MAX,
                is_ptr: true,
            });
        }

        let target_meta = self.meta(id_object);
        let Some((prop_idx, mp)) = target_meta.property(&parts[1]) else {
            return Err(self.error(location, "Invalid alias location"));
        };
        if prop_idx > 0xFFFF {
            return Err(self.error(location, "Alias property exceeds alias bounds"));
        }
        if !mp.scriptable {
            return Err(self.error(location, "Invalid alias location"));
        }

        let mut property_type = mp.property_type.clone();
        let writable = mp.writable && !p.is_read_only;
        let resettable = mp.resettable && !p.is_read_only;
        let mut encoded = prop_idx as u32;

        if parts.len() == 3 {
            if !property_type.is_value_type() {
                return Err(self.error(location, "Invalid alias location"));
            }
            let Some(vt_meta) = self.input.imports.value_type_meta(&property_type) else {
                return Err(self.error(location, "Invalid alias location"));
            };
            let Some((sub_idx, sub)) = vt_meta.property(&parts[2]) else {
                return Err(self.error(location, "Invalid alias location"));
            };
            debug_assert!(sub_idx <= 0xFF);
            encoded = encode_alias_property(
                prop_idx as u32,
                meta_type_code(&property_type),
                sub_idx as u32,
            );
            property_type = sub.property_type.clone();
        }

        // Avoid introducing a dependency on the aliased meta-object: enum
        // aliases degrade to int.
        if matches!(property_type, PropertyType::Enum(_)) {
            property_type = PropertyType::Int;
        }

        let is_ptr = property_type.is_object();
        Ok(AliasResolution {
            property_type,
            writable,
            resettable,
            target_id,
            encoded_prop_idx: encoded,
            is_ptr,
        })
    }

    // ----- completion -----

    fn complete_component_build(&mut self) -> BuildResult {
        // Aliases resolve strictly after every id in the component is known.
        let aliasing = std::mem::take(&mut self.state.aliasing_objects);
        for obj in aliasing {
            self.build_dynamic_meta(obj, true)?;
        }

        for i in 0..self.state.bindings.len() {
            let b = self.state.bindings[i].clone();
            let kind = if let Some(kind) = self.classify_optimized_binding(&b) {
                kind
            } else if b.context_stack == 0 {
                let index = self.output.programs.len() as u32;
                self.output
                    .programs
                    .push(format!("(function() {{ return {} }})", b.source));
                BindingKind::V8 { index }
            } else {
                let byte_array = self
                    .output
                    .index_for_byte_array(b.source.clone().into_bytes());
                BindingKind::Script { byte_array }
            };
            self.state.bindings[i].kind = Some(kind);
        }
        Ok(())
    }

    /// The expression compiler's fast path: a plain `<id>.<property>`
    /// reference whose source and target types match one of the optimizable
    /// kinds compiles to a fetch-and-store program entry.
    fn classify_optimized_binding(&mut self, b: &BindingReference) -> Option<BindingKind> {
        let optimizable = matches!(
            b.target_type,
            PropertyType::Int | PropertyType::Double | PropertyType::Float | PropertyType::Bool
        );
        if !optimizable || b.target.value_type_index != -1 {
            return None;
        }
        let path = b.path.as_ref()?;
        if path.len() != 2 {
            return None;
        }
        let &id_object = self.state.id_names.get(&path[0])?;
        let meta = self.object_data[id_object].meta.clone()?;
        let (src_idx, src) = meta.property(&path[1])?;
        if src.property_type != b.target_type {
            return None;
        }

        let data = &mut self.state.compiled_binding_data;
        data.extend_from_slice(&b.target.property_index.to_le_bytes());
        data.extend_from_slice(&self.object_data[id_object].id_index.to_le_bytes());
        data.extend_from_slice(&(src_idx as u32).to_le_bytes());
        data.extend_from_slice(&meta_type_code(&b.target_type).to_le_bytes());
        let index = (data.len() / 16 - 1) as u32;
        Some(BindingKind::V4 { index })
    }

    // ----- gen phase -----

    fn gen_object(&mut self, obj: ObjectId) {
        let node_location = self.node(obj).location;
        let native = self.native_type(obj);
        if native.as_ref().is_some_and(|t| t.is_component) {
            self.gen_component(obj);
            return;
        }

        let type_index = self.node(obj).type_ref.expect("typed object") as u32;
        let is_root = self.state.root == obj;
        let line = node_location.start.line;
        let column = node_location.start.column;

        match &native {
            Some(t) if !t.extended && !is_root => {
                self.output.add_instruction(Instruction::CreateSimpleObject {
                    create_fn: t.create_fn,
                    type_size: t.create_size,
                    type_index,
                    line,
                    column,
                });
            }
            Some(_) => {
                self.output.add_instruction(Instruction::CreateCppObject {
                    type_index,
                    data: -1,
                    is_root,
                    line,
                    column,
                });
            }
            None => {
                let data = &self.object_data[obj];
                let binding_bits = if data.binding_bitmask.is_empty() {
                    -1
                } else {
                    let mask = data.binding_bitmask.clone();
                    self.output.index_for_byte_array(mask) as i32
                };
                self.output.add_instruction(Instruction::CreateQMLObject {
                    type_index,
                    is_root,
                    binding_bits,
                });
                self.output.add_instruction(Instruction::CompleteQMLObject {
                    line,
                    column,
                    is_root,
                });
            }
        }

        // Set up the synthesized meta object if necessary.
        let data = self.object_data[obj].clone();
        if !data.metadata.is_empty() {
            let mut cache = data.synth_cache.clone().expect("synth cache built");
            // Flag the alias entries; they are the last declared properties.
            let alias_start = cache.entries.len() - data.alias_count;
            for e in &mut cache.entries[alias_start..] {
                e.is_alias = true;
            }
            let cache = Rc::new(cache);

            let meta_index = self.output.index_for_byte_array(data.metadata.clone());
            let alias_index = self.output.index_for_byte_array(data.alias_metadata.clone());
            let cache_index = self.output.property_caches.len() as i32;
            if is_root && !self.state.nested {
                self.output.root_property_cache = Some(cache.clone());
            }
            self.output.property_caches.push(cache);
            self.output.add_instruction(Instruction::StoreMetaObject {
                data: meta_index,
                alias_data: alias_index,
                property_cache: cache_index,
            });
        }

        if let Some(id) = &data.id {
            let string_index = self.output.index_for_string(id);
            self.output.add_instruction(Instruction::SetId {
                string_index,
                index: data.id_index,
            });
        }

        if native.is_some() && data.parser_status_cast != -1 {
            self.output.add_instruction(Instruction::BeginObject {
                cast_value: data.parser_status_cast,
            });
        }

        self.gen_object_body(obj);
    }

    fn gen_object_body(&mut self, obj: ObjectId) {
        let data = self.object_data[obj].clone();

        for prop in &data.script_string_properties {
            let v = &prop.values[0];
            let source = v.variant.as_string().unwrap_or_default().to_owned();
            let string_index = self.output.index_for_string(&source);
            self.output.add_instruction(Instruction::StoreScriptString {
                property_index: prop.index,
                string_index,
                scope: prop.scope_depth,
                binding_id: 0,
                line: v.location.start.line,
                column: v.location.start.column,
            });
        }

        let mut seen_defer = false;
        for prop in &data.value_properties {
            if prop.is_deferred {
                seen_defer = true;
                continue;
            }
            if !prop.is_alias {
                self.gen_property_assignment(prop, obj, None);
            }
        }
        if seen_defer {
            let defer_index = self
                .output
                .add_instruction(Instruction::Defer { defer_count: 0 });
            let next_instruction_index = self.output.next_instruction_index();

            self.output.add_instruction(Instruction::DeferInit {
                bindings_count: self.state.total_bindings_count,
                parser_status_count: self.state.parser_status_count,
                object_stack_depth: self.state.object_depth.max,
                list_stack_depth: self.state.list_depth.max,
            });

            for prop in &data.value_properties {
                if prop.is_deferred {
                    self.gen_property_assignment(prop, obj, None);
                }
            }

            self.output.add_instruction(Instruction::Done);

            let count = (self.output.next_instruction_index() - next_instruction_index) as u32;
            if let Instruction::Defer { defer_count } =
                &mut self.output.instructions[defer_index]
            {
                *defer_count = count;
            }
        }

        for prop in &data.list_properties {
            self.gen_list_property(prop, obj);
        }

        for prop in &data.signal_properties {
            let v = &prop.values[0];
            match v.kind {
                ValueKind::SignalObject => {
                    self.gen_object(v.object.expect("signal object"));
                    let signal_name_index = self.output.index_for_string(&prop.name);
                    self.output.add_instruction(Instruction::AssignSignalObject {
                        signal_name_index,
                        line: v.location.start.line,
                    });
                }
                ValueKind::SignalExpression => {
                    let source = v.variant.as_string().unwrap_or_default().as_bytes().to_vec();
                    let value = self.output.index_for_byte_array(source);
                    self.output.add_instruction(Instruction::StoreSignal {
                        signal_index: prop.index,
                        value,
                        context: v.context_stack,
                        line: v.location.start.line,
                        column: v.location.start.column,
                    });
                }
                _ => unreachable!("signal values are objects or expressions"),
            }
        }

        for prop in &data.attached_properties {
            self.output.add_instruction(Instruction::FetchAttached {
                attached_id: prop.index,
                line: prop.location.start.line,
            });
            self.gen_object_body(prop.value_object.expect("attached object"));
            self.output.add_instruction(Instruction::PopFetchedObject);
        }

        for prop in &data.grouped_properties {
            self.output.add_instruction(Instruction::FetchObject {
                property_index: prop.index,
                line: prop.location.start.line,
            });
            self.gen_object_body(prop.value_object.expect("grouped object"));
            self.output.add_instruction(Instruction::PopFetchedObject);
        }

        for prop in &data.value_type_properties {
            if !prop.is_alias {
                self.gen_value_type_property(prop, obj);
            }
        }

        // Assignments that resolve through aliases run last, after every id
        // of the component is live.
        for prop in &data.value_properties {
            if !prop.is_deferred && prop.is_alias {
                self.gen_property_assignment(prop, obj, None);
            }
        }
        for prop in &data.value_type_properties {
            if prop.is_alias {
                self.gen_value_type_property(prop, obj);
            }
        }
    }

    fn gen_list_property(&mut self, prop: &BuiltProperty, obj: ObjectId) {
        self.output.add_instruction(Instruction::FetchQList {
            property_index: prop.index,
        });

        for v in &prop.values {
            match v.kind {
                ValueKind::CreatedObject => {
                    self.gen_object(v.object.expect("list object"));
                    self.output.add_instruction(Instruction::AssignObjectList {
                        line: v.location.start.line,
                    });
                }
                ValueKind::PropertyBinding => {
                    self.gen_binding_assignment(v, prop, None);
                }
                _ => unreachable!("list values are objects or a binding"),
            }
        }

        self.output.add_instruction(Instruction::PopQList);
    }

    fn gen_value_type_property(&mut self, prop: &BuiltProperty, obj: ObjectId) {
        let sub = self.object_data[prop.value_object.expect("value type object")].clone();

        // For composite types the fetched value type may already carry
        // bindings that must be cleared before ours are installed.
        let mut binding_skip_list = 0u32;
        let is_composite = self
            .node(obj)
            .type_ref
            .is_some_and(|t| self.output.types[t].composite().is_some());
        if is_composite {
            for vp in &sub.value_properties {
                debug_assert!(vp.index < 32);
                binding_skip_list |= 1 << vp.index;
            }
        }

        self.output.add_instruction(Instruction::FetchValueType {
            property_index: prop.index,
            binding_skip_list,
        });

        for vp in &sub.value_properties {
            self.gen_property_assignment(vp, prop.value_object.unwrap(), Some(prop));
        }

        self.output.add_instruction(Instruction::PopValueType {
            property_index: prop.index,
        });
    }

    fn gen_property_assignment(
        &mut self,
        prop: &BuiltProperty,
        _obj: ObjectId,
        value_type_prop: Option<&BuiltProperty>,
    ) {
        for v in &prop.values {
            match v.kind {
                ValueKind::CreatedObject => {
                    let o = v.object.expect("created object");
                    self.gen_object(o);
                    let line = v.location.start.line;
                    match &prop.property_type {
                        PropertyType::Interface(_) => {
                            self.output.add_instruction(Instruction::StoreInterface {
                                property_index: prop.index,
                                line,
                            });
                        }
                        PropertyType::Variant => {
                            self.output.add_instruction(Instruction::StoreVariantObject {
                                property_index: prop.index,
                                line,
                            });
                        }
                        PropertyType::List(_) => {
                            self.output.add_instruction(Instruction::StoreObjectQList);
                        }
                        _ => {
                            self.output.add_instruction(Instruction::StoreObject {
                                property_index: prop.index,
                                line,
                            });
                        }
                    }
                }
                ValueKind::PropertyBinding => {
                    self.gen_binding_assignment(v, prop, value_type_prop);
                }
                ValueKind::Literal => self.gen_literal_assignment(prop, v),
                ValueKind::TrString => {
                    let context_index = self.translation_context_index();
                    let text = v.variant.as_string().unwrap_or_default().to_owned();
                    let text_index = self.output.index_for_string(&text);
                    self.output.add_instruction(Instruction::StoreTrString {
                        property_index: prop.index,
                        context_index,
                        text_index,
                    });
                }
                ValueKind::TrIdString => {
                    let text = v.variant.as_string().unwrap_or_default().to_owned();
                    let text_index = self.output.index_for_string(&text);
                    self.output.add_instruction(Instruction::StoreTrIdString {
                        property_index: prop.index,
                        text_index,
                    });
                }
                _ => unreachable!("unexpected value classification"),
            }
        }

        for v in &prop.on_values {
            let o = v.object.expect("on-assignment object");
            self.gen_object(o);
            let native = self.native_type(o).expect("value source is native");
            let target = match value_type_prop {
                Some(vt) => BindingTarget {
                    property_index: vt.index,
                    value_type_index: prop.index as i32,
                    owner: 1,
                },
                None => BindingTarget {
                    property_index: prop.index,
                    value_type_index: -1,
                    owner: 0,
                },
            };
            match v.kind {
                ValueKind::ValueSource => {
                    self.output.add_instruction(Instruction::StoreValueSource {
                        target,
                        cast_value: native.value_source_cast,
                    });
                }
                ValueKind::ValueInterceptor => {
                    self.output
                        .add_instruction(Instruction::StoreValueInterceptor {
                            target,
                            cast_value: native.value_interceptor_cast,
                        });
                }
                _ => unreachable!("on-values are sources or interceptors"),
            }
        }
    }

    fn translation_context_index(&mut self) -> u32 {
        // This must match the qsTr() implementation: the translation context
        // is the document basename.
        let basename = self
            .input
            .url
            .rsplit('/')
            .next()
            .map(|n| n.split('.').next().unwrap_or(n))
            .unwrap_or("")
            .to_owned();
        self.output.index_for_byte_array(basename.into_bytes())
    }

    fn gen_binding_assignment(
        &mut self,
        v: &BuiltValue,
        prop: &BuiltProperty,
        value_type_prop: Option<&BuiltProperty>,
    ) {
        let b = self.state.bindings[v.binding.expect("classified binding")].clone();
        let kind = b.kind.expect("binding classified in completion");

        let target = match value_type_prop {
            Some(vt) => BindingTarget {
                property_index: vt.index,
                value_type_index: prop.index as i32,
                owner: 1,
            },
            None => b.target,
        };
        let line = b.location.start.line;
        let column = b.location.start.column;

        match kind {
            BindingKind::V4 { index } => {
                self.output.add_instruction(Instruction::StoreV4Binding {
                    target,
                    value: index,
                    context: b.context_stack,
                    line,
                    column,
                });
            }
            BindingKind::V8 { index } => {
                self.output.add_instruction(Instruction::StoreV8Binding {
                    target,
                    value: index,
                    context: b.context_stack,
                    line,
                    column,
                });
            }
            BindingKind::Script { byte_array } => {
                self.output.add_instruction(Instruction::StoreBinding {
                    target,
                    value: byte_array,
                    context: b.context_stack,
                    line,
                    column,
                });
            }
        }
    }

    fn gen_literal_assignment(&mut self, prop: &BuiltProperty, v: &BuiltValue) {
        let value = &v.variant;
        let property_index = prop.index;
        let instr = match &prop.property_type {
            PropertyType::Enum(_) => Instruction::StoreInteger {
                property_index,
                value: value.as_number().expect("pre-resolved enum value") as i32,
            },
            PropertyType::Variant => match value {
                Variant::Number(n) => {
                    if (*n as i32) as f64 == *n {
                        Instruction::StoreVariantInteger {
                            property_index,
                            value: *n as i32,
                        }
                    } else {
                        Instruction::StoreVariantDouble {
                            property_index,
                            value: *n,
                        }
                    }
                }
                Variant::Boolean(b) => Instruction::StoreVariantBool {
                    property_index,
                    value: *b,
                },
                _ => {
                    let string_index = self
                        .output
                        .index_for_string(value.as_string().unwrap_or_default());
                    Instruction::StoreVariant {
                        property_index,
                        string_index,
                    }
                }
            },
            PropertyType::String => {
                let string_index = self
                    .output
                    .index_for_string(value.as_string().expect("validated string"));
                Instruction::StoreString {
                    property_index,
                    string_index,
                }
            }
            PropertyType::StringList => {
                let string_index = self
                    .output
                    .index_for_string(value.as_string().expect("validated string"));
                Instruction::StoreStringList {
                    property_index,
                    string_index,
                }
            }
            PropertyType::ByteArray => {
                let bytes = value.as_string().expect("validated string").as_bytes().to_vec();
                let byte_array_index = self.output.index_for_byte_array(bytes);
                Instruction::StoreByteArray {
                    property_index,
                    byte_array_index,
                }
            }
            PropertyType::Url => {
                let url_index = self
                    .output
                    .index_for_url(value.as_string().expect("validated string"));
                Instruction::StoreUrl {
                    property_index,
                    url_index,
                }
            }
            PropertyType::UrlList => {
                let url_index = self
                    .output
                    .index_for_url(value.as_string().expect("validated string"));
                Instruction::StoreUrlQList {
                    property_index,
                    url_index,
                }
            }
            PropertyType::UInt => Instruction::StoreInteger {
                property_index,
                value: value.as_number().expect("validated number") as u32 as i32,
            },
            PropertyType::Int => Instruction::StoreInteger {
                property_index,
                value: value.as_number().expect("validated number") as i32,
            },
            PropertyType::Float => Instruction::StoreFloat {
                property_index,
                value: value.as_number().expect("validated number") as f32,
            },
            PropertyType::Double => Instruction::StoreDouble {
                property_index,
                value: value.as_number().expect("validated number"),
            },
            PropertyType::Color => Instruction::StoreColor {
                property_index,
                value: converters::color_from_string(value.as_string().unwrap())
                    .expect("validated color"),
            },
            PropertyType::Date => Instruction::StoreDate {
                property_index,
                julian_day: converters::date_from_string(value.as_string().unwrap())
                    .expect("validated date"),
            },
            PropertyType::Time => Instruction::StoreTime {
                property_index,
                msecs_since_midnight: converters::time_from_string(value.as_string().unwrap())
                    .expect("validated time"),
            },
            PropertyType::DateTime => {
                let (julian_day, msecs) =
                    converters::date_time_from_string(value.as_string().unwrap())
                        .expect("validated datetime");
                Instruction::StoreDateTime {
                    property_index,
                    julian_day,
                    msecs_since_midnight: msecs,
                }
            }
            PropertyType::Point => {
                let (x, y) = converters::point_from_string(value.as_string().unwrap())
                    .expect("validated point");
                Instruction::StorePoint {
                    property_index,
                    x: x as i32,
                    y: y as i32,
                }
            }
            PropertyType::PointF => {
                let (x, y) = converters::point_from_string(value.as_string().unwrap())
                    .expect("validated point");
                Instruction::StorePointF {
                    property_index,
                    x,
                    y,
                }
            }
            PropertyType::Size => {
                let (w, h) = converters::size_from_string(value.as_string().unwrap())
                    .expect("validated size");
                Instruction::StoreSize {
                    property_index,
                    width: w as i32,
                    height: h as i32,
                }
            }
            PropertyType::SizeF => {
                let (w, h) = converters::size_from_string(value.as_string().unwrap())
                    .expect("validated size");
                Instruction::StoreSizeF {
                    property_index,
                    width: w,
                    height: h,
                }
            }
            PropertyType::Rect => {
                let (x, y, w, h) = converters::rect_from_string(value.as_string().unwrap())
                    .expect("validated rect");
                Instruction::StoreRect {
                    property_index,
                    x: x as i32,
                    y: y as i32,
                    width: w as i32,
                    height: h as i32,
                }
            }
            PropertyType::RectF => {
                let (x, y, width, height) =
                    converters::rect_from_string(value.as_string().unwrap())
                        .expect("validated rect");
                Instruction::StoreRectF {
                    property_index,
                    x,
                    y,
                    width,
                    height,
                }
            }
            PropertyType::Bool => Instruction::StoreBool {
                property_index,
                value: matches!(value, Variant::Boolean(true)),
            },
            PropertyType::Vector3D => {
                let (x, y, z) = converters::vector3d_from_string(value.as_string().unwrap())
                    .expect("validated vector");
                Instruction::StoreVector3D {
                    property_index,
                    x,
                    y,
                    z,
                }
            }
            PropertyType::Vector4D => {
                let (x, y, z, w) = converters::vector4d_from_string(value.as_string().unwrap())
                    .expect("validated vector");
                Instruction::StoreVector4D {
                    property_index,
                    x,
                    y,
                    z,
                    w,
                }
            }
            t => unreachable!("literal assignment to unsupported type {:?}", t),
        };
        self.output.add_instruction(instr);
    }

    fn gen_component(&mut self, obj: ObjectId) {
        let inner = *self.object_data[obj]
            .component_state
            .take()
            .expect("component state saved during build");
        let root = inner.root;
        let root_location = self.node(root).location;

        let create_index = self.output.add_instruction(Instruction::CreateComponent {
            line: root_location.start.line,
            column: root_location.start.column,
            end_line: root_location.end.line,
            is_root: self.state.root == obj,
            count: 0,
        });
        let next_instruction_index = self.output.next_instruction_index();

        let outer = std::mem::replace(&mut self.state, inner);

        let init = Instruction::Init {
            bindings_count: self.state.total_bindings_count,
            parser_status_count: self.state.parser_status_count,
            object_stack_depth: self.state.object_depth.max,
            list_stack_depth: self.state.list_depth.max,
            compiled_binding: if self.state.compiled_binding_data.is_empty() {
                -1
            } else {
                let data = std::mem::take(&mut self.state.compiled_binding_data);
                self.output.index_for_byte_array(data) as i32
            },
        };
        self.output.add_instruction(init);

        self.gen_object(root);

        self.output.add_instruction(Instruction::SetDefault);
        self.output.add_instruction(Instruction::Done);

        self.state = outer;

        let count = (self.output.next_instruction_index() - next_instruction_index) as u32;
        if let Instruction::CreateComponent { count: c, .. } =
            &mut self.output.instructions[create_index]
        {
            *c = count;
        }

        let data = self.object_data[obj].clone();
        if let Some(id) = &data.id {
            let string_index = self.output.index_for_string(id);
            self.output.add_instruction(Instruction::SetId {
                string_index,
                index: data.id_index,
            });
        }
    }
}

/// Extract the string literal of a plain `name("literal")` call.
fn extract_call_literal(source: &str, name: &str) -> Option<String> {
    let source = source.trim();
    let rest = source.strip_prefix(name)?.trim_start();
    let rest = rest.strip_prefix('(')?.trim_start();
    let rest = rest.strip_suffix(')')?.trim_end();
    let rest = rest.strip_prefix('"')?.strip_suffix('"')?;
    if rest.contains('"') {
        return None;
    }
    Some(rest.to_owned())
}
