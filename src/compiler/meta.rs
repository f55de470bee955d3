//! The meta builder: packed binary meta-descriptors for synthesized types.
//!
//! The descriptor is replayed by the instantiation VM to extend a native
//! meta-object with the declared properties, signals and methods of a
//! document object. Layout (all fields little-endian u32 unless noted):
//!
//! ```text
//! header:   class_name_ref, property_count, signal_count, method_count,
//!           alias_count, param_table_offset, string_table_offset
//! property: name_ref, type_code, flags, notify_index        (per property)
//! signal:   name_ref, param_offset, param_count             (per signal)
//! method:   name_ref, param_offset, param_count,
//!           body_offset, body_length, line                  (per method)
//! alias:    target_id, encoded_prop_idx, flags              (per alias)
//! params:   name_ref...                                     (at param_table_offset)
//! strings:  count, (offset, length)..., utf8 bytes          (at string_table_offset)
//! bodies:   utf8 bytes                                      (after strings)
//! ```
//!
//! The string table preserves insertion order; the compiler interns each
//! property name immediately followed by its `<name>Changed` signal name, so
//! the pairing is visible in the descriptor itself.

/// Reference to an interned string in the builder.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StringRef(usize);

/// Property flags.
pub const PROPERTY_WRITABLE: u32 = 0x1;
pub const PROPERTY_RESETTABLE: u32 = 0x2;

/// Alias flags.
pub const ALIAS_FLAG_PTR: u32 = 0x1;

#[derive(Clone, Debug, Default)]
struct PropertyRecord {
    name_ref: u32,
    type_code: u32,
    flags: u32,
    notify_index: u32,
}

#[derive(Clone, Debug, Default)]
struct SignalRecord {
    name_ref: u32,
    params: Vec<u32>,
}

#[derive(Clone, Debug, Default)]
struct MethodRecord {
    name_ref: u32,
    params: Vec<u32>,
    body: String,
    line: u32,
}

#[derive(Clone, Debug, Default)]
struct AliasRecord {
    target_id: u32,
    encoded_prop_idx: u32,
    flags: u32,
}

/// Builds one packed meta-descriptor.
#[derive(Default)]
pub struct MetaBuilder {
    class_name: Option<StringRef>,
    strings: Vec<String>,
    properties: Vec<PropertyRecord>,
    signals: Vec<SignalRecord>,
    methods: Vec<MethodRecord>,
    aliases: Vec<AliasRecord>,
}

impl MetaBuilder {
    /// Create a builder sized for the given record counts. Records are
    /// filled by index so alias properties can be resolved out of order.
    pub fn new(property_count: usize, signal_count: usize, method_count: usize, alias_count: usize) -> Self {
        MetaBuilder {
            class_name: None,
            strings: Vec::new(),
            properties: vec![PropertyRecord::default(); property_count],
            signals: vec![SignalRecord::default(); signal_count],
            methods: vec![MethodRecord::default(); method_count],
            aliases: vec![AliasRecord::default(); alias_count],
        }
    }

    /// Intern a string. Order is preserved in the descriptor.
    pub fn new_string(&mut self, s: impl Into<String>) -> StringRef {
        self.strings.push(s.into());
        StringRef(self.strings.len() - 1)
    }

    pub fn set_class_name(&mut self, name: StringRef) {
        self.class_name = Some(name);
    }

    pub fn set_property(&mut self, index: usize, name: StringRef, type_code: u32, flags: u32, notify_index: u32) {
        self.properties[index] = PropertyRecord {
            name_ref: name.0 as u32,
            type_code,
            flags,
            notify_index,
        };
    }

    pub fn set_signal(&mut self, index: usize, name: StringRef, params: &[StringRef]) {
        self.signals[index] = SignalRecord {
            name_ref: name.0 as u32,
            params: params.iter().map(|r| r.0 as u32).collect(),
        };
    }

    pub fn set_method(&mut self, index: usize, name: StringRef, params: &[StringRef], body: impl Into<String>, line: u32) {
        self.methods[index] = MethodRecord {
            name_ref: name.0 as u32,
            params: params.iter().map(|r| r.0 as u32).collect(),
            body: body.into(),
            line,
        };
    }

    pub fn set_alias(&mut self, index: usize, target_id: u32, encoded_prop_idx: u32, flags: u32) {
        self.aliases[index] = AliasRecord {
            target_id,
            encoded_prop_idx,
            flags,
        };
    }

    /// Serialize the descriptor.
    pub fn build(&self) -> Vec<u8> {
        let header_words = 7;
        let property_words = 4 * self.properties.len();
        let signal_words = 3 * self.signals.len();
        let method_words = 6 * self.methods.len();
        let alias_words = 3 * self.aliases.len();
        let param_count: usize = self.signals.iter().map(|s| s.params.len()).sum::<usize>()
            + self.methods.iter().map(|m| m.params.len()).sum::<usize>();

        let param_table_offset =
            4 * (header_words + property_words + signal_words + method_words + alias_words);
        let string_table_offset = param_table_offset + 4 * param_count;

        let mut out = Vec::new();
        let push = |out: &mut Vec<u8>, v: u32| out.extend_from_slice(&v.to_le_bytes());

        push(&mut out, self.class_name.map_or(0, |r| r.0 as u32));
        push(&mut out, self.properties.len() as u32);
        push(&mut out, self.signals.len() as u32);
        push(&mut out, self.methods.len() as u32);
        push(&mut out, self.aliases.len() as u32);
        push(&mut out, param_table_offset as u32);
        push(&mut out, string_table_offset as u32);

        for p in &self.properties {
            push(&mut out, p.name_ref);
            push(&mut out, p.type_code);
            push(&mut out, p.flags);
            push(&mut out, p.notify_index);
        }

        // Parameter slices are laid out in record order.
        let mut param_cursor = 0u32;
        for s in &self.signals {
            push(&mut out, s.name_ref);
            push(&mut out, param_cursor);
            push(&mut out, s.params.len() as u32);
            param_cursor += s.params.len() as u32;
        }

        // Method bodies follow the string table; offsets are filled after
        // its size is known.
        let mut body_cursor = 0u32;
        let mut body_bytes = Vec::new();
        for m in &self.methods {
            push(&mut out, m.name_ref);
            push(&mut out, param_cursor);
            push(&mut out, m.params.len() as u32);
            push(&mut out, body_cursor);
            push(&mut out, m.body.len() as u32);
            push(&mut out, m.line);
            param_cursor += m.params.len() as u32;
            body_cursor += m.body.len() as u32;
            body_bytes.extend_from_slice(m.body.as_bytes());
        }

        for a in &self.aliases {
            push(&mut out, a.target_id);
            push(&mut out, a.encoded_prop_idx);
            push(&mut out, a.flags);
        }

        debug_assert_eq!(out.len(), param_table_offset);
        for s in &self.signals {
            for &p in &s.params {
                push(&mut out, p);
            }
        }
        for m in &self.methods {
            for &p in &m.params {
                push(&mut out, p);
            }
        }

        debug_assert_eq!(out.len(), string_table_offset);
        push(&mut out, self.strings.len() as u32);
        let mut offset = 0u32;
        for s in &self.strings {
            push(&mut out, offset);
            push(&mut out, s.len() as u32);
            offset += s.len() as u32;
        }
        for s in &self.strings {
            out.extend_from_slice(s.as_bytes());
        }

        out.extend_from_slice(&body_bytes);
        out
    }

    /// Serialize just the alias table, for consumers that patch alias flags
    /// without decoding the whole descriptor.
    pub fn build_alias_data(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 * self.aliases.len());
        for a in &self.aliases {
            out.extend_from_slice(&a.target_id.to_le_bytes());
            out.extend_from_slice(&a.encoded_prop_idx.to_le_bytes());
            out.extend_from_slice(&a.flags.to_le_bytes());
        }
        out
    }

    /// Number of interned strings so far.
    pub fn string_count(&self) -> usize {
        self.strings.len()
    }

    /// The interned strings, in descriptor order.
    pub fn strings(&self) -> &[String] {
        &self.strings
    }
}

/// Pack an alias target: the property index of the aliased property on the
/// target object, plus the value-type sub-property coordinates when the
/// alias reaches through a value type.
pub fn encode_alias_property(property_index: u32, value_type_kind: u32, value_type_sub_index: u32) -> u32 {
    debug_assert!(property_index <= 0xFFFF);
    debug_assert!(value_type_sub_index <= 0xFF);
    property_index | value_type_kind << 24 | value_type_sub_index << 16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_output() {
        let build = || {
            let mut b = MetaBuilder::new(1, 1, 0, 0);
            let class = b.new_string("Thing_QML_0");
            b.set_class_name(class);
            let name = b.new_string("x");
            let changed = b.new_string("xChanged");
            b.set_property(0, name, 2, PROPERTY_WRITABLE, 0);
            b.set_signal(0, changed, &[]);
            b.build()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn changed_signal_follows_property_name() {
        let mut b = MetaBuilder::new(1, 1, 0, 0);
        let class = b.new_string("T");
        b.set_class_name(class);
        let name = b.new_string("width");
        let changed = b.new_string("widthChanged");
        assert_eq!(changed.0, name.0 + 1);
        assert_eq!(b.strings()[name.0], "width");
        assert_eq!(b.strings()[changed.0], "widthChanged");
    }

    #[test]
    fn alias_encoding() {
        let packed = encode_alias_property(7, 14, 2);
        assert_eq!(packed & 0xFFFF, 7);
        assert_eq!(packed >> 24, 14);
        assert_eq!((packed >> 16) & 0xFF, 2);
    }
}
