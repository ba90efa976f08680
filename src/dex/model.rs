//! Value-level classes, members and method bodies, as built by callers or read from a file.

use std::cmp::Ordering;

use bitflags::bitflags;

use crate::dex::encoded_values::{Annotation, EncodedValue};
use crate::dex::instructions::Instruction;
use crate::dex::references::{type_register_count, FieldRef, MethodRef, ProtoRef};

bitflags! {
    /// Access flags shared by classes, fields and methods. Some bits mean different things
    /// depending on what they are attached to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x1;
        const PRIVATE = 0x2;
        const PROTECTED = 0x4;
        const STATIC = 0x8;
        const FINAL = 0x10;
        const SYNCHRONIZED = 0x20;
        const VOLATILE = 0x40;
        const BRIDGE = 0x40;
        const TRANSIENT = 0x80;
        const VARARGS = 0x80;
        const NATIVE = 0x100;
        const INTERFACE = 0x200;
        const ABSTRACT = 0x400;
        const STRICT = 0x800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const CONSTRUCTOR = 0x10000;
        const DECLARED_SYNCHRONIZED = 0x20000;
    }
}

/// Orders strings by UTF-16 code units, the order the format requires for string ids.
pub fn compare_utf16(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    pub class_type: String,
    pub access_flags: AccessFlags,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub source_file: Option<String>,
    pub annotations: Vec<Annotation>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
}

impl ClassDef {
    pub fn new(class_type: &str, access_flags: AccessFlags, superclass: Option<&str>) -> ClassDef {
        ClassDef {
            class_type: class_type.to_string(),
            access_flags,
            superclass: superclass.map(|s| s.to_string()),
            interfaces: vec![],
            source_file: None,
            annotations: vec![],
            fields: vec![],
            methods: vec![],
        }
    }

    /// Static fields in name then type order.
    pub fn static_fields(&self) -> Vec<&Field> {
        let mut fields: Vec<&Field> = self.fields.iter().filter(|f| f.is_static()).collect();
        fields.sort_by(|a, b| a.compare_key(b));
        fields
    }

    pub fn instance_fields(&self) -> Vec<&Field> {
        let mut fields: Vec<&Field> = self.fields.iter().filter(|f| !f.is_static()).collect();
        fields.sort_by(|a, b| a.compare_key(b));
        fields
    }

    pub fn direct_methods(&self) -> Vec<&Method> {
        self.methods.iter().filter(|m| m.is_direct()).collect()
    }

    pub fn virtual_methods(&self) -> Vec<&Method> {
        self.methods.iter().filter(|m| !m.is_direct()).collect()
    }

    /// The static value array, trimmed after the last field whose value is not its type's
    /// default. `None` when every static field has a default value.
    pub fn static_initializers(&self) -> Option<Vec<EncodedValue>> {
        let values: Vec<EncodedValue> = self
            .static_fields()
            .into_iter()
            .map(|f| f.initial_value.clone().unwrap_or_else(|| EncodedValue::default_for_type(&f.field_type)))
            .collect();
        let last = values.iter().rposition(|v| !v.is_default_value())?;
        Some(values[..=last].to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub defining_class: String,
    pub name: String,
    pub field_type: String,
    pub access_flags: AccessFlags,
    pub initial_value: Option<EncodedValue>,
    pub annotations: Vec<Annotation>,
}

impl Field {
    pub fn new(defining_class: &str, name: &str, field_type: &str, access_flags: AccessFlags) -> Field {
        Field {
            defining_class: defining_class.to_string(),
            name: name.to_string(),
            field_type: field_type.to_string(),
            access_flags,
            initial_value: None,
            annotations: vec![],
        }
    }

    pub fn with_initial_value(mut self, value: EncodedValue) -> Field {
        self.initial_value = Some(value);
        self
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(AccessFlags::STATIC)
    }

    pub fn field_ref(&self) -> FieldRef {
        FieldRef::new(&self.defining_class, &self.name, &self.field_type)
    }

    fn compare_key(&self, other: &Field) -> Ordering {
        compare_utf16(&self.name, &other.name).then_with(|| compare_utf16(&self.field_type, &other.field_type))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodParameter {
    pub param_type: String,
    pub name: Option<String>,
    pub annotations: Vec<Annotation>,
}

impl MethodParameter {
    pub fn new(param_type: &str) -> MethodParameter {
        MethodParameter { param_type: param_type.to_string(), name: None, annotations: vec![] }
    }

    pub fn named(param_type: &str, name: &str) -> MethodParameter {
        MethodParameter { param_type: param_type.to_string(), name: Some(name.to_string()), annotations: vec![] }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub defining_class: String,
    pub name: String,
    pub parameters: Vec<MethodParameter>,
    pub return_type: String,
    pub access_flags: AccessFlags,
    pub annotations: Vec<Annotation>,
    pub implementation: Option<MethodImplementation>,
}

impl Method {
    pub fn new(
        defining_class: &str,
        name: &str,
        parameters: Vec<MethodParameter>,
        return_type: &str,
        access_flags: AccessFlags,
    ) -> Method {
        Method {
            defining_class: defining_class.to_string(),
            name: name.to_string(),
            parameters,
            return_type: return_type.to_string(),
            access_flags,
            annotations: vec![],
            implementation: None,
        }
    }

    pub fn with_implementation(mut self, implementation: MethodImplementation) -> Method {
        self.implementation = Some(implementation);
        self
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(AccessFlags::STATIC)
    }

    /// Static, private and constructor methods live in the direct method list.
    pub fn is_direct(&self) -> bool {
        self.access_flags.intersects(AccessFlags::STATIC | AccessFlags::PRIVATE | AccessFlags::CONSTRUCTOR)
    }

    pub fn proto(&self) -> ProtoRef {
        ProtoRef {
            parameters: self.parameters.iter().map(|p| p.param_type.clone()).collect(),
            return_type: self.return_type.clone(),
        }
    }

    pub fn method_ref(&self) -> MethodRef {
        MethodRef { defining_class: self.defining_class.clone(), name: self.name.clone(), proto: self.proto() }
    }

    /// Registers taken by the incoming arguments, `this` included.
    pub fn ins_size(&self) -> u16 {
        let params: u16 = self.parameters.iter().map(|p| type_register_count(&p.param_type)).sum();
        if self.is_static() { params } else { params + 1 }
    }

    /// Annotation lists per parameter, with the trailing unannotated parameters dropped.
    pub fn parameter_annotations(&self) -> Vec<&[Annotation]> {
        match self.parameters.iter().rposition(|p| !p.annotations.is_empty()) {
            Some(last) => self.parameters[..=last].iter().map(|p| p.annotations.as_slice()).collect(),
            None => vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodImplementation {
    pub registers: u16,
    pub instructions: Vec<Instruction>,
    pub try_blocks: Vec<TryBlock>,
    pub debug_items: Vec<DebugItem>,
}

impl MethodImplementation {
    pub fn new(registers: u16, instructions: Vec<Instruction>) -> MethodImplementation {
        MethodImplementation { registers, instructions, try_blocks: vec![], debug_items: vec![] }
    }

    /// Each instruction paired with its code address.
    pub fn addressed_instructions(&self) -> Vec<(u32, &Instruction)> {
        let mut address = 0u32;
        let mut result = Vec::with_capacity(self.instructions.len());
        for instruction in &self.instructions {
            result.push((address, instruction));
            address += instruction.size_in_code_units(address) as u32;
        }
        result
    }
}

/// A range of code units guarded by a list of handlers, in match order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TryBlock {
    pub start_address: u32,
    pub code_unit_count: u16,
    pub handlers: Vec<ExceptionHandler>,
}

/// `exception_type` of `None` catches everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExceptionHandler {
    pub exception_type: Option<String>,
    pub handler_address: u32,
}

impl ExceptionHandler {
    pub fn new(exception_type: Option<&str>, handler_address: u32) -> ExceptionHandler {
        ExceptionHandler { exception_type: exception_type.map(|s| s.to_string()), handler_address }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugItem {
    LineNumber { address: u32, line: u32 },
    StartLocal {
        address: u32,
        register: u16,
        name: Option<String>,
        local_type: Option<String>,
        signature: Option<String>,
    },
    EndLocal { address: u32, register: u16 },
    RestartLocal { address: u32, register: u16 },
    PrologueEnd { address: u32 },
    EpilogueBegin { address: u32 },
    SetSourceFile { address: u32, source_file: Option<String> },
}

impl DebugItem {
    pub fn address(&self) -> u32 {
        match self {
            DebugItem::LineNumber { address, .. }
            | DebugItem::StartLocal { address, .. }
            | DebugItem::EndLocal { address, .. }
            | DebugItem::RestartLocal { address, .. }
            | DebugItem::PrologueEnd { address }
            | DebugItem::EpilogueBegin { address }
            | DebugItem::SetSourceFile { address, .. } => *address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_int(name: &str, value: Option<i32>) -> Field {
        let field = Field::new("LA;", name, "I", AccessFlags::STATIC);
        match value {
            Some(v) => field.with_initial_value(EncodedValue::Int(v)),
            None => field,
        }
    }

    #[test]
    fn test_static_initializer_trailing_defaults_dropped() {
        let mut class = ClassDef::new("LA;", AccessFlags::PUBLIC, Some("Ljava/lang/Object;"));
        class.fields = vec![static_int("f0", Some(0)), static_int("f1", Some(5)), static_int("f2", Some(0))];
        assert_eq!(class.static_initializers(), Some(vec![EncodedValue::Int(0), EncodedValue::Int(5)]));
    }

    #[test]
    fn test_static_initializer_all_default_is_absent() {
        let mut class = ClassDef::new("LA;", AccessFlags::PUBLIC, None);
        class.fields = vec![static_int("f0", Some(0)), static_int("f1", None)];
        assert_eq!(class.static_initializers(), None);

        class.fields.push(Field::new("LA;", "s", "Ljava/lang/String;", AccessFlags::STATIC).with_initial_value(EncodedValue::Null));
        assert_eq!(class.static_initializers(), None);
    }

    #[test]
    fn test_static_initializer_uses_sorted_field_order() {
        let mut class = ClassDef::new("LA;", AccessFlags::PUBLIC, None);
        class.fields = vec![static_int("b", Some(0)), static_int("a", Some(3)), static_int("c", None)];
        assert_eq!(class.static_initializers(), Some(vec![EncodedValue::Int(3)]));
    }

    #[test]
    fn test_member_splits() {
        let mut class = ClassDef::new("LA;", AccessFlags::PUBLIC, None);
        class.fields = vec![static_int("s", None), Field::new("LA;", "i", "J", AccessFlags::PRIVATE)];
        class.methods = vec![
            Method::new("LA;", "<init>", vec![], "V", AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR),
            Method::new("LA;", "run", vec![MethodParameter::new("J"), MethodParameter::new("I")], "V", AccessFlags::PUBLIC),
        ];
        assert_eq!(class.static_fields().len(), 1);
        assert_eq!(class.instance_fields()[0].name, "i");
        assert_eq!(class.direct_methods()[0].name, "<init>");
        assert_eq!(class.virtual_methods()[0].ins_size(), 4);
        assert_eq!(class.virtual_methods()[0].proto().shorty(), "VJI");
    }

    #[test]
    fn test_parameter_annotations_trimmed() {
        use crate::dex::encoded_values::AnnotationVisibility;

        let annotated = MethodParameter {
            param_type: "I".to_string(),
            name: None,
            annotations: vec![Annotation::new(AnnotationVisibility::Runtime, "LNonNull;", vec![])],
        };
        let mut method = Method::new(
            "LA;",
            "m",
            vec![MethodParameter::new("I"), annotated, MethodParameter::new("I")],
            "V",
            AccessFlags::STATIC,
        );
        let lists = method.parameter_annotations();
        assert_eq!(lists.len(), 2);
        assert!(lists[0].is_empty());
        assert_eq!(lists[1][0].annotation_type, "LNonNull;");

        method.parameters[1].annotations.clear();
        assert!(method.parameter_annotations().is_empty());
    }

    #[test]
    fn test_utf16_order_differs_from_byte_order() {
        // U+FF5E sorts after U+1F600 in UTF-16 but before it in UTF-8 byte order.
        assert_eq!(compare_utf16("\u{ff5e}", "\u{1f600}"), Ordering::Greater);
        assert!("\u{ff5e}" < "\u{1f600}");
    }
}
