//! Value-level references to constant pool items.
//!
//! A reference identifies an item by its defining fields rather than by an index, so equal
//! references read from different files, or built by hand, compare and hash equal.

use std::fmt;

use crate::dex::encoded_values::EncodedValue;
use crate::dex::error::DexError;
use crate::dex::opcode_format::ReferenceType;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef {
    pub defining_class: String,
    pub name: String,
    pub field_type: String,
}

impl FieldRef {
    pub fn new(defining_class: &str, name: &str, field_type: &str) -> FieldRef {
        FieldRef {
            defining_class: defining_class.to_string(),
            name: name.to_string(),
            field_type: field_type.to_string(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}:{}", self.defining_class, self.name, self.field_type)
    }
}

/// A method prototype: parameter types and return type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtoRef {
    pub parameters: Vec<String>,
    pub return_type: String,
}

impl ProtoRef {
    pub fn new(parameters: &[&str], return_type: &str) -> ProtoRef {
        ProtoRef {
            parameters: parameters.iter().map(|p| p.to_string()).collect(),
            return_type: return_type.to_string(),
        }
    }

    /// The short form descriptor: return type first, then one character per parameter.
    /// Reference and array types collapse to `L`.
    pub fn shorty(&self) -> String {
        let mut shorty = String::with_capacity(self.parameters.len() + 1);
        shorty.push(shorty_char(&self.return_type));
        for p in &self.parameters {
            shorty.push(shorty_char(p));
        }
        shorty
    }

    /// Number of registers the parameters occupy. Wide types take two.
    pub fn parameter_register_count(&self) -> u16 {
        self.parameters.iter().map(|p| type_register_count(p)).sum()
    }
}

impl fmt::Display for ProtoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for p in &self.parameters {
            write!(f, "{}", p)?;
        }
        write!(f, "){}", self.return_type)
    }
}

pub(crate) fn shorty_char(type_descriptor: &str) -> char {
    match type_descriptor.chars().next() {
        Some('[') | Some('L') | None => 'L',
        Some(c) => c,
    }
}

pub(crate) fn type_register_count(type_descriptor: &str) -> u16 {
    match type_descriptor {
        "J" | "D" => 2,
        _ => 1,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef {
    pub defining_class: String,
    pub name: String,
    pub proto: ProtoRef,
}

impl MethodRef {
    pub fn new(defining_class: &str, name: &str, parameters: &[&str], return_type: &str) -> MethodRef {
        MethodRef {
            defining_class: defining_class.to_string(),
            name: name.to_string(),
            proto: ProtoRef::new(parameters, return_type),
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}{}", self.defining_class, self.name, self.proto)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MethodHandleKind {
    StaticPut,
    StaticGet,
    InstancePut,
    InstanceGet,
    InvokeStatic,
    InvokeInstance,
    InvokeConstructor,
    InvokeDirect,
    InvokeInterface,
}

impl MethodHandleKind {
    pub fn value(&self) -> u16 {
        match self {
            MethodHandleKind::StaticPut => 0x00,
            MethodHandleKind::StaticGet => 0x01,
            MethodHandleKind::InstancePut => 0x02,
            MethodHandleKind::InstanceGet => 0x03,
            MethodHandleKind::InvokeStatic => 0x04,
            MethodHandleKind::InvokeInstance => 0x05,
            MethodHandleKind::InvokeConstructor => 0x06,
            MethodHandleKind::InvokeDirect => 0x07,
            MethodHandleKind::InvokeInterface => 0x08,
        }
    }

    pub fn from_value(value: u16) -> Result<MethodHandleKind, DexError> {
        Ok(match value {
            0x00 => MethodHandleKind::StaticPut,
            0x01 => MethodHandleKind::StaticGet,
            0x02 => MethodHandleKind::InstancePut,
            0x03 => MethodHandleKind::InstanceGet,
            0x04 => MethodHandleKind::InvokeStatic,
            0x05 => MethodHandleKind::InvokeInstance,
            0x06 => MethodHandleKind::InvokeConstructor,
            0x07 => MethodHandleKind::InvokeDirect,
            0x08 => MethodHandleKind::InvokeInterface,
            _ => fail!("Invalid method handle type: {}", value),
        })
    }

    pub fn is_field_accessor(&self) -> bool {
        matches!(
            self,
            MethodHandleKind::StaticPut
                | MethodHandleKind::StaticGet
                | MethodHandleKind::InstancePut
                | MethodHandleKind::InstanceGet
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MethodHandleTarget {
    Field(FieldRef),
    Method(MethodRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodHandleRef {
    pub kind: MethodHandleKind,
    pub target: MethodHandleTarget,
}

impl MethodHandleRef {
    /// Builds a handle, checking that field accessor kinds point at fields and invoke kinds at methods.
    pub fn new(kind: MethodHandleKind, target: MethodHandleTarget) -> Result<MethodHandleRef, DexError> {
        let is_field = matches!(target, MethodHandleTarget::Field(_));
        if kind.is_field_accessor() != is_field {
            fail!("Method handle kind {:?} does not match its target", kind);
        }
        Ok(MethodHandleRef { kind, target })
    }
}

impl fmt::Display for MethodHandleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            MethodHandleTarget::Field(field) => write!(f, "{:?}@{}", self.kind, field),
            MethodHandleTarget::Method(method) => write!(f, "{:?}@{}", self.kind, method),
        }
    }
}

/// A call site: bootstrap method handle plus the name, prototype and extra static arguments
/// passed to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSiteRef {
    pub name: String,
    pub method_handle: MethodHandleRef,
    pub method_name: String,
    pub method_proto: ProtoRef,
    pub extra_arguments: Vec<EncodedValue>,
}

impl CallSiteRef {
    /// The encoded array stored in the call site item: handle, name, prototype, then extras.
    pub fn encoded_array(&self) -> Vec<EncodedValue> {
        let mut values = Vec::with_capacity(3 + self.extra_arguments.len());
        values.push(EncodedValue::MethodHandle(self.method_handle.clone()));
        values.push(EncodedValue::String(self.method_name.clone()));
        values.push(EncodedValue::MethodType(self.method_proto.clone()));
        values.extend(self.extra_arguments.iter().cloned());
        values
    }

    pub fn from_encoded_array(name: &str, values: Vec<EncodedValue>) -> Result<CallSiteRef, DexError> {
        let mut values = values.into_iter();
        let method_handle = match values.next() {
            Some(EncodedValue::MethodHandle(h)) => h,
            other => fail!("Call site {} must start with a method handle, found {:?}", name, other),
        };
        let method_name = match values.next() {
            Some(EncodedValue::String(s)) => s,
            other => fail!("Call site {} is missing its method name, found {:?}", name, other),
        };
        let method_proto = match values.next() {
            Some(EncodedValue::MethodType(p)) => p,
            other => fail!("Call site {} is missing its method type, found {:?}", name, other),
        };
        Ok(CallSiteRef {
            name: name.to_string(),
            method_handle,
            method_name,
            method_proto,
            extra_arguments: values.collect(),
        })
    }
}

impl fmt::Display for CallSiteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, {})@{}", self.name, self.method_name, self.method_proto, self.method_handle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    String(String),
    Type(String),
    Field(FieldRef),
    Method(MethodRef),
    MethodProto(ProtoRef),
    CallSite(CallSiteRef),
    MethodHandle(MethodHandleRef),
}

impl Reference {
    pub fn reference_type(&self) -> ReferenceType {
        match self {
            Reference::String(_) => ReferenceType::String,
            Reference::Type(_) => ReferenceType::Type,
            Reference::Field(_) => ReferenceType::Field,
            Reference::Method(_) => ReferenceType::Method,
            Reference::MethodProto(_) => ReferenceType::MethodProto,
            Reference::CallSite(_) => ReferenceType::CallSite,
            Reference::MethodHandle(_) => ReferenceType::MethodHandle,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::String(s) => write!(f, "\"{}\"", s),
            Reference::Type(t) => write!(f, "{}", t),
            Reference::Field(r) => write!(f, "{}", r),
            Reference::Method(r) => write!(f, "{}", r),
            Reference::MethodProto(r) => write!(f, "{}", r),
            Reference::CallSite(r) => write!(f, "{}", r),
            Reference::MethodHandle(r) => write!(f, "{}", r),
        }
    }
}

/// Maps references to the indices they were assigned in an output file.
pub trait IndexResolver {
    fn string_index(&self, value: &str) -> Result<u32, DexError>;
    fn type_index(&self, descriptor: &str) -> Result<u32, DexError>;
    fn proto_index(&self, proto: &ProtoRef) -> Result<u32, DexError>;
    fn field_index(&self, field: &FieldRef) -> Result<u32, DexError>;
    fn method_index(&self, method: &MethodRef) -> Result<u32, DexError>;
    fn call_site_index(&self, call_site: &CallSiteRef) -> Result<u32, DexError>;
    fn method_handle_index(&self, handle: &MethodHandleRef) -> Result<u32, DexError>;

    fn reference_index(&self, reference: &Reference) -> Result<u32, DexError> {
        match reference {
            Reference::String(s) => self.string_index(s),
            Reference::Type(t) => self.type_index(t),
            Reference::Field(r) => self.field_index(r),
            Reference::Method(r) => self.method_index(r),
            Reference::MethodProto(r) => self.proto_index(r),
            Reference::CallSite(r) => self.call_site_index(r),
            Reference::MethodHandle(r) => self.method_handle_index(r),
        }
    }
}

/// Maps the indices of an input file back to references.
pub trait ReferenceLookup {
    fn string(&self, idx: u32) -> Result<String, DexError>;
    fn type_desc(&self, idx: u32) -> Result<String, DexError>;
    fn proto(&self, idx: u32) -> Result<ProtoRef, DexError>;
    fn field(&self, idx: u32) -> Result<FieldRef, DexError>;
    fn method(&self, idx: u32) -> Result<MethodRef, DexError>;
    fn call_site(&self, idx: u32) -> Result<CallSiteRef, DexError>;
    fn method_handle(&self, idx: u32) -> Result<MethodHandleRef, DexError>;

    fn reference(&self, reference_type: ReferenceType, idx: u32) -> Result<Reference, DexError> {
        Ok(match reference_type {
            ReferenceType::String => Reference::String(self.string(idx)?),
            ReferenceType::Type => Reference::Type(self.type_desc(idx)?),
            ReferenceType::Field => Reference::Field(self.field(idx)?),
            ReferenceType::Method => Reference::Method(self.method(idx)?),
            ReferenceType::MethodProto => Reference::MethodProto(self.proto(idx)?),
            ReferenceType::CallSite => Reference::CallSite(self.call_site(idx)?),
            ReferenceType::MethodHandle => Reference::MethodHandle(self.method_handle(idx)?),
            ReferenceType::None => fail!("Instruction has no reference to resolve (index {})", idx),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_shorty() {
        let proto = ProtoRef::new(&["I", "[Ljava/lang/String;", "J", "Ljava/lang/Object;"], "V");
        assert_eq!(proto.shorty(), "VILJL");
        assert_eq!(proto.parameter_register_count(), 5);
        assert_eq!(ProtoRef::new(&[], "[I").shorty(), "L");
    }

    #[test]
    fn test_structural_equality() {
        let a = MethodRef::new("La;", "b", &["I"], "V");
        let b = MethodRef::new("La;", "b", &["I"], "V");
        let c = MethodRef::new("La;", "b", &["J"], "V");
        let set: HashSet<Reference> =
            vec![Reference::Method(a), Reference::Method(b), Reference::Method(c)].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_method_handle_target_checked() {
        let field = FieldRef::new("La;", "x", "I");
        assert!(MethodHandleRef::new(MethodHandleKind::StaticGet, MethodHandleTarget::Field(field.clone())).is_ok());
        assert!(MethodHandleRef::new(MethodHandleKind::InvokeStatic, MethodHandleTarget::Field(field)).is_err());
        assert_eq!(MethodHandleKind::from_value(8).unwrap(), MethodHandleKind::InvokeInterface);
        assert!(MethodHandleKind::from_value(9).is_err());
    }

    #[test]
    fn test_display() {
        let m = MethodRef::new("La;", "b", &["I", "J"], "V");
        assert_eq!(m.to_string(), "La;->b(IJ)V");
        let f = FieldRef::new("La;", "x", "I");
        assert_eq!(Reference::Field(f).to_string(), "La;->x:I");
    }
}
