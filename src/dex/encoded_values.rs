use std::hash::{Hash, Hasher};

use crate::dex::error::DexError;
use crate::dex::references::{FieldRef, IndexResolver, MethodHandleRef, MethodRef, ProtoRef, ReferenceLookup};
use crate::dex::{read_u1, read_uleb128, write_u1, write_uleb128, write_x};

const VALUE_BYTE: u8 = 0x00;
const VALUE_SHORT: u8 = 0x02;
const VALUE_CHAR: u8 = 0x03;
const VALUE_INT: u8 = 0x04;
const VALUE_LONG: u8 = 0x06;
const VALUE_FLOAT: u8 = 0x10;
const VALUE_DOUBLE: u8 = 0x11;
const VALUE_METHOD_TYPE: u8 = 0x15;
const VALUE_METHOD_HANDLE: u8 = 0x16;
const VALUE_STRING: u8 = 0x17;
const VALUE_TYPE: u8 = 0x18;
const VALUE_FIELD: u8 = 0x19;
const VALUE_METHOD: u8 = 0x1a;
const VALUE_ENUM: u8 = 0x1b;
const VALUE_ARRAY: u8 = 0x1c;
const VALUE_ANNOTATION: u8 = 0x1d;
const VALUE_NULL: u8 = 0x1e;
const VALUE_BOOLEAN: u8 = 0x1f;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnnotationVisibility {
    Build,
    Runtime,
    System,
}

impl AnnotationVisibility {
    pub fn value(&self) -> u8 {
        match self {
            AnnotationVisibility::Build => 0x00,
            AnnotationVisibility::Runtime => 0x01,
            AnnotationVisibility::System => 0x02,
        }
    }

    pub fn from_value(value: u8) -> Result<AnnotationVisibility, DexError> {
        Ok(match value {
            0x00 => AnnotationVisibility::Build,
            0x01 => AnnotationVisibility::Runtime,
            0x02 => AnnotationVisibility::System,
            _ => fail!("Invalid annotation visibility: {}", value),
        })
    }
}

/// An annotation attached to a class, field, method or parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Annotation {
    pub visibility: AnnotationVisibility,
    pub annotation_type: String,
    pub elements: Vec<AnnotationElement>,
}

impl Annotation {
    pub fn new(visibility: AnnotationVisibility, annotation_type: &str, elements: Vec<AnnotationElement>) -> Annotation {
        Annotation { visibility, annotation_type: annotation_type.to_string(), elements }
    }

    pub fn encoded(&self) -> EncodedAnnotation {
        EncodedAnnotation { annotation_type: self.annotation_type.clone(), elements: self.elements.clone() }
    }
}

/// An annotation without visibility, as nested inside encoded values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedAnnotation {
    pub annotation_type: String,
    pub elements: Vec<AnnotationElement>,
}

impl EncodedAnnotation {
    pub fn read(bytes: &[u8], ix: &mut usize, lookup: &dyn ReferenceLookup) -> Result<EncodedAnnotation, DexError> {
        let type_idx = read_uleb128(bytes, ix)?;
        let size = read_uleb128(bytes, ix)? as usize;
        let mut elements = Vec::with_capacity(size.min(1024));

        for _ in 0..size {
            elements.push(AnnotationElement::read(bytes, ix, lookup)?);
        }

        Ok(EncodedAnnotation { annotation_type: lookup.type_desc(type_idx)?, elements })
    }

    /// Elements are written in string index order of their names, as the format requires.
    pub fn write(&self, bytes: &mut Vec<u8>, resolver: &dyn IndexResolver) -> Result<usize, DexError> {
        let mut written_bytes = 0;

        let mut elements = Vec::with_capacity(self.elements.len());
        for element in &self.elements {
            elements.push((resolver.string_index(&element.name)?, &element.value));
        }
        elements.sort_by_key(|(name_idx, _)| *name_idx);

        written_bytes += write_uleb128(bytes, resolver.type_index(&self.annotation_type)?);
        written_bytes += write_uleb128(bytes, elements.len() as u32);

        for (name_idx, value) in elements {
            written_bytes += write_uleb128(bytes, name_idx);
            written_bytes += value.write(bytes, resolver)?;
        }

        Ok(written_bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnnotationElement {
    pub name: String,
    pub value: EncodedValue,
}

impl AnnotationElement {
    pub fn new(name: &str, value: EncodedValue) -> AnnotationElement {
        AnnotationElement { name: name.to_string(), value }
    }

    pub fn read(bytes: &[u8], ix: &mut usize, lookup: &dyn ReferenceLookup) -> Result<AnnotationElement, DexError> {
        let name_idx = read_uleb128(bytes, ix)?;
        let value = EncodedValue::read(bytes, ix, lookup)?;

        Ok(AnnotationElement { name: lookup.string(name_idx)?, value })
    }
}

/// Any constant storable in the DEX value encoding.
///
/// Floating point values compare and hash by bit pattern, so `NaN` equals itself and `0.0`
/// differs from `-0.0`. That makes values usable as pool keys.
#[derive(Debug, Clone)]
pub enum EncodedValue {
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    MethodType(ProtoRef),
    MethodHandle(MethodHandleRef),
    String(String),
    Type(String),
    Field(FieldRef),
    Method(MethodRef),
    Enum(FieldRef),
    Array(Vec<EncodedValue>),
    Annotation(EncodedAnnotation),
    Null,
    Boolean(bool),
}

impl PartialEq for EncodedValue {
    fn eq(&self, other: &Self) -> bool {
        use EncodedValue::*;
        match (self, other) {
            (Byte(a), Byte(b)) => a == b,
            (Short(a), Short(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Long(a), Long(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Double(a), Double(b)) => a.to_bits() == b.to_bits(),
            (MethodType(a), MethodType(b)) => a == b,
            (MethodHandle(a), MethodHandle(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Type(a), Type(b)) => a == b,
            (Field(a), Field(b)) => a == b,
            (Method(a), Method(b)) => a == b,
            (Enum(a), Enum(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Annotation(a), Annotation(b)) => a == b,
            (Null, Null) => true,
            (Boolean(a), Boolean(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for EncodedValue {}

impl Hash for EncodedValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value_type().hash(state);
        match self {
            EncodedValue::Byte(v) => v.hash(state),
            EncodedValue::Short(v) => v.hash(state),
            EncodedValue::Char(v) => v.hash(state),
            EncodedValue::Int(v) => v.hash(state),
            EncodedValue::Long(v) => v.hash(state),
            EncodedValue::Float(v) => v.to_bits().hash(state),
            EncodedValue::Double(v) => v.to_bits().hash(state),
            EncodedValue::MethodType(v) => v.hash(state),
            EncodedValue::MethodHandle(v) => v.hash(state),
            EncodedValue::String(v) => v.hash(state),
            EncodedValue::Type(v) => v.hash(state),
            EncodedValue::Field(v) => v.hash(state),
            EncodedValue::Method(v) => v.hash(state),
            EncodedValue::Enum(v) => v.hash(state),
            EncodedValue::Array(v) => v.hash(state),
            EncodedValue::Annotation(v) => v.hash(state),
            EncodedValue::Null => {}
            EncodedValue::Boolean(v) => v.hash(state),
        }
    }
}

impl EncodedValue
{
    /// The implicit value a field of the given type holds when it has no initializer.
    pub fn default_for_type(type_descriptor: &str) -> EncodedValue
    {
        match type_descriptor
        {
            "Z" => EncodedValue::Boolean(false),
            "B" => EncodedValue::Byte(0),
            "S" => EncodedValue::Short(0),
            "C" => EncodedValue::Char(0),
            "I" => EncodedValue::Int(0),
            "J" => EncodedValue::Long(0),
            "F" => EncodedValue::Float(0.0),
            "D" => EncodedValue::Double(0.0),
            _ => EncodedValue::Null,
        }
    }

    /// True for zero, `false` and `null`. Negative zero is not a default.
    pub fn is_default_value(&self) -> bool
    {
        match self
        {
            EncodedValue::Byte(v) => *v == 0,
            EncodedValue::Short(v) => *v == 0,
            EncodedValue::Char(v) => *v == 0,
            EncodedValue::Int(v) => *v == 0,
            EncodedValue::Long(v) => *v == 0,
            EncodedValue::Float(v) => v.to_bits() == 0,
            EncodedValue::Double(v) => v.to_bits() == 0,
            EncodedValue::Null => true,
            EncodedValue::Boolean(v) => !*v,
            _ => false,
        }
    }

    pub fn value_type(&self) -> u8
    {
        match self
        {
            EncodedValue::Byte(_) => VALUE_BYTE,
            EncodedValue::Short(_) => VALUE_SHORT,
            EncodedValue::Char(_) => VALUE_CHAR,
            EncodedValue::Int(_) => VALUE_INT,
            EncodedValue::Long(_) => VALUE_LONG,
            EncodedValue::Float(_) => VALUE_FLOAT,
            EncodedValue::Double(_) => VALUE_DOUBLE,
            EncodedValue::MethodType(_) => VALUE_METHOD_TYPE,
            EncodedValue::MethodHandle(_) => VALUE_METHOD_HANDLE,
            EncodedValue::String(_) => VALUE_STRING,
            EncodedValue::Type(_) => VALUE_TYPE,
            EncodedValue::Field(_) => VALUE_FIELD,
            EncodedValue::Method(_) => VALUE_METHOD,
            EncodedValue::Enum(_) => VALUE_ENUM,
            EncodedValue::Array(_) => VALUE_ARRAY,
            EncodedValue::Annotation(_) => VALUE_ANNOTATION,
            EncodedValue::Null => VALUE_NULL,
            EncodedValue::Boolean(_) => VALUE_BOOLEAN,
        }
    }

    pub fn read(bytes: &[u8], ix: &mut usize, lookup: &dyn ReferenceLookup) -> Result<EncodedValue, DexError> {
        let header_byte = read_u1(bytes, ix)?;
        let value_arg = header_byte >> 5;
        let value_type = header_byte & 0x1F;
        let size = (value_arg + 1) as usize;

        Ok(match value_type {
            VALUE_BYTE => EncodedValue::Byte(read_signed(bytes, ix, 1)? as i8),
            VALUE_SHORT => EncodedValue::Short(read_signed(bytes, ix, checked(size, 2)?)? as i16),
            VALUE_CHAR => EncodedValue::Char(read_unsigned(bytes, ix, checked(size, 2)?)? as u16),
            VALUE_INT => EncodedValue::Int(read_signed(bytes, ix, checked(size, 4)?)? as i32),
            VALUE_LONG => EncodedValue::Long(read_signed(bytes, ix, checked(size, 8)?)?),
            VALUE_FLOAT => {
                let size = checked(size, 4)?;
                let raw = read_unsigned(bytes, ix, size)? << (8 * (4 - size));
                EncodedValue::Float(f32::from_bits(raw as u32))
            }
            VALUE_DOUBLE => {
                let size = checked(size, 8)?;
                let raw = read_unsigned(bytes, ix, size)? << (8 * (8 - size));
                EncodedValue::Double(f64::from_bits(raw))
            }
            VALUE_METHOD_TYPE => EncodedValue::MethodType(lookup.proto(read_index(bytes, ix, size)?)?),
            VALUE_METHOD_HANDLE => EncodedValue::MethodHandle(lookup.method_handle(read_index(bytes, ix, size)?)?),
            VALUE_STRING => EncodedValue::String(lookup.string(read_index(bytes, ix, size)?)?),
            VALUE_TYPE => EncodedValue::Type(lookup.type_desc(read_index(bytes, ix, size)?)?),
            VALUE_FIELD => EncodedValue::Field(lookup.field(read_index(bytes, ix, size)?)?),
            VALUE_METHOD => EncodedValue::Method(lookup.method(read_index(bytes, ix, size)?)?),
            VALUE_ENUM => EncodedValue::Enum(lookup.field(read_index(bytes, ix, size)?)?),
            VALUE_ARRAY => EncodedValue::Array(read_encoded_array(bytes, ix, lookup)?),
            VALUE_ANNOTATION => EncodedValue::Annotation(EncodedAnnotation::read(bytes, ix, lookup)?),
            VALUE_NULL => EncodedValue::Null,
            VALUE_BOOLEAN => EncodedValue::Boolean(value_arg != 0),
            _ => fail!("Unknown EncodedValue type 0x{:02x}", value_type),
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>, resolver: &dyn IndexResolver) -> Result<usize, DexError>
    {
        let mut c = 0;

        match self {
            EncodedValue::Byte(val) => {
                c += write_u1(bytes, VALUE_BYTE);
                c += write_u1(bytes, *val as u8);
            },
            EncodedValue::Short(value) => c += write_signed(bytes, VALUE_SHORT, *value as i64),
            EncodedValue::Char(value) => c += write_unsigned(bytes, VALUE_CHAR, *value as u64),
            EncodedValue::Int(value) => c += write_signed(bytes, VALUE_INT, *value as i64),
            EncodedValue::Long(value) => c += write_signed(bytes, VALUE_LONG, *value),
            EncodedValue::Float(value) => c += write_right_zero_extended(bytes, VALUE_FLOAT, (value.to_bits() as u64) << 32),
            EncodedValue::Double(value) => c += write_right_zero_extended(bytes, VALUE_DOUBLE, value.to_bits()),
            EncodedValue::MethodType(proto) => {
                c += write_unsigned(bytes, VALUE_METHOD_TYPE, resolver.proto_index(proto)? as u64);
            },
            EncodedValue::MethodHandle(handle) => {
                c += write_unsigned(bytes, VALUE_METHOD_HANDLE, resolver.method_handle_index(handle)? as u64);
            },
            EncodedValue::String(value) => {
                c += write_unsigned(bytes, VALUE_STRING, resolver.string_index(value)? as u64);
            },
            EncodedValue::Type(value) => {
                c += write_unsigned(bytes, VALUE_TYPE, resolver.type_index(value)? as u64);
            },
            EncodedValue::Field(field) => {
                c += write_unsigned(bytes, VALUE_FIELD, resolver.field_index(field)? as u64);
            },
            EncodedValue::Method(method) => {
                c += write_unsigned(bytes, VALUE_METHOD, resolver.method_index(method)? as u64);
            },
            EncodedValue::Enum(field) => {
                c += write_unsigned(bytes, VALUE_ENUM, resolver.field_index(field)? as u64);
            },
            EncodedValue::Array(values) => {
                c += write_u1(bytes, VALUE_ARRAY);
                c += write_encoded_array(values, bytes, resolver)?;
            },
            EncodedValue::Annotation(annotation) => {
                c += write_u1(bytes, VALUE_ANNOTATION);
                c += annotation.write(bytes, resolver)?;
            },
            EncodedValue::Null => {
                c += write_u1(bytes, VALUE_NULL);
            },
            EncodedValue::Boolean(val) => {
                let v = if *val { 1 } else { 0 };
                c += write_u1(bytes, VALUE_BOOLEAN | (v << 5));
            }
        }
        Ok(c)
    }
}

fn checked(size: usize, max: usize) -> Result<usize, DexError> {
    if size > max {
        fail!("Invalid encoded value size {} (at most {} bytes)", size, max);
    }
    Ok(size)
}

fn read_unsigned(bytes: &[u8], ix: &mut usize, size: usize) -> Result<u64, DexError> {
    let mut result = 0u64;
    for i in 0..size {
        let byte = read_u1(bytes, ix)?;
        result |= (byte as u64) << (8 * i);
    }
    Ok(result)
}

fn read_signed(bytes: &[u8], ix: &mut usize, size: usize) -> Result<i64, DexError> {
    let raw = read_unsigned(bytes, ix, size)?;
    let shift = 64 - 8 * size as u32;
    Ok(((raw << shift) as i64) >> shift)
}

fn read_index(bytes: &[u8], ix: &mut usize, size: usize) -> Result<u32, DexError> {
    Ok(read_unsigned(bytes, ix, checked(size, 4)?)? as u32)
}

/// Smallest byte count that holds `v` once sign-extended.
fn signed_size(v: i64) -> usize {
    let mut size = 1;
    while size < 8 {
        let shift = 64 - 8 * size as u32;
        if (v << shift) >> shift == v {
            break;
        }
        size += 1;
    }
    size
}

fn unsigned_size(v: u64) -> usize {
    let bits = 64 - v.leading_zeros() as usize;
    std::cmp::max(1, bits.div_ceil(8))
}

fn write_signed(bytes: &mut Vec<u8>, value_type: u8, value: i64) -> usize {
    let size = signed_size(value);
    let c = write_u1(bytes, ((size as u8 - 1) << 5) | value_type);
    c + write_x(bytes, &value.to_le_bytes()[..size])
}

fn write_unsigned(bytes: &mut Vec<u8>, value_type: u8, value: u64) -> usize {
    let size = unsigned_size(value);
    let c = write_u1(bytes, ((size as u8 - 1) << 5) | value_type);
    c + write_x(bytes, &value.to_le_bytes()[..size])
}

/// Floats keep their high-order bytes; trailing zero bytes on the right are dropped.
/// `value` is left-aligned in 64 bits.
fn write_right_zero_extended(bytes: &mut Vec<u8>, value_type: u8, value: u64) -> usize {
    let width = if value_type == VALUE_FLOAT { 4 } else { 8 };
    let trailing = (value.trailing_zeros() / 8) as usize;
    let size = std::cmp::max(1, 8 - std::cmp::min(trailing, 8)).min(width);
    let shifted = value >> (8 * (8 - size));
    let c = write_u1(bytes, ((size as u8 - 1) << 5) | value_type);
    c + write_x(bytes, &shifted.to_le_bytes()[..size])
}

pub fn write_encoded_array(encoded_array: &[EncodedValue], bytes: &mut Vec<u8>, resolver: &dyn IndexResolver) -> Result<usize, DexError>
{
    let mut c = 0;
    c += write_uleb128(bytes, encoded_array.len() as u32);

    for value in encoded_array {
        c += value.write(bytes, resolver)?;
    }

    Ok(c)
}

pub fn read_encoded_array(bytes: &[u8], ix: &mut usize, lookup: &dyn ReferenceLookup) -> Result<Vec<EncodedValue>, DexError>
{
    let size = read_uleb128(bytes, ix)? as usize;

    let mut values = Vec::with_capacity(size.min(1024));
    for _ in 0..size
    {
        values.push(EncodedValue::read(bytes, ix, lookup)?);
    }

    Ok(values)
}


#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dex::references::CallSiteRef;

    /// Resolves every string, type and member to a fixed index derived from its position in
    /// small lookup tables, and back again.
    pub(crate) struct TableResolver {
        pub strings: Vec<String>,
        pub types: Vec<String>,
        pub fields: Vec<FieldRef>,
    }

    impl TableResolver {
        pub fn new() -> TableResolver {
            TableResolver {
                strings: vec!["a".into(), "value".into(), "zeta".into()],
                types: vec!["I".into(), "La/Ann;".into(), "Ljava/lang/String;".into()],
                fields: vec![FieldRef::new("La/E;", "ONE", "La/E;")],
            }
        }
    }

    fn position<T: PartialEq>(items: &[T], item: &T, kind: &str) -> Result<u32, DexError> {
        items
            .iter()
            .position(|i| i == item)
            .map(|p| p as u32)
            .ok_or_else(|| DexError::new(&format!("{} not interned", kind)))
    }

    impl IndexResolver for TableResolver {
        fn string_index(&self, value: &str) -> Result<u32, DexError> { position(&self.strings, &value.to_string(), "String") }
        fn type_index(&self, descriptor: &str) -> Result<u32, DexError> { position(&self.types, &descriptor.to_string(), "Type") }
        fn proto_index(&self, _proto: &ProtoRef) -> Result<u32, DexError> { Err(DexError::new("no protos")) }
        fn field_index(&self, field: &FieldRef) -> Result<u32, DexError> { position(&self.fields, field, "Field") }
        fn method_index(&self, _method: &MethodRef) -> Result<u32, DexError> { Err(DexError::new("no methods")) }
        fn call_site_index(&self, _call_site: &CallSiteRef) -> Result<u32, DexError> { Err(DexError::new("no call sites")) }
        fn method_handle_index(&self, _handle: &MethodHandleRef) -> Result<u32, DexError> { Err(DexError::new("no handles")) }
    }

    impl ReferenceLookup for TableResolver {
        fn string(&self, idx: u32) -> Result<String, DexError> { Ok(self.strings[idx as usize].clone()) }
        fn type_desc(&self, idx: u32) -> Result<String, DexError> { Ok(self.types[idx as usize].clone()) }
        fn proto(&self, _idx: u32) -> Result<ProtoRef, DexError> { Err(DexError::new("no protos")) }
        fn field(&self, idx: u32) -> Result<FieldRef, DexError> { Ok(self.fields[idx as usize].clone()) }
        fn method(&self, _idx: u32) -> Result<MethodRef, DexError> { Err(DexError::new("no methods")) }
        fn call_site(&self, _idx: u32) -> Result<CallSiteRef, DexError> { Err(DexError::new("no call sites")) }
        fn method_handle(&self, _idx: u32) -> Result<MethodHandleRef, DexError> { Err(DexError::new("no handles")) }
    }

    fn encode(value: &EncodedValue) -> Vec<u8> {
        let mut out = vec![];
        value.write(&mut out, &TableResolver::new()).unwrap();
        out
    }

    fn decode(bytes: &[u8]) -> EncodedValue {
        let mut ix = 0;
        let value = EncodedValue::read(bytes, &mut ix, &TableResolver::new()).unwrap();
        assert_eq!(ix, bytes.len());
        value
    }

    #[test]
    fn test_encoded_value_byte() {
        let bytes = vec![0x00, 0x7F];
        assert_eq!(decode(&bytes), EncodedValue::Byte(127));
        assert_eq!(encode(&EncodedValue::Byte(127)), bytes);
    }

    #[test]
    fn test_encoded_value_short() {
        let bytes = vec![0x22, 0x34, 0x12];
        assert_eq!(decode(&bytes), EncodedValue::Short(0x1234));
        assert_eq!(encode(&EncodedValue::Short(0x1234)), bytes);
    }

    #[test]
    fn test_negative_values_use_minimal_size() {
        assert_eq!(encode(&EncodedValue::Int(-1)), vec![0x04, 0xFF]);
        assert_eq!(encode(&EncodedValue::Int(-129)), vec![0x24, 0x7F, 0xFF]);
        assert_eq!(encode(&EncodedValue::Int(128)), vec![0x24, 0x80, 0x00]);
        assert_eq!(encode(&EncodedValue::Long(i64::MIN)).len(), 9);
        assert_eq!(decode(&[0x24, 0x7F, 0xFF]), EncodedValue::Int(-129));
        assert_eq!(decode(&[0x04, 0xFF]), EncodedValue::Int(-1));
    }

    #[test]
    fn test_encoded_value_char_is_unsigned() {
        assert_eq!(encode(&EncodedValue::Char(0xFFFF)), vec![0x23, 0xFF, 0xFF]);
        assert_eq!(decode(&[0x03, 0xFF]), EncodedValue::Char(0xFF));
    }

    #[test]
    fn test_encoded_value_int() {
        let bytes = vec![0x64, 0x78, 0x56, 0x34, 0x12];
        assert_eq!(decode(&bytes), EncodedValue::Int(0x12345678));
        assert_eq!(encode(&EncodedValue::Int(0x12345678)), bytes);
    }

    #[test]
    fn test_float_keeps_high_bytes() {
        // 1.0f32 is 0x3f800000, so only the top two bytes are stored
        assert_eq!(encode(&EncodedValue::Float(1.0)), vec![0x30, 0x80, 0x3f]);
        assert_eq!(decode(&[0x30, 0x80, 0x3f]), EncodedValue::Float(1.0));
        // 2.0f64 is 0x4000000000000000
        assert_eq!(encode(&EncodedValue::Double(2.0)), vec![0x11, 0x40]);
        assert_eq!(decode(&[0x11, 0x40]), EncodedValue::Double(2.0));
        assert_eq!(encode(&EncodedValue::Float(0.0)), vec![0x10, 0x00]);
    }

    #[test]
    fn test_null_and_boolean() {
        assert_eq!(encode(&EncodedValue::Null), vec![0x1E]);
        assert_eq!(encode(&EncodedValue::Boolean(true)), vec![0x3F]);
        assert_eq!(encode(&EncodedValue::Boolean(false)), vec![0x1F]);
        assert_eq!(decode(&[0x3F]), EncodedValue::Boolean(true));
    }

    #[test]
    fn test_references_resolve_through_tables() {
        let value = EncodedValue::Array(vec![
            EncodedValue::String("zeta".into()),
            EncodedValue::Type("Ljava/lang/String;".into()),
            EncodedValue::Enum(FieldRef::new("La/E;", "ONE", "La/E;")),
        ]);
        let bytes = encode(&value);
        assert_eq!(bytes, vec![0x1c, 0x03, 0x17, 0x02, 0x18, 0x02, 0x1b, 0x00]);
        assert_eq!(decode(&bytes), value);

        let mut out = vec![];
        let missing = EncodedValue::String("missing".into()).write(&mut out, &TableResolver::new());
        assert_eq!(missing.unwrap_err().to_string(), "String not interned");
    }

    #[test]
    fn test_encoded_annotation_sorts_elements() {
        let annotation = EncodedAnnotation {
            annotation_type: "La/Ann;".into(),
            elements: vec![
                AnnotationElement::new("zeta", EncodedValue::Int(42)),
                AnnotationElement::new("a", EncodedValue::Boolean(true)),
            ],
        };

        let mut bytes = vec![];
        annotation.write(&mut bytes, &TableResolver::new()).unwrap();
        assert_eq!(bytes, vec![0x01, 0x02, 0x00, 0x3F, 0x02, 0x04, 0x2A]);

        let mut ix = 0;
        let read = EncodedAnnotation::read(&bytes, &mut ix, &TableResolver::new()).unwrap();
        assert_eq!(read.elements[0].name, "a");
        assert_eq!(read.elements[1].value, EncodedValue::Int(42));
    }

    #[test]
    fn test_defaults() {
        assert!(EncodedValue::default_for_type("I").is_default_value());
        assert!(EncodedValue::default_for_type("Ljava/lang/Object;").is_default_value());
        assert!(!EncodedValue::Float(-0.0).is_default_value());
        assert!(!EncodedValue::String(String::new()).is_default_value());
        assert_eq!(EncodedValue::Double(f64::NAN), EncodedValue::Double(f64::NAN));
        assert_ne!(EncodedValue::Int(0), EncodedValue::Long(0));
    }
}
