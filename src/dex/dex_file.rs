/* Dex file format structures and a reader that turns an image back into classes */

use std::collections::HashMap;

use cesu8::to_java_cesu8;
use log::{debug, warn};

use crate::dex::annotations::{read_annotation_item, AnnotationsDirectoryItem, OffsetList};
use crate::dex::decoder::InstructionIterator;
use crate::dex::encoded_values::{read_encoded_array, Annotation};
use crate::dex::error::DexError;
use crate::dex::model::{AccessFlags, ClassDef, DebugItem, ExceptionHandler, Field, Method, MethodImplementation, MethodParameter, TryBlock};
use crate::dex::opcodes::Opcodes;
use crate::dex::references::{CallSiteRef, FieldRef, MethodHandleKind, MethodHandleRef, MethodHandleTarget, MethodRef, ProtoRef, ReferenceLookup};
use crate::dex::{read_sleb128, read_u1, read_u2, read_u4, read_uleb128, read_uleb128p1, read_x, write_sleb128, write_u1, write_u2, write_u4, write_uleb128, write_x};

/* Constants */
pub const DEX_FILE_MAGIC_PREFIX: [u8; 4] = [0x64, 0x65, 0x78, 0x0a];
pub const ENDIAN_CONSTANT: u32 = 0x12345678;
pub const REVERSE_ENDIAN_CONSTANT: u32 = 0x78563412;
pub const NO_INDEX: u32 = 0xffffffff;
pub const HEADER_SIZE: u32 = 0x70;

/* Map item type codes */
pub const TYPE_HEADER_ITEM: u16 = 0x0000;
pub const TYPE_STRING_ID_ITEM: u16 = 0x0001;
pub const TYPE_TYPE_ID_ITEM: u16 = 0x0002;
pub const TYPE_PROTO_ID_ITEM: u16 = 0x0003;
pub const TYPE_FIELD_ID_ITEM: u16 = 0x0004;
pub const TYPE_METHOD_ID_ITEM: u16 = 0x0005;
pub const TYPE_CLASS_DEF_ITEM: u16 = 0x0006;
pub const TYPE_CALL_SITE_ID_ITEM: u16 = 0x0007;
pub const TYPE_METHOD_HANDLE_ITEM: u16 = 0x0008;
pub const TYPE_MAP_LIST: u16 = 0x1000;
pub const TYPE_TYPE_LIST: u16 = 0x1001;
pub const TYPE_ANNOTATION_SET_REF_LIST: u16 = 0x1002;
pub const TYPE_ANNOTATION_SET_ITEM: u16 = 0x1003;
pub const TYPE_CLASS_DATA_ITEM: u16 = 0x2000;
pub const TYPE_CODE_ITEM: u16 = 0x2001;
pub const TYPE_STRING_DATA_ITEM: u16 = 0x2002;
pub const TYPE_DEBUG_INFO_ITEM: u16 = 0x2003;
pub const TYPE_ANNOTATION_ITEM: u16 = 0x2004;
pub const TYPE_ENCODED_ARRAY_ITEM: u16 = 0x2005;
pub const TYPE_ANNOTATIONS_DIRECTORY_ITEM: u16 = 0x2006;

/* Debug info state machine */
pub const DBG_END_SEQUENCE: u8 = 0x00;
pub const DBG_ADVANCE_PC: u8 = 0x01;
pub const DBG_ADVANCE_LINE: u8 = 0x02;
pub const DBG_START_LOCAL: u8 = 0x03;
pub const DBG_START_LOCAL_EXTENDED: u8 = 0x04;
pub const DBG_END_LOCAL: u8 = 0x05;
pub const DBG_RESTART_LOCAL: u8 = 0x06;
pub const DBG_SET_PROLOGUE_END: u8 = 0x07;
pub const DBG_SET_EPILOGUE_BEGIN: u8 = 0x08;
pub const DBG_SET_FILE: u8 = 0x09;
pub const DBG_FIRST_SPECIAL: u8 = 0x0a;
pub const DBG_LINE_BASE: i32 = -4;
pub const DBG_LINE_RANGE: u8 = 15;

/// The magic for the oldest format version that supports the given API level.
pub fn dex_magic_for_api(api: i32) -> [u8; 8]
{
    let version: &[u8; 3] = match api
    {
        i32::MIN..=23 => b"035",
        24..=25 => b"037",
        26..=27 => b"038",
        _ => b"039",
    };
    let mut magic = [0u8; 8];
    magic[..4].copy_from_slice(&DEX_FILE_MAGIC_PREFIX);
    magic[4..7].copy_from_slice(version);
    magic
}

/// The API level implied by a magic's version number.
pub fn api_for_dex_magic(magic: &[u8; 8]) -> Result<i32, DexError>
{
    match &magic[4..7]
    {
        b"035" => Ok(23),
        b"037" => Ok(25),
        b"038" => Ok(27),
        b"039" => Ok(28),
        other => fail!("Unsupported dex version {:?}", String::from_utf8_lossy(other)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeList(pub Vec<u32>);

impl TypeList
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<TypeList, DexError>
    {
        let size = read_u4(bytes, ix)?;
        let mut v = Vec::with_capacity(size.min(0xffff) as usize);
        for _ in 0..size { v.push(read_u2(bytes, ix)? as u32); }
        Ok(TypeList(v))
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_u4(bytes, self.0.len() as u32);
        for i in &self.0 { c += write_u2(bytes, *i as u16); }
        c
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoIdItem {
    pub shorty_idx: u32,
    pub return_type_idx: u32,
    pub parameters_off: u32,
}

impl ProtoIdItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<ProtoIdItem, DexError>
    {
        Ok(ProtoIdItem {
            shorty_idx: read_u4(bytes, ix)?,
            return_type_idx: read_u4(bytes, ix)?,
            parameters_off: read_u4(bytes, ix)?,
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        write_u4(bytes, self.shorty_idx) + write_u4(bytes, self.return_type_idx) + write_u4(bytes, self.parameters_off)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIdItem {
    pub class_idx: u16,
    pub type_idx: u16,
    pub name_idx: u32,
}

impl FieldIdItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<FieldIdItem, DexError>
    {
        Ok(FieldIdItem {
            class_idx: read_u2(bytes, ix)?,
            type_idx: read_u2(bytes, ix)?,
            name_idx: read_u4(bytes, ix)?,
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        write_u2(bytes, self.class_idx) + write_u2(bytes, self.type_idx) + write_u4(bytes, self.name_idx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodIdItem {
    pub class_idx: u16,
    pub proto_idx: u16,
    pub name_idx: u32,
}

impl MethodIdItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<MethodIdItem, DexError>
    {
        Ok(MethodIdItem {
            class_idx: read_u2(bytes, ix)?,
            proto_idx: read_u2(bytes, ix)?,
            name_idx: read_u4(bytes, ix)?,
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        write_u2(bytes, self.class_idx) + write_u2(bytes, self.proto_idx) + write_u4(bytes, self.name_idx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodHandleItem {
    pub kind: u16,
    pub target_idx: u16,
}

impl MethodHandleItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<MethodHandleItem, DexError>
    {
        let kind = read_u2(bytes, ix)?;
        read_u2(bytes, ix)?;
        let target_idx = read_u2(bytes, ix)?;
        read_u2(bytes, ix)?;
        Ok(MethodHandleItem { kind, target_idx })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        write_u2(bytes, self.kind) + write_u2(bytes, 0) + write_u2(bytes, self.target_idx) + write_u2(bytes, 0)
    }
}

/// `class_def_item` with every cross reference already resolved to an index or offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDefItem {
    pub class_idx: u32,
    pub access_flags: u32,
    pub superclass_idx: u32,
    pub interfaces_off: u32,
    pub source_file_idx: u32,
    pub annotations_off: u32,
    pub class_data_off: u32,
    pub static_values_off: u32,
}

impl ClassDefItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<ClassDefItem, DexError>
    {
        Ok(ClassDefItem {
            class_idx: read_u4(bytes, ix)?,
            access_flags: read_u4(bytes, ix)?,
            superclass_idx: read_u4(bytes, ix)?,
            interfaces_off: read_u4(bytes, ix)?,
            source_file_idx: read_u4(bytes, ix)?,
            annotations_off: read_u4(bytes, ix)?,
            class_data_off: read_u4(bytes, ix)?,
            static_values_off: read_u4(bytes, ix)?,
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_u4(bytes, self.class_idx);
        c += write_u4(bytes, self.access_flags);
        c += write_u4(bytes, self.superclass_idx);
        c += write_u4(bytes, self.interfaces_off);
        c += write_u4(bytes, self.source_file_idx);
        c += write_u4(bytes, self.annotations_off);
        c += write_u4(bytes, self.class_data_off);
        c += write_u4(bytes, self.static_values_off);
        c
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapItem {
    pub type_code: u16,
    pub size: u32,
    pub offset: u32,
}

impl MapItem
{
    pub fn new(type_code: u16, size: u32, offset: u32) -> Self
    {
        MapItem { type_code, size, offset }
    }

    pub fn read_list(bytes: &[u8], ix: &mut usize) -> Result<Vec<MapItem>, DexError>
    {
        let size = read_u4(bytes, ix)?;
        let mut items = Vec::with_capacity(size.min(32) as usize);
        for _ in 0..size
        {
            let type_code = read_u2(bytes, ix)?;
            read_u2(bytes, ix)?;
            items.push(MapItem { type_code, size: read_u4(bytes, ix)?, offset: read_u4(bytes, ix)? });
        }
        Ok(items)
    }

    pub fn write_list(entries: &[MapItem], bytes: &mut Vec<u8>) -> usize
    {
        let mut c = write_u4(bytes, entries.len() as u32);
        for item in entries
        {
            c += write_u2(bytes, item.type_code);
            c += write_u2(bytes, 0);
            c += write_u4(bytes, item.size);
            c += write_u4(bytes, item.offset);
        }
        c
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTypeAddrPair {
    pub type_idx: u32,
    pub addr: u32,
}

impl EncodedTypeAddrPair {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<EncodedTypeAddrPair, DexError> {
        let type_idx = read_uleb128(bytes, ix)?;
        let addr = read_uleb128(bytes, ix)?;
        Ok(EncodedTypeAddrPair { type_idx, addr })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        write_uleb128(bytes, self.type_idx) + write_uleb128(bytes, self.addr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryItem {
    pub start_addr: u32,
    pub insn_count: u16,
    /// Offset in bytes from the start of the encoded_catch_handler_list.
    pub handler_off: u16,
}

impl TryItem {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<TryItem, DexError> {
        Ok(TryItem {
            start_addr: read_u4(bytes, ix)?,
            insn_count: read_u2(bytes, ix)?,
            handler_off: read_u2(bytes, ix)?,
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        write_u4(bytes, self.start_addr) + write_u2(bytes, self.insn_count) + write_u2(bytes, self.handler_off)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedCatchHandler {
    pub handlers: Vec<(u32, u32)>,
    pub catch_all_addr: Option<u32>,
}

impl EncodedCatchHandler {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<EncodedCatchHandler, DexError> {
        let size = read_sleb128(bytes, ix)?;
        let count = size.unsigned_abs() as usize;
        let mut pairs = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let pair = EncodedTypeAddrPair::read(bytes, ix)?;
            pairs.push((pair.type_idx, pair.addr));
        }
        let catch_all_addr = if size <= 0 { Some(read_uleb128(bytes, ix)?) } else { None };
        Ok(EncodedCatchHandler { handlers: pairs, catch_all_addr })
    }

    /// A list holding only a catch-all is written with a size of zero.
    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;
        let size: i32 = if self.catch_all_addr.is_some() { -(self.handlers.len() as i32) } else { self.handlers.len() as i32 };
        c += write_sleb128(bytes, size);
        for (type_idx, addr) in &self.handlers {
            c += EncodedTypeAddrPair { type_idx: *type_idx, addr: *addr }.write(bytes);
        }
        if let Some(addr) = self.catch_all_addr { c += write_uleb128(bytes, addr); }
        c
    }
}

/// `code_item` as laid out on disk, with the instruction stream left undecoded.
#[derive(Debug)]
pub struct CodeItem
{
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub debug_info_off: u32,
    pub insns: Vec<u8>,
    pub tries: Vec<TryItem>,
    /// Handler lists keyed by their offset from the start of the handler list.
    pub handlers: HashMap<u16, EncodedCatchHandler>,
}

impl CodeItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<CodeItem, DexError>
    {
        let registers_size = read_u2(bytes, ix)?;
        let ins_size = read_u2(bytes, ix)?;
        let outs_size = read_u2(bytes, ix)?;
        let tries_size = read_u2(bytes, ix)?;
        let debug_info_off = read_u4(bytes, ix)?;
        let insns_size = read_u4(bytes, ix)? as usize;
        let insns = read_x(bytes, ix, insns_size * 2)?;

        let mut tries = vec![];
        let mut handlers = HashMap::new();
        if tries_size > 0
        {
            if insns_size % 2 != 0
            {
                let padding = read_u2(bytes, ix)?;
                if padding != 0
                {
                    warn!("non-zero code item padding 0x{:04x} at 0x{:x}", padding, *ix - 2);
                }
            }
            for _ in 0..tries_size { tries.push(TryItem::read(bytes, ix)?); }

            let handlers_base = *ix;
            let handlers_size = read_uleb128(bytes, ix)?;
            for i in 0..handlers_size
            {
                let relative = (*ix - handlers_base) as u16;
                let handler = EncodedCatchHandler::read(bytes, ix)
                    .map_err(|e| err!(e, "encoded catch handler {} at 0x{:x}", i, relative as usize + handlers_base))?;
                handlers.insert(relative, handler);
            }
        }

        Ok(CodeItem { registers_size, ins_size, outs_size, debug_info_off, insns, tries, handlers })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedField
{
    pub field_idx: u32,
    pub access_flags: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMethod
{
    pub method_idx: u32,
    pub access_flags: u32,
    pub code_off: u32,
}

/// `class_data_item`. Member indices are absolute here; the on-disk form stores deltas.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassDataItem {
    pub static_fields: Vec<EncodedField>,
    pub instance_fields: Vec<EncodedField>,
    pub direct_methods: Vec<EncodedMethod>,
    pub virtual_methods: Vec<EncodedMethod>,
}

impl ClassDataItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<ClassDataItem, DexError>
    {
        let static_field_size = read_uleb128(bytes, ix)?;
        let instance_field_size = read_uleb128(bytes, ix)?;
        let direct_method_size = read_uleb128(bytes, ix)?;
        let virtual_method_size = read_uleb128(bytes, ix)?;

        let read_fields = |count: u32, ix: &mut usize| -> Result<Vec<EncodedField>, DexError> {
            let mut fields = vec![];
            let mut field_idx = 0u32;
            for _ in 0..count
            {
                let delta = read_uleb128(bytes, ix)?;
                field_idx = match field_idx.checked_add(delta) {
                    Some(idx) => idx,
                    None => fail!("Field index overflows: {} + {}", field_idx, delta),
                };
                fields.push(EncodedField { field_idx, access_flags: read_uleb128(bytes, ix)? });
            }
            Ok(fields)
        };
        let read_methods = |count: u32, ix: &mut usize| -> Result<Vec<EncodedMethod>, DexError> {
            let mut methods = vec![];
            let mut method_idx = 0u32;
            for _ in 0..count
            {
                let delta = read_uleb128(bytes, ix)?;
                method_idx = match method_idx.checked_add(delta) {
                    Some(idx) => idx,
                    None => fail!("Method index overflows: {} + {}", method_idx, delta),
                };
                let access_flags = read_uleb128(bytes, ix)?;
                methods.push(EncodedMethod { method_idx, access_flags, code_off: read_uleb128(bytes, ix)? });
            }
            Ok(methods)
        };

        let static_fields = read_fields(static_field_size, ix)?;
        let instance_fields = read_fields(instance_field_size, ix)?;
        let direct_methods = read_methods(direct_method_size, ix)?;
        let virtual_methods = read_methods(virtual_method_size, ix)?;

        Ok(ClassDataItem { static_fields, instance_fields, direct_methods, virtual_methods })
    }

    /// Members must already be sorted by index.
    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_uleb128(bytes, self.static_fields.len() as u32);
        c += write_uleb128(bytes, self.instance_fields.len() as u32);
        c += write_uleb128(bytes, self.direct_methods.len() as u32);
        c += write_uleb128(bytes, self.virtual_methods.len() as u32);

        for fields in [&self.static_fields, &self.instance_fields]
        {
            let mut last = 0;
            for f in fields
            {
                c += write_uleb128(bytes, f.field_idx - last);
                c += write_uleb128(bytes, f.access_flags);
                last = f.field_idx;
            }
        }

        for methods in [&self.direct_methods, &self.virtual_methods]
        {
            let mut last = 0;
            for m in methods
            {
                c += write_uleb128(bytes, m.method_idx - last);
                c += write_uleb128(bytes, m.access_flags);
                c += write_uleb128(bytes, m.code_off);
                last = m.method_idx;
            }
        }

        c
    }

    pub fn is_empty(&self) -> bool
    {
        self.static_fields.is_empty()
            && self.instance_fields.is_empty()
            && self.direct_methods.is_empty()
            && self.virtual_methods.is_empty()
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Header {
    pub magic: [u8; 8],
    pub checksum: u32,
    pub signature: [u8; 20],
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub link_size: u32,
    pub link_off: u32,
    pub map_off: u32,
    pub string_ids_size: u32,
    pub string_ids_off: u32,
    pub type_ids_size: u32,
    pub type_ids_off: u32,
    pub proto_ids_size: u32,
    pub proto_ids_off: u32,
    pub field_ids_size: u32,
    pub field_ids_off: u32,
    pub method_ids_size: u32,
    pub method_ids_off: u32,
    pub class_defs_size: u32,
    pub class_defs_off: u32,
    pub data_size: u32,
    pub data_off: u32,
}

impl Header
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<Header, DexError>
    {
        if bytes.len() < HEADER_SIZE as usize {
            fail!("Not enough bytes for header: {} < {}", bytes.len(), HEADER_SIZE);
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&read_x(bytes, ix, 8)?);
        if magic[..4] != DEX_FILE_MAGIC_PREFIX { fail!("Invalid magic value"); }
        let checksum = read_u4(bytes, ix)?;
        let mut signature = [0u8; 20];
        signature.copy_from_slice(&read_x(bytes, ix, 20)?);

        let header = Header {
            magic,
            checksum,
            signature,
            file_size: read_u4(bytes, ix)?,
            header_size: read_u4(bytes, ix)?,
            endian_tag: read_u4(bytes, ix)?,
            link_size: read_u4(bytes, ix)?,
            link_off: read_u4(bytes, ix)?,
            map_off: read_u4(bytes, ix)?,
            string_ids_size: read_u4(bytes, ix)?,
            string_ids_off: read_u4(bytes, ix)?,
            type_ids_size: read_u4(bytes, ix)?,
            type_ids_off: read_u4(bytes, ix)?,
            proto_ids_size: read_u4(bytes, ix)?,
            proto_ids_off: read_u4(bytes, ix)?,
            field_ids_size: read_u4(bytes, ix)?,
            field_ids_off: read_u4(bytes, ix)?,
            method_ids_size: read_u4(bytes, ix)?,
            method_ids_off: read_u4(bytes, ix)?,
            class_defs_size: read_u4(bytes, ix)?,
            class_defs_off: read_u4(bytes, ix)?,
            data_size: read_u4(bytes, ix)?,
            data_off: read_u4(bytes, ix)?,
        };

        if header.endian_tag == REVERSE_ENDIAN_CONSTANT { fail!("Big endian dex files are not supported"); }
        if header.endian_tag != ENDIAN_CONSTANT { fail!("Invalid endian tag 0x{:08x}", header.endian_tag); }
        Ok(header)
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_x(bytes, &self.magic);
        c += write_u4(bytes, self.checksum);
        c += write_x(bytes, &self.signature);
        c += write_u4(bytes, self.file_size);
        c += write_u4(bytes, self.header_size);
        c += write_u4(bytes, self.endian_tag);
        c += write_u4(bytes, self.link_size);
        c += write_u4(bytes, self.link_off);
        c += write_u4(bytes, self.map_off);
        c += write_u4(bytes, self.string_ids_size);
        c += write_u4(bytes, self.string_ids_off);
        c += write_u4(bytes, self.type_ids_size);
        c += write_u4(bytes, self.type_ids_off);
        c += write_u4(bytes, self.proto_ids_size);
        c += write_u4(bytes, self.proto_ids_off);
        c += write_u4(bytes, self.field_ids_size);
        c += write_u4(bytes, self.field_ids_off);
        c += write_u4(bytes, self.method_ids_size);
        c += write_u4(bytes, self.method_ids_off);
        c += write_u4(bytes, self.class_defs_size);
        c += write_u4(bytes, self.class_defs_off);
        c += write_u4(bytes, self.data_size);
        c += write_u4(bytes, self.data_off);
        c
    }
}

/// `string_data_item`. Strings that are not valid modified UTF-8 are kept as raw bytes.
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum DexString
{
    Decoded(String),
    Raw(u32, Vec<u8>),
}

impl DexString
{
    pub fn from_string(s: &str) -> DexString
    {
        DexString::Decoded(s.to_string())
    }

    pub fn to_string(&self) -> Result<String, DexError>
    {
        match &self
        {
            DexString::Decoded(s) => Ok(s.to_string()),
            DexString::Raw(_, v) => fail!("String data {:02x?} is not valid modified UTF-8", v),
        }
    }

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<DexString, DexError>
    {
        let utf16_size = read_uleb128(bytes, ix)?;
        let mut v = vec![];

        loop
        {
            let u = read_u1(bytes, ix)?;
            if u != 0 { v.push(u); }
            else { break; }
        }

        Ok(match cesu8::from_java_cesu8(v.as_slice())
        {
            Ok(converted_str) => DexString::Decoded(converted_str.to_string()),
            _ => DexString::Raw(utf16_size, v)
        })
    }

    /// The length prefix counts UTF-16 code units, so characters outside the BMP count twice.
    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;

        match self
        {
            DexString::Raw(utf16_size, v) => {
                c += write_uleb128(bytes, *utf16_size);
                c += write_x(bytes, v);
                c += write_u1(bytes, 0);
            },

            DexString::Decoded(s) => {
                let encoded = to_java_cesu8(s);
                c += write_uleb128(bytes, s.encode_utf16().count() as u32);
                c += write_x(bytes, &encoded);
                c += write_u1(bytes, 0);
            }
        }
        c
    }
}

/// A parsed DEX image. Index tables are read eagerly; class definitions are turned into model
/// classes on demand by [`DexFile::classes`].
#[derive(Debug)]
pub struct DexFile {
    pub header: Header,
    pub map: Vec<MapItem>,
    pub strings: Vec<DexString>,
    pub types: Vec<u32>,
    pub protos: Vec<ProtoIdItem>,
    pub fields: Vec<FieldIdItem>,
    pub methods: Vec<MethodIdItem>,
    pub class_defs: Vec<ClassDefItem>,
    pub call_site_offsets: Vec<u32>,
    pub method_handles: Vec<MethodHandleItem>,
    data: Vec<u8>,
}

impl DexFile {
    pub fn from_bytes(bytes: &[u8]) -> Result<DexFile, DexError>
    {
        let mut ix = 0;
        let header = Header::read(bytes, &mut ix)?;
        if header.file_size as usize > bytes.len()
        {
            fail!("Header file size {} exceeds the {} bytes available", header.file_size, bytes.len());
        }

        let mut ix = header.map_off as usize;
        let map = if header.map_off != 0 { MapItem::read_list(bytes, &mut ix)? } else { vec![] };

        let mut strings = Vec::with_capacity(header.string_ids_size as usize);
        let mut ix = header.string_ids_off as usize;
        for _ in 0..header.string_ids_size
        {
            let mut data_off = read_u4(bytes, &mut ix)? as usize;
            strings.push(DexString::read(bytes, &mut data_off)?);
        }

        let mut ix = header.type_ids_off as usize;
        let mut types = Vec::with_capacity(header.type_ids_size as usize);
        for _ in 0..header.type_ids_size
        {
            let string_idx = read_u4(bytes, &mut ix)?;
            if string_idx as usize >= strings.len() { fail!("Type descriptor index {} out of range", string_idx); }
            types.push(string_idx);
        }

        let mut ix = header.proto_ids_off as usize;
        let mut protos = vec![];
        for _ in 0..header.proto_ids_size { protos.push(ProtoIdItem::read(bytes, &mut ix)?); }

        let mut ix = header.field_ids_off as usize;
        let mut fields = vec![];
        for _ in 0..header.field_ids_size { fields.push(FieldIdItem::read(bytes, &mut ix)?); }

        let mut ix = header.method_ids_off as usize;
        let mut methods = vec![];
        for _ in 0..header.method_ids_size { methods.push(MethodIdItem::read(bytes, &mut ix)?); }

        let mut ix = header.class_defs_off as usize;
        let mut class_defs = vec![];
        for _ in 0..header.class_defs_size { class_defs.push(ClassDefItem::read(bytes, &mut ix)?); }

        let mut call_site_offsets = vec![];
        let mut method_handles = vec![];
        for item in &map
        {
            let mut ix = item.offset as usize;
            match item.type_code
            {
                TYPE_CALL_SITE_ID_ITEM => for _ in 0..item.size { call_site_offsets.push(read_u4(bytes, &mut ix)?); },
                TYPE_METHOD_HANDLE_ITEM => for _ in 0..item.size { method_handles.push(MethodHandleItem::read(bytes, &mut ix)?); },
                _ => {}
            }
        }

        debug!(
            "read dex image: {} strings, {} types, {} protos, {} fields, {} methods, {} classes",
            strings.len(), types.len(), protos.len(), fields.len(), methods.len(), class_defs.len()
        );

        Ok(DexFile {
            header,
            map,
            strings,
            types,
            protos,
            fields,
            methods,
            class_defs,
            call_site_offsets,
            method_handles,
            data: bytes.to_vec(),
        })
    }

    /// The raw image this file was read from.
    pub fn bytes(&self) -> &[u8]
    {
        &self.data
    }

    /// An opcode table for the API level the file's version implies.
    pub fn opcodes(&self) -> Result<Opcodes, DexError>
    {
        Ok(Opcodes::for_api(api_for_dex_magic(&self.header.magic)?))
    }

    fn nullable_string(&self, idx: u32) -> Result<Option<String>, DexError>
    {
        if idx == NO_INDEX { Ok(None) } else { Ok(Some(self.string(idx)?)) }
    }

    fn nullable_type(&self, idx: u32) -> Result<Option<String>, DexError>
    {
        if idx == NO_INDEX { Ok(None) } else { Ok(Some(self.type_desc(idx)?)) }
    }

    fn type_list(&self, offset: u32) -> Result<Vec<String>, DexError>
    {
        if offset == 0 { return Ok(vec![]); }
        let mut ix = offset as usize;
        TypeList::read(&self.data, &mut ix)?.0.into_iter().map(|t| self.type_desc(t)).collect()
    }

    fn annotation_set(&self, offset: u32) -> Result<Vec<Annotation>, DexError>
    {
        if offset == 0 { return Ok(vec![]); }
        let mut ix = offset as usize;
        let set = OffsetList::read(&self.data, &mut ix)?;
        let mut annotations = Vec::with_capacity(set.0.len());
        for entry in set.0
        {
            let mut ix = entry as usize;
            annotations.push(read_annotation_item(&self.data, &mut ix, self)?);
        }
        Ok(annotations)
    }

    /// Converts every class definition into a model class, decoding method bodies with `opcodes`.
    pub fn classes(&self, opcodes: &Opcodes) -> Result<Vec<ClassDef>, DexError>
    {
        let mut classes = Vec::with_capacity(self.class_defs.len());
        for item in &self.class_defs
        {
            let class_type = self.type_desc(item.class_idx)?;
            let class = self.read_class(item, &class_type, opcodes).map_err(|e| err!(e, "class {}", class_type))?;
            classes.push(class);
        }
        Ok(classes)
    }

    fn read_class(&self, item: &ClassDefItem, class_type: &str, opcodes: &Opcodes) -> Result<ClassDef, DexError>
    {
        let mut class = ClassDef::new(class_type, AccessFlags::from_bits_retain(item.access_flags), None);
        class.superclass = self.nullable_type(item.superclass_idx)?;
        class.interfaces = self.type_list(item.interfaces_off)?;
        class.source_file = self.nullable_string(item.source_file_idx)?;

        let mut field_annotations = HashMap::new();
        let mut method_annotations = HashMap::new();
        let mut parameter_annotations = HashMap::new();
        if item.annotations_off != 0
        {
            let mut ix = item.annotations_off as usize;
            let directory = AnnotationsDirectoryItem::read(&self.data, &mut ix)?;
            class.annotations = self.annotation_set(directory.class_annotations_off)?;
            for entry in &directory.field_annotations
            {
                field_annotations.insert(entry.index, self.annotation_set(entry.offset)?);
            }
            for entry in &directory.method_annotations
            {
                method_annotations.insert(entry.index, self.annotation_set(entry.offset)?);
            }
            for entry in &directory.parameter_annotations
            {
                let mut ix = entry.offset as usize;
                let list = OffsetList::read(&self.data, &mut ix)?;
                let mut sets = vec![];
                for set_off in list.0 { sets.push(self.annotation_set(set_off)?); }
                parameter_annotations.insert(entry.index, sets);
            }
        }

        if item.class_data_off == 0 { return Ok(class); }
        let mut ix = item.class_data_off as usize;
        let data = ClassDataItem::read(&self.data, &mut ix)?;

        let static_values = if item.static_values_off != 0
        {
            let mut ix = item.static_values_off as usize;
            read_encoded_array(&self.data, &mut ix, self)?
        }
        else { vec![] };

        for (i, encoded) in data.static_fields.iter().chain(data.instance_fields.iter()).enumerate()
        {
            let field_ref = self.field(encoded.field_idx)?;
            let mut field = Field::new(&field_ref.defining_class, &field_ref.name, &field_ref.field_type, AccessFlags::from_bits_retain(encoded.access_flags));
            if i < data.static_fields.len()
            {
                field.initial_value = static_values.get(i).cloned();
            }
            field.annotations = field_annotations.remove(&encoded.field_idx).unwrap_or_default();
            class.fields.push(field);
        }

        for encoded in data.direct_methods.iter().chain(data.virtual_methods.iter())
        {
            let method_ref = self.method(encoded.method_idx)?;
            let param_sets = parameter_annotations.remove(&encoded.method_idx).unwrap_or_default();
            let parameters = method_ref.proto.parameters.iter().enumerate().map(|(i, p)| MethodParameter {
                param_type: p.clone(),
                name: None,
                annotations: param_sets.get(i).cloned().unwrap_or_default(),
            }).collect();
            let mut method = Method::new(
                &method_ref.defining_class,
                &method_ref.name,
                parameters,
                &method_ref.proto.return_type,
                AccessFlags::from_bits_retain(encoded.access_flags),
            );
            method.annotations = method_annotations.remove(&encoded.method_idx).unwrap_or_default();
            if encoded.code_off != 0
            {
                let implementation = self.read_code(encoded.code_off, &mut method, opcodes)
                    .map_err(|e| err!(e, "method {}", method_ref))?;
                method.implementation = Some(implementation);
            }
            class.methods.push(method);
        }

        Ok(class)
    }

    fn read_code(&self, code_off: u32, method: &mut Method, opcodes: &Opcodes) -> Result<MethodImplementation, DexError>
    {
        let mut ix = code_off as usize;
        let code = CodeItem::read(&self.data, &mut ix)?;

        let mut instructions = vec![];
        for decoded in InstructionIterator::new(opcodes, &code.insns, 0)
        {
            let (_, instruction) = decoded?;
            instructions.push(instruction.resolve(self)?);
        }

        let mut try_blocks = Vec::with_capacity(code.tries.len());
        for t in &code.tries
        {
            let list = match code.handlers.get(&t.handler_off)
            {
                Some(list) => list,
                None => fail!("Try block at {} has no handler list at offset {}", t.start_addr, t.handler_off),
            };
            let mut handlers = vec![];
            for (type_idx, addr) in &list.handlers
            {
                handlers.push(ExceptionHandler { exception_type: Some(self.type_desc(*type_idx)?), handler_address: *addr });
            }
            if let Some(addr) = list.catch_all_addr
            {
                handlers.push(ExceptionHandler { exception_type: None, handler_address: addr });
            }
            try_blocks.push(TryBlock { start_address: t.start_addr, code_unit_count: t.insn_count, handlers });
        }

        let debug_items = if code.debug_info_off != 0 { self.read_debug_info(code.debug_info_off, method)? } else { vec![] };

        Ok(MethodImplementation { registers: code.registers_size, instructions, try_blocks, debug_items })
    }

    /// Decodes the debug state machine. Parameter names are stored on `method`.
    fn read_debug_info(&self, offset: u32, method: &mut Method) -> Result<Vec<DebugItem>, DexError>
    {
        let bytes = &self.data;
        let mut ix = offset as usize;
        let mut line = read_uleb128(bytes, &mut ix)? as i64;
        let parameters_size = read_uleb128(bytes, &mut ix)?;
        for i in 0..parameters_size as usize
        {
            let name_idx = read_uleb128p1(bytes, &mut ix)?;
            let name = if name_idx < 0 { None } else { Some(self.string(name_idx as u32)?) };
            if let Some(param) = method.parameters.get_mut(i) { param.name = name; }
        }

        let optional_string = |idx: i32| -> Result<Option<String>, DexError> {
            if idx < 0 { Ok(None) } else { Ok(Some(self.string(idx as u32)?)) }
        };
        let optional_type = |idx: i32| -> Result<Option<String>, DexError> {
            if idx < 0 { Ok(None) } else { Ok(Some(self.type_desc(idx as u32)?)) }
        };

        let mut items = vec![];
        let mut address = 0u32;
        loop
        {
            let op = read_u1(bytes, &mut ix)?;
            match op
            {
                DBG_END_SEQUENCE => break,
                DBG_ADVANCE_PC => address += read_uleb128(bytes, &mut ix)?,
                DBG_ADVANCE_LINE => line += read_sleb128(bytes, &mut ix)? as i64,
                DBG_START_LOCAL | DBG_START_LOCAL_EXTENDED => {
                    let register = read_uleb128(bytes, &mut ix)? as u16;
                    let name = optional_string(read_uleb128p1(bytes, &mut ix)?)?;
                    let local_type = optional_type(read_uleb128p1(bytes, &mut ix)?)?;
                    let signature = if op == DBG_START_LOCAL_EXTENDED { optional_string(read_uleb128p1(bytes, &mut ix)?)? } else { None };
                    items.push(DebugItem::StartLocal { address, register, name, local_type, signature });
                }
                DBG_END_LOCAL => items.push(DebugItem::EndLocal { address, register: read_uleb128(bytes, &mut ix)? as u16 }),
                DBG_RESTART_LOCAL => items.push(DebugItem::RestartLocal { address, register: read_uleb128(bytes, &mut ix)? as u16 }),
                DBG_SET_PROLOGUE_END => items.push(DebugItem::PrologueEnd { address }),
                DBG_SET_EPILOGUE_BEGIN => items.push(DebugItem::EpilogueBegin { address }),
                DBG_SET_FILE => items.push(DebugItem::SetSourceFile { address, source_file: optional_string(read_uleb128p1(bytes, &mut ix)?)? }),
                special => {
                    let adjusted = (special - DBG_FIRST_SPECIAL) as i64;
                    line += DBG_LINE_BASE as i64 + adjusted % DBG_LINE_RANGE as i64;
                    address += (adjusted / DBG_LINE_RANGE as i64) as u32;
                    items.push(DebugItem::LineNumber { address, line: line.max(0) as u32 });
                }
            }
        }
        Ok(items)
    }
}

impl ReferenceLookup for DexFile {
    fn string(&self, idx: u32) -> Result<String, DexError> {
        match self.strings.get(idx as usize) {
            Some(s) => s.to_string(),
            None => fail!("String index {} out of range", idx),
        }
    }

    fn type_desc(&self, idx: u32) -> Result<String, DexError> {
        match self.types.get(idx as usize) {
            Some(string_idx) => self.string(*string_idx),
            None => fail!("Type index {} out of range", idx),
        }
    }

    fn proto(&self, idx: u32) -> Result<ProtoRef, DexError> {
        let item = match self.protos.get(idx as usize) {
            Some(item) => item,
            None => fail!("Proto index {} out of range", idx),
        };
        Ok(ProtoRef { parameters: self.type_list(item.parameters_off)?, return_type: self.type_desc(item.return_type_idx)? })
    }

    fn field(&self, idx: u32) -> Result<FieldRef, DexError> {
        let item = match self.fields.get(idx as usize) {
            Some(item) => item,
            None => fail!("Field index {} out of range", idx),
        };
        Ok(FieldRef {
            defining_class: self.type_desc(item.class_idx as u32)?,
            name: self.string(item.name_idx)?,
            field_type: self.type_desc(item.type_idx as u32)?,
        })
    }

    fn method(&self, idx: u32) -> Result<MethodRef, DexError> {
        let item = match self.methods.get(idx as usize) {
            Some(item) => item,
            None => fail!("Method index {} out of range", idx),
        };
        Ok(MethodRef {
            defining_class: self.type_desc(item.class_idx as u32)?,
            name: self.string(item.name_idx)?,
            proto: self.proto(item.proto_idx as u32)?,
        })
    }

    fn call_site(&self, idx: u32) -> Result<CallSiteRef, DexError> {
        let offset = match self.call_site_offsets.get(idx as usize) {
            Some(offset) => *offset,
            None => fail!("Call site index {} out of range", idx),
        };
        let mut ix = offset as usize;
        let values = read_encoded_array(&self.data, &mut ix, self)?;
        CallSiteRef::from_encoded_array(&format!("call_site_{}", idx), values)
    }

    fn method_handle(&self, idx: u32) -> Result<MethodHandleRef, DexError> {
        let item = match self.method_handles.get(idx as usize) {
            Some(item) => item,
            None => fail!("Method handle index {} out of range", idx),
        };
        let kind = MethodHandleKind::from_value(item.kind)?;
        let target = if kind.is_field_accessor() {
            MethodHandleTarget::Field(self.field(item.target_idx as u32)?)
        } else {
            MethodHandleTarget::Method(self.method(item.target_idx as u32)?)
        };
        MethodHandleRef::new(kind, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip()
    {
        let header = Header {
            magic: dex_magic_for_api(26),
            checksum: 0x01020304,
            signature: [7; 20],
            file_size: 0x200,
            header_size: HEADER_SIZE,
            endian_tag: ENDIAN_CONSTANT,
            link_size: 0,
            link_off: 0,
            map_off: 0x1f0,
            string_ids_size: 3,
            string_ids_off: 0x70,
            type_ids_size: 0,
            type_ids_off: 0,
            proto_ids_size: 0,
            proto_ids_off: 0,
            field_ids_size: 0,
            field_ids_off: 0,
            method_ids_size: 0,
            method_ids_off: 0,
            class_defs_size: 0,
            class_defs_off: 0,
            data_size: 0x184,
            data_off: 0x7c,
        };
        let mut encoded_bytes = vec![];
        assert_eq!(header.write(&mut encoded_bytes), HEADER_SIZE as usize);
        let mut ix = 0;
        assert_eq!(Header::read(&encoded_bytes, &mut ix).unwrap(), header);
        assert_eq!(&header.magic, b"dex\n038\0");
    }

    #[test]
    fn test_short_input_rejected()
    {
        let e = DexFile::from_bytes(&[0x64, 0x65, 0x78, 0x0a]).unwrap_err();
        assert!(e.to_string().starts_with("Not enough bytes for header"));
    }

    #[test]
    fn test_magic_by_api()
    {
        assert_eq!(&dex_magic_for_api(15), b"dex\n035\0");
        assert_eq!(&dex_magic_for_api(24), b"dex\n037\0");
        assert_eq!(&dex_magic_for_api(33), b"dex\n039\0");
        assert_eq!(api_for_dex_magic(&dex_magic_for_api(26)).unwrap(), 27);
    }

    #[test]
    fn test_string_data_counts_utf16_units()
    {
        let mut bytes = vec![];
        DexString::from_string("a\u{1f600}").write(&mut bytes);
        // 'a' plus a surrogate pair; the supplementary character is six bytes in modified UTF-8.
        assert_eq!(bytes[0], 3);
        assert_eq!(bytes.len(), 1 + 1 + 6 + 1);
        let mut ix = 0;
        assert_eq!(DexString::read(&bytes, &mut ix).unwrap(), DexString::from_string("a\u{1f600}"));
    }

    #[test]
    fn test_try_item_round_trip() {
        let t = TryItem { start_addr: 0x12345678, insn_count: 0x0102, handler_off: 0x2030 };
        let mut bytes = vec![];
        assert_eq!(t.write(&mut bytes), 8);

        let mut ix = 0;
        assert_eq!(TryItem::read(&bytes, &mut ix).unwrap(), t);
        assert_eq!(ix, bytes.len());
    }

    #[test]
    fn test_catch_all_handler_size_is_negative() {
        let h = EncodedCatchHandler { handlers: vec![(42, 0xabcd)], catch_all_addr: Some(0x1234) };

        let mut bytes = vec![];
        h.write(&mut bytes);
        let (size, _) = crate::dex::leb::decode_sleb128(&bytes).unwrap();
        assert_eq!(size, -1);

        let mut ix = 0;
        assert_eq!(EncodedCatchHandler::read(&bytes, &mut ix).unwrap(), h);
        assert_eq!(ix, bytes.len());

        let only_catch_all = EncodedCatchHandler { handlers: vec![], catch_all_addr: Some(3) };
        let mut bytes = vec![];
        only_catch_all.write(&mut bytes);
        let mut ix = 0;
        assert_eq!(EncodedCatchHandler::read(&bytes, &mut ix).unwrap(), only_catch_all);
    }

    #[test]
    fn test_class_data_deltas()
    {
        let data = ClassDataItem {
            static_fields: vec![EncodedField { field_idx: 2, access_flags: 8 }, EncodedField { field_idx: 5, access_flags: 9 }],
            instance_fields: vec![EncodedField { field_idx: 3, access_flags: 2 }],
            direct_methods: vec![EncodedMethod { method_idx: 1, access_flags: 0x10001, code_off: 0x100 }],
            virtual_methods: vec![EncodedMethod { method_idx: 4, access_flags: 1, code_off: 0 }],
        };
        let mut bytes = vec![];
        data.write(&mut bytes);
        assert_eq!(&bytes[..8], &[2, 1, 1, 1, 2, 8, 3, 9]);
        let mut ix = 0;
        assert_eq!(ClassDataItem::read(&bytes, &mut ix).unwrap(), data);
    }

    #[test]
    fn test_class_data_delta_overflow()
    {
        // two static fields: delta 1, then delta 0xffffffff
        let bytes = [2, 0, 0, 0, 1, 8, 0xff, 0xff, 0xff, 0xff, 0x0f, 8];
        let mut ix = 0;
        let e = ClassDataItem::read(&bytes, &mut ix).unwrap_err();
        assert_eq!(e.message(), "Field index overflows: 1 + 4294967295");

        // one direct method: delta 2, then a second with delta 0xfffffffe
        let bytes = [0, 0, 2, 0, 2, 1, 0, 0xfe, 0xff, 0xff, 0xff, 0x0f, 1, 0];
        let mut ix = 0;
        let e = ClassDataItem::read(&bytes, &mut ix).unwrap_err();
        assert_eq!(e.message(), "Method index overflows: 2 + 4294967294");
    }
}
