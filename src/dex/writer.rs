//! Lays out a closed [`DexPool`] and serializes it to a complete dex image.

use std::collections::HashMap;
use std::io::Write;

use adler32::RollingAdler32;
use log::{debug, info};
use sha1::{Digest, Sha1};

use crate::dex::annotations::{write_annotation_item, AnnotationsDirectoryItem, MemberAnnotation, OffsetList};
use crate::dex::dex_file::*;
use crate::dex::encoded_values::{write_encoded_array, Annotation};
use crate::dex::error::DexError;
use crate::dex::instructions::{Instruction, Operands};
use crate::dex::model::{ClassDef, DebugItem, Method, MethodImplementation};
use crate::dex::opcode_format::ReferenceType;
use crate::dex::pool::{annotation_set_key, DexPool};
use crate::dex::references::{IndexResolver, MethodHandleTarget, MethodRef};
use crate::dex::{align_to, write_sleb128, write_u1, write_u2, write_u4, write_uleb128, write_uleb128p1};

const STRING_ID_ITEM_SIZE: u32 = 4;
const TYPE_ID_ITEM_SIZE: u32 = 4;
const PROTO_ID_ITEM_SIZE: u32 = 12;
const FIELD_ID_ITEM_SIZE: u32 = 8;
const METHOD_ID_ITEM_SIZE: u32 = 8;
const CLASS_DEF_ITEM_SIZE: u32 = 32;
const CALL_SITE_ID_ITEM_SIZE: u32 = 4;
const METHOD_HANDLE_ITEM_SIZE: u32 = 8;

#[derive(Debug, Clone, Copy, Default)]
struct SectionInfo {
    count: u32,
    offset: u32,
}

/// Positions of the fixed-size index sections that follow the header.
#[derive(Debug, Default)]
struct SectionOffsets {
    string_ids: SectionInfo,
    type_ids: SectionInfo,
    proto_ids: SectionInfo,
    field_ids: SectionInfo,
    method_ids: SectionInfo,
    class_defs: SectionInfo,
    call_site_ids: SectionInfo,
    method_handles: SectionInfo,
    data_off: u32,
}

impl SectionOffsets {
    fn new(pool: &DexPool) -> Self {
        let cursor = HEADER_SIZE;
        let (string_ids, cursor) = Self::section(cursor, pool.strings.len(), STRING_ID_ITEM_SIZE);
        let (type_ids, cursor) = Self::section(cursor, pool.types.len(), TYPE_ID_ITEM_SIZE);
        let (proto_ids, cursor) = Self::section(cursor, pool.protos.len(), PROTO_ID_ITEM_SIZE);
        let (field_ids, cursor) = Self::section(cursor, pool.fields.len(), FIELD_ID_ITEM_SIZE);
        let (method_ids, cursor) = Self::section(cursor, pool.methods.len(), METHOD_ID_ITEM_SIZE);
        let (class_defs, cursor) = Self::section(cursor, pool.classes.len(), CLASS_DEF_ITEM_SIZE);
        let (call_site_ids, cursor) = Self::section(cursor, pool.call_sites.len(), CALL_SITE_ID_ITEM_SIZE);
        let (method_handles, cursor) = Self::section(cursor, pool.method_handles.len(), METHOD_HANDLE_ITEM_SIZE);

        SectionOffsets {
            string_ids,
            type_ids,
            proto_ids,
            field_ids,
            method_ids,
            class_defs,
            call_site_ids,
            method_handles,
            data_off: cursor,
        }
    }

    fn section(base: u32, count: usize, item_size: u32) -> (SectionInfo, u32) {
        if count == 0 {
            (SectionInfo { count: 0, offset: 0 }, base)
        } else {
            let count = count as u32;
            (SectionInfo { count, offset: base }, base + count * item_size)
        }
    }

    fn map_items(&self) -> Vec<MapItem> {
        let mut items = vec![MapItem::new(TYPE_HEADER_ITEM, 1, 0)];
        let sections = [
            (TYPE_STRING_ID_ITEM, self.string_ids),
            (TYPE_TYPE_ID_ITEM, self.type_ids),
            (TYPE_PROTO_ID_ITEM, self.proto_ids),
            (TYPE_FIELD_ID_ITEM, self.field_ids),
            (TYPE_METHOD_ID_ITEM, self.method_ids),
            (TYPE_CLASS_DEF_ITEM, self.class_defs),
            (TYPE_CALL_SITE_ID_ITEM, self.call_site_ids),
            (TYPE_METHOD_HANDLE_ITEM, self.method_handles),
        ];
        for (type_code, info) in sections {
            if info.count > 0 {
                items.push(MapItem::new(type_code, info.count, info.offset));
            }
        }
        items
    }
}

/// Offsets of data items that belong to one class or method rather than to a pool.
#[derive(Debug, Default)]
struct DataLayout {
    map: Vec<MapItem>,
    string_data: Vec<u32>,
    parameter_lists: HashMap<MethodRef, u32>,
    directories: HashMap<String, u32>,
    debug_infos: HashMap<MethodRef, u32>,
    code_items: HashMap<MethodRef, u32>,
    class_data: HashMap<String, u32>,
}

impl DataLayout {
    fn record(&mut self, type_code: u16, count: usize, first_offset: Option<u32>) {
        if count == 0 {
            return;
        }
        if let Some(offset) = first_offset {
            self.map.push(MapItem::new(type_code, count as u32, offset));
        }
    }
}

fn align(file: &mut Vec<u8>, alignment: u32) {
    let aligned = align_to(file.len() as u32, alignment) as usize;
    file.resize(aligned, 0);
}

fn index16(index: u32, kind: &str) -> Result<u16, DexError> {
    if index > u16::MAX as u32 {
        fail!("{} index {} does not fit in 16 bits", kind, index);
    }
    Ok(index as u16)
}

fn set_offset_of(pool: &DexPool, annotations: &[Annotation]) -> Result<u32, DexError> {
    if annotations.is_empty() {
        return Ok(0);
    }
    pool.annotation_sets.offset(&annotation_set_key(annotations)?)
}

fn overwrite_header(buf: &mut [u8], header: &Header) {
    let mut header_bytes = Vec::with_capacity(HEADER_SIZE as usize);
    header.write(&mut header_bytes);
    buf[..HEADER_SIZE as usize].copy_from_slice(&header_bytes);
}

fn compute_sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// Serializes every pool of a [`DexPool`]. Closes the pool first if needed; once written, the
/// pool's indices and offsets describe the returned image.
pub struct DexWriter<'a> {
    pool: &'a mut DexPool,
}

impl<'a> DexWriter<'a> {
    pub fn new(pool: &'a mut DexPool) -> DexWriter<'a> {
        DexWriter { pool }
    }

    /// Produces the whole file, or an error and no output.
    pub fn write(self) -> Result<Vec<u8>, DexError> {
        let pool = self.pool;
        pool.close()?;

        let sections = SectionOffsets::new(pool);
        let mut file = vec![0u8; sections.data_off as usize];
        let mut layout = DataLayout::default();

        write_string_data(pool, &mut file, &mut layout);
        write_type_lists(pool, &mut file, &mut layout)?;
        write_encoded_arrays(pool, &mut file, &mut layout)?;
        write_annotations(pool, &mut file, &mut layout)?;
        write_annotation_sets(pool, &mut file, &mut layout)?;
        write_parameter_annotation_lists(pool, &mut file, &mut layout)?;
        write_annotation_directories(pool, &mut file, &mut layout)?;
        write_debug_infos(pool, &mut file, &mut layout)?;
        write_code_items(pool, &mut file, &mut layout)?;
        write_class_data(pool, &mut file, &mut layout)?;

        align(&mut file, 4);
        let map_off = file.len() as u32;
        let mut map = sections.map_items();
        map.append(&mut layout.map);
        map.push(MapItem::new(TYPE_MAP_LIST, 1, map_off));
        map.sort_by_key(|item| item.offset);
        MapItem::write_list(&map, &mut file);

        let ids = write_id_sections(pool, &layout)?;
        let ids_end = HEADER_SIZE as usize + ids.len();
        if ids_end != sections.data_off as usize {
            fail!("Index sections take {} bytes, expected {}", ids.len(), sections.data_off - HEADER_SIZE);
        }
        file[HEADER_SIZE as usize..ids_end].copy_from_slice(&ids);

        let mut header = Header {
            magic: dex_magic_for_api(pool.opcodes().api()),
            checksum: 0,
            signature: [0; 20],
            file_size: file.len() as u32,
            header_size: HEADER_SIZE,
            endian_tag: ENDIAN_CONSTANT,
            link_size: 0,
            link_off: 0,
            map_off,
            string_ids_size: sections.string_ids.count,
            string_ids_off: sections.string_ids.offset,
            type_ids_size: sections.type_ids.count,
            type_ids_off: sections.type_ids.offset,
            proto_ids_size: sections.proto_ids.count,
            proto_ids_off: sections.proto_ids.offset,
            field_ids_size: sections.field_ids.count,
            field_ids_off: sections.field_ids.offset,
            method_ids_size: sections.method_ids.count,
            method_ids_off: sections.method_ids.offset,
            class_defs_size: sections.class_defs.count,
            class_defs_off: sections.class_defs.offset,
            data_size: file.len() as u32 - sections.data_off,
            data_off: sections.data_off,
        };

        overwrite_header(&mut file, &header);
        header.signature = compute_sha1(&file[32..]);
        overwrite_header(&mut file, &header);
        header.checksum = RollingAdler32::from_buffer(&file[12..]).hash();
        overwrite_header(&mut file, &header);

        debug!("data section at 0x{:x}, {} map entries", sections.data_off, map.len());
        info!("wrote dex file: {} bytes, {} classes", file.len(), pool.classes.len());
        Ok(file)
    }

    /// Writes the file to `out`. Nothing reaches `out` unless layout succeeded.
    pub fn write_to<W: Write>(self, out: &mut W) -> Result<(), DexError> {
        let bytes = self.write()?;
        write_all(out, &bytes)
    }
}

pub(crate) fn write_all<W: Write>(out: &mut W, bytes: &[u8]) -> Result<(), DexError> {
    match out.write_all(bytes) {
        Ok(()) => Ok(()),
        Err(e) => fail!("Failed to write dex file: {}", e),
    }
}

fn write_string_data(pool: &mut DexPool, file: &mut Vec<u8>, layout: &mut DataLayout) {
    let mut offsets = Vec::with_capacity(pool.strings.len());
    for (handle, value) in pool.strings.sorted() {
        offsets.push((handle, file.len() as u32));
        DexString::from_string(value).write(file);
    }
    layout.record(TYPE_STRING_DATA_ITEM, offsets.len(), offsets.first().map(|(_, o)| *o));
    layout.string_data = offsets.iter().map(|(_, o)| *o).collect();
    for (handle, offset) in offsets {
        pool.strings.set_offset(handle, offset);
    }
}

fn write_type_lists(pool: &mut DexPool, file: &mut Vec<u8>, layout: &mut DataLayout) -> Result<(), DexError> {
    let mut offsets = vec![];
    for (handle, types) in pool.type_lists.sorted() {
        align(file, 4);
        offsets.push((handle, file.len() as u32));
        let indices = types.iter().map(|t| pool.types.index(t.as_str())).collect::<Result<Vec<u32>, DexError>>()?;
        TypeList(indices).write(file);
    }
    layout.record(TYPE_TYPE_LIST, offsets.len(), offsets.first().map(|(_, o)| *o));
    for (handle, offset) in offsets {
        pool.type_lists.set_offset(handle, offset);
    }
    Ok(())
}

fn write_encoded_arrays(pool: &mut DexPool, file: &mut Vec<u8>, layout: &mut DataLayout) -> Result<(), DexError> {
    let mut offsets = vec![];
    for (handle, values) in pool.encoded_arrays.sorted() {
        offsets.push((handle, file.len() as u32));
        write_encoded_array(values, file, &*pool)?;
    }
    layout.record(TYPE_ENCODED_ARRAY_ITEM, offsets.len(), offsets.first().map(|(_, o)| *o));
    for (handle, offset) in offsets {
        pool.encoded_arrays.set_offset(handle, offset);
    }
    Ok(())
}

fn write_annotations(pool: &mut DexPool, file: &mut Vec<u8>, layout: &mut DataLayout) -> Result<(), DexError> {
    let mut offsets = vec![];
    for (handle, annotation) in pool.annotations.sorted() {
        offsets.push((handle, file.len() as u32));
        write_annotation_item(annotation, file, &*pool)?;
    }
    layout.record(TYPE_ANNOTATION_ITEM, offsets.len(), offsets.first().map(|(_, o)| *o));
    for (handle, offset) in offsets {
        pool.annotations.set_offset(handle, offset);
    }
    Ok(())
}

/// Entries are in type index order, which is how the set key is already sorted.
fn write_annotation_sets(pool: &mut DexPool, file: &mut Vec<u8>, layout: &mut DataLayout) -> Result<(), DexError> {
    let mut offsets = vec![];
    for (handle, annotations) in pool.annotation_sets.sorted() {
        align(file, 4);
        offsets.push((handle, file.len() as u32));
        let entries = annotations.iter().map(|a| pool.annotations.offset(a)).collect::<Result<Vec<u32>, DexError>>()?;
        OffsetList(entries).write(file);
    }
    layout.record(TYPE_ANNOTATION_SET_ITEM, offsets.len(), offsets.first().map(|(_, o)| *o));
    for (handle, offset) in offsets {
        pool.annotation_sets.set_offset(handle, offset);
    }
    Ok(())
}

fn write_parameter_annotation_lists(pool: &DexPool, file: &mut Vec<u8>, layout: &mut DataLayout) -> Result<(), DexError> {
    let mut written: HashMap<Vec<u32>, u32> = HashMap::new();
    let mut first = None;
    for class in pool.classes.sorted() {
        for method in &class.methods {
            let lists = method.parameter_annotations();
            if lists.is_empty() {
                continue;
            }
            let entries = lists.iter().map(|set| set_offset_of(pool, set)).collect::<Result<Vec<u32>, DexError>>()?;
            let offset = match written.get(&entries) {
                Some(offset) => *offset,
                None => {
                    align(file, 4);
                    let offset = file.len() as u32;
                    first.get_or_insert(offset);
                    OffsetList(entries.clone()).write(file);
                    written.insert(entries, offset);
                    offset
                }
            };
            layout.parameter_lists.insert(method.method_ref(), offset);
        }
    }
    layout.record(TYPE_ANNOTATION_SET_REF_LIST, written.len(), first);
    Ok(())
}

fn write_annotation_directories(pool: &DexPool, file: &mut Vec<u8>, layout: &mut DataLayout) -> Result<(), DexError> {
    let mut class_only: HashMap<u32, u32> = HashMap::new();
    let mut count = 0;
    let mut first = None;
    for class in pool.classes.sorted() {
        let mut directory = AnnotationsDirectoryItem {
            class_annotations_off: set_offset_of(pool, &class.annotations)?,
            ..Default::default()
        };
        for field in class.fields.iter().filter(|f| !f.annotations.is_empty()) {
            directory.field_annotations.push(MemberAnnotation {
                index: pool.fields.index(&field.field_ref())?,
                offset: set_offset_of(pool, &field.annotations)?,
            });
        }
        for method in &class.methods {
            let method_ref = method.method_ref();
            if !method.annotations.is_empty() {
                directory.method_annotations.push(MemberAnnotation {
                    index: pool.methods.index(&method_ref)?,
                    offset: set_offset_of(pool, &method.annotations)?,
                });
            }
            if let Some(offset) = layout.parameter_lists.get(&method_ref) {
                directory
                    .parameter_annotations
                    .push(MemberAnnotation { index: pool.methods.index(&method_ref)?, offset: *offset });
            }
        }
        if directory.is_empty() {
            continue;
        }
        directory.field_annotations.sort_by_key(|e| e.index);
        directory.method_annotations.sort_by_key(|e| e.index);
        directory.parameter_annotations.sort_by_key(|e| e.index);

        let shared = if directory.is_class_only() { class_only.get(&directory.class_annotations_off).copied() } else { None };
        let offset = match shared {
            Some(offset) => offset,
            None => {
                align(file, 4);
                let offset = file.len() as u32;
                first.get_or_insert(offset);
                directory.write(file);
                count += 1;
                if directory.is_class_only() {
                    class_only.insert(directory.class_annotations_off, offset);
                }
                offset
            }
        };
        layout.directories.insert(class.class_type.clone(), offset);
    }
    layout.record(TYPE_ANNOTATIONS_DIRECTORY_ITEM, count, first);
    Ok(())
}

fn write_debug_infos(pool: &DexPool, file: &mut Vec<u8>, layout: &mut DataLayout) -> Result<(), DexError> {
    let mut count = 0;
    let mut first = None;
    for class in pool.classes.sorted() {
        for method in &class.methods {
            let implementation = match &method.implementation {
                Some(implementation) => implementation,
                None => continue,
            };
            let has_names = method.parameters.iter().any(|p| p.name.is_some());
            if implementation.debug_items.is_empty() && !has_names {
                continue;
            }
            let offset = file.len() as u32;
            first.get_or_insert(offset);
            write_debug_info(pool, method, implementation, file).map_err(|e| err!(e, "method {}", method.method_ref()))?;
            layout.debug_infos.insert(method.method_ref(), offset);
            count += 1;
        }
    }
    layout.record(TYPE_DEBUG_INFO_ITEM, count, first);
    Ok(())
}

struct DebugWriter<'a> {
    pool: &'a DexPool,
    out: &'a mut Vec<u8>,
    address: u32,
    line: i64,
}

impl<'a> DebugWriter<'a> {
    fn string_or_none(&self, value: &Option<String>) -> Result<i32, DexError> {
        match value {
            Some(s) => Ok(self.pool.string_index(s)? as i32),
            None => Ok(-1),
        }
    }

    fn type_or_none(&self, value: &Option<String>) -> Result<i32, DexError> {
        match value {
            Some(t) => Ok(self.pool.type_index(t)? as i32),
            None => Ok(-1),
        }
    }

    fn advance_pc(&mut self, address: u32) -> Result<(), DexError> {
        if address < self.address {
            fail!("debug item cannot move backwards in code: {} after {}", address, self.address);
        }
        if address > self.address {
            write_u1(self.out, DBG_ADVANCE_PC);
            write_uleb128(self.out, address - self.address);
            self.address = address;
        }
        Ok(())
    }

    /// Emits a special opcode, preceded by explicit advances for any part of the move it
    /// cannot encode.
    fn append_position_delta(&mut self, address: u32, line: i64) -> Result<(), DexError> {
        if address < self.address {
            fail!("debug item cannot move backwards in code: {} after {}", address, self.address);
        }
        let mut pc_delta = (address - self.address) as i64;
        let mut line_delta = line - self.line;
        let line_base = DBG_LINE_BASE as i64;
        let line_range = DBG_LINE_RANGE as i64;

        if line_delta < line_base || line_delta > line_base + line_range - 1 {
            write_u1(self.out, DBG_ADVANCE_LINE);
            write_sleb128(self.out, line_delta as i32);
            line_delta = 0;
        }
        if DBG_FIRST_SPECIAL as i64 + (line_delta - line_base) + line_range * pc_delta > 0xff {
            write_u1(self.out, DBG_ADVANCE_PC);
            write_uleb128(self.out, pc_delta as u32);
            pc_delta = 0;
        }
        let special = DBG_FIRST_SPECIAL as i64 + (line_delta - line_base) + line_range * pc_delta;
        write_u1(self.out, special as u8);

        self.address = address;
        self.line = line;
        Ok(())
    }

    fn write_item(&mut self, item: &DebugItem) -> Result<(), DexError> {
        if let DebugItem::LineNumber { address, line } = item {
            return self.append_position_delta(*address, *line as i64);
        }
        self.advance_pc(item.address())?;
        match item {
            DebugItem::StartLocal { register, name, local_type, signature, .. } => {
                let name = self.string_or_none(name)?;
                let local_type = self.type_or_none(local_type)?;
                match signature {
                    Some(_) => {
                        let signature = self.string_or_none(signature)?;
                        write_u1(self.out, DBG_START_LOCAL_EXTENDED);
                        write_uleb128(self.out, *register as u32);
                        write_uleb128p1(self.out, name);
                        write_uleb128p1(self.out, local_type);
                        write_uleb128p1(self.out, signature);
                    }
                    None => {
                        write_u1(self.out, DBG_START_LOCAL);
                        write_uleb128(self.out, *register as u32);
                        write_uleb128p1(self.out, name);
                        write_uleb128p1(self.out, local_type);
                    }
                }
            }
            DebugItem::EndLocal { register, .. } => {
                write_u1(self.out, DBG_END_LOCAL);
                write_uleb128(self.out, *register as u32);
            }
            DebugItem::RestartLocal { register, .. } => {
                write_u1(self.out, DBG_RESTART_LOCAL);
                write_uleb128(self.out, *register as u32);
            }
            DebugItem::PrologueEnd { .. } => {
                write_u1(self.out, DBG_SET_PROLOGUE_END);
            }
            DebugItem::EpilogueBegin { .. } => {
                write_u1(self.out, DBG_SET_EPILOGUE_BEGIN);
            }
            DebugItem::SetSourceFile { source_file, .. } => {
                let name = self.string_or_none(source_file)?;
                write_u1(self.out, DBG_SET_FILE);
                write_uleb128p1(self.out, name);
            }
            DebugItem::LineNumber { .. } => {}
        }
        Ok(())
    }
}

fn write_debug_info(pool: &DexPool, method: &Method, implementation: &MethodImplementation, out: &mut Vec<u8>) -> Result<(), DexError> {
    let line_start = implementation
        .debug_items
        .iter()
        .find_map(|item| match item {
            DebugItem::LineNumber { line, .. } => Some(*line),
            _ => None,
        })
        .unwrap_or(0);

    write_uleb128(out, line_start);
    write_uleb128(out, method.parameters.len() as u32);
    for parameter in &method.parameters {
        let name = match &parameter.name {
            Some(name) => pool.string_index(name)? as i32,
            None => -1,
        };
        write_uleb128p1(out, name);
    }

    let mut writer = DebugWriter { pool, out, address: 0, line: line_start as i64 };
    for item in &implementation.debug_items {
        writer.write_item(item)?;
    }
    write_u1(writer.out, DBG_END_SEQUENCE);
    Ok(())
}

/// Outgoing argument words needed by an instruction that calls another method.
fn outgoing_words(instruction: &Instruction) -> u16 {
    let calls = matches!(instruction.opcode.reference_type, ReferenceType::Method | ReferenceType::CallSite)
        || matches!(
            instruction.operands,
            Operands::InlineIndex { .. }
                | Operands::InlineIndexRange { .. }
                | Operands::VtableIndex { .. }
                | Operands::VtableIndexRange { .. }
        );
    if calls { instruction.invoke_register_count().unwrap_or(0) } else { 0 }
}

fn write_code_items(pool: &DexPool, file: &mut Vec<u8>, layout: &mut DataLayout) -> Result<(), DexError> {
    let mut count = 0;
    let mut first = None;
    for class in pool.classes.sorted() {
        for method in &class.methods {
            let implementation = match &method.implementation {
                Some(implementation) => implementation,
                None => continue,
            };
            let method_ref = method.method_ref();
            align(file, 4);
            let offset = file.len() as u32;
            first.get_or_insert(offset);
            let debug_info_off = layout.debug_infos.get(&method_ref).copied().unwrap_or(0);
            write_code_item(pool, method, implementation, debug_info_off, file)
                .map_err(|e| err!(e, "method {}", method_ref))?;
            layout.code_items.insert(method_ref, offset);
            count += 1;
        }
    }
    layout.record(TYPE_CODE_ITEM, count, first);
    Ok(())
}

fn write_code_item(
    pool: &DexPool,
    method: &Method,
    implementation: &MethodImplementation,
    debug_info_off: u32,
    out: &mut Vec<u8>,
) -> Result<(), DexError> {
    let mut insns: Vec<u16> = Vec::with_capacity(implementation.instructions.len() * 2);
    let mut outs_size = 0u16;
    for instruction in &implementation.instructions {
        instruction.encode(pool.opcodes(), pool, &mut insns)?;
        outs_size = outs_size.max(outgoing_words(instruction));
    }

    let mut try_blocks: Vec<_> = implementation.try_blocks.iter().collect();
    try_blocks.sort_by_key(|t| t.start_address);

    write_u2(out, implementation.registers);
    write_u2(out, method.ins_size());
    write_u2(out, outs_size);
    write_u2(out, try_blocks.len() as u16);
    write_u4(out, debug_info_off);
    write_u4(out, insns.len() as u32);
    for unit in &insns {
        write_u2(out, *unit);
    }
    if try_blocks.is_empty() {
        return Ok(());
    }
    if insns.len() % 2 != 0 {
        write_u2(out, 0);
    }

    let mut lists: Vec<EncodedCatchHandler> = vec![];
    let mut list_for_try = Vec::with_capacity(try_blocks.len());
    for block in &try_blocks {
        let mut list = EncodedCatchHandler { handlers: vec![], catch_all_addr: None };
        for handler in &block.handlers {
            match &handler.exception_type {
                Some(t) => list.handlers.push((pool.type_index(t)?, handler.handler_address)),
                None => list.catch_all_addr = Some(handler.handler_address),
            }
        }
        let position = match lists.iter().position(|l| *l == list) {
            Some(position) => position,
            None => {
                lists.push(list);
                lists.len() - 1
            }
        };
        list_for_try.push(position);
    }

    let mut handler_bytes = vec![];
    write_uleb128(&mut handler_bytes, lists.len() as u32);
    let mut list_offsets = Vec::with_capacity(lists.len());
    for list in &lists {
        list_offsets.push(handler_bytes.len());
        list.write(&mut handler_bytes);
    }

    for (block, position) in try_blocks.iter().zip(list_for_try) {
        let handler_off = list_offsets[position];
        if handler_off > u16::MAX as usize {
            fail!("Exception handler list too large");
        }
        TryItem { start_addr: block.start_address, insn_count: block.code_unit_count, handler_off: handler_off as u16 }
            .write(out);
    }
    out.extend_from_slice(&handler_bytes);
    Ok(())
}

fn write_class_data(pool: &DexPool, file: &mut Vec<u8>, layout: &mut DataLayout) -> Result<(), DexError> {
    let mut count = 0;
    let mut first = None;
    for class in pool.classes.sorted() {
        let data = class_data_item(pool, class, layout)?;
        if data.is_empty() {
            continue;
        }
        let offset = file.len() as u32;
        first.get_or_insert(offset);
        data.write(file);
        layout.class_data.insert(class.class_type.clone(), offset);
        count += 1;
    }
    layout.record(TYPE_CLASS_DATA_ITEM, count, first);
    Ok(())
}

fn class_data_item(pool: &DexPool, class: &ClassDef, layout: &DataLayout) -> Result<ClassDataItem, DexError> {
    let mut data = ClassDataItem::default();
    for field in &class.fields {
        let encoded = EncodedField { field_idx: pool.fields.index(&field.field_ref())?, access_flags: field.access_flags.bits() };
        if field.is_static() { data.static_fields.push(encoded) } else { data.instance_fields.push(encoded) }
    }
    for method in &class.methods {
        let method_ref = method.method_ref();
        let encoded = EncodedMethod {
            method_idx: pool.methods.index(&method_ref)?,
            access_flags: method.access_flags.bits(),
            code_off: layout.code_items.get(&method_ref).copied().unwrap_or(0),
        };
        if method.is_direct() { data.direct_methods.push(encoded) } else { data.virtual_methods.push(encoded) }
    }
    data.static_fields.sort_by_key(|f| f.field_idx);
    data.instance_fields.sort_by_key(|f| f.field_idx);
    data.direct_methods.sort_by_key(|m| m.method_idx);
    data.virtual_methods.sort_by_key(|m| m.method_idx);
    Ok(data)
}

fn write_id_sections(pool: &DexPool, layout: &DataLayout) -> Result<Vec<u8>, DexError> {
    let mut buf = vec![];

    for offset in &layout.string_data {
        write_u4(&mut buf, *offset);
    }
    for (_, descriptor) in pool.types.sorted() {
        write_u4(&mut buf, pool.strings.index(descriptor.as_str())?);
    }
    for (_, proto) in pool.protos.sorted() {
        ProtoIdItem {
            shorty_idx: pool.strings.index(proto.shorty().as_str())?,
            return_type_idx: pool.types.index(proto.return_type.as_str())?,
            parameters_off: if proto.parameters.is_empty() { 0 } else { pool.type_lists.offset(&proto.parameters)? },
        }
        .write(&mut buf);
    }
    for (_, field) in pool.fields.sorted() {
        FieldIdItem {
            class_idx: index16(pool.types.index(field.defining_class.as_str())?, "Type")?,
            type_idx: index16(pool.types.index(field.field_type.as_str())?, "Type")?,
            name_idx: pool.strings.index(field.name.as_str())?,
        }
        .write(&mut buf);
    }
    for (_, method) in pool.methods.sorted() {
        MethodIdItem {
            class_idx: index16(pool.types.index(method.defining_class.as_str())?, "Type")?,
            proto_idx: index16(pool.protos.index(&method.proto)?, "Proto")?,
            name_idx: pool.strings.index(method.name.as_str())?,
        }
        .write(&mut buf);
    }
    for class in pool.classes.sorted() {
        class_def_item(pool, class, layout)?.write(&mut buf);
    }
    for (_, call_site) in pool.call_sites.sorted() {
        write_u4(&mut buf, pool.encoded_arrays.offset(&call_site.encoded_array())?);
    }
    for (_, handle) in pool.method_handles.sorted() {
        let target_idx = match &handle.target {
            MethodHandleTarget::Field(field) => index16(pool.fields.index(field)?, "Field")?,
            MethodHandleTarget::Method(method) => index16(pool.methods.index(method)?, "Method")?,
        };
        MethodHandleItem { kind: handle.kind.value(), target_idx }.write(&mut buf);
    }
    Ok(buf)
}

fn class_def_item(pool: &DexPool, class: &ClassDef, layout: &DataLayout) -> Result<ClassDefItem, DexError> {
    Ok(ClassDefItem {
        class_idx: pool.types.index(class.class_type.as_str())?,
        access_flags: class.access_flags.bits(),
        superclass_idx: match &class.superclass {
            Some(superclass) => pool.types.index(superclass.as_str())?,
            None => NO_INDEX,
        },
        interfaces_off: if class.interfaces.is_empty() { 0 } else { pool.type_lists.offset(&class.interfaces)? },
        source_file_idx: match &class.source_file {
            Some(source_file) => pool.strings.index(source_file.as_str())?,
            None => NO_INDEX,
        },
        annotations_off: layout.directories.get(&class.class_type).copied().unwrap_or(0),
        class_data_off: layout.class_data.get(&class.class_type).copied().unwrap_or(0),
        static_values_off: match class.static_initializers() {
            Some(values) => pool.encoded_arrays.offset(&values)?,
            None => 0,
        },
    })
}
