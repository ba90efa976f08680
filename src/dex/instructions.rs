//! Decoded Dalvik instructions and their per-format operand layouts.

use std::fmt;

use once_cell::sync::Lazy;

use crate::dex::error::DexError;
use crate::dex::opcode_format::{Format, Opcode, OpcodeFlags, ReferenceType};
use crate::dex::opcodes::Opcodes;
use crate::dex::read_u2;
use crate::dex::references::{IndexResolver, Reference, ReferenceLookup};

/// Stand-in opcode for values the active table does not define.
pub static UNKNOWN_OPCODE: Lazy<Opcode> = Lazy::new(|| {
    Opcode::new(vec![], "unknown", ReferenceType::None, None, Format::Format10x, OpcodeFlags::empty())
});

const PACKED_SWITCH_IDENT: u16 = 0x0100;
const SPARSE_SWITCH_IDENT: u16 = 0x0200;
const ARRAY_DATA_IDENT: u16 = 0x0300;

/// A reference operand, either as the raw pool index read from a file or as a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstructionRef {
    Index(u32),
    Resolved(Reference),
}

impl InstructionRef {
    pub fn resolved(&self) -> Option<&Reference> {
        match self {
            InstructionRef::Resolved(r) => Some(r),
            InstructionRef::Index(_) => None,
        }
    }

    fn index(&self, resolver: &dyn IndexResolver) -> Result<u32, DexError> {
        match self {
            InstructionRef::Index(idx) => Ok(*idx),
            InstructionRef::Resolved(r) => resolver.reference_index(r),
        }
    }

    fn resolve(&self, reference_type: ReferenceType, lookup: &dyn ReferenceLookup) -> Result<InstructionRef, DexError> {
        match self {
            InstructionRef::Index(idx) if reference_type != ReferenceType::None => {
                Ok(InstructionRef::Resolved(lookup.reference(reference_type, *idx)?))
            }
            other => Ok(other.clone()),
        }
    }
}

impl fmt::Display for InstructionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstructionRef::Index(idx) => write!(f, "index@{}", idx),
            InstructionRef::Resolved(r) => write!(f, "{}", r),
        }
    }
}

/// Targets are relative to the address of the switch instruction that uses the payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackedSwitchPayload {
    pub first_key: i32,
    pub targets: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SparseSwitchPayload {
    pub keys: Vec<i32>,
    pub targets: Vec<i32>,
}

/// Raw little-endian element bytes for fill-array-data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayPayload {
    pub element_width: u16,
    pub data: Vec<u8>,
}

impl ArrayPayload {
    pub fn new(element_width: u16, data: Vec<u8>) -> Result<ArrayPayload, DexError> {
        if !matches!(element_width, 1 | 2 | 4 | 8) {
            fail!("Invalid array-data element width {}", element_width);
        }
        if data.len() % element_width as usize != 0 {
            fail!("There are not a whole number of {} byte elements", element_width);
        }
        Ok(ArrayPayload { element_width, data })
    }

    pub fn element_count(&self) -> usize {
        if self.element_width == 0 { 0 } else { self.data.len() / self.element_width as usize }
    }
}

/// Operand fields, grouped by shape. Register numbers are always widened to `u16`; branch
/// offsets are in code units relative to the instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operands {
    None,
    Branch { offset: i32 },
    Reg { a: u16 },
    RegPair { a: u16, b: u16 },
    RegLiteral { a: u16, literal: i64 },
    RegBranch { a: u16, offset: i32 },
    RegPairBranch { a: u16, b: u16, offset: i32 },
    RegPairLiteral { a: u16, b: u16, literal: i32 },
    RegTriple { a: u16, b: u16, c: u16 },
    RegRef { a: u16, reference: InstructionRef },
    RegPairRef { a: u16, b: u16, reference: InstructionRef },
    Invoke { registers: Vec<u16>, reference: InstructionRef, reference2: Option<InstructionRef> },
    InvokeRange { start: u16, count: u16, reference: InstructionRef, reference2: Option<InstructionRef> },
    /// The error byte carries the kind of its reference in its top two bits.
    VerificationError { error: u8, reference: InstructionRef },
    FieldOffset { a: u16, b: u16, offset: u16 },
    InlineIndex { registers: Vec<u16>, index: u16 },
    InlineIndexRange { start: u16, count: u16, index: u16 },
    VtableIndex { registers: Vec<u16>, index: u16 },
    VtableIndexRange { start: u16, count: u16, index: u16 },
    PackedSwitch(PackedSwitchPayload),
    SparseSwitch(SparseSwitchPayload),
    ArrayData(ArrayPayload),
    Unknown { value: u16 },
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: &'static Opcode,
    pub operands: Operands,
}

impl PartialEq for Instruction {
    fn eq(&self, other: &Self) -> bool {
        self.opcode.name == other.opcode.name && self.operands == other.operands
    }
}

impl Eq for Instruction {}

// Register and literal field extraction from the first code unit
#[inline] fn a8(inst: u16) -> u16 { inst >> 8 }
#[inline] fn a4(inst: u16) -> u16 { (inst >> 8) & 0x0f }
#[inline] fn b4(inst: u16) -> u16 { inst >> 12 }
#[inline] fn s4(x: u16) -> i64 { (((x as u8) << 4) as i8 >> 4) as i64 }
#[inline] fn u32_of(lo: u16, hi: u16) -> u32 { (lo as u32) | ((hi as u32) << 16) }

fn read_units(bytes: &[u8], offset: usize, count: usize, name: &str) -> Result<Vec<u16>, DexError> {
    if bytes.len() < offset + count * 2 {
        fail!(
            "Truncated {}: need {} code units, have {}",
            name,
            count,
            bytes.len().saturating_sub(offset) / 2
        );
    }
    let mut ix = offset;
    let mut units = Vec::with_capacity(count);
    for _ in 0..count {
        units.push(read_u2(bytes, &mut ix)?);
    }
    Ok(units)
}

fn invoke_registers(first: u16, args: u16) -> Result<Vec<u16>, DexError> {
    let count = b4(first) as usize;
    if count > 5 {
        fail!("Invalid register count {} for an invoke with a register list", count);
    }
    let all = [args & 0xf, (args >> 4) & 0xf, (args >> 8) & 0xf, args >> 12, a4(first)];
    Ok(all[..count].to_vec())
}

impl Instruction {
    pub fn new(opcode: &'static Opcode, operands: Operands) -> Instruction {
        Instruction { opcode, operands }
    }

    /// Builds an instruction by mnemonic, failing if the target table does not define it.
    pub fn from_name(opcodes: &Opcodes, name: &str, operands: Operands) -> Result<Instruction, DexError> {
        match opcodes.get_by_name(name) {
            Some(opcode) => Ok(Instruction { opcode, operands }),
            None => fail!("Opcode {} does not exist for api {}", name, opcodes.api()),
        }
    }

    pub fn unknown(value: u16) -> Instruction {
        Instruction { opcode: &UNKNOWN_OPCODE, operands: Operands::Unknown { value } }
    }

    pub fn is_payload(&self) -> bool {
        self.opcode.format.is_payload_format()
    }

    /// Size in code units when placed at `address`. Payloads placed at an odd address carry one
    /// unit of alignment padding in front of them.
    pub fn size_in_code_units(&self, address: u32) -> usize {
        let padding = (address % 2) as usize;
        match &self.operands {
            Operands::PackedSwitch(p) => p.targets.len() * 2 + 4 + padding,
            Operands::SparseSwitch(p) => p.keys.len() * 4 + 2 + padding,
            Operands::ArrayData(p) => p.data.len().div_ceil(2) + 4 + padding,
            Operands::Unknown { .. } => 1,
            _ => self.opcode.format.size().map(|s| s / 2).unwrap_or(1),
        }
    }

    pub fn reference(&self) -> Option<&InstructionRef> {
        match &self.operands {
            Operands::RegRef { reference, .. }
            | Operands::RegPairRef { reference, .. }
            | Operands::Invoke { reference, .. }
            | Operands::InvokeRange { reference, .. }
            | Operands::VerificationError { reference, .. } => Some(reference),
            _ => None,
        }
    }

    pub fn reference2(&self) -> Option<&InstructionRef> {
        match &self.operands {
            Operands::Invoke { reference2, .. } | Operands::InvokeRange { reference2, .. } => reference2.as_ref(),
            _ => None,
        }
    }

    /// The kind a verification error's reference has, taken from the error byte.
    pub fn verification_reference_type(error: u8) -> ReferenceType {
        match error >> 6 {
            1 => ReferenceType::Type,
            2 => ReferenceType::Field,
            3 => ReferenceType::Method,
            _ => ReferenceType::None,
        }
    }

    /// Number of argument registers passed by an invoke-style instruction.
    pub fn invoke_register_count(&self) -> Option<u16> {
        match &self.operands {
            Operands::Invoke { registers, .. }
            | Operands::InlineIndex { registers, .. }
            | Operands::VtableIndex { registers, .. } => Some(registers.len() as u16),
            Operands::InvokeRange { count, .. }
            | Operands::InlineIndexRange { count, .. }
            | Operands::VtableIndexRange { count, .. } => Some(*count),
            _ => None,
        }
    }

    /// Decodes one instruction of the given opcode starting at byte `offset`.
    pub fn read(opcode: &'static Opcode, bytes: &[u8], offset: usize) -> Result<Instruction, DexError> {
        let name = opcode.name;
        let operands = match opcode.format {
            Format::PackedSwitchPayload => {
                let header = read_units(bytes, offset, 4, name)?;
                let size = header[1] as usize;
                let units = read_units(bytes, offset + 8, size * 2, name)?;
                let targets = units.chunks_exact(2).map(|t| u32_of(t[0], t[1]) as i32).collect();
                Operands::PackedSwitch(PackedSwitchPayload { first_key: u32_of(header[2], header[3]) as i32, targets })
            }
            Format::SparseSwitchPayload => {
                let header = read_units(bytes, offset, 2, name)?;
                let size = header[1] as usize;
                let units = read_units(bytes, offset + 4, size * 4, name)?;
                let values: Vec<i32> = units.chunks_exact(2).map(|t| u32_of(t[0], t[1]) as i32).collect();
                let (keys, targets) = values.split_at(size);
                Operands::SparseSwitch(SparseSwitchPayload { keys: keys.to_vec(), targets: targets.to_vec() })
            }
            Format::ArrayPayload => {
                let header = read_units(bytes, offset, 4, name)?;
                let element_width = header[1];
                let count = u32_of(header[2], header[3]) as usize;
                let length = (element_width as usize)
                    .checked_mul(count)
                    .ok_or_else(|| DexError::new("array-data size overflow"))?;
                let start = offset + 8;
                if bytes.len() < start + length {
                    fail!("Truncated {}: need {} data bytes", name, length);
                }
                Operands::ArrayData(ArrayPayload::new(element_width, bytes[start..start + length].to_vec())?)
            }
            format => {
                let size = format.size().unwrap_or(2) / 2;
                let u = read_units(bytes, offset, size, name)?;
                Instruction::read_fixed(format, &u)?
            }
        };
        Ok(Instruction { opcode, operands })
    }

    fn read_fixed(format: Format, u: &[u16]) -> Result<Operands, DexError> {
        use Format::*;
        let idx = |i: usize| InstructionRef::Index(u[i] as u32);
        let idx32 = |i: usize| InstructionRef::Index(u32_of(u[i], u[i + 1]));
        Ok(match format {
            Format10x => Operands::None,
            Format10t => Operands::Branch { offset: (a8(u[0]) as u8 as i8) as i32 },
            Format20t => Operands::Branch { offset: u[1] as i16 as i32 },
            Format30t => Operands::Branch { offset: u32_of(u[1], u[2]) as i32 },
            Format11n => Operands::RegLiteral { a: a4(u[0]), literal: s4(b4(u[0])) },
            Format11x => Operands::Reg { a: a8(u[0]) },
            Format12x => Operands::RegPair { a: a4(u[0]), b: b4(u[0]) },
            Format20bc => Operands::VerificationError { error: a8(u[0]) as u8, reference: idx(1) },
            Format21c => Operands::RegRef { a: a8(u[0]), reference: idx(1) },
            Format21ih => Operands::RegLiteral { a: a8(u[0]), literal: (((u[1] as u32) << 16) as i32) as i64 },
            Format21lh => Operands::RegLiteral { a: a8(u[0]), literal: ((u[1] as u64) << 48) as i64 },
            Format21s => Operands::RegLiteral { a: a8(u[0]), literal: u[1] as i16 as i64 },
            Format21t => Operands::RegBranch { a: a8(u[0]), offset: u[1] as i16 as i32 },
            Format22b => Operands::RegPairLiteral { a: a8(u[0]), b: u[1] & 0xff, literal: ((u[1] >> 8) as u8 as i8) as i32 },
            Format22c => Operands::RegPairRef { a: a4(u[0]), b: b4(u[0]), reference: idx(1) },
            Format22cs => Operands::FieldOffset { a: a4(u[0]), b: b4(u[0]), offset: u[1] },
            Format22s => Operands::RegPairLiteral { a: a4(u[0]), b: b4(u[0]), literal: u[1] as i16 as i32 },
            Format22t => Operands::RegPairBranch { a: a4(u[0]), b: b4(u[0]), offset: u[1] as i16 as i32 },
            Format22x => Operands::RegPair { a: a8(u[0]), b: u[1] },
            Format23x => Operands::RegTriple { a: a8(u[0]), b: u[1] & 0xff, c: u[1] >> 8 },
            Format31c => Operands::RegRef { a: a8(u[0]), reference: idx32(1) },
            Format31i => Operands::RegLiteral { a: a8(u[0]), literal: u32_of(u[1], u[2]) as i32 as i64 },
            Format31t => Operands::RegBranch { a: a8(u[0]), offset: u32_of(u[1], u[2]) as i32 },
            Format32x => Operands::RegPair { a: u[1], b: u[2] },
            Format35c => Operands::Invoke { registers: invoke_registers(u[0], u[2])?, reference: idx(1), reference2: None },
            Format35mi => Operands::InlineIndex { registers: invoke_registers(u[0], u[2])?, index: u[1] },
            Format35ms => Operands::VtableIndex { registers: invoke_registers(u[0], u[2])?, index: u[1] },
            Format3rc => Operands::InvokeRange { start: u[2], count: a8(u[0]), reference: idx(1), reference2: None },
            Format3rmi => Operands::InlineIndexRange { start: u[2], count: a8(u[0]), index: u[1] },
            Format3rms => Operands::VtableIndexRange { start: u[2], count: a8(u[0]), index: u[1] },
            Format45cc => Operands::Invoke {
                registers: invoke_registers(u[0], u[2])?,
                reference: idx(1),
                reference2: Some(idx(3)),
            },
            Format4rcc => Operands::InvokeRange { start: u[2], count: a8(u[0]), reference: idx(1), reference2: Some(idx(3)) },
            Format41c => Operands::RegRef { a: u[3], reference: idx32(1) },
            Format51l => Operands::RegLiteral {
                a: a8(u[0]),
                literal: ((u32_of(u[3], u[4]) as u64) << 32 | u32_of(u[1], u[2]) as u64) as i64,
            },
            Format52c => Operands::RegPairRef { a: u[3], b: u[4], reference: idx32(1) },
            Format5rc => Operands::InvokeRange { start: u[4], count: u[3], reference: idx32(1), reference2: None },
            Format::ArrayPayload | Format::PackedSwitchPayload | Format::SparseSwitchPayload => fail!("{:?} is not a fixed-size format", format),
        })
    }

    /// Replaces index operands with the references they point to.
    pub fn resolve(&self, lookup: &dyn ReferenceLookup) -> Result<Instruction, DexError> {
        let ref_type = self.opcode.reference_type;
        let ref_type2 = self.opcode.reference_type2.unwrap_or(ReferenceType::None);
        let operands = match &self.operands {
            Operands::RegRef { a, reference } => Operands::RegRef { a: *a, reference: reference.resolve(ref_type, lookup)? },
            Operands::RegPairRef { a, b, reference } => Operands::RegPairRef {
                a: *a,
                b: *b,
                reference: reference.resolve(ref_type, lookup)?,
            },
            Operands::Invoke { registers, reference, reference2 } => Operands::Invoke {
                registers: registers.clone(),
                reference: reference.resolve(ref_type, lookup)?,
                reference2: match reference2 {
                    Some(r) => Some(r.resolve(ref_type2, lookup)?),
                    None => None,
                },
            },
            Operands::InvokeRange { start, count, reference, reference2 } => Operands::InvokeRange {
                start: *start,
                count: *count,
                reference: reference.resolve(ref_type, lookup)?,
                reference2: match reference2 {
                    Some(r) => Some(r.resolve(ref_type2, lookup)?),
                    None => None,
                },
            },
            Operands::VerificationError { error, reference } => Operands::VerificationError {
                error: *error,
                reference: reference.resolve(Instruction::verification_reference_type(*error), lookup)?,
            },
            other => other.clone(),
        };
        Ok(Instruction { opcode: self.opcode, operands })
    }

    /// Appends this instruction to `out`, which holds the code units of the method written so
    /// far; its length is this instruction's code address.
    pub fn encode(&self, opcodes: &Opcodes, resolver: &dyn IndexResolver, out: &mut Vec<u16>) -> Result<(), DexError> {
        if let Operands::Unknown { value } = &self.operands {
            out.push(*value);
            return Ok(());
        }

        if self.is_payload() {
            if out.len() % 2 != 0 {
                out.push(0);
            }
            self.encode_payload(out);
            return Ok(());
        }

        let value = match opcodes.value_of(self.opcode) {
            Some(v) => v,
            None => fail!("Opcode {} does not exist for api {}", self.opcode.name, opcodes.api()),
        };
        let op = if value > 0xff { 0x00ff | ((value & 0xff) << 8) } else { value };
        let units = self.encode_fixed(op, resolver)?;
        if Some(units.len() * 2) != self.opcode.format.size() {
            fail!("Operands {:?} do not match format {:?} of {}", self.operands, self.opcode.format, self.opcode.name);
        }
        out.extend(units);
        Ok(())
    }

    fn encode_payload(&self, out: &mut Vec<u16>) {
        let push32 = |out: &mut Vec<u16>, v: u32| {
            out.push(v as u16);
            out.push((v >> 16) as u16);
        };
        match &self.operands {
            Operands::PackedSwitch(p) => {
                out.push(PACKED_SWITCH_IDENT);
                out.push(p.targets.len() as u16);
                push32(out, p.first_key as u32);
                for t in &p.targets {
                    push32(out, *t as u32);
                }
            }
            Operands::SparseSwitch(p) => {
                out.push(SPARSE_SWITCH_IDENT);
                out.push(p.keys.len() as u16);
                for k in &p.keys {
                    push32(out, *k as u32);
                }
                for t in &p.targets {
                    push32(out, *t as u32);
                }
            }
            Operands::ArrayData(p) => {
                out.push(ARRAY_DATA_IDENT);
                out.push(p.element_width);
                push32(out, p.element_count() as u32);
                for pair in p.data.chunks(2) {
                    let hi = pair.get(1).copied().unwrap_or(0);
                    out.push(u16::from_le_bytes([pair[0], hi]));
                }
            }
            _ => {}
        }
    }

    fn encode_fixed(&self, op: u16, resolver: &dyn IndexResolver) -> Result<Vec<u16>, DexError> {
        use Format::*;
        let name = self.opcode.name;
        let fmt = self.opcode.format;
        Ok(match (&self.operands, fmt) {
            (Operands::None, Format10x) => vec![op],
            (Operands::Branch { offset }, Format10t) => vec![op | (byte(*offset as i64, true, name)? << 8)],
            (Operands::Branch { offset }, Format20t) => vec![op, short(*offset as i64, name)?],
            (Operands::Branch { offset }, Format30t) => vec![op, *offset as u16, (*offset >> 16) as u16],
            (Operands::RegLiteral { a, literal }, Format11n) => {
                if !(-8..=7).contains(literal) {
                    fail!("Literal {} out of range for {}", literal, name);
                }
                vec![op | (nibble(*a, name)? << 8) | (((*literal as u16) & 0xf) << 12)]
            }
            (Operands::Reg { a }, Format11x) => vec![op | (byte(*a as i64, false, name)? << 8)],
            (Operands::RegPair { a, b }, Format12x) => vec![op | (nibble(*a, name)? << 8) | (nibble(*b, name)? << 12)],
            (Operands::VerificationError { error, reference }, Format20bc) => {
                vec![op | ((*error as u16) << 8), index16(reference.index(resolver)?, name)?]
            }
            (Operands::RegRef { a, reference }, Format21c) => {
                vec![op | (byte(*a as i64, false, name)? << 8), index16(reference.index(resolver)?, name)?]
            }
            (Operands::RegLiteral { a, literal }, Format21ih) => {
                if *literal as i32 as i64 != *literal || literal & 0xffff != 0 {
                    fail!("Literal {} cannot be encoded as a high16 for {}", literal, name);
                }
                vec![op | (byte(*a as i64, false, name)? << 8), (*literal >> 16) as u16]
            }
            (Operands::RegLiteral { a, literal }, Format21lh) => {
                if literal & 0xffff_ffff_ffff != 0 {
                    fail!("Literal {} cannot be encoded as a wide high16 for {}", literal, name);
                }
                vec![op | (byte(*a as i64, false, name)? << 8), (*literal >> 48) as u16]
            }
            (Operands::RegLiteral { a, literal }, Format21s) => {
                vec![op | (byte(*a as i64, false, name)? << 8), short(*literal, name)?]
            }
            (Operands::RegBranch { a, offset }, Format21t) => {
                vec![op | (byte(*a as i64, false, name)? << 8), short(*offset as i64, name)?]
            }
            (Operands::RegPairLiteral { a, b, literal }, Format22b) => vec![
                op | (byte(*a as i64, false, name)? << 8),
                byte(*b as i64, false, name)? | (byte(*literal as i64, true, name)? << 8),
            ],
            (Operands::RegPairRef { a, b, reference }, Format22c) => vec![
                op | (nibble(*a, name)? << 8) | (nibble(*b, name)? << 12),
                index16(reference.index(resolver)?, name)?,
            ],
            (Operands::FieldOffset { a, b, offset }, Format22cs) => {
                vec![op | (nibble(*a, name)? << 8) | (nibble(*b, name)? << 12), *offset]
            }
            (Operands::RegPairLiteral { a, b, literal }, Format22s) => vec![
                op | (nibble(*a, name)? << 8) | (nibble(*b, name)? << 12),
                short(*literal as i64, name)?,
            ],
            (Operands::RegPairBranch { a, b, offset }, Format22t) => vec![
                op | (nibble(*a, name)? << 8) | (nibble(*b, name)? << 12),
                short(*offset as i64, name)?,
            ],
            (Operands::RegPair { a, b }, Format22x) => vec![op | (byte(*a as i64, false, name)? << 8), *b],
            (Operands::RegTriple { a, b, c }, Format23x) => vec![
                op | (byte(*a as i64, false, name)? << 8),
                byte(*b as i64, false, name)? | (byte(*c as i64, false, name)? << 8),
            ],
            (Operands::RegRef { a, reference }, Format31c) => {
                let idx = reference.index(resolver)?;
                vec![op | (byte(*a as i64, false, name)? << 8), idx as u16, (idx >> 16) as u16]
            }
            (Operands::RegLiteral { a, literal }, Format31i) => {
                if *literal as i32 as i64 != *literal {
                    fail!("Literal {} out of range for {}", literal, name);
                }
                vec![op | (byte(*a as i64, false, name)? << 8), *literal as u16, (*literal >> 16) as u16]
            }
            (Operands::RegBranch { a, offset }, Format31t) => {
                vec![op | (byte(*a as i64, false, name)? << 8), *offset as u16, (*offset >> 16) as u16]
            }
            (Operands::RegPair { a, b }, Format32x) => vec![op, *a, *b],
            (Operands::Invoke { registers, reference, reference2: None }, Format35c) => {
                let (first, args) = register_list(op, registers, name)?;
                vec![first, index16(reference.index(resolver)?, name)?, args]
            }
            (Operands::InlineIndex { registers, index }, Format35mi)
            | (Operands::VtableIndex { registers, index }, Format35ms) => {
                let (first, args) = register_list(op, registers, name)?;
                vec![first, *index, args]
            }
            (Operands::InvokeRange { start, count, reference, reference2: None }, Format3rc) => {
                vec![op | (byte(*count as i64, false, name)? << 8), index16(reference.index(resolver)?, name)?, *start]
            }
            (Operands::InlineIndexRange { start, count, index }, Format3rmi)
            | (Operands::VtableIndexRange { start, count, index }, Format3rms) => {
                vec![op | (byte(*count as i64, false, name)? << 8), *index, *start]
            }
            (Operands::Invoke { registers, reference, reference2: Some(proto) }, Format45cc) => {
                let (first, args) = register_list(op, registers, name)?;
                vec![
                    first,
                    index16(reference.index(resolver)?, name)?,
                    args,
                    index16(proto.index(resolver)?, name)?,
                ]
            }
            (Operands::InvokeRange { start, count, reference, reference2: Some(proto) }, Format4rcc) => vec![
                op | (byte(*count as i64, false, name)? << 8),
                index16(reference.index(resolver)?, name)?,
                *start,
                index16(proto.index(resolver)?, name)?,
            ],
            (Operands::RegRef { a, reference }, Format41c) => {
                let idx = reference.index(resolver)?;
                vec![op, idx as u16, (idx >> 16) as u16, *a]
            }
            (Operands::RegLiteral { a, literal }, Format51l) => {
                let v = *literal as u64;
                vec![
                    op | (byte(*a as i64, false, name)? << 8),
                    v as u16,
                    (v >> 16) as u16,
                    (v >> 32) as u16,
                    (v >> 48) as u16,
                ]
            }
            (Operands::RegPairRef { a, b, reference }, Format52c) => {
                let idx = reference.index(resolver)?;
                vec![op, idx as u16, (idx >> 16) as u16, *a, *b]
            }
            (Operands::InvokeRange { start, count, reference, reference2: None }, Format5rc) => {
                let idx = reference.index(resolver)?;
                vec![op, idx as u16, (idx >> 16) as u16, *count, *start]
            }
            (operands, format) => fail!("Operands {:?} do not match format {:?} of {}", operands, format, name),
        })
    }
}

fn nibble(reg: u16, name: &str) -> Result<u16, DexError> {
    if reg > 0xf {
        fail!("Register v{} does not fit in 4 bits for {}", reg, name);
    }
    Ok(reg)
}

fn byte(value: i64, signed: bool, name: &str) -> Result<u16, DexError> {
    let fits = if signed { (-128..=127).contains(&value) } else { (0..=255).contains(&value) };
    if !fits {
        fail!("Value {} does not fit in 8 bits for {}", value, name);
    }
    Ok((value as u16) & 0xff)
}

fn short(value: i64, name: &str) -> Result<u16, DexError> {
    if value as i16 as i64 != value {
        fail!("Value {} does not fit in 16 bits for {}", value, name);
    }
    Ok(value as u16)
}

fn index16(idx: u32, name: &str) -> Result<u16, DexError> {
    if idx > 0xffff {
        fail!("Index {} too large for {}", idx, name);
    }
    Ok(idx as u16)
}

fn register_list(op: u16, registers: &[u16], name: &str) -> Result<(u16, u16), DexError> {
    if registers.len() > 5 {
        fail!("Too many registers ({}) for {}", registers.len(), name);
    }
    let mut regs = [0u16; 5];
    for (slot, r) in regs.iter_mut().zip(registers) {
        *slot = nibble(*r, name)?;
    }
    let first = op | (regs[4] << 8) | ((registers.len() as u16) << 12);
    let args = regs[0] | (regs[1] << 4) | (regs[2] << 8) | (regs[3] << 12);
    Ok((first, args))
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode.name)?;
        match self.reference() {
            Some(r) => write!(f, " {}", r),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dex::encoded_values::tests::TableResolver;
    use crate::dex::references::FieldRef;

    pub(crate) fn encode_all(opcodes: &Opcodes, instructions: &[Instruction]) -> Vec<u8> {
        let resolver = TableResolver::new();
        let mut units = vec![];
        for i in instructions {
            i.encode(opcodes, &resolver, &mut units).unwrap();
        }
        units.iter().flat_map(|u| u.to_le_bytes()).collect()
    }

    fn ins(opcodes: &Opcodes, name: &str, operands: Operands) -> Instruction {
        Instruction::from_name(opcodes, name, operands).unwrap()
    }

    #[test]
    fn test_nibble_layouts() {
        let opcodes = Opcodes::default();
        let bytes = encode_all(&opcodes, &[
            ins(&opcodes, "const/4", Operands::RegLiteral { a: 1, literal: -2 }),
            ins(&opcodes, "move", Operands::RegPair { a: 2, b: 3 }),
        ]);
        assert_eq!(bytes, vec![0x12, 0xe1, 0x01, 0x32]);

        let const4 = Instruction::read(opcodes.get(0x12).unwrap(), &bytes, 0).unwrap();
        assert_eq!(const4.operands, Operands::RegLiteral { a: 1, literal: -2 });
    }

    #[test]
    fn test_invoke_register_list() {
        let opcodes = Opcodes::default();
        let invoke = ins(&opcodes, "invoke-virtual", Operands::Invoke {
            registers: vec![1, 2, 3, 4, 5],
            reference: InstructionRef::Index(0x1234),
            reference2: None,
        });
        let bytes = encode_all(&opcodes, &[invoke.clone()]);
        assert_eq!(bytes, vec![0x6e, 0x55, 0x34, 0x12, 0x21, 0x43]);
        assert_eq!(Instruction::read(invoke.opcode, &bytes, 0).unwrap(), invoke);
        assert_eq!(invoke.invoke_register_count(), Some(5));
    }

    #[test]
    fn test_wide_literals() {
        let opcodes = Opcodes::default();
        let wide = ins(&opcodes, "const-wide", Operands::RegLiteral { a: 0, literal: -0x1122334455667788 });
        let high = ins(&opcodes, "const-wide/high16", Operands::RegLiteral { a: 2, literal: 0x4024 << 48 });
        let bytes = encode_all(&opcodes, &[wide.clone(), high.clone()]);
        assert_eq!(Instruction::read(wide.opcode, &bytes, 0).unwrap(), wide);
        assert_eq!(Instruction::read(high.opcode, &bytes, 10).unwrap(), high);

        let bad = ins(&opcodes, "const/high16", Operands::RegLiteral { a: 0, literal: 1 });
        let mut out = vec![];
        assert!(bad.encode(&opcodes, &TableResolver::new(), &mut out).is_err());
    }

    #[test]
    fn test_resolved_reference_uses_resolver() {
        let opcodes = Opcodes::default();
        let sget = ins(&opcodes, "sget-object", Operands::RegRef {
            a: 4,
            reference: InstructionRef::Resolved(Reference::Field(FieldRef::new("La/E;", "ONE", "La/E;"))),
        });
        let bytes = encode_all(&opcodes, &[sget]);
        assert_eq!(bytes, vec![0x62, 0x04, 0x00, 0x00]);

        let read = Instruction::read(opcodes.get(0x62).unwrap(), &bytes, 0).unwrap();
        let resolved = read.resolve(&TableResolver::new()).unwrap();
        assert_eq!(
            resolved.reference().and_then(|r| r.resolved()),
            Some(&Reference::Field(FieldRef::new("La/E;", "ONE", "La/E;")))
        );
    }

    #[test]
    fn test_payload_alignment_padding() {
        let opcodes = Opcodes::default();
        let payload = ins(&opcodes, "packed-switch-payload", Operands::PackedSwitch(PackedSwitchPayload {
            first_key: 10,
            targets: vec![3, 5],
        }));
        assert_eq!(payload.size_in_code_units(0), 8);
        assert_eq!(payload.size_in_code_units(1), 9);

        let nop = ins(&opcodes, "nop", Operands::None);
        let bytes = encode_all(&opcodes, &[nop, payload.clone()]);
        assert_eq!(bytes.len(), 2 * (1 + 9));
        assert_eq!(&bytes[2..4], &[0x00, 0x00]);
        assert_eq!(&bytes[4..6], &[0x00, 0x01]);
        assert_eq!(Instruction::read(payload.opcode, &bytes, 4).unwrap(), payload);
    }

    #[test]
    fn test_array_payload_odd_length() {
        let opcodes = Opcodes::default();
        let data = ArrayPayload::new(1, vec![1, 2, 3]).unwrap();
        let payload = ins(&opcodes, "array-payload", Operands::ArrayData(data));
        assert_eq!(payload.size_in_code_units(0), 6);
        let bytes = encode_all(&opcodes, &[payload.clone()]);
        assert_eq!(bytes, vec![0x00, 0x03, 0x01, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0x00]);
        assert_eq!(Instruction::read(payload.opcode, &bytes, 0).unwrap(), payload);
        assert!(ArrayPayload::new(4, vec![0; 6]).is_err());
    }
}
