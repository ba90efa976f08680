//! The opcode list and the per-target lookup table built from it.

use std::collections::HashMap;

use log::debug;
use once_cell::sync::Lazy;

use crate::dex::opcode_format::Format::*;
use crate::dex::opcode_format::{Format, Opcode, OpcodeFlags, ReferenceType as Ref, VersionConstraint};

/// The API level used when the caller does not choose one.
pub const DEFAULT_API: i32 = 20;

/// First API level whose runtime is ART rather than Dalvik.
pub const FIRST_ART_API: i32 = 21;

/// Jumbo instructions shipped only with the Dalvik releases starting at this level.
pub const FIRST_JUMBO_API: i32 = 14;

const NO_FLAGS: OpcodeFlags = OpcodeFlags::empty();
const THROW: OpcodeFlags = OpcodeFlags::CAN_THROW;
const CONTINUE: OpcodeFlags = OpcodeFlags::CAN_CONTINUE;
const SETS_RESULT: OpcodeFlags = OpcodeFlags::SETS_RESULT;
const SETS_REG: OpcodeFlags = OpcodeFlags::SETS_REGISTER;
const SETS_WIDE: OpcodeFlags = OpcodeFlags::SETS_WIDE_REGISTER;
const ODEX: OpcodeFlags = OpcodeFlags::ODEX_ONLY;
const QUICK: OpcodeFlags = OpcodeFlags::QUICK_FIELD_ACCESSOR;
const VOLATILE: OpcodeFlags = OpcodeFlags::VOLATILE_FIELD_ACCESSOR;
const STATIC: OpcodeFlags = OpcodeFlags::STATIC_FIELD_ACCESSOR;
const JUMBO: OpcodeFlags = OpcodeFlags::JUMBO_OPCODE;
const INIT_REF: OpcodeFlags = OpcodeFlags::CAN_INITIALIZE_REFERENCE;

fn op(
    values: Vec<VersionConstraint>,
    name: &'static str,
    reference_type: Ref,
    format: Format,
    flags: OpcodeFlags,
) -> Opcode {
    Opcode::new(values, name, reference_type, None, format, flags)
}

/// Every instruction the format has ever defined, across all API levels and ART versions.
static OPCODES: Lazy<Vec<Opcode>> = Lazy::new(|| {
    vec![
        op(Opcode::all_versions(0x00), "nop", Ref::None, Format10x, CONTINUE),
        op(Opcode::all_versions(0x01), "move", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x02), "move/from16", Ref::None, Format22x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x03), "move/16", Ref::None, Format32x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x04), "move-wide", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x05), "move-wide/from16", Ref::None, Format22x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x06), "move-wide/16", Ref::None, Format32x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x07), "move-object", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x08), "move-object/from16", Ref::None, Format22x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x09), "move-object/16", Ref::None, Format32x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x0a), "move-result", Ref::None, Format11x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x0b), "move-result-wide", Ref::None, Format11x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x0c), "move-result-object", Ref::None, Format11x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x0d), "move-exception", Ref::None, Format11x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x0e), "return-void", Ref::None, Format10x, NO_FLAGS),
        op(Opcode::all_versions(0x0f), "return", Ref::None, Format11x, NO_FLAGS),
        op(Opcode::all_versions(0x10), "return-wide", Ref::None, Format11x, NO_FLAGS),
        op(Opcode::all_versions(0x11), "return-object", Ref::None, Format11x, NO_FLAGS),
        op(Opcode::all_versions(0x12), "const/4", Ref::None, Format11n, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x13), "const/16", Ref::None, Format21s, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x14), "const", Ref::None, Format31i, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x15), "const/high16", Ref::None, Format21ih, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x16), "const-wide/16", Ref::None, Format21s, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x17), "const-wide/32", Ref::None, Format31i, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x18), "const-wide", Ref::None, Format51l, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x19), "const-wide/high16", Ref::None, Format21lh, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x1a), "const-string", Ref::String, Format21c, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x1b), "const-string/jumbo", Ref::String, Format31c, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x1c), "const-class", Ref::Type, Format21c, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x1d), "monitor-enter", Ref::None, Format11x, THROW | CONTINUE),
        op(Opcode::all_versions(0x1e), "monitor-exit", Ref::None, Format11x, THROW | CONTINUE),
        op(Opcode::all_versions(0x1f), "check-cast", Ref::Type, Format21c, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x20), "instance-of", Ref::Type, Format22c, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x21), "array-length", Ref::None, Format12x, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x22), "new-instance", Ref::Type, Format21c, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x23), "new-array", Ref::Type, Format22c, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x24), "filled-new-array", Ref::Type, Format35c, THROW | CONTINUE | SETS_RESULT),
        op(Opcode::all_versions(0x25), "filled-new-array/range", Ref::Type, Format3rc, THROW | CONTINUE | SETS_RESULT),
        op(Opcode::all_versions(0x26), "fill-array-data", Ref::None, Format31t, CONTINUE),
        op(Opcode::all_versions(0x27), "throw", Ref::None, Format11x, THROW),
        op(Opcode::all_versions(0x28), "goto", Ref::None, Format10t, NO_FLAGS),
        op(Opcode::all_versions(0x29), "goto/16", Ref::None, Format20t, NO_FLAGS),
        op(Opcode::all_versions(0x2a), "goto/32", Ref::None, Format30t, NO_FLAGS),
        op(Opcode::all_versions(0x2b), "packed-switch", Ref::None, Format31t, CONTINUE),
        op(Opcode::all_versions(0x2c), "sparse-switch", Ref::None, Format31t, CONTINUE),
        op(Opcode::all_versions(0x2d), "cmpl-float", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x2e), "cmpg-float", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x2f), "cmpl-double", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x30), "cmpg-double", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x31), "cmp-long", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x32), "if-eq", Ref::None, Format22t, CONTINUE),
        op(Opcode::all_versions(0x33), "if-ne", Ref::None, Format22t, CONTINUE),
        op(Opcode::all_versions(0x34), "if-lt", Ref::None, Format22t, CONTINUE),
        op(Opcode::all_versions(0x35), "if-ge", Ref::None, Format22t, CONTINUE),
        op(Opcode::all_versions(0x36), "if-gt", Ref::None, Format22t, CONTINUE),
        op(Opcode::all_versions(0x37), "if-le", Ref::None, Format22t, CONTINUE),
        op(Opcode::all_versions(0x38), "if-eqz", Ref::None, Format21t, CONTINUE),
        op(Opcode::all_versions(0x39), "if-nez", Ref::None, Format21t, CONTINUE),
        op(Opcode::all_versions(0x3a), "if-ltz", Ref::None, Format21t, CONTINUE),
        op(Opcode::all_versions(0x3b), "if-gez", Ref::None, Format21t, CONTINUE),
        op(Opcode::all_versions(0x3c), "if-gtz", Ref::None, Format21t, CONTINUE),
        op(Opcode::all_versions(0x3d), "if-lez", Ref::None, Format21t, CONTINUE),
        op(Opcode::all_versions(0x44), "aget", Ref::None, Format23x, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x45), "aget-wide", Ref::None, Format23x, THROW | CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x46), "aget-object", Ref::None, Format23x, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x47), "aget-boolean", Ref::None, Format23x, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x48), "aget-byte", Ref::None, Format23x, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x49), "aget-char", Ref::None, Format23x, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x4a), "aget-short", Ref::None, Format23x, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x4b), "aput", Ref::None, Format23x, THROW | CONTINUE),
        op(Opcode::all_versions(0x4c), "aput-wide", Ref::None, Format23x, THROW | CONTINUE),
        op(Opcode::all_versions(0x4d), "aput-object", Ref::None, Format23x, THROW | CONTINUE),
        op(Opcode::all_versions(0x4e), "aput-boolean", Ref::None, Format23x, THROW | CONTINUE),
        op(Opcode::all_versions(0x4f), "aput-byte", Ref::None, Format23x, THROW | CONTINUE),
        op(Opcode::all_versions(0x50), "aput-char", Ref::None, Format23x, THROW | CONTINUE),
        op(Opcode::all_versions(0x51), "aput-short", Ref::None, Format23x, THROW | CONTINUE),
        op(Opcode::all_versions(0x52), "iget", Ref::Field, Format22c, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x53), "iget-wide", Ref::Field, Format22c, THROW | CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x54), "iget-object", Ref::Field, Format22c, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x55), "iget-boolean", Ref::Field, Format22c, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x56), "iget-byte", Ref::Field, Format22c, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x57), "iget-char", Ref::Field, Format22c, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x58), "iget-short", Ref::Field, Format22c, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x59), "iput", Ref::Field, Format22c, THROW | CONTINUE),
        op(Opcode::all_versions(0x5a), "iput-wide", Ref::Field, Format22c, THROW | CONTINUE),
        op(Opcode::all_versions(0x5b), "iput-object", Ref::Field, Format22c, THROW | CONTINUE),
        op(Opcode::all_versions(0x5c), "iput-boolean", Ref::Field, Format22c, THROW | CONTINUE),
        op(Opcode::all_versions(0x5d), "iput-byte", Ref::Field, Format22c, THROW | CONTINUE),
        op(Opcode::all_versions(0x5e), "iput-char", Ref::Field, Format22c, THROW | CONTINUE),
        op(Opcode::all_versions(0x5f), "iput-short", Ref::Field, Format22c, THROW | CONTINUE),
        op(Opcode::all_versions(0x60), "sget", Ref::Field, Format21c, THROW | CONTINUE | SETS_REG | STATIC),
        op(Opcode::all_versions(0x61), "sget-wide", Ref::Field, Format21c, THROW | CONTINUE | SETS_REG | SETS_WIDE | STATIC),
        op(Opcode::all_versions(0x62), "sget-object", Ref::Field, Format21c, THROW | CONTINUE | SETS_REG | STATIC),
        op(Opcode::all_versions(0x63), "sget-boolean", Ref::Field, Format21c, THROW | CONTINUE | SETS_REG | STATIC),
        op(Opcode::all_versions(0x64), "sget-byte", Ref::Field, Format21c, THROW | CONTINUE | SETS_REG | STATIC),
        op(Opcode::all_versions(0x65), "sget-char", Ref::Field, Format21c, THROW | CONTINUE | SETS_REG | STATIC),
        op(Opcode::all_versions(0x66), "sget-short", Ref::Field, Format21c, THROW | CONTINUE | SETS_REG | STATIC),
        op(Opcode::all_versions(0x67), "sput", Ref::Field, Format21c, THROW | CONTINUE | STATIC),
        op(Opcode::all_versions(0x68), "sput-wide", Ref::Field, Format21c, THROW | CONTINUE | STATIC),
        op(Opcode::all_versions(0x69), "sput-object", Ref::Field, Format21c, THROW | CONTINUE | STATIC),
        op(Opcode::all_versions(0x6a), "sput-boolean", Ref::Field, Format21c, THROW | CONTINUE | STATIC),
        op(Opcode::all_versions(0x6b), "sput-byte", Ref::Field, Format21c, THROW | CONTINUE | STATIC),
        op(Opcode::all_versions(0x6c), "sput-char", Ref::Field, Format21c, THROW | CONTINUE | STATIC),
        op(Opcode::all_versions(0x6d), "sput-short", Ref::Field, Format21c, THROW | CONTINUE | STATIC),
        op(Opcode::all_versions(0x6e), "invoke-virtual", Ref::Method, Format35c, THROW | CONTINUE | SETS_RESULT),
        op(Opcode::all_versions(0x6f), "invoke-super", Ref::Method, Format35c, THROW | CONTINUE | SETS_RESULT),
        op(Opcode::all_versions(0x70), "invoke-direct", Ref::Method, Format35c, THROW | CONTINUE | SETS_RESULT | INIT_REF),
        op(Opcode::all_versions(0x71), "invoke-static", Ref::Method, Format35c, THROW | CONTINUE | SETS_RESULT),
        op(Opcode::all_versions(0x72), "invoke-interface", Ref::Method, Format35c, THROW | CONTINUE | SETS_RESULT),
        op(Opcode::all_versions(0x74), "invoke-virtual/range", Ref::Method, Format3rc, THROW | CONTINUE | SETS_RESULT),
        op(Opcode::all_versions(0x75), "invoke-super/range", Ref::Method, Format3rc, THROW | CONTINUE | SETS_RESULT),
        op(Opcode::all_versions(0x76), "invoke-direct/range", Ref::Method, Format3rc, THROW | CONTINUE | SETS_RESULT | INIT_REF),
        op(Opcode::all_versions(0x77), "invoke-static/range", Ref::Method, Format3rc, THROW | CONTINUE | SETS_RESULT),
        op(Opcode::all_versions(0x78), "invoke-interface/range", Ref::Method, Format3rc, THROW | CONTINUE | SETS_RESULT),
        op(Opcode::all_versions(0x7b), "neg-int", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x7c), "not-int", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x7d), "neg-long", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x7e), "not-long", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x7f), "neg-float", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x80), "neg-double", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x81), "int-to-long", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x82), "int-to-float", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x83), "int-to-double", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x84), "long-to-int", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x85), "long-to-float", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x86), "long-to-double", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x87), "float-to-int", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x88), "float-to-long", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x89), "float-to-double", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x8a), "double-to-int", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x8b), "double-to-long", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x8c), "double-to-float", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x8d), "int-to-byte", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x8e), "int-to-char", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x8f), "int-to-short", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x90), "add-int", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x91), "sub-int", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x92), "mul-int", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x93), "div-int", Ref::None, Format23x, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x94), "rem-int", Ref::None, Format23x, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x95), "and-int", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x96), "or-int", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x97), "xor-int", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x98), "shl-int", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x99), "shr-int", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x9a), "ushr-int", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0x9b), "add-long", Ref::None, Format23x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x9c), "sub-long", Ref::None, Format23x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x9d), "mul-long", Ref::None, Format23x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x9e), "div-long", Ref::None, Format23x, THROW | CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0x9f), "rem-long", Ref::None, Format23x, THROW | CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xa0), "and-long", Ref::None, Format23x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xa1), "or-long", Ref::None, Format23x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xa2), "xor-long", Ref::None, Format23x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xa3), "shl-long", Ref::None, Format23x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xa4), "shr-long", Ref::None, Format23x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xa5), "ushr-long", Ref::None, Format23x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xa6), "add-float", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xa7), "sub-float", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xa8), "mul-float", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xa9), "div-float", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xaa), "rem-float", Ref::None, Format23x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xab), "add-double", Ref::None, Format23x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xac), "sub-double", Ref::None, Format23x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xad), "mul-double", Ref::None, Format23x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xae), "div-double", Ref::None, Format23x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xaf), "rem-double", Ref::None, Format23x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xb0), "add-int/2addr", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xb1), "sub-int/2addr", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xb2), "mul-int/2addr", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xb3), "div-int/2addr", Ref::None, Format12x, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xb4), "rem-int/2addr", Ref::None, Format12x, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xb5), "and-int/2addr", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xb6), "or-int/2addr", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xb7), "xor-int/2addr", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xb8), "shl-int/2addr", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xb9), "shr-int/2addr", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xba), "ushr-int/2addr", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xbb), "add-long/2addr", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xbc), "sub-long/2addr", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xbd), "mul-long/2addr", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xbe), "div-long/2addr", Ref::None, Format12x, THROW | CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xbf), "rem-long/2addr", Ref::None, Format12x, THROW | CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xc0), "and-long/2addr", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xc1), "or-long/2addr", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xc2), "xor-long/2addr", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xc3), "shl-long/2addr", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xc4), "shr-long/2addr", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xc5), "ushr-long/2addr", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xc6), "add-float/2addr", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xc7), "sub-float/2addr", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xc8), "mul-float/2addr", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xc9), "div-float/2addr", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xca), "rem-float/2addr", Ref::None, Format12x, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xcb), "add-double/2addr", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xcc), "sub-double/2addr", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xcd), "mul-double/2addr", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xce), "div-double/2addr", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xcf), "rem-double/2addr", Ref::None, Format12x, CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::all_versions(0xd0), "add-int/lit16", Ref::None, Format22s, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xd1), "rsub-int", Ref::None, Format22s, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xd2), "mul-int/lit16", Ref::None, Format22s, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xd3), "div-int/lit16", Ref::None, Format22s, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xd4), "rem-int/lit16", Ref::None, Format22s, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xd5), "and-int/lit16", Ref::None, Format22s, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xd6), "or-int/lit16", Ref::None, Format22s, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xd7), "xor-int/lit16", Ref::None, Format22s, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xd8), "add-int/lit8", Ref::None, Format22b, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xd9), "rsub-int/lit8", Ref::None, Format22b, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xda), "mul-int/lit8", Ref::None, Format22b, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xdb), "div-int/lit8", Ref::None, Format22b, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xdc), "rem-int/lit8", Ref::None, Format22b, THROW | CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xdd), "and-int/lit8", Ref::None, Format22b, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xde), "or-int/lit8", Ref::None, Format22b, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xdf), "xor-int/lit8", Ref::None, Format22b, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xe0), "shl-int/lit8", Ref::None, Format22b, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xe1), "shr-int/lit8", Ref::None, Format22b, CONTINUE | SETS_REG),
        op(Opcode::all_versions(0xe2), "ushr-int/lit8", Ref::None, Format22b, CONTINUE | SETS_REG),
        op(Opcode::first_api(0xe3, 9), "iget-volatile", Ref::Field, Format22c, ODEX | VOLATILE | THROW | CONTINUE | SETS_REG),
        op(Opcode::first_api(0xe4, 9), "iput-volatile", Ref::Field, Format22c, ODEX | VOLATILE | THROW | CONTINUE),
        op(Opcode::first_api(0xe5, 9), "sget-volatile", Ref::Field, Format21c, ODEX | VOLATILE | THROW | CONTINUE | SETS_REG | STATIC),
        op(Opcode::first_api(0xe6, 9), "sput-volatile", Ref::Field, Format21c, ODEX | VOLATILE | THROW | CONTINUE | STATIC),
        op(Opcode::first_api(0xe7, 9), "iget-object-volatile", Ref::Field, Format22c, ODEX | VOLATILE | THROW | CONTINUE | SETS_REG),
        op(Opcode::first_api(0xe8, 9), "iget-wide-volatile", Ref::Field, Format22c, ODEX | VOLATILE | THROW | CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::first_api(0xe9, 9), "iput-wide-volatile", Ref::Field, Format22c, ODEX | VOLATILE | THROW | CONTINUE),
        op(Opcode::first_api(0xea, 9), "sget-wide-volatile", Ref::Field, Format21c, ODEX | VOLATILE | THROW | CONTINUE | SETS_REG | SETS_WIDE | STATIC),
        op(Opcode::first_api(0xeb, 9), "sput-wide-volatile", Ref::Field, Format21c, ODEX | VOLATILE | THROW | CONTINUE | STATIC),
        op(Opcode::first_api(0xed, 5), "throw-verification-error", Ref::None, Format20bc, ODEX | THROW),
        op(Opcode::all_apis(0xee), "execute-inline", Ref::None, Format35mi, ODEX | THROW | CONTINUE | SETS_RESULT),
        op(Opcode::first_api(0xef, 8), "execute-inline/range", Ref::None, Format3rmi, ODEX | THROW | CONTINUE | SETS_RESULT),
        op(Opcode::last_api(0xf0, 13), "invoke-direct-empty", Ref::Method, Format35c, ODEX | THROW | CONTINUE | SETS_RESULT | INIT_REF),
        op(Opcode::first_api(0xf0, 14), "invoke-object-init/range", Ref::Method, Format3rc, ODEX | THROW | CONTINUE | SETS_RESULT | INIT_REF),
        op(Opcode::combine(Opcode::first_api(0xf1, 11), Opcode::last_art_version(0x73, 59)), "return-void-barrier", Ref::None, Format10x, ODEX),
        op(Opcode::first_art_version(0x73, 60), "return-void-no-barrier", Ref::None, Format10x, ODEX),
        op(Opcode::combine(Opcode::all_apis(0xf2), Opcode::all_art_versions(0xe3)), "iget-quick", Ref::None, Format22cs, ODEX | QUICK | THROW | CONTINUE | SETS_REG),
        op(Opcode::combine(Opcode::all_apis(0xf3), Opcode::all_art_versions(0xe4)), "iget-wide-quick", Ref::None, Format22cs, ODEX | QUICK | THROW | CONTINUE | SETS_REG | SETS_WIDE),
        op(Opcode::combine(Opcode::all_apis(0xf4), Opcode::all_art_versions(0xe5)), "iget-object-quick", Ref::None, Format22cs, ODEX | QUICK | THROW | CONTINUE | SETS_REG),
        op(Opcode::combine(Opcode::all_apis(0xf5), Opcode::all_art_versions(0xe6)), "iput-quick", Ref::None, Format22cs, ODEX | QUICK | THROW | CONTINUE),
        op(Opcode::combine(Opcode::all_apis(0xf6), Opcode::all_art_versions(0xe7)), "iput-wide-quick", Ref::None, Format22cs, ODEX | QUICK | THROW | CONTINUE),
        op(Opcode::combine(Opcode::all_apis(0xf7), Opcode::all_art_versions(0xe8)), "iput-object-quick", Ref::None, Format22cs, ODEX | QUICK | THROW | CONTINUE),
        op(Opcode::all_art_versions(0xeb), "iput-boolean-quick", Ref::None, Format22cs, ODEX | THROW | CONTINUE | QUICK),
        op(Opcode::all_art_versions(0xec), "iput-byte-quick", Ref::None, Format22cs, ODEX | THROW | CONTINUE | QUICK),
        op(Opcode::all_art_versions(0xed), "iput-char-quick", Ref::None, Format22cs, ODEX | THROW | CONTINUE | QUICK),
        op(Opcode::all_art_versions(0xee), "iput-short-quick", Ref::None, Format22cs, ODEX | THROW | CONTINUE | QUICK),
        op(Opcode::all_art_versions(0xef), "iget-boolean-quick", Ref::None, Format22cs, ODEX | QUICK | THROW | CONTINUE | SETS_REG),
        op(Opcode::all_art_versions(0xf0), "iget-byte-quick", Ref::None, Format22cs, ODEX | QUICK | THROW | CONTINUE | SETS_REG),
        op(Opcode::all_art_versions(0xf1), "iget-char-quick", Ref::None, Format22cs, ODEX | QUICK | THROW | CONTINUE | SETS_REG),
        op(Opcode::all_art_versions(0xf2), "iget-short-quick", Ref::None, Format22cs, ODEX | QUICK | THROW | CONTINUE | SETS_REG),
        op(Opcode::combine(Opcode::all_apis(0xf8), Opcode::all_art_versions(0xe9)), "invoke-virtual-quick", Ref::None, Format35ms, ODEX | THROW | CONTINUE | SETS_RESULT),
        op(Opcode::combine(Opcode::all_apis(0xf9), Opcode::all_art_versions(0xea)), "invoke-virtual-quick/range", Ref::None, Format3rms, ODEX | THROW | CONTINUE | SETS_RESULT),
        op(Opcode::last_api(0xfa, 25), "invoke-super-quick", Ref::None, Format35ms, ODEX | THROW | CONTINUE | SETS_RESULT),
        op(Opcode::last_api(0xfb, 25), "invoke-super-quick/range", Ref::None, Format3rms, ODEX | THROW | CONTINUE | SETS_RESULT),
        op(Opcode::first_api(0xfc, 9), "iput-object-volatile", Ref::Field, Format22c, ODEX | VOLATILE | THROW | CONTINUE),
        op(Opcode::first_api(0xfd, 9), "sget-object-volatile", Ref::Field, Format21c, ODEX | VOLATILE | THROW | CONTINUE | SETS_REG | STATIC),
        op(Opcode::between_api(0xfe, 9, 19), "sput-object-volatile", Ref::Field, Format21c, ODEX | VOLATILE | THROW | CONTINUE | STATIC),
        op(Opcode::all_versions(0x100), "packed-switch-payload", Ref::None, PackedSwitchPayload, NO_FLAGS),
        op(Opcode::all_versions(0x200), "sparse-switch-payload", Ref::None, SparseSwitchPayload, NO_FLAGS),
        op(Opcode::all_versions(0x300), "array-payload", Ref::None, ArrayPayload, NO_FLAGS),
        Opcode::new(Opcode::first_art_version(0xfa, 87), "invoke-polymorphic", Ref::Method, Some(Ref::MethodProto), Format45cc, THROW | CONTINUE | SETS_RESULT),
        Opcode::new(Opcode::first_art_version(0xfb, 87), "invoke-polymorphic/range", Ref::Method, Some(Ref::MethodProto), Format4rcc, THROW | CONTINUE | SETS_RESULT),
        op(Opcode::first_art_version(0xfc, 111), "invoke-custom", Ref::CallSite, Format35c, THROW | CONTINUE | SETS_RESULT),
        op(Opcode::first_art_version(0xfd, 111), "invoke-custom/range", Ref::CallSite, Format3rc, THROW | CONTINUE | SETS_RESULT),
        op(Opcode::first_art_version(0xfe, 134), "const-method-handle", Ref::MethodHandle, Format21c, THROW | CONTINUE | SETS_REG),
        op(Opcode::first_art_version(0xff, 134), "const-method-type", Ref::MethodProto, Format21c, THROW | CONTINUE | SETS_REG),

        // Jumbo variants, selected through the 0xff escape byte
        op(Opcode::first_api(0xff00, 14), "const-class/jumbo", Ref::Type, Format41c, THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xff01, 14), "check-cast/jumbo", Ref::Type, Format41c, THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xff02, 14), "instance-of/jumbo", Ref::Type, Format52c, THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xff03, 14), "new-instance/jumbo", Ref::Type, Format41c, THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xff04, 14), "new-array/jumbo", Ref::Type, Format52c, THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xff05, 14), "filled-new-array/jumbo", Ref::Type, Format5rc, THROW | CONTINUE | SETS_RESULT | JUMBO),
        op(Opcode::first_api(0xff06, 14), "iget/jumbo", Ref::Field, Format52c, THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xff07, 14), "iget-wide/jumbo", Ref::Field, Format52c, THROW | CONTINUE | SETS_REG | SETS_WIDE | JUMBO),
        op(Opcode::first_api(0xff08, 14), "iget-object/jumbo", Ref::Field, Format52c, THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xff09, 14), "iget-boolean/jumbo", Ref::Field, Format52c, THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xff0a, 14), "iget-byte/jumbo", Ref::Field, Format52c, THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xff0b, 14), "iget-char/jumbo", Ref::Field, Format52c, THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xff0c, 14), "iget-short/jumbo", Ref::Field, Format52c, THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xff0d, 14), "iput/jumbo", Ref::Field, Format52c, THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xff0e, 14), "iput-wide/jumbo", Ref::Field, Format52c, THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xff0f, 14), "iput-object/jumbo", Ref::Field, Format52c, THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xff10, 14), "iput-boolean/jumbo", Ref::Field, Format52c, THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xff11, 14), "iput-byte/jumbo", Ref::Field, Format52c, THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xff12, 14), "iput-char/jumbo", Ref::Field, Format52c, THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xff13, 14), "iput-short/jumbo", Ref::Field, Format52c, THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xff14, 14), "sget/jumbo", Ref::Field, Format41c, THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xff15, 14), "sget-wide/jumbo", Ref::Field, Format41c, THROW | CONTINUE | SETS_REG | SETS_WIDE | JUMBO),
        op(Opcode::first_api(0xff16, 14), "sget-object/jumbo", Ref::Field, Format41c, THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xff17, 14), "sget-boolean/jumbo", Ref::Field, Format41c, THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xff18, 14), "sget-byte/jumbo", Ref::Field, Format41c, THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xff19, 14), "sget-char/jumbo", Ref::Field, Format41c, THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xff1a, 14), "sget-short/jumbo", Ref::Field, Format41c, THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xff1b, 14), "sput/jumbo", Ref::Field, Format41c, THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xff1c, 14), "sput-wide/jumbo", Ref::Field, Format41c, THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xff1d, 14), "sput-object/jumbo", Ref::Field, Format41c, THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xff1e, 14), "sput-boolean/jumbo", Ref::Field, Format41c, THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xff1f, 14), "sput-byte/jumbo", Ref::Field, Format41c, THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xff20, 14), "sput-char/jumbo", Ref::Field, Format41c, THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xff21, 14), "sput-short/jumbo", Ref::Field, Format41c, THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xff22, 14), "invoke-virtual/jumbo", Ref::Method, Format5rc, THROW | CONTINUE | SETS_RESULT | JUMBO),
        op(Opcode::first_api(0xff23, 14), "invoke-super/jumbo", Ref::Method, Format5rc, THROW | CONTINUE | SETS_RESULT | JUMBO),
        op(Opcode::first_api(0xff24, 14), "invoke-direct/jumbo", Ref::Method, Format5rc, THROW | CONTINUE | SETS_RESULT | JUMBO | INIT_REF),
        op(Opcode::first_api(0xff25, 14), "invoke-static/jumbo", Ref::Method, Format5rc, THROW | CONTINUE | SETS_RESULT | JUMBO),
        op(Opcode::first_api(0xff26, 14), "invoke-interface/jumbo", Ref::Method, Format5rc, THROW | CONTINUE | SETS_RESULT | JUMBO),
        op(Opcode::first_api(0xfff2, 14), "invoke-object-init/jumbo", Ref::Method, Format5rc, ODEX | THROW | CONTINUE | SETS_RESULT | JUMBO | INIT_REF),
        op(Opcode::first_api(0xfff3, 14), "iget-volatile/jumbo", Ref::Field, Format52c, ODEX | VOLATILE | THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xfff4, 14), "iget-wide-volatile/jumbo", Ref::Field, Format52c, ODEX | VOLATILE | THROW | CONTINUE | SETS_REG | SETS_WIDE | JUMBO),
        op(Opcode::first_api(0xfff5, 14), "iget-object-volatile/jumbo", Ref::Field, Format52c, ODEX | VOLATILE | THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xfff6, 14), "iput-volatile/jumbo", Ref::Field, Format52c, ODEX | VOLATILE | THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xfff7, 14), "iput-wide-volatile/jumbo", Ref::Field, Format52c, ODEX | VOLATILE | THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xfff8, 14), "iput-object-volatile/jumbo", Ref::Field, Format52c, ODEX | VOLATILE | THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xfff9, 14), "sget-volatile/jumbo", Ref::Field, Format41c, ODEX | VOLATILE | STATIC | THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xfffa, 14), "sget-wide-volatile/jumbo", Ref::Field, Format41c, ODEX | VOLATILE | STATIC | THROW | CONTINUE | SETS_REG | SETS_WIDE | JUMBO),
        op(Opcode::first_api(0xfffb, 14), "sget-object-volatile/jumbo", Ref::Field, Format41c, ODEX | VOLATILE | STATIC | THROW | CONTINUE | SETS_REG | JUMBO),
        op(Opcode::first_api(0xfffc, 14), "sput-volatile/jumbo", Ref::Field, Format41c, ODEX | VOLATILE | STATIC | THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xfffd, 14), "sput-wide-volatile/jumbo", Ref::Field, Format41c, ODEX | VOLATILE | STATIC | THROW | CONTINUE | JUMBO),
        op(Opcode::first_api(0xfffe, 14), "sput-object-volatile/jumbo", Ref::Field, Format41c, ODEX | VOLATILE | STATIC | THROW | CONTINUE | JUMBO),
    ]
});

/// Maps an API level to the ART version that shipped with it, or `None` for Dalvik releases.
pub fn map_api_to_art_version(api: i32) -> Option<i32> {
    match api {
        i32::MIN..=20 => None,
        21 => Some(39),
        22 => Some(45),
        23 => Some(64),
        24 | 25 => Some(79),
        26 => Some(124),
        27 => Some(131),
        28 => Some(144),
        _ => Some(170),
    }
}

pub fn map_art_version_to_api(art_version: i32) -> i32 {
    match art_version {
        i32::MIN..=38 => 19,
        39..=44 => 21,
        45..=63 => 22,
        64..=78 => 23,
        79..=123 => 24,
        124..=130 => 26,
        131..=143 => 27,
        144..=169 => 28,
        _ => 29,
    }
}

/// An immutable opcode lookup table for one target. Each numeric value maps to at most one
/// opcode, chosen by the API level or ART version windows of the static opcode list.
#[derive(Debug, Clone)]
pub struct Opcodes {
    api: i32,
    art_version: Option<i32>,
    include_jumbo: bool,
    by_value: HashMap<u16, &'static Opcode>,
    by_name: HashMap<&'static str, &'static Opcode>,
}

impl Opcodes {
    pub fn for_api(api: i32) -> Opcodes {
        Opcodes::build(api, map_api_to_art_version(api), false)
    }

    pub fn for_art_version(art_version: i32) -> Opcodes {
        Opcodes::build(map_art_version_to_api(art_version), Some(art_version), false)
    }

    /// A Dalvik-era table that optionally recognises the jumbo instructions.
    pub fn new(api: i32, include_jumbo: bool) -> Opcodes {
        Opcodes::build(api, map_api_to_art_version(api), include_jumbo)
    }

    fn build(api: i32, art_version: Option<i32>, include_jumbo: bool) -> Opcodes {
        let include_jumbo = include_jumbo && art_version.is_none() && api >= FIRST_JUMBO_API;
        let mut by_value = HashMap::new();
        let mut by_name = HashMap::new();

        for opcode in OPCODES.iter() {
            if opcode.is_jumbo_opcode() && !include_jumbo {
                continue;
            }
            if let Some(value) = opcode.get_opcode_value(api, art_version) {
                by_value.insert(value, opcode);
                by_name.insert(opcode.name, opcode);
            }
        }

        debug!(
            "opcode table for api {} (art {:?}, jumbo {}): {} opcodes",
            api,
            art_version,
            include_jumbo,
            by_value.len()
        );

        Opcodes {
            api,
            art_version,
            include_jumbo,
            by_value,
            by_name,
        }
    }

    pub fn api(&self) -> i32 {
        self.api
    }

    pub fn art_version(&self) -> Option<i32> {
        self.art_version
    }

    pub fn is_art(&self) -> bool {
        self.art_version.is_some()
    }

    pub fn include_jumbo(&self) -> bool {
        self.include_jumbo
    }

    /// Looks up an opcode by its value. Jumbo values carry the `0xff` escape in the high byte
    /// and payload pseudo-opcodes use `0x0100`, `0x0200` and `0x0300`.
    pub fn get(&self, value: u16) -> Option<&'static Opcode> {
        self.by_value.get(&value).copied()
    }

    pub fn get_by_name(&self, name: &str) -> Option<&'static Opcode> {
        self.by_name.get(name).copied()
    }

    /// Returns the value `opcode` has in this table, or `None` if it does not exist for this target.
    pub fn value_of(&self, opcode: &Opcode) -> Option<u16> {
        let value = opcode.get_opcode_value(self.api, self.art_version)?;
        match self.by_value.get(&value) {
            Some(found) if std::ptr::eq(*found, opcode) => Some(value),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.by_value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_value.is_empty()
    }
}

impl Default for Opcodes {
    fn default() -> Self {
        Opcodes::for_api(DEFAULT_API)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_unique_values(api: i32, art_version: Option<i32>, include_jumbo: bool) {
        let mut seen: HashMap<u16, &str> = HashMap::new();
        for opcode in OPCODES.iter() {
            if opcode.is_jumbo_opcode() && !include_jumbo {
                continue;
            }
            if let Some(value) = opcode.get_opcode_value(api, art_version) {
                if let Some(previous) = seen.insert(value, opcode.name) {
                    panic!(
                        "value {:#x} maps to both {} and {} for api {} art {:?}",
                        value, previous, opcode.name, api, art_version
                    );
                }
            }
        }
    }

    #[test]
    fn test_one_definition_per_value() {
        for api in 1..=20 {
            assert_unique_values(api, None, api >= FIRST_JUMBO_API);
        }
        for art in [7, 39, 45, 59, 60, 64, 79, 87, 111, 124, 131, 134, 144, 170] {
            assert_unique_values(map_art_version_to_api(art), Some(art), false);
        }
    }

    #[test]
    fn test_reused_value_by_api() {
        let old = Opcodes::for_api(13);
        let new = Opcodes::for_api(14);
        assert_eq!(old.get(0xf0).map(|o| o.name), Some("invoke-direct-empty"));
        assert_eq!(new.get(0xf0).map(|o| o.name), Some("invoke-object-init/range"));
        assert!(old.get_by_name("invoke-object-init/range").is_none());
        assert!(new.get_by_name("invoke-direct-empty").is_none());
    }

    #[test]
    fn test_api_windows() {
        let api4 = Opcodes::for_api(4);
        assert!(api4.get(0xed).is_none());
        assert!(api4.get(0xef).is_none());
        let api8 = Opcodes::for_api(8);
        assert_eq!(api8.get(0xef).map(|o| o.name), Some("execute-inline/range"));
        assert!(api8.get(0xe3).is_none());
        assert_eq!(Opcodes::for_api(9).get(0xe3).map(|o| o.name), Some("iget-volatile"));
        assert!(Opcodes::for_api(10).get(0xf1).is_none());
        assert_eq!(Opcodes::for_api(11).get(0xf1).map(|o| o.name), Some("return-void-barrier"));
    }

    #[test]
    fn test_art_tables() {
        let lollipop = Opcodes::for_api(21);
        assert!(lollipop.is_art());
        assert_eq!(lollipop.art_version(), Some(39));
        assert_eq!(lollipop.get(0x73).map(|o| o.name), Some("return-void-barrier"));
        assert_eq!(lollipop.get(0xe3).map(|o| o.name), Some("iget-quick"));

        let marshmallow = Opcodes::for_api(23);
        assert_eq!(marshmallow.get(0x73).map(|o| o.name), Some("return-void-no-barrier"));

        let pie = Opcodes::for_api(28);
        assert_eq!(pie.get(0xfa).map(|o| o.name), Some("invoke-polymorphic"));
        assert_eq!(pie.get(0xfe).map(|o| o.name), Some("const-method-handle"));
        assert!(Opcodes::for_art_version(131).get(0xfe).is_none());
    }

    #[test]
    fn test_jumbo_only_when_enabled() {
        assert!(Opcodes::for_api(14).get(0xff1b).is_none());
        assert!(Opcodes::new(13, true).get(0xff1b).is_none());
        assert!(Opcodes::new(21, true).get(0xff1b).is_none());

        let jumbo = Opcodes::new(14, true);
        assert!(jumbo.include_jumbo());
        let sput = jumbo.get(0xff1b).expect("sput/jumbo");
        assert_eq!(sput.name, "sput/jumbo");
        assert_eq!(sput.format, Format::Format41c);
        assert!(sput.is_jumbo_opcode());
        assert_eq!(jumbo.value_of(sput), Some(0xff1b));
        assert_eq!(Opcodes::for_api(14).value_of(sput), None);
    }

    #[test]
    fn test_payloads_and_lookup() {
        let opcodes = Opcodes::default();
        assert_eq!(opcodes.api(), DEFAULT_API);
        assert!(!opcodes.is_art());
        assert_eq!(opcodes.get(0x0100).map(|o| o.format), Some(Format::PackedSwitchPayload));
        assert_eq!(opcodes.get(0x0200).map(|o| o.format), Some(Format::SparseSwitchPayload));
        assert_eq!(opcodes.get(0x0300).map(|o| o.format), Some(Format::ArrayPayload));
        let invoke = opcodes.get_by_name("invoke-virtual").expect("invoke-virtual");
        assert_eq!(opcodes.value_of(invoke), Some(0x6e));
        assert!(!opcodes.is_empty());
    }
}
