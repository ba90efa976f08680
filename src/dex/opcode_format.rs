use bitflags::bitflags;
use rangemap::RangeInclusiveMap;
use std::fmt;
use std::ops::RangeInclusive;

/// The kind of constant-pool item an instruction operand refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceType {
    None,
    String,
    Type,
    Field,
    Method,
    CallSite,
    MethodProto,
    MethodHandle,
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReferenceType::None => "none",
            ReferenceType::String => "string",
            ReferenceType::Type => "type",
            ReferenceType::Field => "field",
            ReferenceType::Method => "method",
            ReferenceType::CallSite => "call site",
            ReferenceType::MethodProto => "method prototype",
            ReferenceType::MethodHandle => "method handle",
        };
        write!(f, "{}", s)
    }
}

// Defines various flags that can be associated with an opcode.
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpcodeFlags: u32 {
        const CAN_THROW = 0x1;
        const ODEX_ONLY = 0x2;
        const CAN_CONTINUE = 0x4;
        const SETS_RESULT = 0x8;
        const SETS_REGISTER = 0x10;
        const SETS_WIDE_REGISTER = 0x20;
        const QUICK_FIELD_ACCESSOR = 0x40;
        const VOLATILE_FIELD_ACCESSOR = 0x80;
        const STATIC_FIELD_ACCESSOR = 0x100;
        const JUMBO_OPCODE = 0x200;
        const CAN_INITIALIZE_REFERENCE = 0x400;
    }
}

/// Represents an opcode with its associated properties and the numeric value it takes in each
/// API level or ART version window where it exists.
#[derive(Debug)]
pub struct Opcode {
    pub name: &'static str,
    pub reference_type: ReferenceType,
    pub reference_type2: Option<ReferenceType>,
    pub format: Format,
    pub flags: OpcodeFlags,
    pub api_to_value_map: RangeInclusiveMap<i32, u16>,
    pub art_version_to_value_map: RangeInclusiveMap<i32, u16>,
}

/// Encapsulates API and ART version ranges along with opcode values.
pub struct VersionConstraint {
    pub api_range: Option<RangeInclusive<i32>>,
    pub art_version_range: Option<RangeInclusive<i32>>,
    pub opcode_value: u16,
}

impl Opcode {

    pub(crate) fn new(
        version_constraints: Vec<VersionConstraint>,
        name: &'static str,
        reference_type: ReferenceType,
        reference_type2: Option<ReferenceType>,
        format: Format,
        flags: OpcodeFlags,
    ) -> Self {
        let mut api_to_value_map = RangeInclusiveMap::new();
        let mut art_version_to_value_map = RangeInclusiveMap::new();

        for vc in version_constraints.iter() {
            if let Some(api_range) = &vc.api_range {
                if !api_range.is_empty() {
                    api_to_value_map.insert(api_range.clone(), vc.opcode_value);
                }
            }
            if let Some(art_range) = &vc.art_version_range {
                if !art_range.is_empty() {
                    art_version_to_value_map.insert(art_range.clone(), vc.opcode_value);
                }
            }
        }

        Opcode {
            name,
            reference_type,
            reference_type2,
            format,
            flags,
            api_to_value_map,
            art_version_to_value_map,
        }
    }

    pub(crate) fn first_api(opcode_value: u16, api: i32) -> Vec<VersionConstraint> {
        vec![VersionConstraint {
            api_range: Some(api..=i32::MAX),
            art_version_range: None,
            opcode_value,
        }]
    }

    pub(crate) fn last_api(opcode_value: u16, api: i32) -> Vec<VersionConstraint> {
        vec![VersionConstraint {
            api_range: Some(i32::MIN..=api),
            art_version_range: None,
            opcode_value,
        }]
    }

    pub(crate) fn between_api(opcode_value: u16, min_api: i32, max_api: i32) -> Vec<VersionConstraint> {
        vec![VersionConstraint {
            api_range: Some(min_api..=max_api),
            art_version_range: None,
            opcode_value,
        }]
    }

    pub(crate) fn first_art_version(opcode_value: u16, art_version: i32) -> Vec<VersionConstraint> {
        vec![VersionConstraint {
            api_range: None,
            art_version_range: Some(art_version..=i32::MAX),
            opcode_value,
        }]
    }

    pub(crate) fn last_art_version(opcode_value: u16, art_version: i32) -> Vec<VersionConstraint> {
        vec![VersionConstraint {
            api_range: None,
            art_version_range: Some(i32::MIN..=art_version),
            opcode_value,
        }]
    }

    pub(crate) fn all_versions(opcode_value: u16) -> Vec<VersionConstraint> {
        vec![VersionConstraint {
            api_range: Some(i32::MIN..=i32::MAX),
            art_version_range: Some(i32::MIN..=i32::MAX),
            opcode_value,
        }]
    }

    pub(crate) fn all_apis(opcode_value: u16) -> Vec<VersionConstraint> {
        vec![VersionConstraint {
            api_range: Some(i32::MIN..=i32::MAX),
            art_version_range: None,
            opcode_value,
        }]
    }

    pub(crate) fn all_art_versions(opcode_value: u16) -> Vec<VersionConstraint> {
        vec![VersionConstraint {
            api_range: None,
            art_version_range: Some(i32::MIN..=i32::MAX),
            opcode_value,
        }]
    }

    /// Combines multiple vectors of `VersionConstraint` into one.
    pub(crate) fn combine(constraints: Vec<VersionConstraint>, other: Vec<VersionConstraint>) -> Vec<VersionConstraint> {
        let mut combined = constraints;
        combined.extend(other);
        combined
    }

    /// Determines if the opcode can throw an exception.
    pub fn can_throw(&self) -> bool {
        self.flags.contains(OpcodeFlags::CAN_THROW)
    }

    /// Determines if the opcode is ODEX only.
    pub fn odex_only(&self) -> bool {
        self.flags.contains(OpcodeFlags::ODEX_ONLY)
    }

    /// Determines if execution can continue to the next instruction.
    pub fn can_continue(&self) -> bool {
        self.flags.contains(OpcodeFlags::CAN_CONTINUE)
    }

    /// Determines if the opcode sets the "hidden" result register.
    pub fn sets_result(&self) -> bool {
        self.flags.contains(OpcodeFlags::SETS_RESULT)
    }

    /// Determines if the opcode sets the value of its first register.
    pub fn sets_register(&self) -> bool {
        self.flags.contains(OpcodeFlags::SETS_REGISTER)
    }

    /// Determines if the opcode sets the value of its first register to a wide type.
    pub fn sets_wide_register(&self) -> bool {
        self.flags.contains(OpcodeFlags::SETS_WIDE_REGISTER)
    }

    pub fn is_quick_field_accessor(&self) -> bool {
        self.flags.contains(OpcodeFlags::QUICK_FIELD_ACCESSOR)
    }

    pub fn is_volatile_field_accessor(&self) -> bool {
        self.flags.contains(OpcodeFlags::VOLATILE_FIELD_ACCESSOR)
    }

    pub fn is_static_field_accessor(&self) -> bool {
        self.flags.contains(OpcodeFlags::STATIC_FIELD_ACCESSOR)
    }

    /// Determines if the opcode is a jumbo opcode, i.e. selected through the `0xff` escape byte.
    pub fn is_jumbo_opcode(&self) -> bool {
        self.flags.contains(OpcodeFlags::JUMBO_OPCODE)
    }

    pub fn can_initialize_reference(&self) -> bool {
        self.flags.contains(OpcodeFlags::CAN_INITIALIZE_REFERENCE)
    }

    /// Returns the numeric value of this opcode for the given target, or `None` when the
    /// opcode does not exist there. ART targets consult only the ART windows and Dalvik targets
    /// only the API windows, so a reused byte value has exactly one meaning per target.
    pub fn get_opcode_value(&self, api: i32, art_version: Option<i32>) -> Option<u16> {
        match art_version {
            Some(art) => self.art_version_to_value_map.get(&art).copied(),
            None => self.api_to_value_map.get(&api).copied(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Format10t,
    Format10x,
    Format11n,
    Format11x,
    Format12x,
    Format20bc,
    Format20t,
    Format21c,
    Format21ih,
    Format21lh,
    Format21s,
    Format21t,
    Format22b,
    Format22c,
    Format22cs,
    Format22s,
    Format22t,
    Format22x,
    Format23x,
    Format30t,
    Format31c,
    Format31i,
    Format31t,
    Format32x,
    Format35c,
    Format35mi,
    Format35ms,
    Format3rc,
    Format3rmi,
    Format3rms,
    Format41c,
    Format45cc,
    Format4rcc,
    Format51l,
    Format52c,
    Format5rc,
    ArrayPayload,
    PackedSwitchPayload,
    SparseSwitchPayload,
}

impl Format {
    /// Returns the fixed size of the format in bytes, or `None` for payload formats whose size
    /// is described by their own header.
    pub const fn size(&self) -> Option<usize> {
        match self {
            Format::Format10t
            | Format::Format10x
            | Format::Format11n
            | Format::Format11x
            | Format::Format12x => Some(2),

            Format::Format20bc
            | Format::Format20t
            | Format::Format21c
            | Format::Format21ih
            | Format::Format21lh
            | Format::Format21s
            | Format::Format21t
            | Format::Format22b
            | Format::Format22c
            | Format::Format22cs
            | Format::Format22s
            | Format::Format22t
            | Format::Format22x
            | Format::Format23x => Some(4),

            Format::Format30t
            | Format::Format31c
            | Format::Format31i
            | Format::Format31t
            | Format::Format32x
            | Format::Format35c
            | Format::Format35mi
            | Format::Format35ms
            | Format::Format3rc
            | Format::Format3rmi
            | Format::Format3rms => Some(6),

            Format::Format41c | Format::Format45cc | Format::Format4rcc => Some(8),

            Format::Format51l | Format::Format52c | Format::Format5rc => Some(10),

            Format::ArrayPayload
            | Format::PackedSwitchPayload
            | Format::SparseSwitchPayload => None,
        }
    }

    /// Indicates whether the format is a payload format.
    pub const fn is_payload_format(&self) -> bool {
        matches!(
            self,
            Format::ArrayPayload | Format::PackedSwitchPayload | Format::SparseSwitchPayload
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_sizes() {
        assert_eq!(Format::Format10x.size(), Some(2));
        assert_eq!(Format::Format21c.size(), Some(4));
        assert_eq!(Format::Format35c.size(), Some(6));
        assert_eq!(Format::Format41c.size(), Some(8));
        assert_eq!(Format::Format52c.size(), Some(10));
        assert_eq!(Format::Format5rc.size(), Some(10));
        assert_eq!(Format::SparseSwitchPayload.size(), None);
        assert!(Format::ArrayPayload.is_payload_format());
        assert!(!Format::Format51l.is_payload_format());
    }

    #[test]
    fn test_value_selected_by_target() {
        let op = Opcode::new(
            Opcode::combine(Opcode::first_api(0xf1, 11), Opcode::last_art_version(0x73, 59)),
            "return-void-barrier",
            ReferenceType::None,
            None,
            Format::Format10x,
            OpcodeFlags::ODEX_ONLY,
        );
        assert_eq!(op.get_opcode_value(10, None), None);
        assert_eq!(op.get_opcode_value(11, None), Some(0xf1));
        assert_eq!(op.get_opcode_value(21, Some(39)), Some(0x73));
        assert_eq!(op.get_opcode_value(23, Some(64)), None);
        assert!(op.odex_only());
        assert!(!op.can_throw());
    }
}
