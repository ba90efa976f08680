//! Walks a method's instruction bytes, yielding `(code address, instruction)` pairs.

use log::warn;

use crate::dex::error::DexError;
use crate::dex::instructions::Instruction;
use crate::dex::opcodes::Opcodes;

const JUMBO_ESCAPE: u8 = 0xff;

/// Iterator over the instructions in `bytes[start..]`.
///
/// Addresses are in code units from `start`. Opcode values the table does not define decode as a
/// one-unit placeholder and decoding carries on. The iterator stops after the first error; errors
/// carry the byte offset they occurred at.
pub struct InstructionIterator<'a> {
    opcodes: &'a Opcodes,
    bytes: &'a [u8],
    start: usize,
    position: usize,
    failed: bool,
}

impl<'a> InstructionIterator<'a> {
    pub fn new(opcodes: &'a Opcodes, bytes: &'a [u8], start: usize) -> InstructionIterator<'a> {
        InstructionIterator { opcodes, bytes, start, position: start, failed: false }
    }

    fn decode_next(&mut self) -> Result<(u32, Instruction), DexError> {
        let offset = self.position;
        let address = ((offset - self.start) / 2) as u32;

        let low = self.bytes[offset];
        let high = self.bytes.get(offset + 1).copied().unwrap_or(0);
        let value = if low == 0 && matches!(high, 1..=3) {
            (high as u16) << 8
        } else if low == JUMBO_ESCAPE && self.opcodes.include_jumbo() {
            0xff00 | high as u16
        } else {
            low as u16
        };

        let instruction = match self.opcodes.get(value) {
            Some(opcode) => Instruction::read(opcode, self.bytes, offset)?,
            None => {
                warn!("Unknown opcode 0x{:02x} at code address {}", value, address);
                Instruction::unknown(u16::from_le_bytes([low, high]))
            }
        };

        self.position += instruction.size_in_code_units(address) * 2;
        Ok((address, instruction))
    }
}

impl<'a> Iterator for InstructionIterator<'a> {
    type Item = Result<(u32, Instruction), DexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.position >= self.bytes.len() {
            return None;
        }
        let offset = self.position;
        match self.decode_next() {
            Ok(item) => Some(Ok(item)),
            Err(e) => {
                self.failed = true;
                Some(Err(err!(e, "Error occurred at code address {}", offset)))
            }
        }
    }
}

/// Decodes every instruction in `bytes`, returning the first error encountered.
pub fn decode_all(opcodes: &Opcodes, bytes: &[u8]) -> Result<Vec<(u32, Instruction)>, DexError> {
    InstructionIterator::new(opcodes, bytes, 0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::instructions::tests::encode_all;
    use crate::dex::instructions::{InstructionRef, Operands, SparseSwitchPayload};

    #[test]
    fn test_jumbo_escape() {
        let opcodes = Opcodes::new(14, true);
        let bytes = [0xff, 0x1b, 0x34, 0x12, 0x01, 0x00, 0x07, 0x00];
        let decoded = decode_all(&opcodes, &bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        let (address, ins) = &decoded[0];
        assert_eq!(*address, 0);
        assert_eq!(ins.opcode.name, "sput/jumbo");
        assert_eq!(ins.operands, Operands::RegRef { a: 7, reference: InstructionRef::Index(0x11234) });
        assert_eq!(encode_all(&opcodes, &[ins.clone()]), bytes.to_vec());
    }

    #[test]
    fn test_ff_without_jumbo_table_is_unknown() {
        let opcodes = Opcodes::for_api(14);
        let decoded = decode_all(&opcodes, &[0xff, 0x1b, 0x00, 0x00]).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].1.opcode.name, "unknown");
        assert_eq!(decoded[1].0, 1);
        assert_eq!(decoded[1].1.opcode.name, "nop");
    }

    #[test]
    fn test_unknown_opcode_resilience() {
        let opcodes = Opcodes::for_api(20);
        let mut bytes = vec![0x3e, 0x00];
        for _ in 0..3 {
            bytes.extend_from_slice(&[0x0e, 0x00]);
        }
        let decoded = decode_all(&opcodes, &bytes).unwrap();
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded[0].1.operands, Operands::Unknown { value: 0x003e });
        let addresses: Vec<u32> = decoded.iter().map(|(a, _)| *a).collect();
        assert_eq!(addresses, vec![0, 1, 2, 3]);
        assert!(decoded[1..].iter().all(|(_, i)| i.opcode.name == "return-void"));
    }

    #[test]
    fn test_unrecognised_nop_byte_is_plain_nop() {
        let opcodes = Opcodes::default();
        let decoded = decode_all(&opcodes, &[0x00, 0x07, 0x0e, 0x00]).unwrap();
        assert_eq!(decoded[0].1.opcode.name, "nop");
        assert_eq!(decoded[1].1.opcode.name, "return-void");
    }

    #[test]
    fn test_switch_with_padded_payload() {
        let opcodes = Opcodes::default();
        let switch = Instruction::from_name(&opcodes, "sparse-switch", Operands::RegBranch { a: 0, offset: 4 }).unwrap();
        let ret = Instruction::from_name(&opcodes, "return-void", Operands::None).unwrap();
        let payload = Instruction::from_name(
            &opcodes,
            "sparse-switch-payload",
            Operands::SparseSwitch(SparseSwitchPayload { keys: vec![-1, 100], targets: vec![3, 3] }),
        )
        .unwrap();
        let bytes = encode_all(&opcodes, &[switch.clone(), ret.clone(), ret.clone(), payload.clone()]);

        let decoded = decode_all(&opcodes, &bytes).unwrap();
        let addresses: Vec<u32> = decoded.iter().map(|(a, _)| *a).collect();
        // The padding unit at address 5 decodes as a nop.
        assert_eq!(addresses, vec![0, 3, 4, 5, 6]);
        assert_eq!(decoded[0].1, switch);
        assert_eq!(decoded[1].1, ret);
        assert_eq!(decoded[3].1.opcode.name, "nop");
        assert_eq!(decoded[4].1, payload);
    }

    #[test]
    fn test_truncated_instruction_reports_offset() {
        let opcodes = Opcodes::default();
        let mut it = InstructionIterator::new(&opcodes, &[0x0e, 0x00, 0x14, 0x00, 0x01], 0);
        assert!(it.next().unwrap().is_ok());
        let e = it.next().unwrap().unwrap_err();
        assert!(e.to_string().contains("Error occurred at code address 2"), "{}", e);
        assert!(it.next().is_none());
    }
}
