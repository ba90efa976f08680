use crate::dex::decoder::decode_all;
use crate::dex::instructions::tests::encode_all;
use crate::dex::instructions::{InstructionRef, Operands};
use crate::dex::opcodes::Opcodes;

// Method bodies lifted from a release build, references left as raw indices.
const GETTER_BODY: [u8; 20] = [
    84, 16, 75, 26, 112, 48, 253, 47, 33, 0, 111, 32, 245, 47, 33, 0, 12, 0, 17, 0,
];

const SETTER_BODY: [u8; 134] = [
    84, 32, 63, 26, 51, 3, 4, 0, 18, 0, 17, 0, 84, 32, 63, 26, 56, 0, 16, 0, 84, 33, 61,
    26, 56, 1, 5, 0, 114, 32, 152, 2, 16, 0, 84, 33, 65, 26, 56, 1, 5, 0, 114, 32, 153, 2,
    16, 0, 91, 35, 63, 26, 56, 3, 31, 0, 84, 33, 61, 26, 56, 1, 5, 0, 114, 32, 149, 2, 19,
    0, 84, 33, 65, 26, 56, 1, 5, 0, 114, 32, 150, 2, 19, 0, 26, 1, 145, 30, 114, 32, 137,
    2, 19, 0, 10, 1, 89, 33, 68, 26, 18, 17, 92, 33, 66, 26, 110, 16, 218, 47, 2, 0, 40,
    10, 18, 241, 89, 33, 68, 26, 18, 1, 92, 33, 66, 26, 110, 16, 219, 47, 2, 0, 17, 0,
];

#[test]
fn decodes_getter_body() {
    let opcodes = Opcodes::for_api(33);
    let decoded = decode_all(&opcodes, &GETTER_BODY).unwrap();
    let names: Vec<&str> = decoded.iter().map(|(_, i)| i.opcode.name).collect();
    assert_eq!(names, vec!["iget-object", "invoke-direct", "invoke-super", "move-result-object", "return-object"]);

    let addresses: Vec<u32> = decoded.iter().map(|(a, _)| *a).collect();
    assert_eq!(addresses, vec![0, 2, 5, 8, 9]);

    assert_eq!(
        decoded[1].1.operands,
        Operands::Invoke { registers: vec![1, 2, 0], reference: InstructionRef::Index(0x2ffd), reference2: None }
    );
}

#[test]
fn reencodes_release_bodies_exactly() {
    let opcodes = Opcodes::for_api(33);
    for body in [&GETTER_BODY[..], &SETTER_BODY[..]] {
        let instructions: Vec<_> = decode_all(&opcodes, body).unwrap().into_iter().map(|(_, i)| i).collect();
        assert_eq!(encode_all(&opcodes, &instructions), body.to_vec());
    }
}

#[test]
fn decodes_signed_nibble_literals() {
    let opcodes = Opcodes::for_api(33);
    let decoded = decode_all(&opcodes, &SETTER_BODY).unwrap();
    let literals: Vec<i64> = decoded
        .iter()
        .filter(|(_, i)| i.opcode.name == "const/4")
        .filter_map(|(_, i)| match i.operands {
            Operands::RegLiteral { literal, .. } => Some(literal),
            _ => None,
        })
        .collect();
    assert_eq!(literals, vec![0, 1, -1, 0]);

    let goto = decoded.iter().find(|(_, i)| i.opcode.name == "goto").unwrap();
    assert_eq!(goto.1.operands, Operands::Branch { offset: 10 });
}

#[test]
fn quick_accessor_moves_between_dalvik_and_art() {
    let dalvik = Opcodes::for_api(19);
    let art = Opcodes::for_api(33);
    let value_in = |opcodes: &Opcodes| opcodes.get_by_name("iget-object-quick").and_then(|op| opcodes.value_of(op));
    assert_eq!(value_in(&dalvik), Some(0xf4));
    assert_eq!(value_in(&art), Some(0xe5));

    let decoded = decode_all(&dalvik, &[0xf4, 0x10, 0x08, 0x00]).unwrap();
    assert!(decoded[0].1.opcode.odex_only());
    assert_eq!(decoded[0].1.operands, Operands::FieldOffset { a: 0, b: 1, offset: 8 });
}
