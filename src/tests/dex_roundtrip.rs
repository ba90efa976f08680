use crate::dex::builder::DexBuilder;
use crate::dex::dex_file::DexFile;
use crate::dex::encoded_values::{Annotation, AnnotationElement, AnnotationVisibility, EncodedValue};
use crate::dex::instructions::{ArrayPayload, Instruction, Operands, PackedSwitchPayload};
use crate::dex::model::{AccessFlags, ClassDef, Field, Method, MethodImplementation, MethodParameter};
use crate::dex::opcodes::Opcodes;
use crate::dex::pool::DexPool;
use crate::dex::references::FieldRef;
use crate::dex::writer::DexWriter;

fn ins(opcodes: &Opcodes, name: &str, operands: Operands) -> Instruction {
    Instruction::from_name(opcodes, name, operands).unwrap()
}

fn base_class() -> ClassDef {
    let mut class = ClassDef::new("Lroundtrip/Base;", AccessFlags::PUBLIC | AccessFlags::ABSTRACT, Some("Ljava/lang/Object;"));
    class.methods.push(Method::new(
        "Lroundtrip/Base;",
        "describe",
        vec![],
        "Ljava/lang/String;",
        AccessFlags::PUBLIC | AccessFlags::ABSTRACT,
    ));
    class
}

fn switcher_class(opcodes: &Opcodes) -> ClassDef {
    let class_type = "Lroundtrip/Switcher;";
    let mut class = ClassDef::new(class_type, AccessFlags::PUBLIC | AccessFlags::FINAL, Some("Lroundtrip/Base;"));
    class.source_file = Some("Switcher.java".to_string());
    class.annotations = vec![Annotation::new(AnnotationVisibility::Runtime, "Lroundtrip/Config;", vec![
        AnnotationElement::new(
            "mode",
            EncodedValue::Enum(FieldRef::new("Lroundtrip/Mode;", "FAST", "Lroundtrip/Mode;")),
        ),
        AnnotationElement::new(
            "names",
            EncodedValue::Array(vec![EncodedValue::String("a".to_string()), EncodedValue::String("b".to_string())]),
        ),
    ])];
    class.fields = vec![
        Field::new(class_type, "LIMIT", "I", AccessFlags::STATIC | AccessFlags::FINAL).with_initial_value(EncodedValue::Int(7)),
        Field::new(class_type, "NAME", "Ljava/lang/String;", AccessFlags::STATIC | AccessFlags::FINAL)
            .with_initial_value(EncodedValue::String("switch".to_string())),
    ];

    let fill = MethodImplementation::new(1, vec![
        ins(opcodes, "fill-array-data", Operands::RegBranch { a: 0, offset: 4 }),
        ins(opcodes, "return-void", Operands::None),
        ins(opcodes, "array-payload", Operands::ArrayData(ArrayPayload::new(4, vec![1, 0, 0, 0, 2, 0, 0, 0]).unwrap())),
    ]);
    let pick = MethodImplementation::new(2, vec![
        ins(opcodes, "packed-switch", Operands::RegBranch { a: 1, offset: 6 }),
        ins(opcodes, "const/4", Operands::RegLiteral { a: 0, literal: -1 }),
        ins(opcodes, "return", Operands::Reg { a: 0 }),
        ins(opcodes, "nop", Operands::None),
        ins(opcodes, "packed-switch-payload", Operands::PackedSwitch(PackedSwitchPayload { first_key: 0, targets: vec![3, 4] })),
    ]);

    class.methods = vec![
        Method::new(class_type, "fill", vec![], "V", AccessFlags::PRIVATE | AccessFlags::STATIC).with_implementation(fill),
        Method::new(class_type, "pick", vec![MethodParameter::new("I")], "I", AccessFlags::STATIC)
            .with_implementation(pick),
    ];
    class
}

fn write_with_pool(opcodes: &Opcodes, classes: Vec<ClassDef>) -> Vec<u8> {
    let mut pool = DexPool::new(opcodes.clone());
    for class in classes {
        pool.intern_class(class).unwrap();
    }
    DexWriter::new(&mut pool).write().unwrap()
}

#[test]
fn rewrites_read_back_classes_identically() {
    let opcodes = Opcodes::for_api(26);
    let first = write_with_pool(&opcodes, vec![base_class(), switcher_class(&opcodes)]);

    let dex = DexFile::from_bytes(&first).unwrap();
    let mut classes = dex.classes(&dex.opcodes().unwrap()).unwrap();
    assert_eq!(classes.iter().map(|c| c.class_type.as_str()).collect::<Vec<_>>(), vec![
        "Lroundtrip/Base;",
        "Lroundtrip/Switcher;"
    ]);
    assert_eq!(classes[1], switcher_class(&opcodes));

    classes.sort_by(|a, b| a.class_type.cmp(&b.class_type));
    let second = write_with_pool(&opcodes, classes);
    assert_eq!(first, second);
}

#[test]
fn subclass_written_after_superclass() {
    let opcodes = Opcodes::for_api(26);
    let bytes = write_with_pool(&opcodes, vec![switcher_class(&opcodes), base_class()]);
    let dex = DexFile::from_bytes(&bytes).unwrap();
    let classes = dex.classes(&opcodes).unwrap();
    assert_eq!(classes[0].class_type, "Lroundtrip/Base;");
    assert_eq!(classes[1].superclass.as_deref(), Some("Lroundtrip/Base;"));
}

#[test]
fn builder_and_pool_agree() {
    let opcodes = Opcodes::for_api(26);
    let builder = DexBuilder::new(opcodes.clone());
    std::thread::scope(|scope| {
        scope.spawn(|| builder.add_class(switcher_class(&opcodes)).unwrap());
        scope.spawn(|| builder.add_class(base_class()).unwrap());
    });
    let built = builder.write().unwrap();
    assert_eq!(built, write_with_pool(&opcodes, vec![base_class(), switcher_class(&opcodes)]));
}

#[test]
fn magic_follows_target_api() {
    for (api, magic) in [(19, b"dex\n035\0"), (24, b"dex\n037\0"), (28, b"dex\n039\0")] {
        let opcodes = Opcodes::for_api(api);
        let bytes = write_with_pool(&opcodes, vec![base_class()]);
        assert_eq!(&bytes[..8], magic);
        assert_eq!(DexFile::from_bytes(&bytes).unwrap().opcodes().unwrap().api(), match api {
            19 => 23,
            24 => 25,
            _ => 28,
        });
    }
}
