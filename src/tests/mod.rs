mod dex_roundtrip;
mod opcode_tests;
