//! # Dexkit
//!
//! A library for decoding Dalvik bytecode and for interning, laying out and writing Android DEX
//! files.
//!
//! Two front ends feed the same writer. [`DexPool`] interns through `&mut self` on one thread.
//! [`DexBuilder`] interns through `&self` and can be shared between threads; its handles learn
//! their final indices once the file has been written.
//!
//! # Examples
//!
//! ```no_run
//!  use dexkit::{AccessFlags, ClassDef, DexFile, DexPool, DexWriter, Opcodes};
//!
//!  let opcodes = Opcodes::for_api(26);
//!  let mut pool = DexPool::new(opcodes.clone());
//!  pool.intern_class(ClassDef::new("Lcom/example/Empty;", AccessFlags::PUBLIC, Some("Ljava/lang/Object;"))).unwrap();
//!  let bytes = DexWriter::new(&mut pool).write().unwrap();
//!
//!  let dex = DexFile::from_bytes(&bytes).unwrap();
//!  println!("{} classes", dex.classes(&opcodes).unwrap().len());
//! ```

pub mod dex;
#[cfg(test)]
mod tests;

pub use crate::dex::builder::DexBuilder;
pub use crate::dex::decoder::{decode_all, InstructionIterator};
pub use crate::dex::dex_file::DexFile;
pub use crate::dex::error::DexError;
pub use crate::dex::instructions::{Instruction, InstructionRef, Operands};
pub use crate::dex::model::{AccessFlags, ClassDef, Field, Method, MethodImplementation};
pub use crate::dex::opcodes::Opcodes;
pub use crate::dex::pool::DexPool;
pub use crate::dex::writer::DexWriter;
