//! Foundational types for AstralDB.
//!
//! This crate is the leaf of the workspace: the relational data model
//! (columns, schemas, rows, foreign keys, permissions) and the bytecode
//! instruction set shared by the code generator and the virtual machine.

pub mod opcode;
pub mod perms;
pub mod schema;

pub use opcode::{disassemble, Instruction, Opcode, Operand};
pub use perms::Permissions;
pub use schema::{Column, ForeignKey, Row, Schema};
