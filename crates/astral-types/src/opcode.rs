//! Bytecode instruction set shared by the code generator and the VM.
//!
//! An instruction is an opcode plus a list of tagged operands (64-bit
//! integer, 64-bit float, or owned string). Programs are plain
//! `Vec<Instruction>`; the serde derives define the on-disk JSON form used
//! by the `--compile` / `--from-bytecode` CLI paths.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use astral_error::AstralError;
use serde::{Deserialize, Serialize};

/// Bytecode opcodes, grouped by category.
///
/// Numeric values are stable so that disassembly output and the sorted
/// batch order of the code generator are deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Opcode {
    // === DML / DDL ===
    /// Read rows from a table; operands: table name, projected columns.
    Select = 0,
    /// Append a row; operands: table name, alternating column/value pairs.
    Insert = 1,
    /// Stage one assignment; operands: table, column, value.
    Update = 2,
    /// Stage a delete; operand: table name.
    Delete = 3,
    /// Register a table; operand: table name (schema follows as pushes).
    CreateTable = 4,
    /// Remove a table and its metadata; operand: table name.
    DropTable = 5,

    // === Query context ===
    /// Push assignment context onto the stack.
    Set = 6,
    /// Begin the predicate program for a staged mutation.
    Where = 7,
    /// Push ordering context.
    OrderBy = 8,
    /// Push grouping context.
    GroupBy = 9,
    /// Push a row-count bound.
    Limit = 10,
    /// Push a row offset.
    Offset = 11,

    // === Logical ===
    And = 12,
    Or = 13,
    Not = 14,

    // === Comparison ===
    Eq = 15,
    Ne = 16,
    Lt = 17,
    Le = 18,
    Gt = 19,
    Ge = 20,

    // === Arithmetic ===
    Add = 21,
    Sub = 22,
    Mul = 23,
    Div = 24,
    Mod = 25,

    // === Stack & registers ===
    Push = 26,
    Pop = 27,
    /// Push the value of register `r`.
    Load = 28,
    /// Pop into register `r`.
    Store = 29,

    // === Control flow ===
    /// Push the return address, jump to the target.
    Call = 30,
    /// Pop the return address, jump to it.
    Ret = 31,
    /// Unconditional jump.
    Jmp = 32,
    Nop = 33,
    Halt = 34,

    // === Authorization ===
    /// Operands: user, permission bits, table (empty = global).
    Grant = 35,
    Revoke = 36,
}

impl Opcode {
    /// Upper-snake mnemonic used by the disassembler and the bytecode file
    /// format.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::CreateTable => "CREATE_TABLE",
            Self::DropTable => "DROP_TABLE",
            Self::Set => "SET",
            Self::Where => "WHERE",
            Self::OrderBy => "ORDER_BY",
            Self::GroupBy => "GROUP_BY",
            Self::Limit => "LIMIT",
            Self::Offset => "OFFSET",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Not => "NOT",
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::Lt => "LT",
            Self::Le => "LE",
            Self::Gt => "GT",
            Self::Ge => "GE",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Mod => "MOD",
            Self::Push => "PUSH",
            Self::Pop => "POP",
            Self::Load => "LOAD",
            Self::Store => "STORE",
            Self::Call => "CALL",
            Self::Ret => "RET",
            Self::Jmp => "JMP",
            Self::Nop => "NOP",
            Self::Halt => "HALT",
            Self::Grant => "GRANT",
            Self::Revoke => "REVOKE",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Opcode {
    type Err = AstralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s {
            "SELECT" => Self::Select,
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "CREATE_TABLE" => Self::CreateTable,
            "DROP_TABLE" => Self::DropTable,
            "SET" => Self::Set,
            "WHERE" => Self::Where,
            "ORDER_BY" => Self::OrderBy,
            "GROUP_BY" => Self::GroupBy,
            "LIMIT" => Self::Limit,
            "OFFSET" => Self::Offset,
            "AND" => Self::And,
            "OR" => Self::Or,
            "NOT" => Self::Not,
            "EQ" => Self::Eq,
            "NE" => Self::Ne,
            "LT" => Self::Lt,
            "LE" => Self::Le,
            "GT" => Self::Gt,
            "GE" => Self::Ge,
            "ADD" => Self::Add,
            "SUB" => Self::Sub,
            "MUL" => Self::Mul,
            "DIV" => Self::Div,
            "MOD" => Self::Mod,
            "PUSH" => Self::Push,
            "POP" => Self::Pop,
            "LOAD" => Self::Load,
            "STORE" => Self::Store,
            "CALL" => Self::Call,
            "RET" => Self::Ret,
            "JMP" => Self::Jmp,
            "NOP" => Self::Nop,
            "HALT" => Self::Halt,
            "GRANT" => Self::Grant,
            "REVOKE" => Self::Revoke,
            _ => {
                return Err(AstralError::UnknownOpcode {
                    name: s.to_owned(),
                })
            }
        };
        Ok(op)
    }
}

/// A tagged instruction operand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operand {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Operand {
    /// The contained integer, if this operand is one.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The contained string, if this operand is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Total ordering rank across the three tags, used for the code
    /// generator's lexicographic batch sort.
    const fn tag_rank(&self) -> u8 {
        match self {
            Self::Int(_) => 0,
            Self::Float(_) => 1,
            Self::Str(_) => 2,
        }
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Operand {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for Operand {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl PartialEq for Operand {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Operand {}

impl PartialOrd for Operand {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Operand {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            _ => self.tag_rank().cmp(&other.tag_rank()),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

/// A single bytecode instruction: opcode plus operand list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
}

impl Instruction {
    /// Instruction with no operands.
    pub const fn bare(opcode: Opcode) -> Self {
        Self {
            opcode,
            operands: Vec::new(),
        }
    }

    /// Instruction with the given operands.
    pub fn with(opcode: Opcode, operands: impl IntoIterator<Item = Operand>) -> Self {
        Self {
            opcode,
            operands: operands.into_iter().collect(),
        }
    }
}

/// Render a program as the textual disassembly used by `--compile` dumps
/// and verbose execution traces.
pub fn disassemble(code: &[Instruction]) -> String {
    use fmt::Write as _;

    let mut out = String::new();
    for (i, inst) in code.iter().enumerate() {
        let _ = write!(out, "{i}: {}", inst.opcode);
        if !inst.operands.is_empty() {
            let _ = write!(out, " [");
            for (j, op) in inst.operands.iter().enumerate() {
                if j > 0 {
                    let _ = write!(out, " ");
                }
                let _ = write!(out, "{op}");
            }
            let _ = write!(out, "]");
        }
        out.push('\n');
    }
    out
}
