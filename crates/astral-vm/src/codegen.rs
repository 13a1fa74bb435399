//! AST-to-bytecode lowering.
//!
//! Each statement lowers to a short instruction sequence:
//!
//! - `CreateTable` emits `CREATE_TABLE name` followed by three `PUSH`es per
//!   column (name, type, semicolon-joined constraint keywords).
//! - `Select` emits one `SELECT` carrying the table and projected columns.
//! - `Insert` emits one `INSERT` carrying the table and alternating
//!   column/value operands.
//! - `Update`/`Delete` emit their staging instructions, then `WHERE` plus
//!   the predicate program when present, then `HALT`.
//! - `Grant`/`Revoke` emit a single authorization instruction.
//!
//! `build_bytecode` concatenates statement sequences in batches of 35,
//! sorting each batch lexicographically by opcode then operands before
//! flushing it.

use astral_ast::{BinOp, Expr, Statement};
use astral_index::BPlusTree;
use astral_types::{Instruction, Opcode, Operand};
use tracing::debug;

/// Statements per sorted emission batch.
const BATCH_SIZE: usize = 35;

fn push(code: &mut Vec<Instruction>, value: impl Into<Operand>) {
    code.push(Instruction::with(Opcode::Push, [value.into()]));
}

const fn binop_opcode(op: BinOp) -> Opcode {
    match op {
        BinOp::And => Opcode::And,
        BinOp::Or => Opcode::Or,
        BinOp::Eq => Opcode::Eq,
        BinOp::Ne => Opcode::Ne,
        BinOp::Lt => Opcode::Lt,
        BinOp::Le => Opcode::Le,
        BinOp::Gt => Opcode::Gt,
        BinOp::Ge => Opcode::Ge,
        BinOp::Add => Opcode::Add,
        BinOp::Sub => Opcode::Sub,
        BinOp::Mul => Opcode::Mul,
        BinOp::Div => Opcode::Div,
        BinOp::Mod => Opcode::Mod,
    }
}

fn emit_expr(code: &mut Vec<Instruction>, expr: &Expr) {
    match expr {
        Expr::Literal(value) => push(code, value.as_str()),
        Expr::TableRef(name) => push(code, name.as_str()),
        Expr::BinaryOp { op, lhs, rhs } => {
            emit_expr(code, lhs);
            emit_expr(code, rhs);
            code.push(Instruction::bare(binop_opcode(*op)));
        }
    }
}

/// Lower one statement to its instruction sequence.
pub fn emit(stmt: &Statement) -> Vec<Instruction> {
    let mut code = Vec::new();
    match stmt {
        Statement::CreateTable { table, columns } => {
            code.push(Instruction::with(
                Opcode::CreateTable,
                [Operand::from(table.as_str())],
            ));
            for col in columns {
                push(&mut code, col.name.as_str());
                push(&mut code, col.type_name.as_str());
                let constraints: Vec<&str> =
                    col.constraints.iter().map(|c| c.keyword()).collect();
                push(&mut code, constraints.join(";"));
            }
        }
        Statement::Select { columns, table } => {
            let mut operands = vec![Operand::from(table.as_str())];
            for col in columns {
                if col != "*" {
                    operands.push(Operand::from(col.as_str()));
                }
            }
            code.push(Instruction::with(Opcode::Select, operands));
        }
        Statement::Insert {
            table,
            columns,
            values,
        } => {
            let mut operands = vec![Operand::from(table.as_str())];
            for (col, val) in columns.iter().zip(values) {
                operands.push(Operand::from(col.as_str()));
                operands.push(Operand::from(val.as_str()));
            }
            code.push(Instruction::with(Opcode::Insert, operands));
        }
        Statement::Update {
            table,
            assignments,
            predicate,
        } => {
            for (col, val) in assignments {
                code.push(Instruction::with(
                    Opcode::Update,
                    [
                        Operand::from(table.as_str()),
                        Operand::from(col.as_str()),
                        Operand::from(val.as_str()),
                    ],
                ));
            }
            if let Some(expr) = predicate {
                code.push(Instruction::bare(Opcode::Where));
                emit_expr(&mut code, expr);
            }
            code.push(Instruction::bare(Opcode::Halt));
        }
        Statement::Delete { table, predicate } => {
            code.push(Instruction::with(
                Opcode::Delete,
                [Operand::from(table.as_str())],
            ));
            if let Some(expr) = predicate {
                code.push(Instruction::bare(Opcode::Where));
                emit_expr(&mut code, expr);
            }
            code.push(Instruction::bare(Opcode::Halt));
        }
        Statement::Grant { user, perms, table } => {
            code.push(Instruction::with(
                Opcode::Grant,
                [
                    Operand::from(user.as_str()),
                    Operand::Int(i64::from(perms.bits())),
                    Operand::from(table.as_str()),
                ],
            ));
        }
        Statement::Revoke { user, perms, table } => {
            code.push(Instruction::with(
                Opcode::Revoke,
                [
                    Operand::from(user.as_str()),
                    Operand::Int(i64::from(perms.bits())),
                    Operand::from(table.as_str()),
                ],
            ));
        }
    }
    code
}

/// Sort the batch's instruction sequences and append them to the output.
/// Sequences go through a B+ tree keyed by the sequence itself, which
/// yields them in lexicographic opcode-then-operand order.
fn flush_batch(result: &mut Vec<Instruction>, batch: &mut Vec<Vec<Instruction>>) {
    if batch.is_empty() {
        return;
    }
    debug!(statements = batch.len(), "flushing sorted bytecode batch");
    let mut tree: BPlusTree<Vec<Instruction>, ()> = BPlusTree::new();
    for seq in batch.drain(..) {
        tree.insert(seq, ());
    }
    for seq in tree.keys() {
        result.extend(seq.iter().cloned());
    }
}

/// Lower a whole program, batching statements in groups of [`BATCH_SIZE`]
/// and flushing each batch in sorted order.
pub fn build_bytecode(statements: &[Statement]) -> Vec<Instruction> {
    let mut result = Vec::new();
    let mut batch: Vec<Vec<Instruction>> = Vec::new();
    for stmt in statements {
        batch.push(emit(stmt));
        if batch.len() == BATCH_SIZE {
            flush_batch(&mut result, &mut batch);
        }
    }
    flush_batch(&mut result, &mut batch);
    result
}
