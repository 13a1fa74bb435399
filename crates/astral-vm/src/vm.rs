//! The stack virtual machine.
//!
//! State: instruction counter, a stack of tagged cells, 16 general
//! registers, a flag word, and a reference to the storage engine. Storage
//! opcodes route into the engine; `SELECT` rows accumulate in the VM's
//! result buffer for the caller to drain.
//!
//! Staged mutations: `UPDATE`/`DELETE` instructions do not touch the
//! engine immediately. A following `WHERE` sets the flag bit and diverts
//! the remaining instructions (up to `HALT`) into a predicate program; at
//! `HALT` or end of program the staged mutation is applied, evaluating the
//! predicate once per candidate row. `CREATE_TABLE` likewise collects the
//! column-descriptor `PUSH`es that follow it and registers the schema when
//! the first non-`PUSH` instruction (or the end of the program) arrives.
//!
//! On any opcode failure the VM resets to its initial state.

use std::fmt;

use astral_error::{AstralError, Result};
use astral_store::Database;
use astral_types::{Column, Instruction, Opcode, Operand, Permissions, Row, Schema};
use tracing::debug;

/// Number of general registers.
pub const REGISTER_COUNT: usize = 16;

/// Flag-word bit recording that a `WHERE` clause was seen.
pub const FLAG_WHERE: u64 = 1;

/// A tagged operand cell: 64-bit integer, 64-bit float, or owned string.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Cell {
    fn from_operand(op: &Operand) -> Self {
        match op {
            Operand::Int(v) => Self::Int(*v),
            Operand::Float(v) => Self::Float(*v),
            Operand::Str(s) => Self::Str(s.clone()),
        }
    }

    /// Integer view when the cell is numeric: an `Int`, or a `Str` whose
    /// content parses as one.
    fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Str(s) => s.parse().ok(),
            Self::Float(_) => None,
        }
    }

    /// Truthiness for the logical opcodes.
    fn truthy(&self) -> bool {
        match self {
            Self::Int(v) => *v != 0,
            Self::Float(v) => *v != 0.0,
            Self::Str(s) => !s.is_empty() && s != "0",
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

/// A mutation staged by `UPDATE`/`DELETE`/`CREATE_TABLE`, applied when its
/// statement's instruction sequence ends.
enum Pending {
    CreateTable {
        table: String,
        /// Stack depth when `CREATE_TABLE` executed; the cells above it are
        /// the column-descriptor triples.
        mark: usize,
    },
    Update {
        table: String,
        assignments: Row,
    },
    Delete {
        table: String,
    },
}

fn str_operand<'a>(inst: &'a Instruction, index: usize) -> Result<&'a str> {
    inst.operands
        .get(index)
        .and_then(Operand::as_str)
        .ok_or_else(|| {
            AstralError::bad_operand(inst.opcode.name(), format!("string operand {index} required"))
        })
}

fn int_operand(inst: &Instruction, index: usize) -> Result<i64> {
    inst.operands
        .get(index)
        .and_then(Operand::as_int)
        .ok_or_else(|| {
            AstralError::bad_operand(
                inst.opcode.name(),
                format!("integer operand {index} required"),
            )
        })
}

/// The virtual machine, bound to a storage engine for its lifetime.
pub struct Vm<'a> {
    db: &'a Database,
    stack: Vec<Cell>,
    registers: [Cell; REGISTER_COUNT],
    flags: u64,
    results: Vec<Row>,
}

impl<'a> Vm<'a> {
    /// VM over the given engine.
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            stack: Vec::new(),
            registers: std::array::from_fn(|_| Cell::Int(0)),
            flags: 0,
            results: Vec::new(),
        }
    }

    /// Rows accumulated by `SELECT` since the last reset.
    pub fn results(&self) -> &[Row] {
        &self.results
    }

    /// Drain the accumulated result rows.
    pub fn take_results(&mut self) -> Vec<Row> {
        std::mem::take(&mut self.results)
    }

    /// Top of the operand stack, if any.
    pub fn stack_top(&self) -> Option<&Cell> {
        self.stack.last()
    }

    /// A register's current value.
    pub fn register(&self, index: usize) -> Option<&Cell> {
        self.registers.get(index)
    }

    /// The flag word.
    pub const fn flags(&self) -> u64 {
        self.flags
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.registers = std::array::from_fn(|_| Cell::Int(0));
        self.flags = 0;
        self.results.clear();
    }

    /// Execute a program from a clean state. On failure the VM is reset
    /// and the error returned.
    pub fn execute(&mut self, code: &[Instruction]) -> Result<()> {
        self.reset();
        let outcome = self.run(code);
        if outcome.is_err() {
            self.reset();
        }
        outcome
    }

    fn run(&mut self, code: &[Instruction]) -> Result<()> {
        let mut ic = 0usize;
        let mut pending: Option<Pending> = None;
        let mut predicate: Vec<Instruction> = Vec::new();
        let mut capturing = false;

        while ic < code.len() {
            let inst = &code[ic];
            if capturing && inst.opcode != Opcode::Halt {
                predicate.push(inst.clone());
                ic += 1;
                continue;
            }
            // A pending CREATE_TABLE consumes the PUSHes that follow it;
            // the first other instruction closes the descriptor list.
            if inst.opcode != Opcode::Push {
                self.finalize_create(&mut pending)?;
            }
            match inst.opcode {
                Opcode::Nop => {}
                Opcode::Halt => break,

                // ── Stack ───────────────────────────────────────────────
                Opcode::Push => {
                    let operand = inst.operands.first().ok_or_else(|| {
                        AstralError::bad_operand("PUSH", "operand required")
                    })?;
                    self.stack.push(Cell::from_operand(operand));
                }
                Opcode::Pop => {
                    // Discard; a no-op on an empty stack.
                    self.stack.pop();
                }
                Opcode::Load => {
                    let index = int_operand(inst, 0)?;
                    let cell = self
                        .registers
                        .get(usize::try_from(index).unwrap_or(usize::MAX))
                        .ok_or(AstralError::RegisterOutOfRange { index })?;
                    self.stack.push(cell.clone());
                }
                Opcode::Store => {
                    let index = int_operand(inst, 0)?;
                    let slot = usize::try_from(index).unwrap_or(usize::MAX);
                    if slot >= REGISTER_COUNT {
                        return Err(AstralError::RegisterOutOfRange { index });
                    }
                    let cell = self.pop("STORE")?;
                    self.registers[slot] = cell;
                }

                // ── Arithmetic ──────────────────────────────────────────
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                    let b = self.pop_int(inst.opcode)?;
                    let a = self.pop_int(inst.opcode)?;
                    let value = match inst.opcode {
                        Opcode::Add => a.wrapping_add(b),
                        Opcode::Sub => a.wrapping_sub(b),
                        Opcode::Mul => a.wrapping_mul(b),
                        Opcode::Div => {
                            if b == 0 {
                                return Err(AstralError::DivByZero);
                            }
                            a.wrapping_div(b)
                        }
                        Opcode::Mod => {
                            if b == 0 {
                                return Err(AstralError::DivByZero);
                            }
                            a.wrapping_rem(b)
                        }
                        _ => unreachable!("arithmetic arm"),
                    };
                    self.stack.push(Cell::Int(value));
                }

                // ── Comparison ──────────────────────────────────────────
                Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                    let b = self.pop(inst.opcode.name())?;
                    let a = self.pop(inst.opcode.name())?;
                    let ordering = compare_cells(&a, &b).ok_or_else(|| {
                        AstralError::bad_operand(inst.opcode.name(), "incomparable operands")
                    })?;
                    self.stack.push(Cell::Int(i64::from(ordering_matches(
                        inst.opcode,
                        ordering,
                    ))));
                }

                // ── Logical ─────────────────────────────────────────────
                Opcode::And | Opcode::Or => {
                    let b = self.pop(inst.opcode.name())?.truthy();
                    let a = self.pop(inst.opcode.name())?.truthy();
                    let value = if inst.opcode == Opcode::And {
                        a && b
                    } else {
                        a || b
                    };
                    self.stack.push(Cell::Int(i64::from(value)));
                }
                Opcode::Not => {
                    let a = self.pop("NOT")?.truthy();
                    self.stack.push(Cell::Int(i64::from(!a)));
                }

                // ── Control flow ────────────────────────────────────────
                Opcode::Jmp => {
                    ic = self.jump_target(inst, code.len())?;
                    continue;
                }
                Opcode::Call => {
                    let target = self.jump_target(inst, code.len())?;
                    self.stack.push(Cell::Int(ic as i64 + 1));
                    ic = target;
                    continue;
                }
                Opcode::Ret => {
                    let cell = self.pop("RET")?;
                    let Cell::Int(target) = cell else {
                        return Err(AstralError::bad_operand("RET", "integer return address"));
                    };
                    if target < 0 {
                        return Err(AstralError::JumpOutOfRange {
                            target,
                            len: code.len(),
                        });
                    }
                    ic = target as usize;
                    continue;
                }

                // ── Query context ───────────────────────────────────────
                Opcode::Set
                | Opcode::OrderBy
                | Opcode::GroupBy
                | Opcode::Limit
                | Opcode::Offset => {
                    for operand in &inst.operands {
                        self.stack.push(Cell::from_operand(operand));
                    }
                }
                Opcode::Where => {
                    self.flags |= FLAG_WHERE;
                    capturing = true;
                }

                // ── Storage ─────────────────────────────────────────────
                Opcode::CreateTable => {
                    let table = str_operand(inst, 0)?.to_owned();
                    pending = Some(Pending::CreateTable {
                        table,
                        mark: self.stack.len(),
                    });
                }
                Opcode::DropTable => {
                    let table = str_operand(inst, 0)?;
                    self.check_permission(Permissions::ALL, table)?;
                    self.db.drop_table(table);
                }
                Opcode::Insert => {
                    let table = str_operand(inst, 0)?;
                    self.check_permission(Permissions::INSERT, table)?;
                    let mut row = Row::new();
                    let mut i = 1;
                    while i + 1 < inst.operands.len() {
                        let column = str_operand(inst, i)?;
                        let value = str_operand(inst, i + 1)?;
                        row.insert(column.to_owned(), value.to_owned());
                        i += 2;
                    }
                    self.db.insert(table, row)?;
                }
                Opcode::Select => {
                    let table = str_operand(inst, 0)?;
                    self.check_permission(Permissions::SELECT, table)?;
                    let rows = self.db.select(table, |_| true)?;
                    let projection: Vec<&str> = inst.operands[1..]
                        .iter()
                        .filter_map(Operand::as_str)
                        .collect();
                    for row in rows {
                        self.results.push(project(row, &projection));
                    }
                }
                Opcode::Update => {
                    let table = str_operand(inst, 0)?.to_owned();
                    let column = str_operand(inst, 1)?.to_owned();
                    let value = str_operand(inst, 2)?.to_owned();
                    match &mut pending {
                        Some(Pending::Update {
                            table: pending_table,
                            assignments,
                        }) if *pending_table == table => {
                            assignments.insert(column, value);
                        }
                        _ => {
                            let mut assignments = Row::new();
                            assignments.insert(column, value);
                            pending = Some(Pending::Update { table, assignments });
                        }
                    }
                }
                Opcode::Delete => {
                    let table = str_operand(inst, 0)?.to_owned();
                    pending = Some(Pending::Delete { table });
                }

                // ── Authorization ───────────────────────────────────────
                Opcode::Grant | Opcode::Revoke => {
                    let user = str_operand(inst, 0)?;
                    let bits = int_operand(inst, 1)?;
                    let table = inst
                        .operands
                        .get(2)
                        .and_then(Operand::as_str)
                        .unwrap_or("");
                    let perms =
                        Permissions::from_bits_truncate(u32::try_from(bits).unwrap_or(0));
                    if inst.opcode == Opcode::Grant {
                        self.db.grant(user, perms, table);
                    } else {
                        self.db.revoke(user, perms, table);
                    }
                }
            }
            ic += 1;
        }

        self.finalize_create(&mut pending)?;
        self.apply_pending(pending, &predicate)
    }

    fn pop(&mut self, opcode: &str) -> Result<Cell> {
        self.stack.pop().ok_or_else(|| AstralError::StackUnderflow {
            opcode: opcode.to_owned(),
        })
    }

    fn pop_int(&mut self, opcode: Opcode) -> Result<i64> {
        match self.pop(opcode.name())? {
            Cell::Int(v) => Ok(v),
            other => Err(AstralError::bad_operand(
                opcode.name(),
                format!("integer cell required, found {other}"),
            )),
        }
    }

    fn jump_target(&self, inst: &Instruction, len: usize) -> Result<usize> {
        let target = int_operand(inst, 0)?;
        if target < 0 || target as usize >= len {
            return Err(AstralError::JumpOutOfRange { target, len });
        }
        Ok(target as usize)
    }

    fn check_permission(&self, perms: Permissions, table: &str) -> Result<()> {
        let Some(user) = self.db.current_user() else {
            return Ok(());
        };
        if self.db.has_permission(&user, perms, table) {
            Ok(())
        } else {
            Err(AstralError::PermissionDenied {
                user,
                needed: perms.keyword_list(),
                table: table.to_owned(),
            })
        }
    }

    /// Register a pending `CREATE_TABLE`, consuming the column-descriptor
    /// triples pushed above its stack mark.
    fn finalize_create(&mut self, pending: &mut Option<Pending>) -> Result<()> {
        if !matches!(pending, Some(Pending::CreateTable { .. })) {
            return Ok(());
        }
        let Some(Pending::CreateTable { table, mark }) = pending.take() else {
            unreachable!("checked variant");
        };
        let cells = self.stack.split_off(mark);
        if cells.len() % 3 != 0 {
            return Err(AstralError::bad_operand(
                "CREATE_TABLE",
                "incomplete column descriptor triple",
            ));
        }
        let mut schema = Schema::new();
        for triple in cells.chunks_exact(3) {
            let [name, _type_name, constraints] = triple else {
                unreachable!("chunks_exact(3)");
            };
            let (Cell::Str(name), Cell::Str(constraints)) = (name, constraints) else {
                return Err(AstralError::bad_operand(
                    "CREATE_TABLE",
                    "string column descriptor required",
                ));
            };
            let mut column = Column::plain(name.clone());
            for keyword in constraints.split(';') {
                match keyword {
                    "PRIMARY KEY" => {
                        column.primary_key = true;
                        column.unique = true;
                        column.not_null = true;
                    }
                    "NOT NULL" => column.not_null = true,
                    "UNIQUE" => column.unique = true,
                    // AUTO_INCREMENT carries no column flag.
                    _ => {}
                }
            }
            schema.push(column);
        }
        self.check_permission(Permissions::ALL, &table)?;
        debug!(table = %table, columns = schema.len(), "create table");
        self.db.create_table(&table, schema)
    }

    /// Apply a staged `UPDATE`/`DELETE` with the captured predicate.
    fn apply_pending(&mut self, pending: Option<Pending>, predicate: &[Instruction]) -> Result<()> {
        // Without a WHERE clause every row matches; a WHERE clause with an
        // empty predicate program matches none.
        let matches = |row: &Row| {
            if predicate.is_empty() {
                !self.flag_where()
            } else {
                eval_predicate(predicate, row).unwrap_or(false)
            }
        };
        match pending {
            None | Some(Pending::CreateTable { .. }) => Ok(()),
            Some(Pending::Update { table, assignments }) => {
                self.check_permission(Permissions::UPDATE, &table)?;
                let changed = self.db.update(&table, matches, &assignments)?;
                debug!(table = %table, changed, "update applied");
                Ok(())
            }
            Some(Pending::Delete { table }) => {
                self.check_permission(Permissions::DELETE, &table)?;
                let removed = self.db.delete(&table, matches)?;
                debug!(table = %table, removed, "delete applied");
                Ok(())
            }
        }
    }

    const fn flag_where(&self) -> bool {
        self.flags & FLAG_WHERE != 0
    }
}

/// Project a row to the named columns (all columns when the projection is
/// empty).
fn project(row: Row, projection: &[&str]) -> Row {
    if projection.is_empty() {
        return row;
    }
    let mut out = Row::new();
    for &column in projection {
        if let Some(value) = row.get(column) {
            out.insert(column.to_owned(), value.clone());
        }
    }
    out
}

fn compare_cells(a: &Cell, b: &Cell) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Cell::Int(x), Cell::Int(y)) => Some(x.cmp(y)),
        (Cell::Str(x), Cell::Str(y)) => Some(x.cmp(y)),
        (Cell::Float(x), Cell::Float(y)) => x.partial_cmp(y),
        _ => None,
    }
}

const fn ordering_matches(opcode: Opcode, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::{Equal, Greater, Less};
    match opcode {
        Opcode::Eq => matches!(ordering, Equal),
        Opcode::Ne => !matches!(ordering, Equal),
        Opcode::Lt => matches!(ordering, Less),
        Opcode::Le => matches!(ordering, Less | Equal),
        Opcode::Gt => matches!(ordering, Greater),
        Opcode::Ge => matches!(ordering, Greater | Equal),
        _ => false,
    }
}

/// Evaluate a predicate program against a candidate row.
///
/// A pushed string that names a column of the row resolves to the row's
/// value. Comparisons are numeric when both sides parse as integers,
/// lexicographic otherwise. The row matches when the final stack top is
/// truthy.
fn eval_predicate(code: &[Instruction], row: &Row) -> Result<bool> {
    let mut stack: Vec<Cell> = Vec::new();
    let underflow = |opcode: Opcode| AstralError::StackUnderflow {
        opcode: opcode.name().to_owned(),
    };
    for inst in code {
        match inst.opcode {
            Opcode::Push => {
                let operand = inst
                    .operands
                    .first()
                    .ok_or_else(|| AstralError::bad_operand("PUSH", "operand required"))?;
                let cell = match operand {
                    Operand::Str(s) => match row.get(s) {
                        Some(value) => Cell::Str(value.clone()),
                        None => Cell::Str(s.clone()),
                    },
                    other => Cell::from_operand(other),
                };
                stack.push(cell);
            }
            Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                let b = stack.pop().ok_or_else(|| underflow(inst.opcode))?;
                let a = stack.pop().ok_or_else(|| underflow(inst.opcode))?;
                let ordering = match (a.as_int(), b.as_int()) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    _ => a.to_string().cmp(&b.to_string()),
                };
                stack.push(Cell::Int(i64::from(ordering_matches(inst.opcode, ordering))));
            }
            Opcode::And | Opcode::Or => {
                let b = stack.pop().ok_or_else(|| underflow(inst.opcode))?.truthy();
                let a = stack.pop().ok_or_else(|| underflow(inst.opcode))?.truthy();
                let value = if inst.opcode == Opcode::And {
                    a && b
                } else {
                    a || b
                };
                stack.push(Cell::Int(i64::from(value)));
            }
            Opcode::Not => {
                let a = stack.pop().ok_or_else(|| underflow(inst.opcode))?.truthy();
                stack.push(Cell::Int(i64::from(!a)));
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                let b = stack
                    .pop()
                    .and_then(|c| c.as_int())
                    .ok_or_else(|| AstralError::bad_operand(inst.opcode.name(), "numeric cell"))?;
                let a = stack
                    .pop()
                    .and_then(|c| c.as_int())
                    .ok_or_else(|| AstralError::bad_operand(inst.opcode.name(), "numeric cell"))?;
                let value = match inst.opcode {
                    Opcode::Add => a.wrapping_add(b),
                    Opcode::Sub => a.wrapping_sub(b),
                    Opcode::Mul => a.wrapping_mul(b),
                    Opcode::Div => {
                        if b == 0 {
                            return Err(AstralError::DivByZero);
                        }
                        a.wrapping_div(b)
                    }
                    Opcode::Mod => {
                        if b == 0 {
                            return Err(AstralError::DivByZero);
                        }
                        a.wrapping_rem(b)
                    }
                    _ => unreachable!("arithmetic arm"),
                };
                stack.push(Cell::Int(value));
            }
            other => {
                return Err(AstralError::bad_operand(
                    other.name(),
                    "not valid in a predicate",
                ))
            }
        }
    }
    Ok(stack.last().is_some_and(Cell::truthy))
}

#[cfg(test)]
mod tests {
    use astral_parser::parse;
    use astral_store::Database;

    use crate::codegen::emit;

    use super::*;

    fn scratch_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("astral.db"));
        (dir, db)
    }

    fn run_sql(vm: &mut Vm<'_>, sql: &str) -> Result<Vec<Row>> {
        let (stmts, errs) = parse(sql);
        assert!(errs.is_empty(), "parse errors: {errs:?}");
        let mut rows = Vec::new();
        for stmt in &stmts {
            vm.execute(&emit(stmt))?;
            rows.extend(vm.take_results());
        }
        Ok(rows)
    }

    fn program(pairs: &[(Opcode, &[i64])]) -> Vec<Instruction> {
        pairs
            .iter()
            .map(|(op, args)| {
                Instruction::with(*op, args.iter().map(|v| Operand::Int(*v)))
            })
            .collect()
    }

    #[test]
    fn arithmetic_program() {
        // PUSH 2; PUSH 3; ADD; PUSH 4; MUL; HALT → stack top 20.
        let (_dir, db) = scratch_db();
        let mut vm = Vm::new(&db);
        let code = program(&[
            (Opcode::Push, &[2]),
            (Opcode::Push, &[3]),
            (Opcode::Add, &[]),
            (Opcode::Push, &[4]),
            (Opcode::Mul, &[]),
            (Opcode::Halt, &[]),
        ]);
        vm.execute(&code).unwrap();
        assert_eq!(vm.stack_top(), Some(&Cell::Int(20)));
    }

    #[test]
    fn division_by_zero_resets_state() {
        let (_dir, db) = scratch_db();
        let mut vm = Vm::new(&db);
        let code = program(&[
            (Opcode::Push, &[1]),
            (Opcode::Push, &[0]),
            (Opcode::Div, &[]),
        ]);
        let err = vm.execute(&code).unwrap_err();
        assert!(matches!(err, AstralError::DivByZero));
        assert!(vm.stack_top().is_none(), "stack must reset on failure");
    }

    #[test]
    fn stack_underflow_detected() {
        let (_dir, db) = scratch_db();
        let mut vm = Vm::new(&db);
        let err = vm.execute(&program(&[(Opcode::Add, &[])])).unwrap_err();
        assert!(matches!(err, AstralError::StackUnderflow { .. }));
    }

    #[test]
    fn pop_on_empty_stack_is_noop() {
        let (_dir, db) = scratch_db();
        let mut vm = Vm::new(&db);
        vm.execute(&program(&[(Opcode::Pop, &[]), (Opcode::Push, &[7])]))
            .unwrap();
        assert_eq!(vm.stack_top(), Some(&Cell::Int(7)));
    }

    #[test]
    fn jump_bounds_checked() {
        let (_dir, db) = scratch_db();
        let mut vm = Vm::new(&db);
        let err = vm.execute(&program(&[(Opcode::Jmp, &[9])])).unwrap_err();
        assert!(matches!(err, AstralError::JumpOutOfRange { .. }));
    }

    #[test]
    fn jmp_skips_instructions() {
        let (_dir, db) = scratch_db();
        let mut vm = Vm::new(&db);
        // JMP over a PUSH that would change the result.
        let code = program(&[
            (Opcode::Jmp, &[2]),
            (Opcode::Push, &[99]),
            (Opcode::Push, &[1]),
        ]);
        vm.execute(&code).unwrap();
        assert_eq!(vm.stack_top(), Some(&Cell::Int(1)));
    }

    #[test]
    fn registers_store_and_load() {
        let (_dir, db) = scratch_db();
        let mut vm = Vm::new(&db);
        let code = program(&[
            (Opcode::Push, &[42]),
            (Opcode::Store, &[3]),
            (Opcode::Load, &[3]),
        ]);
        vm.execute(&code).unwrap();
        assert_eq!(vm.stack_top(), Some(&Cell::Int(42)));
        assert_eq!(vm.register(3), Some(&Cell::Int(42)));
        let err = vm
            .execute(&program(&[(Opcode::Load, &[16])]))
            .unwrap_err();
        assert!(matches!(err, AstralError::RegisterOutOfRange { .. }));
    }

    #[test]
    fn call_and_ret() {
        let (_dir, db) = scratch_db();
        let mut vm = Vm::new(&db);
        // CALL 3 pushes the return address (1), the callee pushes 5 and
        // returns... the return address is below the 5, so swap via
        // registers: simpler program: CALL 2; HALT; PUSH 5; POP; RET.
        let code = vec![
            Instruction::with(Opcode::Call, [Operand::Int(2)]),
            Instruction::bare(Opcode::Halt),
            Instruction::with(Opcode::Push, [Operand::Int(5)]),
            Instruction::bare(Opcode::Pop),
            Instruction::bare(Opcode::Ret),
        ];
        vm.execute(&code).unwrap();
        // RET popped the return address (1) and jumped to HALT.
        assert!(vm.stack_top().is_none());
    }

    #[test]
    fn where_sets_flag_bit() {
        let (_dir, db) = scratch_db();
        db.create_table("t", Vec::new()).unwrap();
        let mut vm = Vm::new(&db);
        run_sql(&mut vm, "DELETE FROM t WHERE id=1").unwrap();
        assert_eq!(vm.flags() & FLAG_WHERE, FLAG_WHERE);
    }

    #[test]
    fn create_insert_select_pipeline() {
        let (_dir, db) = scratch_db();
        let mut vm = Vm::new(&db);
        let rows = run_sql(
            &mut vm,
            "CREATE TABLE t (id INT PRIMARY KEY, v TEXT); \
             INSERT INTO t (id,v) VALUES (1,a); \
             INSERT INTO t (id,v) VALUES (2,b); \
             SELECT id,v FROM t",
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        let mut pairs: Vec<(String, String)> = rows
            .iter()
            .map(|r| (r["id"].clone(), r["v"].clone()))
            .collect();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("1".to_owned(), "a".to_owned()),
                ("2".to_owned(), "b".to_owned())
            ]
        );
        // The schema carried the PRIMARY KEY flags through the bytecode.
        let schema = db.schema("t").unwrap();
        let id = schema.iter().find(|c| c.name == "id").unwrap();
        assert!(id.primary_key && id.unique && id.not_null);
    }

    #[test]
    fn update_applies_predicate_per_row() {
        let (_dir, db) = scratch_db();
        let mut vm = Vm::new(&db);
        run_sql(
            &mut vm,
            "CREATE TABLE t (id INT, v TEXT); \
             INSERT INTO t (id,v) VALUES (1,a); \
             INSERT INTO t (id,v) VALUES (2,b); \
             UPDATE t SET v=z WHERE id=1",
        )
        .unwrap();
        let rows = run_sql(&mut vm, "SELECT id,v FROM t").unwrap();
        let mut pairs: Vec<(String, String)> = rows
            .iter()
            .map(|r| (r["id"].clone(), r["v"].clone()))
            .collect();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("1".to_owned(), "z".to_owned()),
                ("2".to_owned(), "b".to_owned())
            ]
        );
    }

    #[test]
    fn update_without_where_touches_every_row() {
        let (_dir, db) = scratch_db();
        let mut vm = Vm::new(&db);
        run_sql(
            &mut vm,
            "CREATE TABLE t (id INT, v TEXT); \
             INSERT INTO t (id,v) VALUES (1,a); \
             INSERT INTO t (id,v) VALUES (2,b); \
             UPDATE t SET v=q",
        )
        .unwrap();
        let rows = db.rows("t").unwrap();
        assert!(rows.iter().all(|r| r["v"] == "q"));
    }

    #[test]
    fn delete_with_predicate() {
        let (_dir, db) = scratch_db();
        let mut vm = Vm::new(&db);
        run_sql(
            &mut vm,
            "CREATE TABLE t (id INT, v TEXT); \
             INSERT INTO t (id,v) VALUES (1,z); \
             INSERT INTO t (id,v) VALUES (2,b); \
             DELETE FROM t WHERE id=2",
        )
        .unwrap();
        let rows = db.rows("t").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["v"], "z");
    }

    #[test]
    fn grant_and_revoke_route_to_acl() {
        let (_dir, db) = scratch_db();
        let mut vm = Vm::new(&db);
        run_sql(&mut vm, "GRANT SELECT ON t TO alice").unwrap();
        assert!(db.has_permission("alice", Permissions::SELECT, "t"));
        assert!(!db.has_permission("alice", Permissions::INSERT, "t"));
        run_sql(&mut vm, "REVOKE SELECT ON t FROM alice").unwrap();
        assert!(!db.has_permission("alice", Permissions::SELECT, "t"));
    }

    #[test]
    fn session_user_is_permission_checked() {
        let (_dir, db) = scratch_db();
        let mut vm = Vm::new(&db);
        run_sql(
            &mut vm,
            "CREATE TABLE t (id INT); INSERT INTO t (id) VALUES (1)",
        )
        .unwrap();
        db.add_user("alice", "pw");
        db.grant("alice", Permissions::SELECT, "t");
        assert!(db.authenticate_user("alice", "pw"));
        // Granted bit passes.
        let rows = run_sql(&mut vm, "SELECT id FROM t").unwrap();
        assert_eq!(rows.len(), 1);
        // Missing bit is denied.
        let err = run_sql(&mut vm, "DELETE FROM t WHERE id=1").unwrap_err();
        assert!(matches!(err, AstralError::PermissionDenied { .. }));
        db.logout();
        run_sql(&mut vm, "DELETE FROM t WHERE id=1").unwrap();
    }

    #[test]
    fn predicate_resolves_columns_and_arithmetic() {
        let mut row = Row::new();
        row.insert("id".to_owned(), "7".to_owned());
        row.insert("v".to_owned(), "abc".to_owned());

        let (stmts, _) = parse("DELETE FROM t WHERE id=7");
        let code = emit(&stmts[0]);
        // Extract the predicate program between WHERE and HALT.
        let where_at = code.iter().position(|i| i.opcode == Opcode::Where).unwrap();
        let pred = &code[where_at + 1..code.len() - 1];
        assert!(eval_predicate(pred, &row).unwrap());

        let (stmts, _) = parse("DELETE FROM t WHERE id=8");
        let code = emit(&stmts[0]);
        let where_at = code.iter().position(|i| i.opcode == Opcode::Where).unwrap();
        let pred = &code[where_at + 1..code.len() - 1];
        assert!(!eval_predicate(pred, &row).unwrap());

        // String comparison when a side is non-numeric.
        let (stmts, _) = parse("DELETE FROM t WHERE v=abc");
        let code = emit(&stmts[0]);
        let where_at = code.iter().position(|i| i.opcode == Opcode::Where).unwrap();
        let pred = &code[where_at + 1..code.len() - 1];
        assert!(eval_predicate(pred, &row).unwrap());

        // Arithmetic inside a predicate: id < 3 + 5.
        let (stmts, _) = parse("DELETE FROM t WHERE id < 3 + 5");
        let code = emit(&stmts[0]);
        let where_at = code.iter().position(|i| i.opcode == Opcode::Where).unwrap();
        let pred = &code[where_at + 1..code.len() - 1];
        assert!(eval_predicate(pred, &row).unwrap());
    }

    #[test]
    fn query_context_opcodes_push_operands() {
        let (_dir, db) = scratch_db();
        let mut vm = Vm::new(&db);
        let code = vec![Instruction::with(Opcode::Limit, [Operand::Int(10)])];
        vm.execute(&code).unwrap();
        assert_eq!(vm.stack_top(), Some(&Cell::Int(10)));
    }

    #[test]
    fn select_star_returns_full_rows() {
        let (_dir, db) = scratch_db();
        let mut vm = Vm::new(&db);
        let rows = run_sql(
            &mut vm,
            "CREATE TABLE t (id INT, v TEXT); \
             INSERT INTO t (id,v) VALUES (1,a); \
             SELECT * FROM t",
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 2);
    }
}
