//! AstralDB: an embedded, single-node relational store driven by a small
//! SQL dialect.
//!
//! [`AstralDb`] is the embedder surface: open a store at a path, feed it
//! SQL, get rows back. Internally each statement is parsed, lowered to
//! bytecode, and executed by the VM against the storage engine; a
//! background flusher persists mutations to one encrypted, compressed
//! snapshot file.
//!
//! ```no_run
//! use astraldb::AstralDb;
//!
//! let db = AstralDb::open("astral.db").unwrap();
//! db.execute("CREATE TABLE t (id INT PRIMARY KEY, v TEXT)").unwrap();
//! db.execute("INSERT INTO t (id,v) VALUES (1,a)").unwrap();
//! let rows = db.execute("SELECT id,v FROM t").unwrap();
//! assert_eq!(rows.len(), 1);
//! db.close().unwrap();
//! ```

use std::path::Path;

use tracing::debug;

pub use astral_ast as ast;
pub use astral_error::{AstralError, Result};
pub use astral_parser::parse;
pub use astral_store::{Database, EngineConfig, IndexBackend};
pub use astral_types::{
    disassemble, Column, ForeignKey, Instruction, Opcode, Operand, Permissions, Row, Schema,
};
pub use astral_vm::{build_bytecode, emit, Cell, Vm};

/// An open AstralDB store.
pub struct AstralDb {
    db: Database,
}

impl AstralDb {
    /// Open a store at `path`, loading the snapshot if one exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, EngineConfig::default())
    }

    /// Open a store with explicit flusher timings.
    pub fn open_with_config(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let path = path.as_ref();
        let db = Database::with_config(path, config);
        if path.exists() {
            db.load_from_file()?;
        }
        Ok(Self { db })
    }

    /// The underlying engine, for operations without SQL surface
    /// (indexes, users, foreign keys, salts).
    pub fn engine(&self) -> &Database {
        &self.db
    }

    /// Parse and execute SQL, one program per statement, returning the
    /// rows produced by any `SELECT` statements in order.
    ///
    /// The first parse error fails the call; recovery across statements is
    /// the CLI's business, not the embedder API's.
    pub fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        let (statements, mut errors) = parse(sql);
        if let Some(err) = errors.drain(..).next() {
            return Err(err);
        }
        let mut vm = Vm::new(&self.db);
        let mut rows = Vec::new();
        for stmt in &statements {
            let code = emit(stmt);
            debug!(statement = %stmt, instructions = code.len(), "executing");
            vm.execute(&code)?;
            rows.extend(vm.take_results());
        }
        Ok(rows)
    }

    /// Flush pending state and shut the engine down.
    pub fn close(self) -> Result<()> {
        self.db.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_execute_close() {
        let dir = tempfile::tempdir().unwrap();
        let db = AstralDb::open(dir.path().join("astral.db")).unwrap();
        db.execute("CREATE TABLE t (id INT)").unwrap();
        db.execute("INSERT INTO t (id) VALUES (1)").unwrap();
        let rows = db.execute("SELECT id FROM t").unwrap();
        assert_eq!(rows.len(), 1);
        db.close().unwrap();
    }

    #[test]
    fn parse_errors_fail_execute() {
        let dir = tempfile::tempdir().unwrap();
        let db = AstralDb::open(dir.path().join("astral.db")).unwrap();
        assert!(db.execute("SELEC id FROM t").is_err());
        assert!(db.execute("SELECT FROM").is_err());
    }

    #[test]
    fn open_without_existing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = AstralDb::open(dir.path().join("astral.db")).unwrap();
        assert!(db.engine().table_names().is_empty());
    }
}
