//! Recursive-descent SQL parser with precedence climbing for expressions.
//!
//! `parse_all` consumes the whole token stream and returns every statement
//! it could parse alongside the errors it hit; on a structural failure it
//! recovers by skipping to the next statement-start keyword.

use astral_ast::{BinOp, ColumnDef, Constraint, Expr, Statement};
use astral_error::{AstralError, Result};
use astral_types::Permissions;

use crate::lexer::Lexer;
use crate::token::{is_statement_start, Token, TokenKind};

/// Parse SQL text into statements, collecting recoverable errors.
pub fn parse(sql: &str) -> (Vec<Statement>, Vec<AstralError>) {
    match Lexer::tokenize(sql) {
        Ok(tokens) => Parser::new(tokens).parse_all(),
        Err(err) => (Vec::new(), vec![err]),
    }
}

/// Parser over a token stream.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Parser over pre-lexed tokens.
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parser over SQL source text.
    pub fn from_sql(sql: &str) -> Result<Self> {
        Ok(Self::new(Lexer::tokenize(sql)?))
    }

    /// Parse every statement, recovering to the next statement keyword
    /// after an error.
    pub fn parse_all(mut self) -> (Vec<Statement>, Vec<AstralError>) {
        let mut statements = Vec::new();
        let mut errors = Vec::new();
        while self.peek().is_some() {
            // Statement separators between commands.
            if self.peek().is_some_and(|t| t.is_punct(";")) {
                self.advance();
                continue;
            }
            match self.parse_statement() {
                Ok(stmt) => statements.push(stmt),
                Err(err) => {
                    errors.push(err);
                    self.recover();
                }
            }
        }
        (statements, errors)
    }

    /// Parse a single statement, dispatching on the leading keyword.
    pub fn parse_statement(&mut self) -> Result<Statement> {
        let token = self.peek().ok_or_else(|| AstralError::eof("empty query"))?;
        if token.kind != TokenKind::Keyword {
            return Err(AstralError::unexpected(
                &token.text,
                token.offset,
                "statement keyword",
            ));
        }
        match token.text.to_ascii_uppercase().as_str() {
            "SELECT" => self.parse_select(),
            "INSERT" => self.parse_insert(),
            "UPDATE" => self.parse_update(),
            "DELETE" => self.parse_delete(),
            "CREATE" => self.parse_create(),
            "GRANT" => self.parse_grant(false),
            "REVOKE" => self.parse_grant(true),
            other => Err(AstralError::unexpected(
                other,
                token.offset,
                "statement keyword",
            )),
        }
    }

    // ── Token helpers ───────────────────────────────────────────────────

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn last_offset(&self) -> usize {
        self.tokens.last().map_or(0, |t| t.offset + t.text.len())
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        match self.peek() {
            Some(t) if t.is_keyword(keyword) => {
                self.advance();
                Ok(())
            }
            Some(t) => Err(AstralError::missing_keyword(keyword, t.offset)),
            None => Err(AstralError::missing_keyword(keyword, self.last_offset())),
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<()> {
        match self.peek() {
            Some(t) if t.is_punct(punct) => {
                self.advance();
                Ok(())
            }
            Some(t) => Err(AstralError::unexpected(&t.text, t.offset, format!("'{punct}'"))),
            None => Err(AstralError::eof(format!("expected '{punct}'"))),
        }
    }

    fn take_name(&mut self, what: &str) -> Result<String> {
        match self.peek() {
            Some(t) if t.kind == TokenKind::Identifier => {
                let name = t.text.clone();
                self.advance();
                Ok(name)
            }
            Some(t) => Err(AstralError::unexpected(&t.text, t.offset, what)),
            None => Err(AstralError::eof(format!("expected {what}"))),
        }
    }

    fn take_value(&mut self, what: &str) -> Result<String> {
        match self.peek() {
            Some(t) if matches!(t.kind, TokenKind::Identifier | TokenKind::Literal) => {
                let value = t.text.clone();
                self.advance();
                Ok(value)
            }
            Some(t) => Err(AstralError::unexpected(&t.text, t.offset, what)),
            None => Err(AstralError::eof(format!("expected {what}"))),
        }
    }

    /// Skip to the next statement-start keyword after an error.
    fn recover(&mut self) {
        self.advance();
        while let Some(token) = self.peek() {
            if token.kind == TokenKind::Keyword && is_statement_start(&token.text) {
                break;
            }
            self.advance();
        }
    }

    // ── Statements ──────────────────────────────────────────────────────

    fn parse_create(&mut self) -> Result<Statement> {
        self.advance(); // CREATE
        self.expect_keyword("TABLE")?;
        let table = self.take_name("table name")?;
        self.expect_punct("(")?;
        let mut columns: Vec<ColumnDef> = Vec::new();
        loop {
            if self.peek().is_some_and(|t| t.is_punct(")")) {
                self.advance();
                break;
            }
            let name = self.take_name("column name")?;
            if columns.iter().any(|c| c.name == name) {
                return Err(AstralError::DuplicateColumn { name });
            }
            let type_name = self.take_name("column type")?;
            let mut constraints = Vec::new();
            while let Some(token) = self.peek() {
                if token.kind != TokenKind::Keyword {
                    break;
                }
                match token.text.to_ascii_uppercase().as_str() {
                    "PRIMARY" => {
                        self.advance();
                        self.expect_keyword("KEY")?;
                        constraints.push(Constraint::PrimaryKey);
                    }
                    "NOT" => {
                        self.advance();
                        self.expect_keyword("NULL")?;
                        constraints.push(Constraint::NotNull);
                    }
                    "UNIQUE" => {
                        self.advance();
                        constraints.push(Constraint::Unique);
                    }
                    "AUTO_INCREMENT" => {
                        self.advance();
                        constraints.push(Constraint::AutoIncrement);
                    }
                    _ => break,
                }
            }
            columns.push(ColumnDef {
                name,
                type_name,
                constraints,
            });
            if self.peek().is_some_and(|t| t.is_punct(",")) {
                self.advance();
            } else if self.peek().is_some_and(|t| t.is_punct(")")) {
                self.advance();
                break;
            } else {
                let (text, offset) = self
                    .peek()
                    .map_or(("end of input".to_owned(), self.last_offset()), |t| {
                        (t.text.clone(), t.offset)
                    });
                return Err(AstralError::unexpected(text, offset, "',' or ')'"));
            }
        }
        Ok(Statement::CreateTable { table, columns })
    }

    fn parse_select(&mut self) -> Result<Statement> {
        self.advance(); // SELECT
        let mut columns = Vec::new();
        loop {
            match self.peek() {
                Some(t) if t.is_keyword("FROM") => break,
                Some(t) if t.is_punct(",") => {
                    self.advance();
                }
                Some(t) if t.is_punct("*") => {
                    columns.push("*".to_owned());
                    self.advance();
                }
                Some(t) if matches!(t.kind, TokenKind::Identifier | TokenKind::Literal) => {
                    columns.push(t.text.clone());
                    self.advance();
                }
                Some(t) => {
                    return Err(AstralError::unexpected(&t.text, t.offset, "column name"))
                }
                None => return Err(AstralError::missing_keyword("FROM", self.last_offset())),
            }
        }
        self.expect_keyword("FROM")?;
        let table = self.take_name("table name")?;
        Ok(Statement::Select { columns, table })
    }

    fn parse_insert(&mut self) -> Result<Statement> {
        self.advance(); // INSERT
        self.expect_keyword("INTO")?;
        let table = self.take_name("table name")?;
        self.expect_punct("(")?;
        let columns = self.parse_paren_list("column name", Self::take_name)?;
        self.expect_keyword("VALUES")?;
        self.expect_punct("(")?;
        let values = self.parse_paren_list("value", Self::take_value)?;
        Ok(Statement::Insert {
            table,
            columns,
            values,
        })
    }

    /// Comma-separated items up to the closing parenthesis (already past
    /// the opening one).
    fn parse_paren_list(
        &mut self,
        what: &str,
        take: fn(&mut Self, &str) -> Result<String>,
    ) -> Result<Vec<String>> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(t) if t.is_punct(")") => {
                    self.advance();
                    return Ok(items);
                }
                Some(t) if t.is_punct(",") => {
                    self.advance();
                }
                Some(_) => items.push(take(self, what)?),
                None => return Err(AstralError::eof(format!("expected {what} or ')'"))),
            }
        }
    }

    fn parse_update(&mut self) -> Result<Statement> {
        self.advance(); // UPDATE
        let table = self.take_name("table name")?;
        self.expect_keyword("SET")?;
        let mut assignments = Vec::new();
        loop {
            match self.peek() {
                None => break,
                Some(t) if t.is_keyword("WHERE") => break,
                Some(t) if t.is_punct(",") => {
                    self.advance();
                }
                Some(_) => {
                    let column = self.take_name("column name")?;
                    self.expect_punct("=")?;
                    let value = self.take_value("assignment value")?;
                    assignments.push((column, value));
                }
            }
        }
        let predicate = self.parse_where()?;
        Ok(Statement::Update {
            table,
            assignments,
            predicate,
        })
    }

    fn parse_delete(&mut self) -> Result<Statement> {
        self.advance(); // DELETE
        self.expect_keyword("FROM")?;
        let table = self.take_name("table name")?;
        let predicate = self.parse_where()?;
        Ok(Statement::Delete { table, predicate })
    }

    fn parse_grant(&mut self, revoke: bool) -> Result<Statement> {
        self.advance(); // GRANT or REVOKE
        let mut perms = Permissions::empty();
        loop {
            match self.peek() {
                Some(t) if t.kind == TokenKind::Keyword => {
                    let Some(bits) = Permissions::from_keyword(&t.text) else {
                        break;
                    };
                    perms |= bits;
                    self.advance();
                }
                Some(t) if t.is_punct(",") => {
                    self.advance();
                }
                _ => break,
            }
        }
        if perms.is_empty() {
            let (text, offset) = self
                .peek()
                .map_or(("end of input".to_owned(), self.last_offset()), |t| {
                    (t.text.clone(), t.offset)
                });
            return Err(AstralError::unexpected(text, offset, "permission name"));
        }
        // Optional ON <table>; absence means a global grant.
        let table = if self.peek().is_some_and(|t| t.is_keyword("ON")) {
            self.advance();
            self.take_name("table name")?
        } else {
            String::new()
        };
        // GRANT ... TO user; REVOKE ... FROM user (TO is accepted too).
        match self.peek() {
            Some(t) if t.is_keyword("TO") || t.is_keyword("FROM") => {
                self.advance();
            }
            Some(t) => {
                return Err(AstralError::missing_keyword(
                    if revoke { "FROM" } else { "TO" },
                    t.offset,
                ))
            }
            None => {
                return Err(AstralError::missing_keyword(
                    if revoke { "FROM" } else { "TO" },
                    self.last_offset(),
                ))
            }
        }
        let user = self.take_name("user name")?;
        Ok(if revoke {
            Statement::Revoke { user, perms, table }
        } else {
            Statement::Grant { user, perms, table }
        })
    }

    fn parse_where(&mut self) -> Result<Option<Expr>> {
        if self.peek().is_some_and(|t| t.is_keyword("WHERE")) {
            self.advance();
            Ok(Some(self.parse_expression()?))
        } else {
            Ok(None)
        }
    }

    // ── Expressions ─────────────────────────────────────────────────────

    /// Parse an expression with precedence climbing.
    pub fn parse_expression(&mut self) -> Result<Expr> {
        let lhs = self.parse_primary()?;
        self.parse_binary_rhs(0, lhs)
    }

    fn peek_binop(&self) -> Option<BinOp> {
        let token = self.peek()?;
        match token.kind {
            TokenKind::Punctuation => BinOp::from_token(&token.text),
            TokenKind::Keyword => BinOp::from_token(&token.text.to_ascii_uppercase()),
            _ => None,
        }
    }

    fn parse_binary_rhs(&mut self, min_prec: u8, mut lhs: Expr) -> Result<Expr> {
        loop {
            let Some(op) = self.peek_binop() else { break };
            if op.precedence() < min_prec {
                break;
            }
            self.advance();
            let mut rhs = self.parse_primary()?;
            while let Some(next) = self.peek_binop() {
                if next.precedence() > op.precedence() {
                    rhs = self.parse_binary_rhs(op.precedence() + 1, rhs)?;
                } else {
                    break;
                }
            }
            lhs = Expr::BinaryOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(t) if t.is_punct("(") => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Some(t) if matches!(t.kind, TokenKind::Identifier | TokenKind::Literal) => {
                let value = t.text.clone();
                self.advance();
                Ok(Expr::Literal(value))
            }
            Some(t) => Err(AstralError::unexpected(&t.text, t.offset, "expression")),
            None => Err(AstralError::eof("expected expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(sql: &str) -> Vec<Statement> {
        let (stmts, errs) = parse(sql);
        assert!(errs.is_empty(), "unexpected errors: {errs:?}");
        stmts
    }

    fn parse_one(sql: &str) -> Statement {
        let stmts = parse_ok(sql);
        assert_eq!(stmts.len(), 1, "expected 1 statement, got {}", stmts.len());
        stmts.into_iter().next().unwrap()
    }

    #[test]
    fn create_table_with_constraints() {
        let stmt = parse_one("CREATE TABLE t (id INT PRIMARY KEY, v TEXT)");
        let Statement::CreateTable { table, columns } = stmt else {
            unreachable!("expected CreateTable");
        };
        assert_eq!(table, "t");
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].name, "id");
        assert_eq!(columns[0].type_name, "INT");
        assert!(columns[0].has(Constraint::PrimaryKey));
        assert_eq!(columns[1].name, "v");
        assert!(columns[1].constraints.is_empty());
    }

    #[test]
    fn create_table_full_constraint_set() {
        let stmt =
            parse_one("CREATE TABLE t (id INT PRIMARY KEY AUTO_INCREMENT, v TEXT NOT NULL UNIQUE)");
        let Statement::CreateTable { columns, .. } = stmt else {
            unreachable!("expected CreateTable");
        };
        assert!(columns[0].has(Constraint::AutoIncrement));
        assert!(columns[1].has(Constraint::NotNull));
        assert!(columns[1].has(Constraint::Unique));
    }

    #[test]
    fn duplicate_column_rejected() {
        let (_, errs) = parse("CREATE TABLE t (id INT, id TEXT)");
        assert!(matches!(errs[0], AstralError::DuplicateColumn { .. }));
    }

    #[test]
    fn select_columns() {
        let stmt = parse_one("SELECT id,v FROM t");
        assert_eq!(
            stmt,
            Statement::Select {
                columns: vec!["id".to_owned(), "v".to_owned()],
                table: "t".to_owned(),
            }
        );
    }

    #[test]
    fn select_star() {
        let stmt = parse_one("SELECT * FROM t");
        assert_eq!(
            stmt,
            Statement::Select {
                columns: vec!["*".to_owned()],
                table: "t".to_owned(),
            }
        );
    }

    #[test]
    fn insert_columns_and_values() {
        let stmt = parse_one("INSERT INTO t (id,v) VALUES (1,a)");
        assert_eq!(
            stmt,
            Statement::Insert {
                table: "t".to_owned(),
                columns: vec!["id".to_owned(), "v".to_owned()],
                values: vec!["1".to_owned(), "a".to_owned()],
            }
        );
    }

    #[test]
    fn insert_quoted_values() {
        let stmt = parse_one("INSERT INTO t (v) VALUES ('hello')");
        let Statement::Insert { values, .. } = stmt else {
            unreachable!("expected Insert");
        };
        assert_eq!(values, vec!["hello".to_owned()]);
    }

    #[test]
    fn update_with_where() {
        let stmt = parse_one("UPDATE t SET v=z WHERE id=1");
        let Statement::Update {
            table,
            assignments,
            predicate,
        } = stmt
        else {
            unreachable!("expected Update");
        };
        assert_eq!(table, "t");
        assert_eq!(assignments, vec![("v".to_owned(), "z".to_owned())]);
        let Some(Expr::BinaryOp { op, lhs, rhs }) = predicate else {
            unreachable!("expected predicate");
        };
        assert_eq!(op, BinOp::Eq);
        assert_eq!(*lhs, Expr::Literal("id".to_owned()));
        assert_eq!(*rhs, Expr::Literal("1".to_owned()));
    }

    #[test]
    fn update_multiple_assignments() {
        let stmt = parse_one("UPDATE t SET a=1, b=2");
        let Statement::Update {
            assignments,
            predicate,
            ..
        } = stmt
        else {
            unreachable!("expected Update");
        };
        assert_eq!(assignments.len(), 2);
        assert!(predicate.is_none());
    }

    #[test]
    fn delete_with_where() {
        let stmt = parse_one("DELETE FROM t WHERE id=2");
        assert!(matches!(stmt, Statement::Delete { predicate: Some(_), .. }));
    }

    #[test]
    fn precedence_or_binds_loosest() {
        let stmt = parse_one("DELETE FROM t WHERE a=1 AND b=2 OR c=3");
        let Statement::Delete {
            predicate: Some(Expr::BinaryOp { op, .. }),
            ..
        } = stmt
        else {
            unreachable!("expected predicate");
        };
        assert_eq!(op, BinOp::Or);
    }

    #[test]
    fn precedence_arithmetic_over_comparison() {
        let stmt = parse_one("DELETE FROM t WHERE a < b + 1");
        let Statement::Delete {
            predicate: Some(Expr::BinaryOp { op, rhs, .. }),
            ..
        } = stmt
        else {
            unreachable!("expected predicate");
        };
        assert_eq!(op, BinOp::Lt);
        assert!(matches!(*rhs, Expr::BinaryOp { op: BinOp::Add, .. }));
    }

    #[test]
    fn parentheses_override_precedence() {
        let stmt = parse_one("DELETE FROM t WHERE (a OR b) AND c");
        let Statement::Delete {
            predicate: Some(Expr::BinaryOp { op, lhs, .. }),
            ..
        } = stmt
        else {
            unreachable!("expected predicate");
        };
        assert_eq!(op, BinOp::And);
        assert!(matches!(*lhs, Expr::BinaryOp { op: BinOp::Or, .. }));
    }

    #[test]
    fn grant_on_table() {
        let stmt = parse_one("GRANT SELECT ON t TO alice");
        assert_eq!(
            stmt,
            Statement::Grant {
                user: "alice".to_owned(),
                perms: Permissions::SELECT,
                table: "t".to_owned(),
            }
        );
    }

    #[test]
    fn grant_multiple_and_global() {
        let stmt = parse_one("GRANT SELECT, INSERT TO bob");
        let Statement::Grant { perms, table, .. } = stmt else {
            unreachable!("expected Grant");
        };
        assert_eq!(perms, Permissions::SELECT | Permissions::INSERT);
        assert_eq!(table, "");
    }

    #[test]
    fn revoke_from_user() {
        let stmt = parse_one("REVOKE ALL ON t FROM alice");
        let Statement::Revoke { perms, .. } = stmt else {
            unreachable!("expected Revoke");
        };
        assert_eq!(perms, Permissions::ALL);
    }

    #[test]
    fn multiple_statements_with_semicolons() {
        let stmts = parse_ok("CREATE TABLE t (id INT); INSERT INTO t (id) VALUES (1); SELECT id FROM t");
        assert_eq!(stmts.len(), 3);
    }

    #[test]
    fn recovery_skips_to_next_statement() {
        let (stmts, errs) = parse("SELECT FROM; SELECT id FROM t");
        assert_eq!(errs.len(), 1);
        assert_eq!(stmts.len(), 1);
        assert!(matches!(stmts[0], Statement::Select { .. }));
    }

    #[test]
    fn recovery_after_bad_create() {
        let (stmts, errs) = parse("CREATE TABLE (id INT) DELETE FROM t");
        assert_eq!(errs.len(), 1);
        assert_eq!(stmts.len(), 1);
        assert!(matches!(stmts[0], Statement::Delete { .. }));
    }

    #[test]
    fn unknown_statement_keyword() {
        let (stmts, errs) = parse("WHERE id=1");
        assert!(stmts.is_empty());
        assert!(matches!(errs[0], AstralError::UnexpectedToken { .. }));
    }

    #[test]
    fn empty_input_is_empty() {
        let (stmts, errs) = parse("   ");
        assert!(stmts.is_empty());
        assert!(errs.is_empty());
    }
}
