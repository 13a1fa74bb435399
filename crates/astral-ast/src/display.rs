//! Display implementations used by the CLI's AST dump (`--query`).

use std::fmt;

use crate::{ColumnDef, Expr, Statement};

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => write!(f, "{v}"),
            Self::TableRef(t) => write!(f, "{t}"),
            Self::BinaryOp { op, lhs, rhs } => {
                write!(f, "({lhs} {} {rhs})", op.symbol())
            }
        }
    }
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.type_name)?;
        for c in &self.constraints {
            write!(f, " {}", c.keyword())?;
        }
        Ok(())
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable { table, columns } => {
                write!(f, "CREATE TABLE {table} (")?;
                for (i, col) in columns.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{col}")?;
                }
                write!(f, ")")
            }
            Self::Select { columns, table } => {
                write!(f, "SELECT {} FROM {table}", columns.join(","))
            }
            Self::Insert {
                table,
                columns,
                values,
            } => write!(
                f,
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(","),
                values.join(",")
            ),
            Self::Update {
                table,
                assignments,
                predicate,
            } => {
                write!(f, "UPDATE {table} SET ")?;
                for (i, (col, val)) in assignments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{col}={val}")?;
                }
                if let Some(p) = predicate {
                    write!(f, " WHERE {p}")?;
                }
                Ok(())
            }
            Self::Delete { table, predicate } => {
                write!(f, "DELETE FROM {table}")?;
                if let Some(p) = predicate {
                    write!(f, " WHERE {p}")?;
                }
                Ok(())
            }
            Self::Grant { user, perms, table } => {
                write!(f, "GRANT {}", perms.keyword_list())?;
                if !table.is_empty() {
                    write!(f, " ON {table}")?;
                }
                write!(f, " TO {user}")
            }
            Self::Revoke { user, perms, table } => {
                write!(f, "REVOKE {}", perms.keyword_list())?;
                if !table.is_empty() {
                    write!(f, " ON {table}")?;
                }
                write!(f, " FROM {user}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{BinOp, Expr, Statement};

    #[test]
    fn expression_display_nests() {
        let expr = Expr::BinaryOp {
            op: BinOp::And,
            lhs: Box::new(Expr::BinaryOp {
                op: BinOp::Eq,
                lhs: Box::new(Expr::Literal("id".to_owned())),
                rhs: Box::new(Expr::Literal("1".to_owned())),
            }),
            rhs: Box::new(Expr::Literal("1".to_owned())),
        };
        assert_eq!(expr.to_string(), "((id = 1) AND 1)");
    }

    #[test]
    fn statement_display() {
        let stmt = Statement::Delete {
            table: "t".to_owned(),
            predicate: Some(Expr::BinaryOp {
                op: BinOp::Eq,
                lhs: Box::new(Expr::Literal("id".to_owned())),
                rhs: Box::new(Expr::Literal("2".to_owned())),
            }),
        };
        assert_eq!(stmt.to_string(), "DELETE FROM t WHERE (id = 2)");
    }
}
