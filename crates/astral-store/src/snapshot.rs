//! Snapshot text grammar and the serialize → compress → encrypt pipeline.
//!
//! The textual form is a line-oriented, whitespace-delimited tree:
//!
//! ```text
//! <schema_count>
//!   <table_name>
//!   <column_count>
//!   <col_name> <is_pk> <is_unique> <is_not_null> [<default>]
//! <table_count>
//!   <table_name>
//!   <row_count>
//!   <cell_count>
//!   <column_name>
//!   <column_value>
//! ```
//!
//! Identifiers and values may not contain whitespace; an empty column
//! default is representable because the column line simply ends after the
//! flag fields. The snapshot covers schemas and row tables only — indexes,
//! ACLs, and users are in-memory state.

use std::collections::HashMap;

use astral_error::{AstralError, Result};
use astral_types::{Column, Row, Schema};

/// The in-memory state a snapshot carries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotState {
    pub schemas: HashMap<String, Schema>,
    pub tables: HashMap<String, Vec<Row>>,
}

fn flag(b: bool) -> char {
    if b {
        '1'
    } else {
        '0'
    }
}

/// Serialize state to the textual snapshot form.
pub fn serialize(state: &SnapshotState) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    let _ = writeln!(out, "{}", state.schemas.len());
    for (table, schema) in &state.schemas {
        let _ = writeln!(out, "{table}");
        let _ = writeln!(out, "{}", schema.len());
        for col in schema {
            let _ = write!(
                out,
                "{} {} {} {}",
                col.name,
                flag(col.primary_key),
                flag(col.unique),
                flag(col.not_null)
            );
            if col.default.is_empty() {
                out.push('\n');
            } else {
                let _ = writeln!(out, " {}", col.default);
            }
        }
    }
    let _ = writeln!(out, "{}", state.tables.len());
    for (table, rows) in &state.tables {
        let _ = writeln!(out, "{table}");
        let _ = writeln!(out, "{}", rows.len());
        for row in rows {
            let _ = writeln!(out, "{}", row.len());
            for (column, value) in row {
                let _ = writeln!(out, "{column}");
                let _ = writeln!(out, "{value}");
            }
        }
    }
    out
}

struct LineReader<'a> {
    lines: std::str::Lines<'a>,
}

impl<'a> LineReader<'a> {
    fn next(&mut self, what: &str) -> Result<&'a str> {
        self.lines.next().ok_or_else(|| AstralError::Truncated {
            detail: format!("missing {what}"),
        })
    }

    fn next_count(&mut self, what: &str) -> Result<usize> {
        let line = self.next(what)?;
        line.trim().parse().map_err(|_| AstralError::Truncated {
            detail: format!("bad {what}: {line:?}"),
        })
    }
}

fn parse_flag(token: &str, what: &str) -> Result<bool> {
    match token {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(AstralError::Truncated {
            detail: format!("bad {what} flag: {other:?}"),
        }),
    }
}

/// Parse the textual snapshot form back into state.
pub fn parse(text: &str) -> Result<SnapshotState> {
    let mut reader = LineReader {
        lines: text.lines(),
    };
    let mut state = SnapshotState::default();

    let schema_count = reader.next_count("schema count")?;
    for _ in 0..schema_count {
        let table = reader.next("schema table name")?.to_owned();
        let column_count = reader.next_count("column count")?;
        let mut schema = Schema::with_capacity(column_count);
        for _ in 0..column_count {
            let line = reader.next("column descriptor")?;
            let mut fields = line.split_ascii_whitespace();
            let name = fields
                .next()
                .ok_or_else(|| AstralError::Truncated {
                    detail: "empty column descriptor".to_owned(),
                })?
                .to_owned();
            let primary_key = parse_flag(
                fields.next().ok_or_else(|| AstralError::Truncated {
                    detail: format!("column {name}: missing primary-key flag"),
                })?,
                "primary-key",
            )?;
            let unique = parse_flag(
                fields.next().ok_or_else(|| AstralError::Truncated {
                    detail: format!("column {name}: missing unique flag"),
                })?,
                "unique",
            )?;
            let not_null = parse_flag(
                fields.next().ok_or_else(|| AstralError::Truncated {
                    detail: format!("column {name}: missing not-null flag"),
                })?,
                "not-null",
            )?;
            let default = fields.next().unwrap_or("").to_owned();
            schema.push(Column {
                name,
                primary_key,
                unique,
                not_null,
                default,
            });
        }
        state.schemas.insert(table, schema);
    }

    let table_count = reader.next_count("table count")?;
    for _ in 0..table_count {
        let table = reader.next("table name")?.to_owned();
        let row_count = reader.next_count("row count")?;
        let mut rows = Vec::with_capacity(row_count);
        for _ in 0..row_count {
            let cell_count = reader.next_count("cell count")?;
            let mut row = Row::with_capacity(cell_count);
            for _ in 0..cell_count {
                let column = reader.next("cell column")?.to_owned();
                let value = reader.next("cell value")?.to_owned();
                row.insert(column, value);
            }
            rows.push(row);
        }
        state.tables.insert(table, rows);
    }

    Ok(state)
}

/// Serialize, compress, and encrypt state into the on-disk frame under
/// the engine's storage key.
pub fn encode(state: &SnapshotState, key: &[u8; 32]) -> Vec<u8> {
    let text = serialize(state);
    let compressed = astral_codec::compress(text.as_bytes());
    astral_codec::seal_frame(key, &compressed)
}

/// Decrypt, decompress, and parse an on-disk frame back into state.
pub fn decode(frame: &[u8], key: &[u8; 32]) -> Result<SnapshotState> {
    let compressed = astral_codec::open_frame(key, frame)?;
    let text_bytes = astral_codec::decompress(&compressed);
    let text = String::from_utf8(text_bytes).map_err(|e| AstralError::DecompressFailure {
        detail: format!("snapshot is not valid UTF-8: {e}"),
    })?;
    parse(&text)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn sample_state() -> SnapshotState {
        let mut state = SnapshotState::default();
        state.schemas.insert(
            "t".to_owned(),
            vec![
                Column {
                    name: "id".to_owned(),
                    primary_key: true,
                    unique: false,
                    not_null: false,
                    default: String::new(),
                },
                Column {
                    name: "v".to_owned(),
                    primary_key: false,
                    unique: false,
                    not_null: true,
                    default: "none".to_owned(),
                },
            ],
        );
        let mut row = Row::new();
        row.insert("id".to_owned(), "1".to_owned());
        row.insert("v".to_owned(), "a".to_owned());
        state.tables.insert("t".to_owned(), vec![row]);
        state
    }

    #[test]
    fn text_round_trip() {
        let state = sample_state();
        let text = serialize(&state);
        let back = parse(&text).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn empty_default_round_trips() {
        let state = sample_state();
        let text = serialize(&state);
        let back = parse(&text).unwrap();
        let schema = &back.schemas["t"];
        assert_eq!(schema[0].default, "");
        assert_eq!(schema[1].default, "none");
    }

    #[test]
    fn empty_state_round_trips() {
        let state = SnapshotState::default();
        let back = parse(&serialize(&state)).unwrap();
        assert_eq!(back, state);
    }

    const KEY: [u8; 32] = [0x13; 32];

    #[test]
    fn frame_round_trip() {
        let state = sample_state();
        let frame = encode(&state, &KEY);
        assert_eq!(decode(&frame, &KEY).unwrap(), state);
    }

    #[test]
    fn truncated_text_rejected() {
        let state = sample_state();
        let text = serialize(&state);
        let cut = &text[..text.len() / 2];
        assert!(matches!(
            parse(cut),
            Err(AstralError::Truncated { .. })
        ));
    }

    #[test]
    fn bad_counts_rejected() {
        assert!(parse("not_a_number\n").is_err());
        assert!(parse("1\nt\n2\nid 1 0 0\n").is_err()); // second column missing
    }

    #[test]
    fn garbage_frame_rejected() {
        assert!(decode(&[0u8; 5], &KEY).is_err());
    }

    proptest! {
        /// Whole-pipeline round trip over whitespace-free identifiers and
        /// values.
        #[test]
        fn pipeline_round_trip(
            table in "[a-z]{1,8}",
            cols in proptest::collection::vec("[a-z]{1,6}", 1..4),
            vals in proptest::collection::vec("[a-zA-Z0-9]{0,8}", 1..4),
        ) {
            let mut state = SnapshotState::default();
            // Column names must be unique within a schema.
            let mut deduped: Schema = Vec::new();
            for col in cols {
                if !deduped.iter().any(|c: &Column| c.name == col) {
                    deduped.push(Column::plain(col));
                }
            }
            state.schemas.insert(table.clone(), deduped.clone());
            let mut row = Row::new();
            for (col, val) in deduped.iter().zip(vals) {
                row.insert(col.name.clone(), val);
            }
            state.tables.insert(table, vec![row]);
            let back = decode(&encode(&state, &KEY), &KEY).unwrap();
            prop_assert_eq!(back, state);
        }
    }
}
