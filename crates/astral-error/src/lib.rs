use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for AstralDB operations.
///
/// Variants are grouped by the stage that produces them: parsing,
/// validation, VM execution, snapshot I/O, and authorization. Validation
/// and auth failures are ordinary values reported to the caller; parse and
/// VM errors abort the current compilation or program; I/O errors are
/// raised only on explicit user requests.
#[derive(Error, Debug)]
pub enum AstralError {
    // === Parse errors ===
    /// String literal without a closing quote.
    #[error("unterminated string literal at offset {offset}")]
    UnterminatedString { offset: usize },

    /// Token that does not fit the grammar at this position.
    #[error("unexpected token '{token}' at offset {offset}: {expected}")]
    UnexpectedToken {
        token: String,
        offset: usize,
        expected: String,
    },

    /// A required keyword was absent.
    #[error("expected keyword {keyword} at offset {offset}")]
    MissingKeyword { keyword: String, offset: usize },

    /// The same column name appeared twice in a definition list.
    #[error("duplicate column: {name}")]
    DuplicateColumn { name: String },

    /// Input ended in the middle of a statement.
    #[error("unexpected end of input: {detail}")]
    UnexpectedEof { detail: String },

    // === Validation errors ===
    /// Referenced table is not registered.
    #[error("no such table: {name}")]
    NoSuchTable { name: String },

    /// Table name is already registered.
    #[error("table {name} already exists")]
    AlreadyExists { name: String },

    /// NOT NULL column missing from a row.
    #[error("NOT NULL constraint failed: {column}")]
    NotNullViolation { column: String },

    /// UNIQUE column value already indexed.
    #[error("UNIQUE constraint failed: {column}")]
    UniqueViolation { column: String },

    /// Column not present in the table schema.
    #[error("no such column: {name}")]
    BadColumn { name: String },

    /// Inserted value not present in the referenced column.
    #[error("FOREIGN KEY constraint failed: {table}.{column}")]
    ForeignKeyViolation { table: String, column: String },

    // === VM errors ===
    /// Pop from an empty operand stack (POP itself is exempt).
    #[error("stack underflow in {opcode}")]
    StackUnderflow { opcode: String },

    /// Division or modulo by zero.
    #[error("division by zero")]
    DivByZero,

    /// Jump or call target outside the program.
    #[error("jump target {target} out of range (program has {len} instructions)")]
    JumpOutOfRange { target: i64, len: usize },

    /// Operand had the wrong type or was missing.
    #[error("bad operand for {opcode}: {detail}")]
    BadOperandType { opcode: String, detail: String },

    /// Opcode name not recognized when decoding serialized bytecode.
    #[error("unknown opcode: {name}")]
    UnknownOpcode { name: String },

    /// Register index outside [0, 15].
    #[error("register {index} out of range")]
    RegisterOutOfRange { index: i64 },

    // === I/O errors ===
    /// Snapshot or query file could not be opened.
    #[error("failed to open file: '{path}'")]
    FileOpen { path: PathBuf },

    /// Snapshot payload ended before the declared structure.
    #[error("snapshot truncated: {detail}")]
    Truncated { detail: String },

    /// Encrypted frame shorter than its nonce.
    #[error("snapshot decryption failed: {detail}")]
    DecryptFailure { detail: String },

    /// Compressed stream malformed.
    #[error("snapshot decompression failed: {detail}")]
    DecompressFailure { detail: String },

    /// Underlying file I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Auth errors ===
    /// Unknown user or wrong password.
    #[error("authentication failed for user {user}")]
    AuthFailed { user: String },

    /// Session user lacks the required permission bits.
    #[error("permission denied: {user} lacks {needed} on '{table}'")]
    PermissionDenied {
        user: String,
        needed: String,
        table: String,
    },
}

impl AstralError {
    /// Create an unexpected-token error.
    pub fn unexpected(token: impl Into<String>, offset: usize, expected: impl Into<String>) -> Self {
        Self::UnexpectedToken {
            token: token.into(),
            offset,
            expected: expected.into(),
        }
    }

    /// Create a missing-keyword error.
    pub fn missing_keyword(keyword: impl Into<String>, offset: usize) -> Self {
        Self::MissingKeyword {
            keyword: keyword.into(),
            offset,
        }
    }

    /// Create an unexpected-EOF error.
    pub fn eof(detail: impl Into<String>) -> Self {
        Self::UnexpectedEof {
            detail: detail.into(),
        }
    }

    /// Create a bad-operand error.
    pub fn bad_operand(opcode: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::BadOperandType {
            opcode: opcode.into(),
            detail: detail.into(),
        }
    }

    /// Whether this error came from the parser.
    pub const fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::UnterminatedString { .. }
                | Self::UnexpectedToken { .. }
                | Self::MissingKeyword { .. }
                | Self::DuplicateColumn { .. }
                | Self::UnexpectedEof { .. }
        )
    }

    /// Whether this error reports a constraint or catalog violation
    /// (state was not mutated).
    pub const fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::NoSuchTable { .. }
                | Self::AlreadyExists { .. }
                | Self::NotNullViolation { .. }
                | Self::UniqueViolation { .. }
                | Self::BadColumn { .. }
                | Self::ForeignKeyViolation { .. }
        )
    }

    /// Process exit code for CLI use: zero is reserved for success, every
    /// error maps to a nonzero code.
    pub const fn exit_code(&self) -> i32 {
        1
    }
}

/// Result type alias using `AstralError`.
pub type Result<T> = std::result::Result<T, AstralError>;
