//! Storage engine for AstralDB.
//!
//! Schemas, row tables, secondary indexes, foreign-key declarations, ACLs,
//! and users live in memory behind one exclusive lock. Mutations set a
//! dirty flag; a background flusher rewrites the snapshot file (serialize
//! → compress → encrypt) whenever the flag is observed set.

pub mod acl;
pub mod auth;
pub mod engine;
pub mod snapshot;

pub use acl::AccessControl;
pub use astral_index::IndexBackend;
pub use auth::{FineGrainedGrant, SaltState, User};
pub use engine::{Database, EngineConfig};
