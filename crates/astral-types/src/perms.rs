//! Permission bitset for the access-control layer.

use bitflags::bitflags;

bitflags! {
    /// Permission bits carried by ACL entries.
    ///
    /// Grants are combined with bitwise OR, revocations with AND-NOT. A
    /// check passes when the requested bits are a subset of the entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Permissions: u32 {
        const SELECT = 1;
        const INSERT = 2;
        const UPDATE = 4;
        const DELETE = 8;
        const TRUNCATE = 16;
        const REFERENCES = 32;
        const TRIGGER = 64;
        const ALL = 127;
    }
}

impl Permissions {
    /// Parse a single SQL permission keyword (case-insensitive).
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "SELECT" => Some(Self::SELECT),
            "INSERT" => Some(Self::INSERT),
            "UPDATE" => Some(Self::UPDATE),
            "DELETE" => Some(Self::DELETE),
            "TRUNCATE" => Some(Self::TRUNCATE),
            "REFERENCES" => Some(Self::REFERENCES),
            "TRIGGER" => Some(Self::TRIGGER),
            "ALL" => Some(Self::ALL),
            _ => None,
        }
    }

    /// Render as the SQL keyword list used in error messages and
    /// disassembly, e.g. `SELECT|INSERT`.
    pub fn keyword_list(self) -> String {
        if self == Self::ALL {
            return "ALL".to_owned();
        }
        let mut parts = Vec::new();
        for (name, bit) in [
            ("SELECT", Self::SELECT),
            ("INSERT", Self::INSERT),
            ("UPDATE", Self::UPDATE),
            ("DELETE", Self::DELETE),
            ("TRUNCATE", Self::TRUNCATE),
            ("REFERENCES", Self::REFERENCES),
            ("TRIGGER", Self::TRIGGER),
        ] {
            if self.contains(bit) {
                parts.push(name);
            }
        }
        parts.join("|")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_union_of_bits() {
        let union = Permissions::SELECT
            | Permissions::INSERT
            | Permissions::UPDATE
            | Permissions::DELETE
            | Permissions::TRUNCATE
            | Permissions::REFERENCES
            | Permissions::TRIGGER;
        assert_eq!(union, Permissions::ALL);
        assert_eq!(Permissions::ALL.bits(), 127);
    }

    #[test]
    fn keyword_round_trip() {
        for kw in ["SELECT", "INSERT", "UPDATE", "DELETE", "TRUNCATE", "REFERENCES", "TRIGGER", "ALL"] {
            let p = Permissions::from_keyword(kw).unwrap();
            assert_eq!(p.keyword_list(), kw);
        }
        assert!(Permissions::from_keyword("GRANT").is_none());
    }

    #[test]
    fn keyword_list_joins() {
        let p = Permissions::SELECT | Permissions::DELETE;
        assert_eq!(p.keyword_list(), "SELECT|DELETE");
    }
}
