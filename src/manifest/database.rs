use serde::{Deserialize, Serialize};

/// `database.kind` (spec.md §6 Configuration): selects the connection
/// mechanism and the `BigEncoder` strategy (spec.md §9 Design Notes) used
/// for big-integer columns and the metadata status blob.
///
/// Only `postgres` is a backed `RawStore` implementation in this build; see
/// DESIGN.md for the sqlite scope cut.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Database {
    Postgres { connection_string: String },
}

impl Database {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Database::Postgres { .. } => "postgres",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_postgres_variant_from_yaml() {
        let yaml = "kind: postgres\nconnection_string: \"postgres://localhost/db\"\n";
        let db: Database = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(db.kind_name(), "postgres");
    }
}
