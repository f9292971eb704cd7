//! `BigEncoder` (spec.md §9 Design Notes): isolates the one place the raw
//! store's big-integer and status-blob encoding differs between the
//! sqlite-class and postgres-class backends, so no other call site
//! branches on `database.kind`.

use serde_json::Value;

/// Width wide enough for `u64::MAX` (20 decimal digits) plus headroom.
const SQLITE_BIG_INT_WIDTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BigEncoder {
    /// Fixed-width zero-padded decimal strings, so lexicographic order
    /// equals numeric order in a backend with no native 64/256-bit int.
    Sqlite,
    /// Native `NUMERIC`/`BIGINT` columns; no string encoding needed.
    Postgres,
}

impl BigEncoder {
    pub fn from_database_kind(kind: &str) -> Self {
        match kind {
            "postgres" => BigEncoder::Postgres,
            _ => BigEncoder::Sqlite,
        }
    }

    /// Encodes a `u64` the way this backend wants it stored in a TEXT/NUMERIC
    /// column used for ordering (block numbers, chain ids, checkpoints
    /// already come pre-encoded from `checkpoint::Checkpoint::encode`).
    pub fn encode_u64(&self, value: u64) -> String {
        match self {
            BigEncoder::Sqlite => format!("{value:0width$}", width = SQLITE_BIG_INT_WIDTH),
            BigEncoder::Postgres => value.to_string(),
        }
    }

    pub fn decode_u64(&self, encoded: &str) -> Result<u64, std::num::ParseIntError> {
        encoded.parse()
    }

    /// The metadata status blob (spec.md §4.8): JSON text on sqlite-class
    /// backends, native `jsonb` on postgres-class ones. Both round-trip
    /// through `serde_json::Value`; only the wire representation differs.
    pub fn encode_status(&self, status: &Value) -> String {
        match self {
            BigEncoder::Sqlite => status.to_string(),
            BigEncoder::Postgres => status.to_string(),
        }
    }

    pub fn sql_column_type(&self, column: BigColumn) -> &'static str {
        match (self, column) {
            (BigEncoder::Sqlite, BigColumn::BlockNumber) => "TEXT",
            (BigEncoder::Postgres, BigColumn::BlockNumber) => "NUMERIC",
            // The `_meta.value` column stores pre-serialized JSON text on
            // both backends: the status snapshot and the resume checkpoint
            // are bound as plain string parameters (`BigEncoder::encode_status`,
            // `Checkpoint::encode`), so the column itself stays TEXT rather
            // than `JSONB` even on the postgres-class encoding — binding a
            // `String` against a `jsonb` column is rejected by tokio-postgres's
            // parameter type check.
            (_, BigColumn::StatusBlob) => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BigColumn {
    BlockNumber,
    StatusBlob,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_encoding_preserves_lexicographic_order() {
        let encoder = BigEncoder::Sqlite;
        let small = encoder.encode_u64(9);
        let big = encoder.encode_u64(10);
        assert!(small < big, "zero-padding must make 9 < 10 lexicographically");
    }

    #[test]
    fn postgres_encoding_round_trips() {
        let encoder = BigEncoder::Postgres;
        let encoded = encoder.encode_u64(123_456_789);
        assert_eq!(encoder.decode_u64(&encoded).unwrap(), 123_456_789);
    }

    #[test]
    fn sqlite_encoding_round_trips() {
        let encoder = BigEncoder::Sqlite;
        let encoded = encoder.encode_u64(42);
        assert_eq!(encoder.decode_u64(&encoded).unwrap(), 42);
    }

    #[test]
    fn from_database_kind_selects_correct_variant() {
        assert_eq!(BigEncoder::from_database_kind("postgres"), BigEncoder::Postgres);
        assert_eq!(BigEncoder::from_database_kind("sqlite"), BigEncoder::Sqlite);
    }
}
