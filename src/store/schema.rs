//! Migration DDL for the raw sync store (spec.md §3, §6 "Persistent state
//! layout"): sync tables plus one fragment/interval table pair per filter
//! fragment kind.

use super::big_encoding::{BigColumn, BigEncoder};

/// Returns the full set of `CREATE TABLE IF NOT EXISTS` statements for the
/// given encoding, executed once via `batch_execute` at store startup
/// (mirroring the teacher's `postgres.rs` migration step).
pub fn migrations(encoder: BigEncoder) -> Vec<String> {
    let block_number = encoder.sql_column_type(BigColumn::BlockNumber);
    let status_blob = encoder.sql_column_type(BigColumn::StatusBlob);

    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS blocks (
                hash TEXT PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                number {block_number} NOT NULL,
                parent_hash TEXT NOT NULL,
                timestamp BIGINT NOT NULL,
                nonce BIGINT NOT NULL
            )"
        ),
        "CREATE TABLE IF NOT EXISTS transactions (
            hash TEXT PRIMARY KEY,
            chain_id BIGINT NOT NULL,
            block_hash TEXT NOT NULL REFERENCES blocks(hash),
            block_number BIGINT NOT NULL,
            transaction_index BIGINT NOT NULL,
            from_address TEXT NOT NULL,
            to_address TEXT,
            value TEXT NOT NULL,
            input BYTEA NOT NULL
        )"
        .to_string(),
        "CREATE TABLE IF NOT EXISTS transaction_receipts (
            transaction_hash TEXT PRIMARY KEY REFERENCES transactions(hash),
            chain_id BIGINT NOT NULL,
            status BOOLEAN NOT NULL,
            gas_used BIGINT NOT NULL,
            cumulative_gas_used BIGINT NOT NULL
        )"
        .to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS logs (
                id TEXT PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                block_hash TEXT NOT NULL REFERENCES blocks(hash),
                block_number {block_number} NOT NULL,
                transaction_hash TEXT NOT NULL REFERENCES transactions(hash),
                transaction_index BIGINT NOT NULL,
                log_index BIGINT NOT NULL,
                address TEXT NOT NULL,
                topic0 TEXT,
                topic1 TEXT,
                topic2 TEXT,
                topic3 TEXT,
                data BYTEA NOT NULL,
                fragment_id TEXT NOT NULL,
                checkpoint TEXT NOT NULL
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS call_traces (
                id TEXT PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                block_number {block_number} NOT NULL,
                transaction_hash TEXT NOT NULL REFERENCES transactions(hash),
                transaction_position BIGINT NOT NULL,
                trace_address TEXT NOT NULL,
                from_address TEXT NOT NULL,
                to_address TEXT,
                input BYTEA NOT NULL,
                output BYTEA NOT NULL,
                value TEXT NOT NULL,
                gas BIGINT NOT NULL,
                gas_used BIGINT NOT NULL,
                subtraces INT NOT NULL,
                call_type TEXT NOT NULL,
                error TEXT,
                fragment_id TEXT NOT NULL,
                checkpoint TEXT NOT NULL
            )"
        ),
        "CREATE TABLE IF NOT EXISTS rpc_request_results (
            request TEXT NOT NULL,
            chain_id BIGINT NOT NULL,
            block_number BIGINT NOT NULL,
            result TEXT NOT NULL,
            PRIMARY KEY (request, chain_id, block_number)
        )"
        .to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS _meta (
                key TEXT PRIMARY KEY,
                value {status_blob} NOT NULL
            )"
        ),
        fragment_table_ddl("log_filter"),
        interval_table_ddl("log_filter", block_number),
        fragment_table_ddl("factory_log_filter"),
        interval_table_ddl("factory_log_filter", block_number),
        fragment_table_ddl("block_filter"),
        interval_table_ddl("block_filter", block_number),
        fragment_table_ddl("trace_filter"),
        interval_table_ddl("trace_filter", block_number),
        fragment_table_ddl("factory_trace_filter"),
        interval_table_ddl("factory_trace_filter", block_number),
    ]
}

fn fragment_table_ddl(kind: &str) -> String {
    format!("CREATE TABLE IF NOT EXISTS {kind} (id TEXT PRIMARY KEY, chain_id BIGINT NOT NULL)")
}

fn interval_table_ddl(kind: &str, block_number_type: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {kind}_intervals (
            fragment_id TEXT NOT NULL REFERENCES {kind}(id),
            start_block {block_number_type} NOT NULL,
            end_block {block_number_type} NOT NULL
        )"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_cover_every_fragment_kind() {
        let statements = migrations(BigEncoder::Postgres);
        for kind in ["log_filter", "factory_log_filter", "block_filter", "trace_filter", "factory_trace_filter"] {
            assert!(statements.iter().any(|s| s.contains(&format!("{kind} ("))));
            assert!(statements.iter().any(|s| s.contains(&format!("{kind}_intervals"))));
        }
    }

    #[test]
    fn sqlite_encoding_uses_text_for_block_number() {
        let statements = migrations(BigEncoder::Sqlite);
        let blocks_ddl = statements.iter().find(|s| s.contains("CREATE TABLE IF NOT EXISTS blocks")).unwrap();
        assert!(blocks_ddl.contains("number TEXT"));
    }
}
