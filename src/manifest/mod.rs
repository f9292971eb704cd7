//! Configuration (spec.md §6 "Configuration"): a YAML manifest mirroring
//! the teacher's own config surface, narrowed to what the sync engine
//! itself consumes (no GraphQL/ABI/codegen sections — those belong to the
//! excluded outer layers).

pub mod contract;
pub mod core;
pub mod database;
pub mod network;

pub use contract::{Contract, ContractSource, EventDeclaration};
pub use core::{Manifest, Options};
pub use database::Database;
pub use network::Network;

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
    #[error("failed to parse manifest YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Loads a manifest from disk, interpolating `${ENV_VAR}` references against
/// the process environment (populated from `.env` via `dotenv`, matching
/// the teacher's manifest loader).
pub fn load_manifest(path: impl AsRef<Path>) -> Result<Manifest, ManifestError> {
    dotenv::dotenv().ok();

    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|source| ManifestError::Read { path: path.display().to_string(), source })?;
    let interpolated = interpolate_env(&raw);
    let manifest: Manifest = serde_yaml::from_str(&interpolated)?;
    Ok(manifest)
}

/// Replaces every `${VAR}` occurrence with the value of the `VAR`
/// environment variable, leaving the placeholder untouched if unset (the
/// YAML parse will then fail loudly rather than silently installing the
/// literal placeholder into e.g. a connection string).
fn interpolate_env(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var_name = &after[..end];
                match std::env::var(var_name) {
                    Ok(value) => output.push_str(&value),
                    Err(_) => {
                        output.push_str("${");
                        output.push_str(var_name);
                        output.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                output.push_str("${");
                rest = after;
            }
        }
    }
    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_known_env_var() {
        std::env::set_var("CHAINWEAVE_TEST_VAR", "resolved");
        assert_eq!(interpolate_env("prefix-${CHAINWEAVE_TEST_VAR}-suffix"), "prefix-resolved-suffix");
        std::env::remove_var("CHAINWEAVE_TEST_VAR");
    }

    #[test]
    fn leaves_unknown_env_var_placeholder_untouched() {
        assert_eq!(interpolate_env("${CHAINWEAVE_DEFINITELY_UNSET}"), "${CHAINWEAVE_DEFINITELY_UNSET}");
    }

    #[test]
    fn load_manifest_reads_and_parses_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.yaml");
        std::fs::write(
            &path,
            r#"
name: demo
database:
  kind: postgres
  connection_string: "postgres://localhost/data"
networks:
  - name: mainnet
    chain_id: 1
    rpc: "https://example.invalid"
contracts: []
"#,
        )
        .unwrap();

        let manifest = load_manifest(&path).unwrap();
        assert_eq!(manifest.name, "demo");
        assert_eq!(manifest.networks.len(), 1);
    }
}
