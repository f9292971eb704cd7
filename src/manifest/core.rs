use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::contract::Contract;
use super::database::Database;
use super::network::Network;

fn default_max_healthcheck_duration_secs() -> u64 {
    240
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Options {
    #[serde(default = "default_max_healthcheck_duration_secs")]
    pub max_healthcheck_duration_secs: u64,
}

impl Default for Options {
    fn default() -> Self {
        Options { max_healthcheck_duration_secs: default_max_healthcheck_duration_secs() }
    }
}

impl Options {
    pub fn max_healthcheck_duration(&self) -> Duration {
        Duration::from_secs(self.max_healthcheck_duration_secs)
    }
}

/// Top-level configuration (spec.md §6 Configuration): everything the
/// supervisor needs to construct networks, contracts, and the raw store,
/// loaded from YAML with `${ENV_VAR}` interpolation via `dotenv`, the way
/// the teacher's manifest loader resolves secrets out of `.env`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,

    pub database: Database,

    pub networks: Vec<Network>,

    pub contracts: Vec<Contract>,

    #[serde(default)]
    pub options: Options,
}

impl Manifest {
    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks.iter().find(|n| n.name == name)
    }

    /// Contracts configured for a given network name.
    pub fn contracts_for_network<'a>(&'a self, network: &'a str) -> impl Iterator<Item = &'a Contract> {
        self.contracts.iter().filter(move |c| c.networks().iter().any(|n| n == network))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_matches_spec_default() {
        assert_eq!(Options::default().max_healthcheck_duration_secs, 240);
    }

    #[test]
    fn contracts_for_network_filters_by_name() {
        let yaml = r#"
name: demo
database:
  kind: postgres
  connection_string: "postgres://localhost/data"
networks:
  - name: mainnet
    chain_id: 1
    rpc: "https://example.invalid"
  - name: base
    chain_id: 8453
    rpc: "https://example.invalid"
contracts:
  - name: OnMainnetOnly
    network: ["mainnet"]
    source: ["0x0000000000000000000000000000000000000001"]
    events:
      - name: Transfer
        topic0: "0x0000000000000000000000000000000000000000000000000000000000000001"
"#;
        let manifest: Manifest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(manifest.contracts_for_network("mainnet").count(), 1);
        assert_eq!(manifest.contracts_for_network("base").count(), 0);
    }
}
