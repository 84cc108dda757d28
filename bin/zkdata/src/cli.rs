use std::path::PathBuf;

use clap::Parser;
use strum::IntoEnumIterator;
use tracing::level_filters::LevelFilter;

/// The networks zkdata knows how to reach.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Network {
    /// Rococo contracts parachain.
    #[default]
    Rococo,
    /// A local development node.
    Local,
    Mainnet,
    /// In-process development chain.
    Dev,
}

impl Network {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Network::Rococo => "wss://rococo-contracts-rpc.polkadot.io",
            Network::Local => "ws://127.0.0.1:9944",
            Network::Mainnet => "wss://rpc.polkadot.io",
            Network::Dev => "dev",
        }
    }

    /// The named network reached through `endpoint`, if any.
    pub fn from_endpoint(endpoint: &str) -> Option<Self> {
        Self::iter().find(|network| network.endpoint() == endpoint)
    }
}

#[derive(Parser)]
#[command(name = "zkdata")]
#[command(
    author,
    version,
    about = "Deploy the zkdata marketplace contracts and record their addresses"
)]
pub struct Cli {
    /// Seed phrase or dev URI (e.g. `//Alice`) of the deploying account.
    #[arg(env = "ZKDATA_SEED", hide_env_values = true)]
    pub seed: String,

    /// The verbosity level.
    #[arg(short, long, env = "ZKDATA_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// The network to deploy to. Overrides the endpoint of the configuration file.
    #[arg(short, long, env = "ZKDATA_NETWORK")]
    pub network: Option<Network>,

    /// A custom chain endpoint.
    #[arg(long, conflicts_with = "network")]
    pub endpoint: Option<String>,

    /// Path to a Zkdata.toml configuration file, or a directory containing one.
    #[arg(long, alias = "conf", env = "ZKDATA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Root directory of the compiled contracts.
    #[arg(long)]
    pub artifacts_dir: Option<PathBuf>,

    /// Where the deployment record is written.
    #[arg(long, alias = "ledger")]
    pub ledger_path: Option<PathBuf>,

    /// A custom deployment plan (TOML). The marketplace plan is deployed by default.
    #[arg(long)]
    pub plan: Option<PathBuf>,

    /// Seconds to wait for each transaction to be finalized.
    #[arg(long)]
    pub tx_timeout: Option<u64>,

    /// Fixed seed for instantiation salts.
    #[arg(long)]
    pub salt: Option<String>,

    /// Skip wiring and smoke-test calls whose contracts are not deployed, instead of failing.
    #[arg(long)]
    pub skip_missing: bool,

    /// Do not run the smoke tests after deployment.
    #[arg(long)]
    pub skip_smoke_tests: bool,

    /// Only upload the contract code, without instantiating anything.
    #[arg(long)]
    pub upload_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_selector() {
        let cli = Cli::try_parse_from(["zkdata", "//Alice", "--network", "local"]).unwrap();
        assert_eq!(cli.network, Some(Network::Local));
        assert_eq!(cli.network.unwrap_or_default().endpoint(), "ws://127.0.0.1:9944");
        assert_eq!(Network::default().endpoint(), "wss://rococo-contracts-rpc.polkadot.io");
        assert_eq!(Network::Mainnet.to_string(), "mainnet");
    }

    #[test]
    fn test_network_from_endpoint() {
        assert_eq!(Network::from_endpoint("dev"), Some(Network::Dev));
        assert_eq!(
            Network::from_endpoint("wss://rpc.polkadot.io"),
            Some(Network::Mainnet)
        );
        assert_eq!(Network::from_endpoint("ws://10.0.0.7:9944"), None);
    }

    #[test]
    fn test_endpoint_conflicts_with_network() {
        let result = Cli::try_parse_from([
            "zkdata",
            "//Alice",
            "--network",
            "dev",
            "--endpoint",
            "ws://example.com",
        ]);
        assert!(result.is_err());
    }
}
