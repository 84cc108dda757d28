//! zkdata deploys the zkdata marketplace contracts (dataset registry, zero-knowledge verifier and
//! payment manager) and records their addresses.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use cli::{Cli, Network};
use zkdata_deploy::{
    ArtifactDir, CONFIG_FILENAME, CancelSignal, ChainConnector, Credential, DeployConfig,
    DeploymentPlan, JsonFileLedger, MissingContractPolicy, Pipeline, RpcConnector, RunOutcome,
    SimulatedNetwork, cancel_pair,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = load_config(&cli)?;
    let signer = Credential::from_seed(&cli.seed).context("Invalid deployer seed")?;
    let plan = config.plan()?;

    let network = Network::from_endpoint(&config.endpoint);
    match network {
        Some(Network::Mainnet) => {
            tracing::warn!("Deploying to mainnet! Make sure the plan and parameters are final.")
        }
        Some(Network::Dev) => tracing::info!("Deploying to the in-process development chain"),
        _ => {}
    }

    tracing::info!(
        endpoint = %config.endpoint,
        deployer = %signer.address(),
        contracts = plan.contracts.len(),
        plan_hash = %plan.fingerprint(),
        "Starting deployment..."
    );

    let (cancel, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, aborting deployment...");
            cancel.cancel();
        }
    });

    // Save the resolved configuration next to the ledger.
    let config_path = config
        .ledger_path
        .parent()
        .map(|dir| dir.join(CONFIG_FILENAME))
        .unwrap_or_else(|| CONFIG_FILENAME.into());
    config.save_to_file(&config_path)?;

    if network == Some(Network::Dev) {
        deploy(SimulatedNetwork::new(), config, &plan, &signer, signal, cli.upload_only).await
    } else {
        deploy(RpcConnector::default(), config, &plan, &signer, signal, cli.upload_only).await
    }
}

/// Layer the configuration: defaults, then the configuration file, then `ZKDATA_` environment
/// variables, then explicit command line flags.
fn load_config(cli: &Cli) -> Result<DeployConfig> {
    let mut figment = Figment::from(Serialized::defaults(DeployConfig::default()));

    if let Some(path) = &cli.config {
        let path = DeployConfig::resolve_config_path(path)?;
        tracing::info!(path = %path.display(), "Loading configuration file...");
        figment = figment.merge(Toml::file(path));
    }

    let mut config: DeployConfig = figment
        .merge(Env::prefixed("ZKDATA_").split("__"))
        .extract()
        .context("Failed to load configuration")?;

    if let Some(network) = cli.network {
        config.endpoint = network.endpoint().to_string();
    }
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(dir) = &cli.artifacts_dir {
        config.artifacts_dir = dir.clone();
    }
    if let Some(path) = &cli.ledger_path {
        config.ledger_path = path.clone();
    }
    if let Some(path) = &cli.plan {
        config.plan_path = Some(path.clone());
    }
    if let Some(secs) = cli.tx_timeout {
        config.tx_timeout_secs = secs;
    }
    if let Some(salt) = &cli.salt {
        config.salt = Some(salt.clone());
    }
    if cli.skip_missing {
        config.missing_contracts = MissingContractPolicy::Skip;
    }
    if cli.skip_smoke_tests {
        config.smoke_tests = false;
    }

    Ok(config)
}

async fn deploy<K: ChainConnector>(
    connector: K,
    config: DeployConfig,
    plan: &DeploymentPlan,
    signer: &Credential,
    signal: CancelSignal,
    upload_only: bool,
) -> Result<()> {
    let artifacts = ArtifactDir::new(&config.artifacts_dir);
    let ledger = JsonFileLedger::new(&config.ledger_path);
    let mut pipeline = Pipeline::new(config, connector, artifacts, ledger).with_cancel(signal);

    if upload_only {
        let hashes = pipeline.upload(plan, signer).await?;

        let mut table = Table::new();
        table.set_header(vec!["Contract", "Code hash"]);
        for (name, hash) in hashes {
            table.add_row(vec![name, hash.to_string()]);
        }
        println!("{table}");
        return Ok(());
    }

    let report = match pipeline.run(plan, signer).await {
        Ok(report) => report,
        Err(abort) => {
            if !abort.deployed.is_empty() {
                let mut table = Table::new();
                table.set_header(vec!["Deployed before abort", "Address"]);
                for (name, address) in &abort.deployed {
                    table.add_row(vec![name.clone(), address.to_string()]);
                }
                println!("{table}");
            }
            return Err(abort.into());
        }
    };

    let mut table = Table::new();
    table.set_header(vec!["Contract", "Address", "Code hash"]);
    for (name, entry) in &report.record.contracts {
        table.add_row(vec![
            name.clone(),
            entry.address.to_string(),
            entry.code_hash.to_string(),
        ]);
    }
    println!("{table}");

    match report.outcome() {
        RunOutcome::Success => tracing::info!(
            smoke_tests = report.smoke_tests_run,
            "Deployment completed successfully"
        ),
        RunOutcome::CompletedWithWarnings => {
            for failure in &report.smoke_failures {
                tracing::warn!(operation = %failure.label, reason = %failure.reason, "Smoke test failed");
            }
            tracing::warn!(
                failures = report.smoke_failures.len(),
                "Contracts deployed, but validation reported warnings"
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn test_dev_endpoint_from_config_file_selects_simulated_chain() {
        let dir = TempDir::new("zkdata-cli").unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "endpoint = \"dev\"\ntx_timeout_secs = 5\n").unwrap();

        let cli = Cli::try_parse_from([
            "zkdata",
            "//Alice",
            "--config",
            dir.path().to_str().unwrap(),
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();

        assert_eq!(config.endpoint, "dev");
        assert_eq!(config.tx_timeout_secs, 5);
        assert_eq!(Network::from_endpoint(&config.endpoint), Some(Network::Dev));
    }

    #[test]
    fn test_network_flag_overrides_config_endpoint() {
        let dir = TempDir::new("zkdata-cli").unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME), "endpoint = \"dev\"\n").unwrap();

        let cli = Cli::try_parse_from([
            "zkdata",
            "//Alice",
            "--network",
            "local",
            "--config",
            dir.path().to_str().unwrap(),
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();

        assert_eq!(Network::from_endpoint(&config.endpoint), Some(Network::Local));
    }
}
