use bank_provisioner::config::ProvisionerConfig;
use bank_provisioner::services::{MongoTarget, Provisioner};
use provision_core::config::Config as CoreConfig;
use provision_core::observability::{init_tracing, shutdown_tracing};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let common = CoreConfig::load().unwrap_or_else(|e| {
        eprintln!("Failed to load common configuration, using defaults: {}", e);
        CoreConfig::default()
    });
    init_tracing(
        "bank-provisioner",
        &common.log_level,
        common.otlp_endpoint.as_deref(),
    );

    let code = run(common).await;
    shutdown_tracing();
    ExitCode::from(code)
}

async fn run(common: CoreConfig) -> u8 {
    let config = match ProvisionerConfig::from_common(common) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return e.exit_code();
        }
    };

    let target = match MongoTarget::connect(&config.mongodb).await {
        Ok(target) => target,
        Err(e) => {
            tracing::error!("Failed to create MongoDB client: {}", e);
            return e.exit_code();
        }
    };

    let provisioner = Provisioner::new(&target).with_retry(config.retry.clone());
    match provisioner.run(&config.plan).await {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => tracing::warn!("Failed to serialize provisioning report: {}", e),
            }
            0
        }
        Err(e) => {
            tracing::error!(step = %e.step, "Provisioning aborted: {}", e);
            e.exit_code()
        }
    }
}
