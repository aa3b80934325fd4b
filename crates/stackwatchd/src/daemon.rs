//! Daemon modes: continuous monitoring and one-shot passes.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use stackwatch_core::StackwatchConfig;
use stackwatch_health::{AlertCallback, BoxFuture, HealthChecker, ProbeResult};

use crate::docker::{ComposeRestarter, DockerRuntime};

/// Load the registry and build an engine with every service registered.
pub async fn build_checker(
    config: Option<&Path>,
    compose_file: &Path,
) -> anyhow::Result<HealthChecker> {
    let config = match config {
        Some(path) => StackwatchConfig::from_file(path)
            .with_context(|| format!("failed to load registry {}", path.display()))?,
        None => StackwatchConfig::default_stack(),
    };
    let settings = config.settings()?;
    let profiles = config.profiles()?;

    let checker = HealthChecker::new(
        settings,
        Arc::new(DockerRuntime::new()),
        Arc::new(ComposeRestarter::new(compose_file)),
    )
    .with_alert_callback(log_alert());

    checker.register_all(profiles).await?;
    info!(services = checker.services().await.len(), "service registry loaded");
    Ok(checker)
}

/// Alerts are logged; delivery to other channels is left to log shipping.
fn log_alert() -> AlertCallback {
    Arc::new(|result: ProbeResult| -> BoxFuture {
        Box::pin(async move {
            error!(
                service = %result.service_id,
                outcome = %result.outcome,
                message = %result.message,
                "ALERT: service became unhealthy"
            );
        })
    })
}

/// Run the monitoring loop until Ctrl-C.
pub async fn run(checker: HealthChecker) -> anyhow::Result<()> {
    info!("stackwatch daemon starting");
    checker.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl-C handler")?;
    info!("shutdown signal received");

    checker.stop().await;
    let report = checker.snapshot_report().await;
    info!(
        overall = %report.overall_status,
        healthy = report.summary.healthy,
        unhealthy = report.summary.unhealthy,
        "stackwatch daemon stopped"
    );
    Ok(())
}

/// One full pass, printed as text or JSON.
pub async fn check(checker: &HealthChecker, json: bool) -> anyhow::Result<()> {
    let report = checker.full_report().await;
    if json {
        println!("{}", report.to_json_pretty()?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

/// One full pass, then the history of a single service as JSON.
pub async fn history(checker: &HealthChecker, service: &str, limit: usize) -> anyhow::Result<()> {
    checker.check_all().await;
    let entries = checker.history(service, Some(limit)).await?;
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}
