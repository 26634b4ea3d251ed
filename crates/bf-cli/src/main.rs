//! baas-fleet
//!
//! Launches N speaking-bot pipelines (worker, relay, ngrok tunnel, Meeting
//! BaaS bot) and supervises them until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use baas_fleet::batch::{instance_overrides, load_batch};
use baas_fleet::output::{
    format_instances, format_launch_summary, format_shutdown_summary, print_error, print_info,
    print_success, print_warning,
};
use baas_fleet::prompt::{prompt_meeting_url, validate_meeting_url};
use baas_fleet::settings::resolve_config;
use baas_fleet::Cli;
use bf_orchestrator::{FleetManager, LaunchPlan, LogSink, MeetingBaasClient, NgrokProvisioner};

/// How long buffered child output may take to reach the log after teardown
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level().into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    let config = resolve_config(cli.config.as_deref(), |key| std::env::var(key).ok())
        .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let batch = cli
        .batch
        .as_deref()
        .map(load_batch)
        .transpose()
        .context("Failed to load batch file")?;
    let instances = instance_overrides(cli.count, batch)?;

    let meeting_url = match cli.meeting_url.as_deref() {
        Some(url) => validate_meeting_url(url)?,
        None => tokio::task::spawn_blocking(|| {
            prompt_meeting_url(std::io::stdin().lock(), std::io::stdout())
        })
        .await
        .context("Meeting URL prompt failed")??,
    };

    let plan = LaunchPlan {
        meeting_url,
        start_port: cli.start_port,
        instances,
    };

    let (sink, drain) = LogSink::tracing();
    let provisioner = NgrokProvisioner::new(&config.tunnel, config.timing.grace_timeout, sink.clone())
        .context("Failed to set up tunnel provisioner")?;
    let registrar =
        MeetingBaasClient::new(&config.registration).context("Failed to set up Meeting BaaS client")?;

    let fleet = FleetManager::new(config, Arc::new(provisioner), Arc::new(registrar), sink);
    tokio::spawn(cancel_on_signal(fleet.shutdown_token()));

    print_info(&format!(
        "Launching {} pipeline(s) for {}",
        plan.count(),
        plan.meeting_url
    ));

    let report = fleet.launch_fleet(&plan).await?;
    println!("{}", format_instances(&report.instances));

    if report.interrupted {
        print_warning(&format!(
            "Interrupted during launch: {}",
            format_launch_summary(&report)
        ));
    } else if report.running() == 0 {
        print_error(&format_launch_summary(&report));
    } else {
        print_success(&format_launch_summary(&report));
        print_info("Press Ctrl+C to stop all pipelines");
        fleet.monitor().await;
    }

    let shutdown = fleet.shutdown().await;
    println!("{}", format_instances(&fleet.snapshot().await));
    print_success(&format_shutdown_summary(&shutdown));

    // Every sink clone lives in the fleet; dropping it lets the drain finish.
    drop(fleet);
    if tokio::time::timeout(LOG_DRAIN_TIMEOUT, drain).await.is_err() {
        tracing::debug!("Child output drain did not finish in time");
    }

    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }

    token.cancel();
}
