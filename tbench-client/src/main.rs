#![deny(clippy::expect_used, clippy::unwrap_used)]

mod cli;

use clap::Parser;
use tbench_client::{BeginRun, CollectorClient, MetricsReport, RejectedField};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let args = cli::Args::parse();
    let client = CollectorClient::new(&args.url, args.api_key)?;

    match args.command {
        cli::Commands::Begin {
            protocol,
            environment,
            time_slot,
            client_id,
            parallel_clients,
        } => {
            let id = client
                .begin(&BeginRun {
                    protocol,
                    environment,
                    time_slot,
                    client_id,
                    parallel_clients,
                })
                .await?;
            println!("{}", id);
        }
        cli::Commands::Update { id, fields } => {
            let report = build_report(&fields)?;
            let rejected = client.update(id, &report).await?;
            summarize(report.len(), &rejected);
        }
        cli::Commands::End { id, fields } => {
            let report = build_report(&fields)?;
            let rejected = client.end(id, &report).await?;
            summarize(report.len(), &rejected);
            info!("Run {} finalized", id);
        }
        cli::Commands::Export { emergency, output } => {
            let table = client.export(emergency).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &table).await?;
                    info!(
                        "Wrote {} row(s) to {}",
                        table.lines().count().saturating_sub(1),
                        path.display()
                    );
                }
                None => print!("{}", table),
            }
        }
        cli::Commands::Health => {
            let health = client.health().await?;
            println!(
                "{} (version {}, {} active run(s))",
                health.status, health.version, health.active_runs
            );
        }
    }

    Ok(())
}

fn build_report(pairs: &[String]) -> Result<MetricsReport, anyhow::Error> {
    let mut report = MetricsReport::new();
    for pair in pairs {
        report.insert_pair(pair)?;
    }
    Ok(report)
}

fn summarize(sent: usize, rejected: &[RejectedField]) {
    if rejected.is_empty() {
        info!("{} field(s) applied", sent);
    } else {
        warn!("{} of {} field(s) rejected", rejected.len(), sent);
    }
}
