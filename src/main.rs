//! pgbridge - command-line front end
//!
//! Loads instance profiles and settings from ~/.pgbridge/, then lists
//! instances, pings a database, or runs one read-only query through a
//! service handle.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pgbridge::config::{InstanceConfig, load_instances, load_settings};
use pgbridge::service::{ServiceConfig, postgres_registry};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(name = "pgbridge", version, about = "Pooled PostgreSQL service handles")]
struct Cli {
    /// Project the handles must be created for (defaults to the configured one)
    #[arg(long)]
    project: Option<String>,

    /// Fixed session pool size
    #[arg(long)]
    pool_size: Option<usize>,

    /// Seconds to wait for a free session (requires --pool-size)
    #[arg(long, requires = "pool_size")]
    session_timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List configured instance profiles
    Instances,
    /// Check that a database answers
    Ping { instance: String, database: String },
    /// Run a read-only query and print the rows tab-separated
    Query {
        instance: String,
        database: String,
        sql: String,
    },
}

/// Longest cell printed by `query`
const MAX_CELL_WIDTH: usize = 200;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pgbridge=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = load_settings().context("Failed to load settings")?;
    let instances = load_instances().context("Failed to load instance profiles")?;

    match &cli.command {
        Command::Instances => {
            print_instances(&instances);
            Ok(())
        }
        Command::Ping { instance, database } => {
            let service_config = service_config(&cli, instance, database);
            let registry = postgres_registry(&settings, instances, cli.project.as_deref())?;
            let result = registry
                .get_or_create(&service_config)
                .and_then(|service| service.ping());
            registry.shutdown();
            result.with_context(|| format!("Ping of {}/{} failed", instance, database))?;
            info!(%instance, %database, "Database is reachable");
            println!("ok");
            Ok(())
        }
        Command::Query {
            instance,
            database,
            sql,
        } => {
            if sql.trim().is_empty() {
                bail!("Query must not be empty");
            }
            let service_config = service_config(&cli, instance, database);
            let registry = postgres_registry(&settings, instances, cli.project.as_deref())?;
            let result = registry
                .get_or_create(&service_config)
                .and_then(|service| service.execute_sql(sql, &[]));
            registry.shutdown();
            let results = result.context("Query failed")?;

            let header: Vec<&str> = results.columns.iter().map(|c| c.name.as_str()).collect();
            println!("{}", header.join("\t"));
            for row in &results.rows {
                let cells: Vec<String> = row
                    .values
                    .iter()
                    .map(|v| v.display_string(MAX_CELL_WIDTH))
                    .collect();
                println!("{}", cells.join("\t"));
            }
            info!(
                rows = results.row_count(),
                elapsed_ms = results.execution_time.as_millis() as u64,
                "Query finished"
            );
            Ok(())
        }
    }
}

fn service_config(cli: &Cli, instance: &str, database: &str) -> ServiceConfig {
    ServiceConfig {
        instance_id: instance.to_string(),
        database_id: database.to_string(),
        pool_size: cli.pool_size,
        session_request_timeout: cli.session_timeout,
    }
}

fn print_instances(instances: &[InstanceConfig]) {
    if instances.is_empty() {
        println!("No instance profiles configured");
        return;
    }
    for instance in instances {
        println!(
            "{}\t{}@{}:{}\t{:?}",
            instance.name, instance.username, instance.host, instance.port, instance.ssl_mode
        );
    }
}
