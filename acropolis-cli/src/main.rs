// Acropolis CLI - runs monitoring passes and manages the local rule store

use acropolis_core::{
    dispatch_pending, weather_client_from_config, LogDispatcher, MetricType, MonitorConfig,
    MonitoringRule, MonitoringRunner, ProviderRegistry, RuleFilter, RuleOutcome, RunOptions,
    RunReport, SqliteStore,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "acropolis")]
#[command(about = "Weather monitoring rule evaluation", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to <config_dir>/acropolis/config.toml)
    #[arg(long, global = true, env = "ACROPOLIS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database schema
    InitDb,

    /// Import monitoring rules from a JSON array
    ImportRules {
        /// JSON file with the rules and their alert definitions
        file: PathBuf,
    },

    /// Run one monitoring pass
    Run {
        /// Only evaluate rules for this metric
        #[arg(long)]
        metric: Option<MetricType>,

        /// Also evaluate rules marked inactive
        #[arg(long)]
        include_inactive: bool,

        /// Rules evaluated in parallel
        #[arg(long)]
        concurrency: Option<usize>,

        /// Abort the pass after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Dispatch new triggers after the pass
        #[arg(long)]
        notify: bool,
    },

    /// Dispatch triggers that have not been notified yet
    Notify,

    /// List collections offered by the weather service
    Collections,

    /// List known metrics and whether they can be evaluated
    Metrics,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("acropolis=info".parse()?)
                .add_directive("acropolis_core=info".parse()?),
        )
        .init();

    let config = MonitorConfig::load(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;

    if let Err(e) = execute(cli.command, &config).await {
        error!("Command failed: {:#}", e);
        eprintln!("\n✗ {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn execute(command: Commands, config: &MonitorConfig) -> Result<()> {
    match command {
        Commands::InitDb => {
            let path = config.database_path();
            SqliteStore::open(&path).await?;
            println!("✓ Database ready at {}", path.display());
            Ok(())
        }

        Commands::ImportRules { file } => {
            let rules = read_rules(&file).await?;
            let store = SqliteStore::open(config.database_path()).await?;
            for rule in &rules {
                store.insert_rule(rule).await?;
            }
            println!("✓ Imported {} rule(s)", rules.len());
            Ok(())
        }

        Commands::Run {
            metric,
            include_inactive,
            concurrency,
            timeout_secs,
            notify,
        } => {
            let store = Arc::new(SqliteStore::open(config.database_path()).await?);
            let client = weather_client_from_config(config)?;
            let runner = MonitoringRunner::new(
                store.clone(),
                Arc::new(client),
                ProviderRegistry::from_config(&config.parameters),
            );

            let mut options = RunOptions::from_config(config);
            options.filter = RuleFilter {
                metric,
                active_only: config.run.active_only && !include_inactive,
            };
            if let Some(concurrency) = concurrency {
                options.concurrency = concurrency.max(1);
            }

            let report = match timeout_secs.or(config.run.timeout_secs) {
                Some(secs) => {
                    runner
                        .run_with_timeout(&options, Duration::from_secs(secs))
                        .await?
                }
                None => runner.run_pass(&options).await?,
            };
            print_report(&report);

            if notify {
                let summary = dispatch_pending(store.as_ref(), &LogDispatcher).await?;
                println!(
                    "Notified {} trigger(s), {} failed",
                    summary.delivered, summary.failed
                );
            }
            Ok(())
        }

        Commands::Notify => {
            let store = SqliteStore::open(config.database_path()).await?;
            let summary = dispatch_pending(&store, &LogDispatcher).await?;
            println!(
                "Notified {} trigger(s), {} failed",
                summary.delivered, summary.failed
            );
            Ok(())
        }

        Commands::Collections => {
            let client = weather_client_from_config(config)?;
            let collections = client.list_collections().await?;
            for (id, title) in collections {
                println!("{:<40} {}", id, title);
            }
            Ok(())
        }

        Commands::Metrics => {
            let registry = ProviderRegistry::from_config(&config.parameters);
            for metric in MetricType::ALL {
                let status = if registry.for_metric(metric).is_ok() {
                    "supported"
                } else {
                    "unsupported"
                };
                println!("{:<20} {}", metric, status);
            }
            Ok(())
        }

        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

async fn read_rules(path: &Path) -> Result<Vec<MonitoringRule>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let rules: Vec<MonitoringRule> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse rules from {}", path.display()))?;

    for rule in &rules {
        rule.validate().map_err(anyhow::Error::msg)?;
    }
    info!("Read {} rule(s) from {}", rules.len(), path.display());
    Ok(rules)
}

fn print_report(report: &RunReport) {
    println!("\nMonitoring run {}", report.run.id);
    for rule in &report.rules {
        let status = match &rule.outcome {
            RuleOutcome::Triggered(trigger) => format!(
                "TRIGGERED  actual {:.2} vs threshold {:.2}",
                trigger.actual_value, trigger.reference_value
            ),
            RuleOutcome::Clear => "clear".to_string(),
            RuleOutcome::NoData => "no data".to_string(),
            RuleOutcome::Failed { kind, message } => format!("FAILED ({}) {}", kind, message),
        };
        println!("  {:<36} {:<30} {}", rule.rule_id, rule.title, status);
    }
    println!(
        "\n{} triggered, {} clear, {} no data, {} failed",
        report.triggered(),
        report.clear(),
        report.no_data(),
        report.failed()
    );
}
