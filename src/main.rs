mod analyzer;
mod api;
mod cli;
mod config;
mod db;
mod extract;
mod notion;

use crate::cli::onboard::run_onboarding;
use crate::cli::{Cli, Commands, ConfigCommands};
use crate::config::Config;
use crate::db::Database;
use crate::extract::{Extractor, JoinedTable};
use crate::notion::{NotionClient, WorkspaceApi};
use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Onboard => {
            let _ = run_onboarding()?;
            Ok(())
        }
        Commands::Config { command } => handle_config_command(command),
        Commands::Status => handle_status(),
        Commands::Doctor => handle_doctor().await,
        Commands::Extract { workers } => {
            let config = load_config()?;
            run_extraction(&config, workers).await.map(|_| ())
        }
        Commands::Analyze { date } => {
            let config = load_config()?;
            run_analysis(&config, parse_optional_date(date)?)
        }
        Commands::Run { workers } => {
            let config = load_config()?;
            run_extraction(&config, workers).await?;
            run_analysis(&config, Local::now().date_naive())
        }
        Commands::Serve => {
            let config = load_config()?;
            config.ensure_directories()?;
            api::run_server(Arc::new(config)).await
        }
    }
}

fn handle_config_command(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Set { key, value } => {
            let mut config = load_or_default_config()?;
            config.set_value(&key, &value)?;
            config.ensure_directories()?;
            config.save()?;

            let masked = if key.contains("token") {
                "***hidden***".to_string()
            } else {
                value
            };
            println!("Config saved: {key} = {masked}");
            Ok(())
        }
        ConfigCommands::Get { key } => {
            let config = load_config()?;
            let value = config
                .get_value(&key)
                .with_context(|| format!("Unsupported config key: {key}"))?;

            println!("{value}");
            Ok(())
        }
    }
}

fn handle_status() -> Result<()> {
    let config = load_config()?;
    let database = Database::open(&config.db_path)?;
    let latest_run = database.latest_run()?;

    println!("HabitLens status");
    println!("- stored_rows: {}", database.activity_row_count()?);
    println!(
        "- last_extracted_at: {}",
        latest_run
            .as_ref()
            .and_then(|run| DateTime::<Utc>::from_timestamp(run.finished_at, 0))
            .map(|timestamp| timestamp.with_timezone(&Local).to_rfc3339())
            .unwrap_or_else(|| "none".to_string())
    );
    if let Some(run) = latest_run {
        println!(
            "- last_run: {} page(s), {} failed, {} fetched, {} dropped, {} stored",
            run.pages, run.failed_pages, run.fetched, run.dropped, run.rows
        );
    }

    Ok(())
}

async fn handle_doctor() -> Result<()> {
    let config_path = Config::config_path()?;
    let mut issues = Vec::new();

    if config_path.exists() {
        println!("[OK] config.json found: {}", config_path.display());
    } else {
        println!("[WARN] config.json not found: {}", config_path.display());
        issues.push("config missing".to_string());
    }

    let config = load_or_default_config()?;

    match Database::open(&config.db_path) {
        Ok(_) => println!("[OK] SQLite reachable: {}", config.db_path.display()),
        Err(error) => {
            println!("[WARN] SQLite check failed: {error}");
            issues.push("db unreachable".to_string());
        }
    }

    if config.report_dir.exists() {
        println!("[OK] report dir exists: {}", config.report_dir.display());
    } else {
        println!("[WARN] report dir missing: {}", config.report_dir.display());
        issues.push("report dir missing".to_string());
    }

    let client = match config.notion_settings().and_then(|settings| {
        NotionClient::new(settings).context("Failed to create workspace API client")
    }) {
        Ok(client) => {
            println!("[OK] API token is configured");
            Some(client)
        }
        Err(error) => {
            println!("[WARN] {error}");
            issues.push("api token missing".to_string());
            None
        }
    };

    let collections = [
        ("reference", config.resolve_reference_collection_id()),
        ("dashboard", config.resolve_dashboard_collection_id()),
    ];

    for (label, collection_id) in collections {
        let Some(collection_id) = collection_id else {
            println!("[WARN] {label} database id is not set");
            issues.push(format!("{label} id missing"));
            continue;
        };

        let Some(client) = client.as_ref() else {
            println!("[OK] {label} database id set: {collection_id}");
            continue;
        };

        match client.query_collection(&collection_id).await {
            Ok(results) => println!("[OK] {label} database reachable: {} row(s)", results.len()),
            Err(error) => {
                println!("[WARN] {label} database query failed: {error}");
                issues.push(format!("{label} unreachable"));
            }
        }
    }

    if issues.is_empty() {
        println!("doctor result: no issues");
    } else {
        println!("doctor result: {} warning(s)", issues.len());
    }

    Ok(())
}

async fn run_extraction(config: &Config, workers: Option<usize>) -> Result<JoinedTable> {
    let client = NotionClient::new(config.notion_settings()?)
        .context("Failed to create workspace API client")?;
    let extractor = Extractor::load(Arc::new(client), config.extract_settings()?).await?;

    let workers = config.effective_workers(workers);
    let table = extractor.extract_everything(workers).await;

    let mut database = Database::open(&config.db_path)?;
    database.replace_activity_rows(&table, Utc::now().timestamp())?;
    info!(rows = table.rows.len(), db = %config.db_path.display(), "joined table stored");

    println!("Extraction finished");
    println!("- reference activities: {}", extractor.references().len());
    println!("- dashboard pages: {}", table.parents);
    println!("- failed pages: {}", table.failed_parents);
    println!("- daily checks fetched: {}", table.fetched);
    println!("- dropped (no matching reference): {}", table.dropped);
    println!("- rows stored: {}", table.rows.len());

    Ok(table)
}

fn run_analysis(config: &Config, date: NaiveDate) -> Result<()> {
    let (analysis, saved) = analyzer::generate_and_store_analysis(config, date)?;

    println!("Analysis generated: {}", analysis.date);
    println!("- rows: {} ({} completed)", analysis.total_rows, analysis.completed_rows);
    println!("- Markdown: {}", saved.markdown_path.display());
    println!("- JSON: {}", saved.json_path.display());

    Ok(())
}

fn parse_optional_date(input: Option<String>) -> Result<NaiveDate> {
    input
        .as_deref()
        .map(|date| {
            NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .with_context(|| format!("Invalid date format: {date}. Example: 2024-01-31"))
        })
        .transpose()?
        .map_or_else(|| Ok(Local::now().date_naive()), Ok)
}

fn load_or_default_config() -> Result<Config> {
    Config::load().or_else(|_| {
        let config = Config::default();
        config.ensure_directories()?;
        config.save()?;
        Ok(config)
    })
}

fn load_config() -> Result<Config> {
    Config::load()
        .with_context(|| "Config file not found. Run `HabitLens onboard` first.".to_string())
}
