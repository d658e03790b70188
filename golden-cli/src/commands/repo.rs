//! `golden repo add|list|show|remove`

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use golden_core::{registry, RepoAlias, RepositoryRecord};
use golden_store::{AliasManager, RepoLayout};

use super::environment;

#[derive(Subcommand, Debug)]
pub enum RepoCommand {
    /// Register a repository. Use `local://<name>` for locally edited content.
    Add(AddArgs),
    /// List registered repositories.
    List {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show one repository record as JSON.
    Show { alias: String },
    /// Unregister a repository. Content on disk is left alone.
    Remove { alias: String },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Alias readers resolve (e.g. "docs" or "docs-global").
    pub alias: String,

    /// Remote git URL, or `local://<name>`.
    pub source_url: String,

    /// Refresh interval in seconds for this repository.
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// Make the repository due on the scheduler's next tick.
    #[arg(long)]
    pub schedule: bool,

    /// Default branch of the remote.
    #[arg(long, default_value = "main")]
    pub branch: String,
}

pub fn run(cmd: RepoCommand) -> Result<()> {
    match cmd {
        RepoCommand::Add(args) => add(args),
        RepoCommand::List { json } => list(json),
        RepoCommand::Show { alias } => show(&alias),
        RepoCommand::Remove { alias } => remove(&alias),
    }
}

fn add(args: AddArgs) -> Result<()> {
    let (home, _config, layout) = environment()?;
    if matches!(args.interval, Some(0)) {
        bail!("--interval must be greater than zero");
    }

    let alias = RepoAlias::from(args.alias);
    let mut record = RepositoryRecord::new(alias.clone(), args.source_url, layout.root());
    record.default_branch = args.branch;
    record.refresh_interval_secs = args.interval;
    if args.schedule {
        record.next_refresh = Some(Utc::now());
    }
    registry::register_at(&home, &record)
        .with_context(|| format!("failed to register '{alias}'"))?;

    println!(
        "{} {} ({})",
        "registered".green(),
        alias,
        record.source_kind()
    );
    println!("  master: {}", record.master_path.display());
    if !record.master_path.exists() {
        println!(
            "  {}",
            "master directory does not exist yet; clone or create it before the first refresh"
                .yellow()
        );
    }
    if args.schedule && !record.is_remote() {
        println!(
            "  {}",
            "local repositories are refreshed on demand, not by the scheduler".yellow()
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct RepoRow {
    alias: String,
    source_url: String,
    kind: String,
    next_refresh: Option<DateTime<Utc>>,
    last_refreshed: Option<DateTime<Utc>>,
    target: Option<String>,
}

#[derive(Tabled)]
struct RepoTableRow {
    #[tabled(rename = "alias")]
    alias: String,
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "next refresh")]
    next_refresh: String,
    #[tabled(rename = "last refreshed")]
    last_refreshed: String,
    #[tabled(rename = "serving")]
    target: String,
}

fn list(json: bool) -> Result<()> {
    let (home, _config, layout) = environment()?;
    let records = registry::list_at(&home).context("failed to load registry")?;
    let rows: Vec<RepoRow> = records.iter().map(|r| row(&layout, r)).collect();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("failed to serialize repository list")?
        );
        return Ok(());
    }

    if rows.is_empty() {
        println!("No repositories registered.");
        println!("Run: golden repo add <alias> <source-url>");
        return Ok(());
    }

    let table_rows: Vec<RepoTableRow> = rows
        .into_iter()
        .map(|row| RepoTableRow {
            alias: row.alias,
            kind: row.kind,
            next_refresh: format_time(row.next_refresh),
            last_refreshed: format_time(row.last_refreshed),
            target: row.target.unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn show(alias: &str) -> Result<()> {
    let (home, _config, _layout) = environment()?;
    let record = registry::load_at(&home, &RepoAlias::from(alias))
        .with_context(|| format!("failed to load '{alias}'"))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&record).context("failed to serialize repository")?
    );
    Ok(())
}

fn remove(alias: &str) -> Result<()> {
    let (home, _config, _layout) = environment()?;
    registry::remove_at(&home, &RepoAlias::from(alias))
        .with_context(|| format!("failed to remove '{alias}'"))?;
    println!("{} {alias}", "removed".green());
    Ok(())
}

fn row(layout: &RepoLayout, record: &RepositoryRecord) -> RepoRow {
    let target = AliasManager::new(layout)
        .read_alias(&record.alias)
        .ok()
        .map(|p| p.display().to_string());
    RepoRow {
        alias: record.alias.to_string(),
        source_url: record.source_url.clone(),
        kind: record.source_kind().to_string(),
        next_refresh: record.next_refresh,
        last_refreshed: record.last_refreshed,
        target,
    }
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}
