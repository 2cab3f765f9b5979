use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tabled::{Table, Tabled};
use tokio::io::AsyncReadExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vlansync::inventory::Inventory;
use vlansync::parser::VlanParser;
use vlansync::record::VlanRecord;
use vlansync::service::VlanSyncService;

#[derive(Parser)]
#[command(name = "vlansync")]
#[command(about = "Reconcile VLANs between device output, a SQLite store and devices")]
struct Cli {
    /// SQLite database file
    #[arg(long, env = "VLANSYNC_DB", default_value = "vlan.db", global = true)]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Make the store match the VLANs found in device output
    Sync {
        /// Input file, `-` for stdin
        input: PathBuf,

        /// TextFSM template to parse the input with (default: built-in `show vlan`)
        #[arg(long)]
        template: Option<PathBuf>,

        /// Input is a JSON array of [vlan_id, name, description] rows
        #[arg(long, conflicts_with = "template")]
        rows: bool,

        /// Print the planned changes without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Configure every stored VLAN on a device
    Push {
        /// Device name in the inventory, or its address
        device: String,

        /// Device inventory (TOML)
        #[arg(long, env = "VLANSYNC_INVENTORY", default_value = "inventory.toml")]
        inventory: PathBuf,
    },

    /// List stored VLANs
    List,
}

#[derive(Tabled)]
struct VlanRow {
    #[tabled(rename = "VLAN")]
    vlan_id: u32,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "DESCRIPTION")]
    description: String,
}

impl From<VlanRecord> for VlanRow {
    fn from(record: VlanRecord) -> Self {
        Self {
            vlan_id: record.vlan_id,
            name: record.name,
            description: record.description,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = match "vlansync=info".parse() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "vlansync failed");
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

/// Exit code 2 signals a completed run whose report lists failures.
async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Sync {
            input,
            template,
            rows,
            dry_run,
        } => {
            let parser = match &template {
                Some(path) => {
                    let text = tokio::fs::read_to_string(path)
                        .await
                        .with_context(|| format!("reading template {}", path.display()))?;
                    VlanParser::from_template_text(&text)?
                }
                None => VlanParser::show_vlan()?,
            };
            let service = VlanSyncService::open(&cli.db, parser).await?;
            let text = read_input(&input).await?;
            info!(input = %input.display(), db = %cli.db.display(), dry_run, "Starting sync");

            if rows {
                let rows: Vec<Vec<String>> =
                    serde_json::from_str(&text).context("rows must be a JSON array of string arrays")?;
                if dry_run {
                    print_json(&service.plan_rows(&rows).await?)?;
                    return Ok(ExitCode::SUCCESS);
                }
                let report = service.sync_rows(&rows).await?;
                print_json(&report)?;
                Ok(exit_code(report.is_clean()))
            } else {
                if dry_run {
                    print_json(&service.plan_text(&text).await?)?;
                    return Ok(ExitCode::SUCCESS);
                }
                let report = service.sync_text(&text).await?;
                print_json(&report)?;
                Ok(exit_code(report.is_clean()))
            }
        }

        Commands::Push { device, inventory } => {
            let inventory = Inventory::load(&inventory)?;
            let target = inventory.resolve(&device)?;
            let service = VlanSyncService::open(&cli.db, VlanParser::show_vlan()?).await?;

            let report = service.push_target(&target).await?;
            print_json(&report)?;
            Ok(exit_code(report.is_clean()))
        }

        Commands::List => {
            let service = VlanSyncService::open(&cli.db, VlanParser::show_vlan()?).await?;
            let vlans = service.list().await?;

            if vlans.is_empty() {
                println!("No VLANs found");
            } else {
                let rows: Vec<VlanRow> = vlans.into_iter().map(VlanRow::from).collect();
                println!("{}", Table::new(rows));
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("reading stdin")?;
        return Ok(text);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(clean: bool) -> ExitCode {
    if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}
