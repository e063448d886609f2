// src/main.rs
//
// Maintenance CLI over the scripts database.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use scripts_db::db::monitoring::gather_metrics;
use scripts_db::{init_logging, DatabaseProvider, DbConfig, DbLocation, Script, ScriptRepository};
use scripts_db::{LocalScriptRepository, TemplateType};

#[derive(Parser)]
#[command(name = "scripts_db")]
#[command(version)]
#[command(about = "Inspect and edit the saved scripts database", long_about = None)]
struct Cli {
    /// Database file (`:memory:` for a scratch database). Defaults to
    /// SCRIPTS_DB_PATH or ./saved_scripts.db
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List visible scripts, newest first
    List {
        /// Only scripts created from this template
        #[arg(long)]
        template: Option<String>,
    },
    /// Print one script as JSON
    Show { id: i64 },
    /// Create a script
    Add { template: String, content: String },
    /// Replace the content of a script
    Edit { id: i64, content: String },
    /// Delete a script
    Delete { id: i64 },
    /// Print the schema version
    SchemaVersion,
    /// Print storage metrics in Prometheus text format
    Metrics,
}

#[tokio::main]
async fn main() {
    init_logging();
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = DbConfig::from_env().context("invalid environment configuration")?;
    if let Some(path) = cli.db {
        config.location = DbLocation::from_path_str(&path.to_string_lossy());
    }

    let provider = DatabaseProvider::new(config);
    let db = provider.get().await.context("cannot open scripts database")?;
    let repo = LocalScriptRepository::new(db.script_dao());

    match cli.command {
        Commands::List { template } => {
            let scripts = match template {
                Some(t) => repo.list_scripts_by_template(&TemplateType::from(t)).await?,
                None => repo.list_scripts().await?,
            };
            for script in &scripts {
                print_row(script);
            }
        }
        Commands::Show { id } => match repo.script_by_id(id).await? {
            Some(script) => println!("{}", serde_json::to_string_pretty(&script)?),
            None => bail!("no script with id {}", id),
        },
        Commands::Add { template, content } => {
            let id = repo.insert_script(&Script::new(template, content)).await?;
            println!("{}", id);
        }
        Commands::Edit { id, content } => {
            let Some(mut script) = repo.script_by_id(id).await? else {
                bail!("no script with id {}", id);
            };
            script.edit_content(content);
            repo.update_script(&script).await?;
            println!("updated {} (version {})", id, script.version);
        }
        Commands::Delete { id } => {
            repo.delete_script_by_id(id).await?;
            println!("deleted {}", id);
        }
        Commands::SchemaVersion => {
            println!("{}", db.schema_version());
        }
        Commands::Metrics => {
            print!("{}", gather_metrics());
        }
    }

    Ok(())
}

fn print_row(script: &Script) {
    let preview: String = script.content.chars().take(60).collect();
    println!(
        "{:>6}  {:<16}  {}  v{}  {:?}  {}",
        script.id.unwrap_or_default(),
        script.template_type,
        script.updated_at.format("%Y-%m-%d %H:%M:%S"),
        script.version,
        script.sync_status,
        preview.replace('\n', " "),
    );
}
