mod api;

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use listwatch_core::{Action, ScheduleWindow};

use crate::api::ApiClient;

#[derive(Parser)]
#[command(
    name = "listwatch",
    version,
    about = "Track classifieds listings from active to sold"
)]
struct Cli {
    /// Job server base URL
    #[arg(
        long,
        global = true,
        env = "LISTWATCH_URL",
        default_value = "http://127.0.0.1:8000"
    )]
    server: String,

    /// API key sent as a bearer token
    #[arg(long, global = true, env = "LISTWATCH_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct Target {
    /// City to crawl (server default: portland)
    #[arg(short, long)]
    city: Option<String>,

    /// Crawl every city of the manifest
    #[arg(long, default_value_t = false)]
    all_cities: bool,

    /// Manifest mapping city -> category -> url, as seen by the server
    #[arg(short = 'C', long)]
    categories_file: Option<PathBuf>,

    /// Re-run forever, waiting MIN or MIN-MAX minutes between runs
    #[arg(short, long, value_name = "MIN[-MAX]")]
    persistent: Option<ScheduleWindow>,
}

#[derive(Subcommand)]
enum Commands {
    /// Update the listings of one category
    Update {
        /// Category name from the manifest
        category: String,

        #[command(flatten)]
        target: Target,
    },

    /// Update the listings of every category
    UpdateAll {
        #[command(flatten)]
        target: Target,
    },

    /// List jobs and their status
    List {
        /// Only jobs with this status (pending, running, done, failed)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show status and output of jobs
    Status {
        /// Job ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Show available actions and their parameters
    Actions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("listwatch=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = ApiClient::new(&cli.server, cli.api_key)?;

    match cli.command {
        Commands::Update { category, target } => {
            let body = job_body(Action::Update, Some(&category), &target);
            cmd_submit(&client, &body).await?;
        }
        Commands::UpdateAll { target } => {
            let body = job_body(Action::UpdateAll, None, &target);
            cmd_submit(&client, &body).await?;
        }
        Commands::List { status } => cmd_list(&client, status.as_deref()).await?,
        Commands::Status { ids } => cmd_status(&client, &ids).await?,
        Commands::Actions => cmd_actions(&client).await?,
    }

    Ok(())
}

/// Wire form of a job submission. Only parameters given on the command line
/// are sent; the server fills in the rest.
fn job_body(action: Action, category: Option<&str>, target: &Target) -> Value {
    let mut params = Map::new();
    if let Some(category) = category {
        params.insert("category".into(), json!(category));
    }
    if let Some(city) = &target.city {
        params.insert("city".into(), json!(city));
    }
    if target.all_cities {
        params.insert("all_cities".into(), json!(true));
    }
    if let Some(file) = &target.categories_file {
        params.insert("categories_file".into(), json!(file));
    }

    let action = match target.persistent {
        Some(window) => {
            params.insert("tmin".into(), json!(window.min()));
            params.insert("tmax".into(), json!(window.max()));
            action.persistent()
        }
        None => action,
    };

    json!({ "action": action.as_str(), "params": params })
}

async fn cmd_submit(client: &ApiClient, body: &Value) -> Result<()> {
    let submitted = client.submit(body).await?;
    tracing::info!(job_id = %submitted.job_id, status = %submitted.status, "Job submitted");
    println!("{}", submitted.job_id);
    Ok(())
}

async fn cmd_list(client: &ApiClient, status: Option<&str>) -> Result<()> {
    let list = client.jobs(status).await?;
    if list.jobs.is_empty() {
        println!("No jobs");
        return Ok(());
    }

    for (id, status) in &list.jobs {
        println!("{id}  {status}");
    }
    println!("\nTotal: {} jobs", list.total);
    Ok(())
}

async fn cmd_status(client: &ApiClient, ids: &[String]) -> Result<()> {
    let mut failures = 0;
    for id in ids {
        match client.job(id).await {
            Ok(job) => {
                println!("{} [{}] {}", job.id, job.action, job.status);
                for line in &job.output {
                    println!("  {line}");
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("{id}: {e:#}");
            }
        }
    }

    if failures > 0 {
        return Err(anyhow!("{failures} of {} job(s) could not be read", ids.len()));
    }
    Ok(())
}

async fn cmd_actions(client: &ApiClient) -> Result<()> {
    let table = client.actions().await?;

    println!("Actions:");
    for action in &table.actions {
        println!("  {:<14} {}", action.name, action.description);
    }

    println!("\nParameters:");
    for param in &table.params {
        let short = param
            .short
            .as_deref()
            .map(|s| format!("-{s}, "))
            .unwrap_or_default();
        let default = param
            .default
            .as_deref()
            .map(|d| format!(" (default: {d})"))
            .unwrap_or_default();
        println!("  {short}--{:<18} {}{default}", param.flag, param.help);
    }
    Ok(())
}
