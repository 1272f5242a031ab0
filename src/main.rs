use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;

use template_client::config::watcher::apply_updates;
use template_client::config::{load_or_default, ConfigWatcher};
use template_client::observability::{logging, metrics};
use template_client::ServiceClient;

#[derive(Parser)]
#[command(name = "template-client")]
#[command(about = "Resilient client for the family template and research service", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List template categories
    Categories,
    /// List templates in a category
    Templates {
        #[arg(long)]
        category: String,
    },
    /// List a caller's own templates
    Mine {
        #[arg(long)]
        caller: String,
    },
    /// List popular templates
    Popular {
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Search research content
    Search {
        #[arg(long)]
        caller: String,
        #[arg(long)]
        query: String,
    },
    /// Create a template from a JSON object
    Create {
        #[arg(long)]
        caller: String,
        #[arg(long)]
        payload: String,
    },
    /// Generate a template from a natural-language query
    Generate {
        #[arg(long)]
        caller: String,
        #[arg(long)]
        query: String,
    },
    /// Fill a template's fields from a JSON object
    Fill {
        #[arg(long)]
        caller: String,
        #[arg(long)]
        template: String,
        #[arg(long)]
        fields: String,
    },
    /// Print client health
    Health,
    /// Serve the health endpoints, reloading config on change, until Ctrl-C
    Serve {
        #[arg(long, default_value = "127.0.0.1:8081")]
        bind: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_or_default(cli.config.as_deref())?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "template-client starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let client = ServiceClient::init(config)?;
    let result = run(&client, cli.command, cli.config).await;
    client.shutdown().await;
    result
}

async fn run(
    client: &Arc<ServiceClient>,
    command: Commands,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Categories => print_json(&client.list_categories().await?),
        Commands::Templates { category } => print_json(&client.list_templates_by_category(&category).await?),
        Commands::Mine { caller } => print_json(&client.list_caller_templates(&caller).await?),
        Commands::Popular { limit } => print_json(&client.list_popular(limit).await?),
        Commands::Search { caller, query } => print_json(&client.search(&caller, &query).await?),
        Commands::Create { caller, payload } => {
            let payload: Value = serde_json::from_str(&payload)?;
            print_json(&client.create_template(&caller, payload).await?)
        }
        Commands::Generate { caller, query } => print_json(&client.generate_from_query(&caller, &query).await?),
        Commands::Fill { caller, template, fields } => {
            let fields: Value = serde_json::from_str(&fields)?;
            print_json(&client.fill_template(&caller, &template, fields).await?)
        }
        Commands::Health => print_json(&client.health()),
        Commands::Serve { bind } => serve(Arc::clone(client), bind, config_path).await,
    }
}

async fn serve(
    client: Arc<ServiceClient>,
    bind: SocketAddr,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = template_client::Shutdown::new();

    // Keep the watcher handle alive for the lifetime of the server.
    let _watcher = match config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(&path);
            let handle = watcher.start()?;
            tokio::spawn(apply_updates(Arc::clone(&client), updates, shutdown.subscribe()));
            Some(handle)
        }
        None => None,
    };

    let listener = TcpListener::bind(bind).await?;
    tracing::info!(address = %listener.local_addr()?, "Health endpoints listening");

    axum::serve(listener, template_client::admin::router(client))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received Ctrl-C, shutting down");
            shutdown.trigger();
        })
        .await?;

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
