//! Chorus: send one prompt to several chat models and compare the answers.

use std::path::PathBuf;
use std::sync::Arc;

use chorus_chat::{Aggregator, ModelCatalog};
use chorus_core::ChorusConfig;
use chorus_store::SqliteStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod routes;
mod state;

use state::AppState;

fn resolve_data_dir() -> PathBuf {
    std::env::var("CHORUS_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let exe_dir = std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|p| p.to_path_buf()));
            if let Some(dir) = exe_dir {
                let parent_data = dir.join("../data");
                if parent_data.exists() {
                    return parent_data;
                }
            }
            PathBuf::from("data")
        })
}

fn print_models(catalog: &ModelCatalog) {
    for entry in catalog.entries() {
        println!("{:<18} {}", entry.id, entry.upstream);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let data_dir = resolve_data_dir();
    let config = ChorusConfig::from_env(&data_dir)?;
    let catalog = Arc::new(ModelCatalog::load(&config.data_paths.models_file));

    if args.len() > 1 {
        match args[1].as_str() {
            "models" => {
                print_models(&catalog);
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("Chorus: compare answers from several chat models");
                println!();
                println!("Usage: chorus [command]");
                println!();
                println!("Commands:");
                println!("  (none)     Start the server");
                println!("  models     List the model catalog");
                println!("  help       Show this help message");
                return Ok(());
            }
            _ => {
                eprintln!("Unknown command: {}. Use 'chorus help' for usage.", args[1]);
                std::process::exit(1);
            }
        }
    }

    info!("Data directory: {}", data_dir.display());
    if config.upstream.credential().is_none() {
        warn!("OPENROUTER_API_KEY is not set; /api/chat will answer 500 until it is");
    }

    let store = SqliteStore::open(&config.data_paths.db)
        .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))?;
    let aggregator = Aggregator::new(config.upstream.clone(), catalog.clone())?;
    info!("{} models in catalog", catalog.len());

    let port = config.port;
    let state = Arc::new(AppState::new(config, aggregator, store));
    let app = routes::build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Chorus server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
