//! Chronicle: an AI Dungeon Master with long-term memory.
//!
//! A line-oriented REPL. Each action is narrated by a language model that
//! sees the recent turns, the relevant past episodes and the world graph.
//!
//! ```bash
//! GROQ_API_KEY=... cargo run -p chronicle
//! ```
//!
//! Memory starts empty and is discarded on exit. Set `CHRONICLE_KEEP_STATE=1`
//! to keep the episodic archive and graph between runs.

mod repl;

use chat::Chat;
use chronicle_core::{
    ChronicleConfig, ContextAssembler, EpisodicArchive, LlmExtractor, LlmGenerator,
};
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let chat = match Chat::from_env() {
        Ok(chat) => chat,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!(
                "Set GROQ_API_KEY (or LLM_API_KEY / LLM_API_BASE) in .env or the environment."
            );
            std::process::exit(1);
        }
    };

    let config = ChronicleConfig::from_env()?;
    let keep_state = keep_state();

    println!("Summoning the Dungeon Master...");
    if !keep_state {
        remove_archive(&config.store_path).await;
    }

    let embedder = config.build_embedder().await?;
    let archive = EpisodicArchive::open(&config.store_path, embedder).await;
    let graph = config.build_graph()?;
    let store_path = config.store_path.clone();

    let mut memory = ContextAssembler::new(
        config,
        archive,
        graph,
        Box::new(LlmExtractor::new(chat.clone())),
        Box::new(LlmGenerator::new(chat)),
    );
    if !keep_state {
        memory.reset().await?;
    }

    let result = repl::run(&mut memory).await;

    if keep_state {
        memory.persist().await;
    } else {
        if let Err(e) = memory.close().await {
            warn!(error = %e, "failed to clear world graph on exit");
        }
        remove_archive(&store_path).await;
    }
    info!("session ended");

    result.map_err(Into::into)
}

fn keep_state() -> bool {
    std::env::var("CHRONICLE_KEEP_STATE")
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

async fn remove_archive(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!(path = %path.display(), "removed episodic archive"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove episodic archive"),
    }
}

fn print_help() {
    println!("Chronicle - an AI Dungeon Master with long-term memory");
    println!();
    println!("Usage: chronicle [--help]");
    println!();
    println!("Environment (also read from .env):");
    println!("  GROQ_API_KEY / LLM_API_KEY  API key for the chat model");
    println!("  LLM_API_BASE                OpenAI-compatible base URL");
    println!("  LLM_MODEL                   Chat model name");
    println!("  EPISODIC_K                  Episodes recalled per turn (default 5)");
    println!("  WORKING_CAPACITY            Recent turns kept verbatim (default 6)");
    println!("  SIMILARITY_THRESHOLD        Minimum recall score (default 0.7)");
    println!("  ANCHOR_ENTITIES             Entities always looked up (default Kael)");
    println!("  EPISODIC_STORE_PATH         Archive file (default episodic_store.json)");
    println!("  EMBEDDING_PROVIDER          onnx | api (default onnx, all-MiniLM-L6-v2)");
    println!("  EMBEDDING_DATA_DIR          Local model cache (default .chronicle)");
    println!("  NEO4J_URI                   Neo4j HTTP URL; unset keeps the graph in memory");
    println!("  CHRONICLE_KEEP_STATE        Keep memory between runs");
    println!("  RUST_LOG                    Log filter (default info)");
}
