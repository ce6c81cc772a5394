//! Integration tests that call a real chat model.
//!
//! These tests require GROQ_API_KEY (or LLM_API_KEY / LLM_API_BASE) to be set
//! via .env file or environment.
//! Run with: `cargo test -p chronicle-core --test api_integration -- --ignored`
//!
//! These are marked #[ignore] by default to avoid API costs and slow runs.

use chat::Chat;
use chronicle_core::{
    ChronicleConfig, ContextAssembler, EntityExtractor, EpisodicArchive, LlmExtractor,
    LlmGenerator, TextGenerator, WorldGraph,
};
use tempfile::TempDir;

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

/// Build a client if credentials are available
fn client() -> Option<Chat> {
    setup();
    match Chat::from_env() {
        Ok(chat) => Some(chat),
        Err(e) => {
            eprintln!("Skipping test: {e}");
            None
        }
    }
}

#[tokio::test]
#[ignore] // Run with: cargo test -p chronicle-core --test api_integration -- --ignored
async fn test_extractor_finds_named_npc() {
    let Some(chat) = client() else { return };
    let extractor = LlmExtractor::new(chat);

    let extraction = extractor
        .extract("Kael strikes the goblin down. The goblin lies dead beside the cave entrance.")
        .await
        .expect("extractor should return usable JSON");

    let names = extraction.entity_names();
    println!("Extracted: {names:?}");
    assert!(
        names.iter().any(|n| n.eq_ignore_ascii_case("goblin")),
        "expected a goblin entity, got {names:?}"
    );
}

#[tokio::test]
#[ignore]
async fn test_generator_narrates() {
    let Some(chat) = client() else { return };
    let generator = LlmGenerator::new(chat);

    let text = generator
        .generate("", "start")
        .await
        .expect("generator should respond");
    println!("DM: {text}");
    assert!(!text.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_two_turns_build_memory() {
    let Some(chat) = client() else { return };
    let dir = TempDir::new().expect("Failed to create temp directory");

    let config = ChronicleConfig::new()
        .with_store_path(dir.path().join("episodic_store.json"))
        .with_similarity_threshold(0.0);
    let embedder = config.build_embedder().await.expect("embedding model loads");
    let archive = EpisodicArchive::open(&config.store_path, embedder).await;
    let mut memory = ContextAssembler::new(
        config,
        archive,
        WorldGraph::in_memory(),
        Box::new(LlmExtractor::new(chat.clone())),
        Box::new(LlmGenerator::new(chat)),
    );

    let first = memory.play_turn("start").await.expect("first turn");
    println!("Turn 1: {first}");
    let second = memory
        .play_turn("I light a torch and look around")
        .await
        .expect("second turn");
    println!("Turn 2: {second}");

    assert_eq!(memory.archive().len(), 2);
    assert_eq!(memory.recent_turns().len(), 2);

    let context = memory.build_context("what do I remember?").await;
    println!("Context:\n{context}");
    assert!(context.starts_with("Recent actions and DM responses:"));
}
