//! Recall with the local all-MiniLM-L6-v2 model.
//!
//! The first run downloads the model (about 23 MB) into `EMBEDDING_DATA_DIR`
//! (default `.chronicle`). Run with:
//! `cargo test -p chronicle-core --test local_embeddings -- --ignored`

use chronicle_core::memory::episodic::MINILM_DIMENSIONS;
use chronicle_core::{
    ChronicleConfig, ContextAssembler, EpisodicArchive, ScriptedExtractor, ScriptedGenerator,
    WorldGraph,
};
use tempfile::TempDir;

async fn played(dir: &TempDir) -> ContextAssembler {
    let _ = dotenvy::dotenv();
    let config = ChronicleConfig::from_env()
        .expect("valid environment")
        .with_store_path(dir.path().join("episodic_store.json"));
    let embedder = config.build_embedder().await.expect("local model loads");
    assert_eq!(embedder.dimensions(), MINILM_DIMENSIONS);

    let archive = EpisodicArchive::open(&config.store_path, embedder).await;
    let mut memory = ContextAssembler::new(
        config,
        archive,
        WorldGraph::in_memory(),
        Box::new(ScriptedExtractor::empty()),
        Box::new(ScriptedGenerator::new(Vec::<String>::new())),
    );
    memory
        .update_after_generation("go north", "You enter a cave.")
        .await
        .unwrap();
    memory
        .update_after_generation("attack the goblin", "The goblin dies.")
        .await
        .unwrap();
    memory
}

#[tokio::test]
#[ignore] // Run with: cargo test -p chronicle-core --test local_embeddings -- --ignored
async fn test_repeated_action_recalls_its_episode() {
    let dir = TempDir::new().unwrap();
    let memory = played(&dir).await;

    let report = memory.query_memory("go north", Some(2)).await.unwrap();
    let best = &report.episodic[0];
    println!("go north -> {:.3} {:?}", best.score, best.text);
    assert!(best.text.starts_with("Player: go north"));
    assert!(best.score > 0.5);
}

#[tokio::test]
#[ignore]
async fn test_paraphrase_prefers_matching_episode() {
    let dir = TempDir::new().unwrap();
    let memory = played(&dir).await;

    let report = memory
        .query_memory("I go north again into the cave", Some(2))
        .await
        .unwrap();
    for hit in &report.episodic {
        println!("{:.3} {:?}", hit.score, hit.text);
    }
    assert!(report.episodic[0].text.starts_with("Player: go north"));
    assert!(report.episodic[0].score > report.episodic[1].score);
}

#[tokio::test]
#[ignore]
async fn test_identical_text_scores_one() {
    let dir = TempDir::new().unwrap();
    let memory = played(&dir).await;

    let report = memory
        .query_memory("Player: attack the goblin\nDM: The goblin dies.", Some(1))
        .await
        .unwrap();
    assert!((report.episodic[0].score - 1.0).abs() < 1e-3);
}
