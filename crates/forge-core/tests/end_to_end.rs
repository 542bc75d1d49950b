//! End-to-end scenarios over a file-backed project.
//!
//! Models are deterministic doubles; everything else (corpus loading, the
//! vector cache, the project store) runs against a temporary directory.

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use forge_core::{
    Chunker, Corpus, EmbeddingGateway, FileProjectStore, ForgeConfig, ForgeError,
    GenerationOrchestrator, KnowledgeBase, KnowledgeConfig, ProjectStore, PROGRESS_FILENAME,
};
use tempfile::TempDir;

use common::{gateway, outliner, write_reference, writer, FnModel, HashEmbedder};

const LENGTHS: [usize; 3] = [2500, 1800, 3300];

fn knowledge_config(root: &Path) -> KnowledgeConfig {
    KnowledgeConfig {
        reference_dir: Some(root.join("references")),
        chunk_size: 1000,
        chunk_overlap: 200,
        cache_dir: root.join("cache"),
        top_k: 5,
        ..Default::default()
    }
}

fn write_corpus(root: &Path) {
    let refs = root.join("references");
    write_reference(&refs, "cultivation.txt", "修炼体系分为炼气筑基金丹元婴化神九重境界。", LENGTHS[0]);
    write_reference(&refs, "sects.txt", "青云宗坐落于东域群山之间，门规森严。", LENGTHS[1]);
    write_reference(&refs, "people.txt", "林风出身寒门，性格坚韧，修炼刻苦。", LENGTHS[2]);
}

fn config(root: &Path, target: u32) -> ForgeConfig {
    let mut config = ForgeConfig::default();
    config.novel.title = "青云志".to_string();
    config.novel.target_chapters = target;
    config.knowledge = knowledge_config(root);
    config.output.dir = root.join("output");
    config.generation.outline_batch_size = 2;
    config.generation.max_retries = 2;
    config
}

fn orchestrator(root: &Path, target: u32, content: Arc<FnModel>) -> GenerationOrchestrator {
    let config = config(root, target);
    let kb = KnowledgeBase::new(
        EmbeddingGateway::new(HashEmbedder::new(64), 16),
        None,
        &config.knowledge,
    )
    .unwrap();
    let corpus = Corpus::load(&config.knowledge).unwrap();
    let store: Arc<dyn ProjectStore> = Arc::new(FileProjectStore::new(root.join("output")));
    let gateway = gateway(FnModel::new("outliner", outliner), content, None);
    GenerationOrchestrator::new(config, store, gateway).with_knowledge(kb, Some(corpus))
}

#[test]
fn test_three_file_corpus_build_and_query() {
    let temp = TempDir::new().unwrap();
    write_corpus(temp.path());
    let knowledge = knowledge_config(temp.path());

    let corpus = Corpus::load(&knowledge).unwrap();
    assert_eq!(corpus.len(), 3);

    let mut kb = KnowledgeBase::new(EmbeddingGateway::new(HashEmbedder::new(64), 16), None, &knowledge).unwrap();
    let built = kb.build(&corpus, false).unwrap();
    assert!(!built.cache_hit);

    let chunker = Chunker::new(1000, 200).unwrap();
    let expected: usize = LENGTHS.iter().map(|len| chunker.expected_chunks(*len)).sum();
    assert_eq!(built.chunk_count, expected);
    assert_eq!(expected, 3 + 2 + 4);

    let results = kb.query("修炼体系", 5).unwrap();
    assert_eq!(results.len(), 5);
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));

    let mut reopened = KnowledgeBase::new(EmbeddingGateway::new(HashEmbedder::new(64), 16), None, &knowledge).unwrap();
    assert!(reopened.build(&corpus, false).unwrap().cache_hit);
}

#[test]
fn test_embedding_dimension_change_rebuilds_once() {
    let temp = TempDir::new().unwrap();
    write_corpus(temp.path());
    let knowledge = knowledge_config(temp.path());
    let embedder = HashEmbedder::new(64);

    let mut kb = KnowledgeBase::new(EmbeddingGateway::new(embedder.clone(), 16), None, &knowledge).unwrap();
    kb.build(&Corpus::load(&knowledge).unwrap(), false).unwrap();

    embedder.set_dimension(32);
    assert_eq!(kb.query("修炼体系", 5).unwrap().len(), 5);
    assert_eq!(kb.rebuild_count(), 1);
    assert_eq!(kb.descriptor().unwrap().dimension, 32);

    kb.query("青云宗", 3).unwrap();
    assert_eq!(kb.rebuild_count(), 1);
}

#[test]
fn test_missing_reference_file_is_fatal() {
    let temp = TempDir::new().unwrap();
    let knowledge = KnowledgeConfig {
        reference_files: vec![temp.path().join("absent.txt")],
        ..knowledge_config(temp.path())
    };
    let err = Corpus::load(&knowledge).unwrap_err();
    assert!(matches!(err, ForgeError::ReferenceMissing { .. }));
    assert!(err.is_fatal());
}

#[test]
fn test_auto_run_persists_state_and_resumes() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write_corpus(root);
    let output = root.join("output");

    let report = orchestrator(root, 3, FnModel::new("writer", writer)).auto(None).unwrap();
    assert_eq!(report.succeeded, vec![1, 2, 3]);
    for file in ["outline.json", "summary.json", "progress.json", "config_snapshot.json"] {
        assert!(output.join(file).exists(), "{} should exist", file);
    }
    assert!(output.join("第2章_第2回.txt").exists());

    let progress: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output.join(PROGRESS_FILENAME)).unwrap()).unwrap();
    assert_eq!(progress["current_chapter"], 4);
    assert_eq!(progress["last_outline_chapter"], 3);

    let summaries: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output.join("summary.json")).unwrap()).unwrap();
    assert_eq!(summaries["1"], "林风闭关修炼。");

    let first_chapter = fs::read_to_string(output.join("第1章_第1回.txt")).unwrap();
    let report = orchestrator(root, 5, FnModel::new("writer", writer))
        .content(None, None, None)
        .unwrap();
    assert_eq!(report.succeeded, vec![4, 5]);
    assert_eq!(fs::read_to_string(output.join("第1章_第1回.txt")).unwrap(), first_chapter);

    let store = FileProjectStore::new(&output);
    assert_eq!(store.chapter_numbers().unwrap(), vec![1, 2, 3, 4, 5]);
    assert_eq!(store.load_progress().unwrap().unwrap().current_chapter, 6);
}

#[test]
fn test_target_chapter_regenerates_only_that_chapter() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write_corpus(root);
    let output = root.join("output");

    orchestrator(root, 6, FnModel::new("writer", writer)).auto(None).unwrap();
    let store = FileProjectStore::new(&output);
    let before: Vec<String> = (1..=6).map(|n| store.load_chapter(n).unwrap().unwrap()).collect();

    let report = orchestrator(root, 6, FnModel::new("writer", writer))
        .content(None, Some(5), None)
        .unwrap();
    assert_eq!(report.succeeded, vec![5]);

    for n in 1..=6u32 {
        let now = store.load_chapter(n).unwrap().unwrap();
        if n == 5 {
            assert_ne!(now, before[4]);
        } else {
            assert_eq!(now, before[n as usize - 1]);
        }
    }
    assert_eq!(store.load_progress().unwrap().unwrap().current_chapter, 7);
}

#[test]
fn test_fallback_takes_over_when_primary_is_down() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write_corpus(root);

    let primary = FnModel::unreachable("primary");
    let fallback = FnModel::new("fallback", writer);
    let config = config(root, 2);
    let store: Arc<dyn ProjectStore> = Arc::new(FileProjectStore::new(root.join("output")));
    let gateway = gateway(FnModel::new("outliner", outliner), primary.clone(), Some(fallback.clone()));

    let report = GenerationOrchestrator::new(config, store, gateway).auto(None).unwrap();
    assert_eq!(report.succeeded, vec![1, 2]);
    assert_eq!(fallback.calls(), 4);
    assert_eq!(primary.calls(), 8);
}

#[test]
fn test_corrupt_progress_aborts_the_run() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write_corpus(root);
    fs::create_dir_all(root.join("output")).unwrap();
    fs::write(root.join("output").join(PROGRESS_FILENAME), "{not json").unwrap();

    let err = orchestrator(root, 2, FnModel::new("writer", writer))
        .content(None, None, None)
        .unwrap_err();
    assert!(matches!(err, ForgeError::CorruptState { .. }));
    assert!(err.is_fatal());
    assert!(err.to_string().contains(PROGRESS_FILENAME));
}
