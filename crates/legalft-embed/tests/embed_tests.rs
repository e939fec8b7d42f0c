use legalft_embed::{Embedder, FakeEmbedder, ModelFiles};

#[test]
fn fake_embedder_shapes_and_determinism() {
    let embedder = FakeEmbedder::new(64);
    let texts = vec!["hello world".to_string(), "hello world".to_string()];
    let embs = embedder.embed_batch(&texts).expect("embed_batch");
    let v1 = &embs[0];
    let v2 = &embs[1];

    assert_eq!(v1.len(), 64, "embedding dim is 64");

    // Norm approximately 1.0
    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");

    // Deterministic for same input
    for (a, b) in v1.iter().zip(v2.iter()) { assert!((a - b).abs() <= 1e-6); }
}

#[test]
fn zero_dim_fake_embedder_errors_instead_of_panicking() {
    let embedder = FakeEmbedder::new(0);
    assert!(embedder.embed_text("hello world").is_empty());
    assert!(embedder.embed_batch(&["hello".to_string()]).is_err());
}

#[test]
fn model_files_from_dir_requires_weights() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("config.json"), "{}").unwrap();
    std::fs::write(tmp.path().join("tokenizer.json"), "{}").unwrap();
    let err = ModelFiles::from_dir(tmp.path()).unwrap_err();
    assert!(err.to_string().contains("model.safetensors"));
}

#[test]
fn model_files_from_dir_collects_side_files() {
    let tmp = tempfile::tempdir().unwrap();
    for name in ["config.json", "tokenizer.json", "model.safetensors", "modules.json"] {
        std::fs::write(tmp.path().join(name), "{}").unwrap();
    }
    std::fs::create_dir_all(tmp.path().join("1_Pooling")).unwrap();
    std::fs::write(tmp.path().join("1_Pooling/config.json"), "{}").unwrap();

    let files = ModelFiles::from_dir(tmp.path()).expect("files");
    assert!(files.extra("modules.json").is_some());
    assert!(files.extra("1_Pooling/config.json").is_some());
    assert!(files.extra("vocab.txt").is_none());
}
