use legalft_core::config::HubSettings;
use legalft_hub::{collect_files, resolve_token, PublishError, Publisher};

#[test]
fn collects_nested_files_and_skips_hidden() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("model.safetensors"), b"weights").unwrap();
    std::fs::write(dir.path().join("README.md"), b"# card").unwrap();
    std::fs::create_dir_all(dir.path().join("1_Pooling")).unwrap();
    std::fs::write(dir.path().join("1_Pooling/config.json"), b"{}").unwrap();
    std::fs::create_dir_all(dir.path().join(".cache")).unwrap();
    std::fs::write(dir.path().join(".cache/lock"), b"x").unwrap();

    let files = collect_files(dir.path()).unwrap();
    let paths: Vec<&str> = files.iter().map(|f| f.path_in_repo.as_str()).collect();
    assert_eq!(paths, vec!["1_Pooling/config.json", "README.md", "model.safetensors"]);
    assert_eq!(files[2].size, 7);
    assert_eq!(files[2].oid.len(), 64);
}

#[test]
fn evaluation_logs_are_not_uploaded() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("model.safetensors"), b"weights").unwrap();
    std::fs::create_dir_all(dir.path().join("eval")).unwrap();
    std::fs::write(dir.path().join("eval/ir_results.jsonl"), b"{}\n").unwrap();

    let files = collect_files(dir.path()).unwrap();
    let paths: Vec<&str> = files.iter().map(|f| f.path_in_repo.as_str()).collect();
    assert_eq!(paths, vec!["model.safetensors"]);
}

#[test]
fn empty_folder_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(collect_files(dir.path()), Err(PublishError::EmptyFolder(_))));
}

#[test]
fn missing_token_fails_before_any_request() {
    let env_name = "LEGALFT_TEST_TOKEN_THAT_IS_NOT_SET";
    std::env::remove_var(env_name);
    assert!(matches!(resolve_token(env_name), Err(PublishError::MissingToken(n)) if n == env_name));

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("model.safetensors"), b"w").unwrap();
    let settings = HubSettings {
        endpoint: "http://127.0.0.1:9".into(),
        token_env: env_name.into(),
        ..HubSettings::default()
    };
    let err = Publisher::new(settings).publish(dir.path()).unwrap_err();
    assert!(matches!(err, PublishError::MissingToken(_)));
}

#[test]
fn blank_token_counts_as_missing() {
    let env_name = "LEGALFT_TEST_BLANK_TOKEN";
    std::env::set_var(env_name, "   ");
    assert!(matches!(resolve_token(env_name), Err(PublishError::MissingToken(_))));
    std::env::set_var(env_name, " hf_abc ");
    assert_eq!(resolve_token(env_name).unwrap(), "hf_abc");
    std::env::remove_var(env_name);
}
