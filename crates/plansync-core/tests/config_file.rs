//! Sessions configured from TOML files

use plansync_core::prelude::*;
use plansync_core::ConfigError;
use plansync_test_utils::{kitchen_payload, seeded_store};
use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn copy_suffix_from_file_names_keep_both_copy() {
    let file = config_file(
        r#"
        copy_suffix = " - mine"
        previews_enabled = false

        [retry]
        max_attempts = 2
        initial_delay_ms = 1
        max_delay_ms = 2
        "#,
    );
    let config = SyncConfig::load(file.path()).unwrap();
    assert_eq!(config.retry.max_attempts, 2);
    assert_eq!(config.default_document_name, "Untitled project");

    let (memory, doc) = seeded_store("Kitchen", kitchen_payload("oak")).await;
    let build = || {
        ProjectSession::builder(memory.clone())
            .config(config.clone())
            .build()
    };
    let a = build();
    let b = build();
    assert!(a.load(doc.id).await.is_loaded());
    assert!(b.load(doc.id).await.is_loaded());

    a.edit(|model| model.set("island", json!(true)));
    assert!(a.save().await.is_success());
    b.edit(|model| model.set("island", json!(false)));
    assert!(matches!(b.save().await, SaveOutcome::Conflict { .. }));

    let outcome = b.resolve_conflict(ResolveStrategy::KeepBoth).await;

    let ResolutionOutcome::Resolved { copy: Some(copy), .. } = outcome else {
        panic!("expected a copy, got {outcome:?}");
    };
    assert_eq!(memory.peek(&copy).unwrap().name, "Kitchen - mine");
}

#[test]
fn config_round_trips_through_file() {
    let config = SyncConfig::new()
        .with_channel_name("studio")
        .with_owner_id("user-7");
    let file = config_file(&config.to_toml_string().unwrap());

    assert_eq!(SyncConfig::load(file.path()).unwrap(), config);
}

#[test]
fn invalid_values_are_reported() {
    let file = config_file("[retry]\nmax_attempts = 0\n");

    let err = SyncConfig::load(file.path()).unwrap_err();

    assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("max_attempts")));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let file = config_file("copy_suffix = [");

    assert!(matches!(
        SyncConfig::load(file.path()),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    let err = SyncConfig::load(&path).unwrap_err();

    assert!(matches!(err, ConfigError::Io { path: ref p, .. } if *p == path));
}
