//! Cache manager tests: add, remove, link, sync, clean, stats.

mod common;

use common::{TestCache, tree, write_ollama_model};
use hoard_core::{SourceType, hash_payload};
use hoard_engine::{CacheError, ErrorClass};
use hoard_sources::AcquireContext;
use httpmock::prelude::*;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_add_local_is_idempotent() {
    let cache = TestCache::new().await;
    let source = cache.import_file("tiny.gguf", b"tiny weights");
    let id = format!("local:{}", source.display());

    let first = cache.manager.add(&id, &TestCache::ctx()).await.unwrap();
    assert_eq!(first.identifier, "local:tiny.gguf");
    assert_eq!(first.source, SourceType::LocalImport);
    assert_eq!(first.size_bytes, 12);
    assert!(first.content_hash.is_some());

    let writes = cache.writes();
    let second = cache.manager.add(&id, &TestCache::ctx()).await.unwrap();
    assert_eq!(second.identifier, first.identifier);
    assert_eq!(second.content_hash, first.content_hash);
    assert_eq!(cache.writes(), writes);

    // The bare stored name resolves the same artifact.
    let by_name = cache
        .manager
        .add("local:tiny.gguf", &TestCache::ctx())
        .await
        .unwrap();
    assert_eq!(by_name, first);
}

#[tokio::test]
async fn test_add_rejects_bad_identifiers_without_touching_cache() {
    let cache = TestCache::new().await;
    let before = tree(&cache.config.cache_root);

    for bad in [
        "source://bad/id/with/too/many/slashes",
        "hf://bad/id/with/too/many/slashes",
        "hf:../escape",
        "no-scheme-at-all",
    ] {
        let err = cache.manager.add(bad, &TestCache::ctx()).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::UserError, "{bad}: {err}");
        assert_eq!(err.class().exit_code(), 1);
    }

    assert_eq!(tree(&cache.config.cache_root), before);
    assert!(!cache.config.downloads_dir().exists());
    assert!(cache.manager.status(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_add_cancelled_midway_leaves_no_row_or_file() {
    const SIZE: usize = 4 * 1024 * 1024;
    let cache = TestCache::new().await;
    let source = cache.import_file("big.gguf", &vec![3u8; SIZE]);

    let cancel = CancellationToken::new();
    let ctx = AcquireContext::new(cancel.clone()).with_progress(Arc::new(move |p| {
        if p.bytes_done >= (SIZE / 2) as u64 {
            cancel.cancel();
        }
    }));

    let err = cache
        .manager
        .add(&format!("local:{}", source.display()), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Cancelled));
    assert_eq!(err.class(), ErrorClass::Cancelled);
    assert!(cache.manager.status(None).await.unwrap().is_empty());
    assert!(tree(&cache.config.local_dir()).is_empty());
}

#[tokio::test]
async fn test_add_discards_payload_the_registry_rejects() {
    let cache = TestCache::new().await;
    let url = format!("sqlite://{}", cache.config.registry_path().display());
    let pool = sqlx::SqlitePool::connect(&url).await.unwrap();
    sqlx::query(
        "CREATE TRIGGER reject_inserts BEFORE INSERT ON artifacts \
         BEGIN SELECT RAISE(ABORT, 'inserts disabled'); END",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    let source = cache.import_file("model.gguf", b"never recorded");
    let result = cache
        .manager
        .add(&format!("local:{}", source.display()), &TestCache::ctx())
        .await;
    assert!(result.is_err());

    assert!(tree(&cache.config.local_dir()).is_empty());
    assert!(cache.manager.status(None).await.unwrap().is_empty());
    assert_eq!(std::fs::read(&source).unwrap(), b"never recorded");
}

#[tokio::test]
async fn test_add_download_then_remove_deletes_payload() {
    let weights = b"single file of weights".as_slice();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/models/org/tiny/tree/main");
            then.status(200).json_body(json!([
                {"type": "file", "path": "model.gguf", "oid": "x", "size": weights.len()}
            ]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/org/tiny/resolve/main/model.gguf");
            then.status(200).body(weights);
        })
        .await;

    let cache = TestCache::with_endpoint(server.base_url()).await;
    let added = cache
        .manager
        .add("hf://org/tiny", &TestCache::ctx())
        .await
        .unwrap();
    assert_eq!(added.identifier, "hf:org/tiny");
    assert_eq!(
        added.canonical_path,
        cache.config.downloads_dir().join("org--tiny/model.gguf")
    );

    let report = cache.manager.remove("hf://org/tiny", false).await.unwrap();
    assert!(report.payload_deleted);
    assert_eq!(report.size_bytes, weights.len() as u64);
    assert!(tree(&cache.config.downloads_dir()).is_empty());
    assert!(cache.manager.status(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_in_use_is_blocked_until_unlinked() {
    let cache = TestCache::new().await;
    let payload = cache.add_local("model-x", b"model x weights").await;
    let app = cache.app_dir("chat");
    cache
        .manager
        .link(&app, None, &["local:model-x".to_string()])
        .await
        .unwrap();

    let before = cache.manager.status(None).await.unwrap();
    let writes = cache.writes();
    let err = cache.manager.remove("local:model-x", false).await.unwrap_err();
    match &err {
        CacheError::InUse { identifier, apps } => {
            assert_eq!(identifier, "local:model-x");
            assert_eq!(apps, &["chat".to_string()]);
        }
        other => panic!("expected InUse, got {other:?}"),
    }
    assert_eq!(err.blocking_apps(), Some(["chat".to_string()].as_slice()));
    assert!(err.to_string().contains("chat"));
    assert_eq!(cache.writes(), writes);
    assert_eq!(cache.manager.status(None).await.unwrap(), before);
    assert!(payload.exists());

    assert_eq!(cache.manager.unlink("chat").await.unwrap(), 1);
    let report = cache.manager.remove("local:model-x", false).await.unwrap();
    assert!(report.payload_deleted);
    assert!(!payload.exists());
}

#[tokio::test]
async fn test_forced_remove_releases_apps() {
    let cache = TestCache::new().await;
    cache.add_local("model-y", b"weights").await;
    let app = cache.app_dir("notebook");
    cache
        .manager
        .link(&app, Some("notebook"), &["local:model-y".to_string()])
        .await
        .unwrap();

    let report = cache.manager.remove("local:model-y", true).await.unwrap();
    assert_eq!(report.released_apps, vec!["notebook"]);
    assert!(cache.manager.status(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_link_validates_before_writing() {
    let cache = TestCache::new().await;
    let writes = cache.writes();

    let missing = cache.temp.path().join("nowhere");
    let err = cache.manager.link(&missing, None, &[]).await.unwrap_err();
    assert!(matches!(err, CacheError::NotFound(_)));

    let app = cache.app_dir("chat");
    let err = cache
        .manager
        .link(&app, None, &["hf:org/unknown".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::NotFound(_)));
    assert_eq!(cache.writes(), writes);

    let report = cache.manager.link(&app, None, &[]).await.unwrap();
    assert_eq!(report.name, "chat");

    let err = cache
        .manager
        .link(&cache.app_dir("other"), Some("chat"), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_unlink_unknown_app_is_not_found() {
    let cache = TestCache::new().await;
    let err = cache.manager.unlink("ghost").await.unwrap_err();
    assert!(matches!(err, CacheError::NotFound(_)));
    assert_eq!(err.class(), ErrorClass::UserError);
}

#[tokio::test]
async fn test_status_reports_usage() {
    let cache = TestCache::new().await;
    cache.add_local("alpha", b"alpha weights").await;
    cache.add_local("beta", b"beta").await;
    let app = cache.app_dir("chat");
    cache
        .manager
        .link(&app, None, &["local:alpha".to_string()])
        .await
        .unwrap();

    let status = cache.manager.status(None).await.unwrap();
    assert_eq!(status.len(), 2);
    let alpha = status.iter().find(|s| s.identifier == "local:alpha").unwrap();
    assert_eq!(alpha.used_by, vec!["chat"]);
    assert_eq!(alpha.source, "local-import");
    assert_eq!(alpha.size_bytes, 13);
    let beta = status.iter().find(|s| s.identifier == "local:beta").unwrap();
    assert!(beta.used_by.is_empty());

    let json = serde_json::to_value(alpha).unwrap();
    assert_eq!(
        json,
        json!({
            "identifier": "local:alpha",
            "size_bytes": 13,
            "source": "local-import",
            "used_by": ["chat"],
            "is_symlink": false
        })
    );

    assert!(
        cache
            .manager
            .status(Some(SourceType::Download))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_second_sync_performs_no_writes() {
    let cache = TestCache::new().await;
    write_ollama_model(&cache.config.ollama_dir, "llama3.2", "7b", b"gguf bytes");
    write_ollama_model(&cache.config.ollama_dir, "phi3", "latest", b"other gguf");
    let cancel = CancellationToken::new();

    let first = cache
        .manager
        .sync(SourceType::ForeignSymlink, &cancel)
        .await
        .unwrap();
    assert_eq!(first.inserted, 2);
    assert!(first.failures.is_empty());

    let writes = cache.writes();
    let second = cache
        .manager
        .sync(SourceType::ForeignSymlink, &cancel)
        .await
        .unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.unchanged, 2);
    assert_eq!(cache.writes(), writes);
}

#[tokio::test]
async fn test_sync_collects_failures_and_reports_missing() {
    let cache = TestCache::new().await;
    write_ollama_model(&cache.config.ollama_dir, "good", "latest", b"good bytes");
    let broken = cache
        .config
        .ollama_dir
        .join("manifests/registry.ollama.ai/library/broken/latest");
    std::fs::create_dir_all(broken.parent().unwrap()).unwrap();
    std::fs::write(&broken, b"{not json").unwrap();

    let cancel = CancellationToken::new();
    let report = cache
        .manager
        .sync(SourceType::ForeignSymlink, &cancel)
        .await
        .unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "broken:latest");

    let payload = cache.add_local("gone.bin", b"soon gone").await;
    std::fs::remove_file(&payload).unwrap();
    let report = cache.manager.sync(SourceType::LocalImport, &cancel).await.unwrap();
    assert_eq!(report.missing, vec!["local:gone.bin"]);
    // Missing artifacts are reported, not deleted.
    assert_eq!(cache.manager.status(Some(SourceType::LocalImport)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_sync_honors_cancellation() {
    let cache = TestCache::new().await;
    write_ollama_model(&cache.config.ollama_dir, "llama3.2", "7b", b"gguf bytes");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = cache.manager.sync_all(&cancel).await.unwrap_err();
    assert!(matches!(err, CacheError::Cancelled));
    assert!(cache.manager.status(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_clean_dry_run_mutates_nothing() {
    let cache = TestCache::new().await;
    let orphan = cache.add_local("orphan", b"orphaned weights").await;
    let kept = cache.add_local("kept", b"kept weights").await;
    write_ollama_model(&cache.config.ollama_dir, "llama3.2", "7b", b"gguf bytes");
    let cancel = CancellationToken::new();
    cache
        .manager
        .sync(SourceType::ForeignSymlink, &cancel)
        .await
        .unwrap();
    let app = cache.app_dir("chat");
    cache
        .manager
        .link(&app, None, &["local:kept".to_string()])
        .await
        .unwrap();

    let writes = cache.writes();
    let files = tree(&cache.config.cache_root);
    let report = cache.manager.clean(true, &cancel).await.unwrap();
    assert!(report.dry_run);
    assert_eq!(report.removed.len(), 1);
    assert_eq!(report.removed[0].identifier, "local:orphan");
    assert_eq!(report.skipped_protected, vec!["ollama:llama3.2:7b"]);
    assert_eq!(report.reclaimed_bytes, 16);
    assert_eq!(cache.writes(), writes);
    assert_eq!(tree(&cache.config.cache_root), files);

    let report = cache.manager.clean(false, &cancel).await.unwrap();
    assert_eq!(report.removed.len(), 1);
    assert_eq!(report.reclaimed_bytes, 16);
    assert!(!orphan.exists());
    assert!(kept.exists());
    // The foreign link and its blob are left alone.
    assert!(cache.config.foreign_dir().join("llama3.2--7b").exists());
    assert_eq!(cache.manager.status(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_remove_foreign_keeps_blob() {
    let cache = TestCache::new().await;
    let blob = write_ollama_model(&cache.config.ollama_dir, "llama3.2", "7b", b"gguf bytes");
    let added = cache
        .manager
        .add("ollama:llama3.2:7b", &TestCache::ctx())
        .await
        .unwrap();
    assert!(added.is_symlink);
    assert_eq!(added.symlink_target.as_deref(), Some(blob.as_path()));

    let report = cache.manager.remove("ollama:llama3.2:7b", false).await.unwrap();
    assert!(!report.payload_deleted);
    assert!(!added.canonical_path.exists());
    assert!(std::fs::symlink_metadata(&added.canonical_path).is_err());
    assert!(blob.exists());
}

#[tokio::test]
async fn test_stats_counts_canonical_payloads_once() {
    let cache = TestCache::new().await;
    cache.add_local("a.bin", b"0123456789").await;
    cache.add_local("b.bin", b"abcde").await;
    write_ollama_model(&cache.config.ollama_dir, "phi3", "latest", b"xyz");
    cache
        .manager
        .sync(SourceType::ForeignSymlink, &CancellationToken::new())
        .await
        .unwrap();

    let stats = cache.manager.stats().await.unwrap();
    assert_eq!(stats.artifact_count, 3);
    assert_eq!(stats.total_size, 15);
    assert_eq!(stats.logical_size, 18);
    // The foreign model has no copy anywhere else, so its link saves nothing.
    assert_eq!(stats.savings, 0);
    assert_eq!(stats.largest[0].identifier, "local:a.bin");
    let local = stats
        .by_source
        .iter()
        .find(|s| s.source == SourceType::LocalImport)
        .unwrap();
    assert_eq!(local.count, 2);
    assert_eq!(local.total_size, 15);
}

#[tokio::test]
async fn test_known_hashes_match_payloads() {
    let cache = TestCache::new().await;
    cache.add_local("a.bin", b"first payload").await;
    let dir = cache.config.import_roots[0].join("repo");
    std::fs::create_dir_all(dir.join("nested")).unwrap();
    std::fs::write(dir.join("config.json"), b"{}").unwrap();
    std::fs::write(dir.join("nested/model.bin"), b"tensors").unwrap();
    cache
        .manager
        .add(&format!("local:{}", dir.display()), &TestCache::ctx())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let registry = cache.manager.registry();
    for row in registry.list_artifacts(None).await.unwrap() {
        let hash = row.hash().expect("local imports are hashed on copy");
        assert_eq!(hash_payload(&row.path(), &cancel).unwrap(), hash, "{}", row.identifier);
    }
}
