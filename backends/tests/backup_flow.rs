use anyhow::Result;
use pinsnap_backends::{LocalBackend, RetryConfig, Retrying};
use pinsnap_core::{
    BackupKind, BackupOrchestrator, CipherAlgorithm, CreateBackupOptions, DiffKind,
    EncryptionOptions, Error, FileRecord, RestoreOptions, SnapshotOptions, Snapshotter,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (path, content) in files {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
}

fn orchestrator(store: &TempDir) -> BackupOrchestrator<LocalBackend> {
    BackupOrchestrator::new(LocalBackend::new(store.path()))
}

#[tokio::test]
async fn test_text_and_binary_roundtrip() -> Result<()> {
    let source = tempfile::tempdir()?;
    let store = tempfile::tempdir()?;
    let target = tempfile::tempdir()?;
    let png = [0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    write_tree(source.path(), &[("a.txt", &b"hello"[..]), ("b.png", &png[..])]);

    let snapshot = Snapshotter::new(SnapshotOptions::default())?
        .snapshot(source.path())
        .await?;
    assert_eq!(snapshot.get("a.txt"), Some(&FileRecord::text("hello", "text/plain")));
    assert_eq!(snapshot.get("b.png"), Some(&FileRecord::binary(&png, "image/png")));

    let orchestrator = orchestrator(&store);
    let backup = orchestrator
        .create_backup(&snapshot, &CreateBackupOptions::default())
        .await?;
    assert_eq!(orchestrator.backend().list().await?, vec![backup.hash.clone()]);

    orchestrator
        .restore_backup(&backup.hash, target.path(), &RestoreOptions::default())
        .await?;
    assert_eq!(fs::read(target.path().join("a.txt"))?, b"hello");
    assert_eq!(fs::read(target.path().join("b.png"))?, png);
    Ok(())
}

#[tokio::test]
async fn test_nested_tree_with_excludes() -> Result<()> {
    let source = tempfile::tempdir()?;
    let store = tempfile::tempdir()?;
    let target = tempfile::tempdir()?;
    write_tree(
        source.path(),
        &[
            ("docs/readme.md", &b"# docs"[..]),
            ("docs/deep/nested/data.json", &b"{\"v\":1}"[..]),
            ("node_modules/pkg/index.js", &b"module.exports = 1"[..]),
            ("server.log", &b"noise"[..]),
        ],
    );

    let options = SnapshotOptions::default()
        .with_excludes(vec!["node_modules/".to_string(), "*.log".to_string()]);
    let snapshot = Snapshotter::new(options.clone())?
        .snapshot(source.path())
        .await?;
    assert_eq!(
        snapshot.paths().collect::<Vec<_>>(),
        vec!["docs/deep/nested/data.json", "docs/readme.md"]
    );

    let orchestrator = orchestrator(&store);
    let backup = orchestrator
        .create_backup(&snapshot, &CreateBackupOptions::new(BackupKind::Full))
        .await?;
    orchestrator
        .restore_backup(&backup.hash, target.path(), &RestoreOptions::default())
        .await?;

    assert_eq!(
        fs::read(target.path().join("docs/deep/nested/data.json"))?,
        b"{\"v\":1}"
    );
    assert!(!target.path().join("server.log").exists());

    let comparison = orchestrator
        .compare_detailed(&backup.hash, source.path(), &options)
        .await?;
    assert!(comparison.is_equal);
    assert!(comparison.differences.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_detailed_comparison_after_edits() -> Result<()> {
    let source = tempfile::tempdir()?;
    let store = tempfile::tempdir()?;
    write_tree(
        source.path(),
        &[("keep.txt", &b"same"[..]), ("edit.txt", &b"before"[..]), ("drop.txt", &b"bye"[..])],
    );

    let options = SnapshotOptions::default();
    let orchestrator = orchestrator(&store);
    let snapshot = Snapshotter::new(options.clone())?
        .snapshot(source.path())
        .await?;
    let backup = orchestrator
        .create_backup(&snapshot, &CreateBackupOptions::default())
        .await?;

    fs::write(source.path().join("edit.txt"), "after!")?;
    fs::remove_file(source.path().join("drop.txt"))?;
    fs::write(source.path().join("new.txt"), "fresh")?;

    let comparison = orchestrator
        .compare_detailed(&backup.hash, source.path(), &options)
        .await?;
    assert!(!comparison.is_equal);

    let changes: Vec<(&str, DiffKind)> = comparison
        .differences
        .iter()
        .map(|diff| (diff.path.as_str(), diff.kind))
        .collect();
    assert_eq!(
        changes,
        vec![
            ("edit.txt", DiffKind::Modified),
            ("new.txt", DiffKind::Added),
            ("drop.txt", DiffKind::Deleted),
        ]
    );
    assert_eq!(comparison.total_changes.total(), 3);

    let modified = &comparison.differences[0];
    assert!(modified.old_checksum.is_some() && modified.new_checksum.is_some());
    assert_ne!(modified.old_checksum, modified.new_checksum);
    Ok(())
}

#[tokio::test]
async fn test_encrypted_backup_requires_key() -> Result<()> {
    let source = tempfile::tempdir()?;
    let store = tempfile::tempdir()?;
    let target = tempfile::tempdir()?;
    write_tree(source.path(), &[("secret/notes.txt", &b"attack at dawn"[..])]);

    let snapshot = Snapshotter::new(
        SnapshotOptions::default().with_encryption(EncryptionOptions::new("passphrase")),
    )?
    .snapshot(source.path())
    .await?;
    assert!(snapshot.is_encrypted());

    let orchestrator = orchestrator(&store);
    let backup = orchestrator
        .create_backup(&snapshot, &CreateBackupOptions::default())
        .await?;

    let stored = fs::read_to_string(
        store
            .path()
            .join("objects")
            .join(format!("{}.json", backup.hash)),
    )?;
    assert!(!stored.contains("attack at dawn"));

    let missing = orchestrator
        .restore_backup(&backup.hash, target.path(), &RestoreOptions::default())
        .await;
    assert!(matches!(missing, Err(Error::MissingEncryptionKey { .. })));

    let wrong_algorithm = orchestrator
        .restore_backup(
            &backup.hash,
            target.path(),
            &RestoreOptions::default()
                .with_key("passphrase")
                .with_algorithm(CipherAlgorithm::Aes256Gcm),
        )
        .await;
    assert!(matches!(wrong_algorithm, Err(Error::Decryption(_))));

    orchestrator
        .restore_backup(
            &backup.hash,
            target.path(),
            &RestoreOptions::default().with_key("passphrase"),
        )
        .await?;
    assert_eq!(
        fs::read(target.path().join("secret/notes.txt"))?,
        b"attack at dawn"
    );
    Ok(())
}

#[tokio::test]
async fn test_namespace_backup_from_map() -> Result<()> {
    let store = tempfile::tempdir()?;
    let target = tempfile::tempdir()?;
    let snapshotter = Snapshotter::new(SnapshotOptions::default())?;
    let snapshot = snapshotter.snapshot_map([
        ("users/alice.json", b"{\"id\":1}".to_vec()),
        ("users/bob.json", b"{\"id\":2}".to_vec()),
    ])?;

    let orchestrator = orchestrator(&store).with_name_prefix("graph");
    let backup = orchestrator
        .create_backup(
            &snapshot,
            &CreateBackupOptions::new(BackupKind::Namespace)
                .with_description("user namespace")
                .with_tags(vec!["users".to_string()]),
        )
        .await?;
    assert!(backup.name.starts_with("graph-namespace-"));

    let artifact = orchestrator.get_backup(&backup.hash).await?;
    assert_eq!(artifact.metadata.kind, BackupKind::Namespace);
    assert_eq!(artifact.metadata.description.as_deref(), Some("user namespace"));
    assert_eq!(artifact.data, snapshot);

    orchestrator
        .restore_backup(&backup.hash, target.path(), &RestoreOptions::default())
        .await?;
    assert_eq!(fs::read(target.path().join("users/bob.json"))?, b"{\"id\":2}");
    Ok(())
}

#[tokio::test]
async fn test_delete_and_rotation() -> Result<()> {
    let source = tempfile::tempdir()?;
    let store = tempfile::tempdir()?;
    write_tree(source.path(), &[("state.txt", &b"v1"[..])]);

    let backend = Retrying::new(LocalBackend::new(store.path()), RetryConfig::quick());
    let orchestrator = BackupOrchestrator::new(backend);
    let snapshotter = Snapshotter::new(SnapshotOptions::default())?;

    let first = orchestrator
        .create_backup(
            &snapshotter.snapshot(source.path()).await?,
            &CreateBackupOptions::default(),
        )
        .await?;

    fs::write(source.path().join("state.txt"), "v2")?;
    let rotated = orchestrator
        .rotate_backup(
            &snapshotter.snapshot(source.path()).await?,
            &CreateBackupOptions::default(),
            orchestrator.last_backup_id().as_deref(),
        )
        .await?;
    assert!(rotated.previous_removed);
    assert_ne!(rotated.result.hash, first.hash);

    let remaining = orchestrator.backend().inner().list().await?;
    assert_eq!(remaining, vec![rotated.result.hash.clone()]);
    assert!(orchestrator.get_backup(&first.hash).await.is_err());

    assert!(orchestrator.delete(&rotated.result.hash).await?);
    assert!(!orchestrator.delete(&rotated.result.hash).await?);
    Ok(())
}

#[tokio::test]
async fn test_compare_reports_change() -> Result<()> {
    let source = tempfile::tempdir()?;
    let store = tempfile::tempdir()?;
    write_tree(source.path(), &[("a.txt", &b"one"[..])]);

    let options = SnapshotOptions::default();
    let orchestrator = orchestrator(&store);
    let backup = orchestrator
        .create_backup(
            &Snapshotter::new(options.clone())?
                .snapshot(source.path())
                .await?,
            &CreateBackupOptions::default(),
        )
        .await?;

    assert!(orchestrator.compare(&backup.hash, source.path(), &options).await?.is_equal);
    fs::write(source.path().join("a.txt"), "two")?;
    let changed = orchestrator.compare(&backup.hash, source.path(), &options).await?;
    assert!(!changed.is_equal);
    assert_eq!(changed.remote_version, backup.version_info);
    Ok(())
}
