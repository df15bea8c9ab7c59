use anyhow::Result;
use chrono::{TimeZone, Utc};
use fixity_core::FixityError;
use fixity_core::database::{FileRecordStore, HashIdentity, PendingRow, SqliteDatabase};
use fixity_model::DuplicateHash;
use fixity_core::graph::{build_segments, render_ascii_chain};
use sqlx::SqlitePool;

fn row(machine: &str, path: &str, sha: &str, date: &str) -> PendingRow {
    let name = path.rsplit('/').next().unwrap_or(path).to_string();
    PendingRow {
        machine_name: machine.into(),
        mac: String::new(),
        file_name: name.clone(),
        file_path: path.into(),
        size_bytes: 42,
        sha256: sha.into(),
        tag: String::new(),
        host_name: format!("{machine}.lan"),
        client_ip: "192.0.2.1".into(),
        scan_ts: format!("{date}T08:00:00+00:00"),
        urn: format!("{machine}:{name}:.bin:1:{date}"),
        ingested_at: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
    }
}

#[sqlx::test(migrator = "fixity_core::MIGRATOR")]
async fn tokens_rotate_and_resolve_to_machines(pool: SqlitePool) -> Result<()> {
    let db = SqliteDatabase::from_pool(pool);
    let tokens = db.tokens();

    let first = tokens.create_or_rotate("  builder-01 ").await?;
    let identity = tokens.machine_for_token(&first).await?.expect("token valid");
    assert_eq!(identity.machine_name, "builder-01");

    let second = tokens.create_or_rotate("builder-01").await?;
    assert_ne!(first, second);
    assert!(tokens.machine_for_token(&first).await?.is_none());
    let rotated = tokens.machine_for_token(&second).await?.expect("rotated token");
    assert_eq!(rotated.machine_id, identity.machine_id);

    // Only the digest is stored.
    let stored: String = sqlx::query_scalar("SELECT token_hash FROM auth_token")
        .fetch_one(db.pool())
        .await?;
    assert_ne!(stored, second);
    assert_eq!(stored.len(), 64);

    let listed = tokens.list().await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].machine_name, "builder-01");

    assert!(tokens.delete("builder-01").await?);
    assert!(!tokens.delete("builder-01").await?);
    assert!(tokens.machine_for_token(&second).await?.is_none());

    let err = tokens.create_or_rotate("   ").await.expect_err("blank name");
    assert!(matches!(err, FixityError::InvalidInput(_)));
    Ok(())
}

#[sqlx::test(migrator = "fixity_core::MIGRATOR")]
async fn latest_sha_uses_highest_id_per_path(pool: SqlitePool) -> Result<()> {
    let db = SqliteDatabase::from_pool(pool);
    let store = db.file_records();
    let a = "a".repeat(64);
    let b = "b".repeat(64);

    store
        .insert_batch(&[
            row("M1", "/p", &a, "2026-01-02"),
            row("M1", "/p", &b, "2026-01-01"),
            row("M2", "/p", &a, "2026-01-01"),
        ])
        .await?;

    let latest = store
        .latest_sha_by_path("M1", &["/p".to_string(), "/missing".to_string()])
        .await?;
    assert_eq!(latest.len(), 1);
    assert_eq!(latest["/p"], b);
    Ok(())
}

fn identity(sha: &str, path: &str) -> HashIdentity {
    HashIdentity {
        sha256: sha.into(),
        file_name: path.rsplit('/').next().unwrap_or(path).into(),
        file_path: path.into(),
    }
}

#[sqlx::test(migrator = "fixity_core::MIGRATOR")]
async fn identity_counts_merge_stored_and_unsaved_identities(
    pool: SqlitePool,
) -> Result<()> {
    let db = SqliteDatabase::from_pool(pool);
    let store = db.file_records();
    let a = "a".repeat(64);
    let b = "b".repeat(64);
    let c = "c".repeat(64);

    // Many repeated observations of the same identity count once.
    let mut rows: Vec<PendingRow> = (1..=20)
        .map(|day| row("M1", "/x/a.bin", &a, &format!("2026-01-{day:02}")))
        .collect();
    rows.push(row("M2", "/y/a.bin", &a, "2026-01-01"));
    rows.push(row("M1", "/x/b.bin", &b, "2026-01-01"));
    store.insert_batch(&rows).await?;

    let counts = store
        .identity_counts(&[
            identity(&a, "/x/a.bin"),
            identity(&a, "/z/copy.bin"),
            identity(&a, "/z/copy.bin"),
            identity(&b, "/x/b.bin"),
            identity(&c, "/new/c.bin"),
        ])
        .await?;

    assert_eq!(
        counts,
        vec![
            DuplicateHash {
                sha256: a.clone(),
                distinct_file_names: 2,
                distinct_file_paths: 3,
            },
            DuplicateHash {
                sha256: b.clone(),
                distinct_file_names: 1,
                distinct_file_paths: 1,
            },
            DuplicateHash {
                sha256: c.clone(),
                distinct_file_names: 1,
                distinct_file_paths: 1,
            },
        ]
    );
    assert!(store.identity_counts(&[]).await?.is_empty());
    Ok(())
}

#[sqlx::test(migrator = "fixity_core::MIGRATOR")]
async fn queries_return_newest_first(pool: SqlitePool) -> Result<()> {
    let db = SqliteDatabase::from_pool(pool);
    let store = db.file_records();
    let a = "a".repeat(64);
    let b = "b".repeat(64);

    store
        .insert_batch(&[
            row("M1", "/docs/report.pdf", &a, "2026-01-01"),
            row("M1", "/docs/report.pdf", &a, "2026-01-05"),
            row("M2", "/share/report_final.pdf", &a, "2026-01-03"),
            row("M2", "/share/notes.txt", &b, "2026-01-04"),
        ])
        .await?;

    let by_sha = store.records_by_sha(&a, 10).await?;
    assert_eq!(by_sha.len(), 3);
    assert!(by_sha[0].scan_ts.starts_with("2026-01-05"));
    assert_eq!(store.count_by_sha(&a).await?, 3);
    assert_eq!(store.records_by_sha(&a, 1).await?.len(), 1);

    let m2 = store.records_by_machine("M2", None, 10).await?;
    assert_eq!(m2.len(), 2);
    let m2_b = store.records_by_machine("M2", Some(&b), 10).await?;
    assert_eq!(m2_b.len(), 1);
    assert_eq!(m2_b[0].file_name, "notes.txt");

    assert_eq!(store.machine_names().await?, vec!["M1", "M2"]);

    let matches = store.search_names("report", None, 10).await?;
    assert_eq!(matches.len(), 3);
    assert_eq!(matches[0].file_name, "report.pdf");
    let scoped = store.search_names("report", Some("M2"), 10).await?;
    assert_eq!(scoped.len(), 1);
    // `_` is literal, not a wildcard.
    assert_eq!(store.search_names("t_f", None, 10).await?.len(), 1);
    Ok(())
}

#[sqlx::test(migrator = "fixity_core::MIGRATOR")]
async fn graph_rows_build_provenance_segments(pool: SqlitePool) -> Result<()> {
    let db = SqliteDatabase::from_pool(pool);
    let store = db.file_records();
    let h = "c".repeat(64);

    store
        .insert_batch(&[
            row("M1", "/a/file.bin", &h, "2026-01-02"),
            row("M1", "/b/file.bin", &h, "2026-01-03"),
            row("M1", "/a/file.bin", &h, "2026-01-01"),
        ])
        .await?;

    let rows = store.graph_rows(&h, 100).await?;
    let segments = build_segments(&rows);
    assert_eq!(segments.len(), 2);
    assert_eq!(
        render_ascii_chain(&segments),
        "M1 {/a/file.bin 2026-01-01..2026-01-02} -> {/b/file.bin 2026-01-03..2026-01-03}"
    );
    Ok(())
}
