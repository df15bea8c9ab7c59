use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fixity_model::{DuplicateHash, FileRecordView, NameMatch};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

use crate::error::Result;
use crate::graph::GraphRow;

/// Rows per multi-row `INSERT` statement; 12 columns each keeps a statement
/// well below SQLite's bound-parameter ceiling.
const INSERT_CHUNK_ROWS: usize = 500;
/// Values (or value pairs) per `IN (...)` list.
const LOOKUP_CHUNK: usize = 500;

/// Identity columns that duplicate detection counts.
#[derive(Debug, Clone, Copy)]
enum IdentityColumn {
    FileName,
    FilePath,
}

impl IdentityColumn {
    fn as_sql(self) -> &'static str {
        match self {
            IdentityColumn::FileName => "file_name",
            IdentityColumn::FilePath => "file_path",
        }
    }
}

/// Values of one identity column, grouped by digest.
type ValuesBySha<'a> = BTreeMap<&'a str, BTreeSet<&'a str>>;

/// How many of `sha`'s values are not already stored.
fn unseen(values: &ValuesBySha<'_>, known: &HashSet<(String, String)>, sha: &str) -> u64 {
    values.get(sha).map_or(0, |set| {
        set.iter()
            .filter(|value| !known.contains(&(sha.to_string(), value.to_string())))
            .count() as u64
    })
}

/// A scan record accepted by the server and awaiting commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRow {
    pub machine_name: String,
    pub mac: String,
    pub file_name: String,
    pub file_path: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub tag: String,
    pub host_name: String,
    pub client_ip: String,
    pub scan_ts: String,
    pub urn: String,
    pub ingested_at: DateTime<Utc>,
}

/// One (digest, name, path) association, used for duplicate counting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HashIdentity {
    pub sha256: String,
    pub file_name: String,
    pub file_path: String,
}

/// Storage seam used by the ingest path.
#[async_trait]
pub trait FileRecordStore: Send + Sync + fmt::Debug {
    /// Insert all rows in a single transaction.
    async fn insert_batch(&self, rows: &[PendingRow]) -> Result<u64>;

    /// Digest of the highest-id row per requested path for one machine.
    async fn latest_sha_by_path(
        &self,
        machine_name: &str,
        file_paths: &[String],
    ) -> Result<HashMap<String, String>>;

    /// Distinct file name and file path counts for every digest in
    /// `extra`, taken over the stored rows together with `extra` itself.
    /// One entry per digest, ordered by digest.
    async fn identity_counts(&self, extra: &[HashIdentity]) -> Result<Vec<DuplicateHash>>;
}

#[derive(Debug, FromRow)]
struct FileRecordRow {
    machine_name: String,
    file_path: String,
    file_name: String,
    size_bytes: i64,
    sha256: String,
    tag: String,
    host_name: String,
    client_ip: String,
    scan_ts: String,
    urn: String,
    ingested_at: DateTime<Utc>,
}

impl FileRecordRow {
    fn into_view(self) -> FileRecordView {
        FileRecordView {
            machine_name: self.machine_name,
            file_path: self.file_path,
            file_name: self.file_name,
            size_bytes: self.size_bytes,
            sha256: self.sha256,
            tag: self.tag,
            host_name: self.host_name,
            client_ip: self.client_ip,
            scan_ts: self.scan_ts,
            urn: self.urn,
            ingested_at: self.ingested_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct NameMatchRow {
    machine_name: String,
    file_name: String,
    sha256: String,
    scan_ts: String,
    ingested_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SqliteFileRecords {
    pool: SqlitePool,
}

impl fmt::Debug for SqliteFileRecords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteFileRecords")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl SqliteFileRecords {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Newest rows first.
    pub async fn records_by_sha(
        &self,
        sha256: &str,
        limit: i64,
    ) -> Result<Vec<FileRecordView>> {
        let rows = sqlx::query_as::<_, FileRecordRow>(
            r#"
            SELECT machine_name, file_path, file_name, size_bytes, sha256,
                   tag, host_name, client_ip, scan_ts, urn, ingested_at
            FROM file_record
            WHERE sha256 = ?
            ORDER BY scan_ts DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(sha256)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FileRecordRow::into_view).collect())
    }

    pub async fn count_by_sha(&self, sha256: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM file_record WHERE sha256 = ?")
                .bind(sha256)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn records_by_machine(
        &self,
        machine_name: &str,
        sha256: Option<&str>,
        limit: i64,
    ) -> Result<Vec<FileRecordView>> {
        let rows = sqlx::query_as::<_, FileRecordRow>(
            r#"
            SELECT machine_name, file_path, file_name, size_bytes, sha256,
                   tag, host_name, client_ip, scan_ts, urn, ingested_at
            FROM file_record
            WHERE machine_name = ?1
              AND (?2 IS NULL OR sha256 = ?2)
            ORDER BY scan_ts DESC, id DESC
            LIMIT ?3
            "#,
        )
        .bind(machine_name)
        .bind(sha256)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FileRecordRow::into_view).collect())
    }

    /// Inputs for the provenance graph of one digest.
    pub async fn graph_rows(
        &self,
        sha256: &str,
        limit: i64,
    ) -> Result<Vec<GraphRow>> {
        let rows = sqlx::query_as::<_, GraphRow>(
            r#"
            SELECT machine_name, file_path, file_name, urn, scan_ts
            FROM file_record
            WHERE sha256 = ?
            ORDER BY machine_name ASC, scan_ts ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(sha256)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn machine_names(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT machine_name FROM file_record ORDER BY machine_name ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    /// File names containing `substring`, optionally scoped to one machine.
    pub async fn search_names(
        &self,
        substring: &str,
        machine_name: Option<&str>,
        limit: i64,
    ) -> Result<Vec<NameMatch>> {
        let pattern = format!("%{}%", escape_like(substring));
        let rows = sqlx::query_as::<_, NameMatchRow>(
            r#"
            SELECT machine_name, file_name, sha256, scan_ts, ingested_at
            FROM file_record
            WHERE file_name LIKE ?1 ESCAPE '\'
              AND (?2 IS NULL OR machine_name = ?2)
            ORDER BY file_name ASC, scan_ts DESC, id DESC
            LIMIT ?3
            "#,
        )
        .bind(pattern)
        .bind(machine_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| NameMatch {
                machine_name: row.machine_name,
                file_name: row.file_name,
                sha256: row.sha256,
                scan_ts: row.scan_ts,
                ingested_at: row.ingested_at,
            })
            .collect())
    }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[async_trait]
impl FileRecordStore for SqliteFileRecords {
    async fn insert_batch(&self, rows: &[PendingRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO file_record (machine_name, mac, file_name, file_path, \
                 size_bytes, sha256, tag, host_name, client_ip, scan_ts, urn, ingested_at) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.machine_name.as_str())
                    .push_bind(row.mac.as_str())
                    .push_bind(row.file_name.as_str())
                    .push_bind(row.file_path.as_str())
                    .push_bind(row.size_bytes)
                    .push_bind(row.sha256.as_str())
                    .push_bind(row.tag.as_str())
                    .push_bind(row.host_name.as_str())
                    .push_bind(row.client_ip.as_str())
                    .push_bind(row.scan_ts.as_str())
                    .push_bind(row.urn.as_str())
                    .push_bind(row.ingested_at);
            });
            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        Ok(inserted)
    }

    async fn latest_sha_by_path(
        &self,
        machine_name: &str,
        file_paths: &[String],
    ) -> Result<HashMap<String, String>> {
        let mut latest = HashMap::with_capacity(file_paths.len());
        for chunk in file_paths.chunks(LOOKUP_CHUNK) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT fr.file_path, fr.sha256 FROM file_record fr \
                 JOIN (SELECT file_path, MAX(id) AS max_id FROM file_record \
                 WHERE machine_name = ",
            );
            builder.push_bind(machine_name);
            builder.push(" AND file_path IN (");
            let mut separated = builder.separated(", ");
            for path in chunk {
                separated.push_bind(path.as_str());
            }
            separated.push_unseparated(
                ") GROUP BY file_path) latest ON fr.id = latest.max_id",
            );

            let rows: Vec<(String, String)> =
                builder.build_query_as().fetch_all(&self.pool).await?;
            latest.extend(rows);
        }
        Ok(latest)
    }

    async fn identity_counts(&self, extra: &[HashIdentity]) -> Result<Vec<DuplicateHash>> {
        let mut names = ValuesBySha::new();
        let mut paths = ValuesBySha::new();
        for identity in extra {
            names
                .entry(identity.sha256.as_str())
                .or_default()
                .insert(identity.file_name.as_str());
            paths
                .entry(identity.sha256.as_str())
                .or_default()
                .insert(identity.file_path.as_str());
        }
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let shas: Vec<&str> = names.keys().copied().collect();
        let stored = self.stored_counts(&shas).await?;
        let known_names = self.stored_pairs(IdentityColumn::FileName, &names).await?;
        let known_paths = self.stored_pairs(IdentityColumn::FilePath, &paths).await?;

        Ok(shas
            .into_iter()
            .map(|sha| {
                let (stored_names, stored_paths) =
                    stored.get(sha).copied().unwrap_or_default();
                DuplicateHash {
                    sha256: sha.to_string(),
                    distinct_file_names: stored_names + unseen(&names, &known_names, sha),
                    distinct_file_paths: stored_paths + unseen(&paths, &known_paths, sha),
                }
            })
            .collect())
    }
}

impl SqliteFileRecords {
    /// Stored `COUNT(DISTINCT file_name)` and `COUNT(DISTINCT file_path)`
    /// per digest. Digests with no stored rows are absent.
    async fn stored_counts(&self, shas: &[&str]) -> Result<HashMap<String, (u64, u64)>> {
        let mut counts = HashMap::with_capacity(shas.len());
        for chunk in shas.chunks(LOOKUP_CHUNK) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT sha256, COUNT(DISTINCT file_name), COUNT(DISTINCT file_path) \
                 FROM file_record WHERE sha256 IN (",
            );
            let mut separated = builder.separated(", ");
            for sha in chunk {
                separated.push_bind(*sha);
            }
            separated.push_unseparated(") GROUP BY sha256");

            let rows: Vec<(String, i64, i64)> =
                builder.build_query_as().fetch_all(&self.pool).await?;
            counts.extend(rows.into_iter().map(|(sha, names, paths)| {
                (
                    sha,
                    (
                        u64::try_from(names).unwrap_or_default(),
                        u64::try_from(paths).unwrap_or_default(),
                    ),
                )
            }));
        }
        Ok(counts)
    }

    /// The `(sha256, value)` pairs from `wanted` that already exist in
    /// `column`.
    async fn stored_pairs(
        &self,
        column: IdentityColumn,
        wanted: &ValuesBySha<'_>,
    ) -> Result<HashSet<(String, String)>> {
        let column = column.as_sql();
        let pairs: Vec<(&str, &str)> = wanted
            .iter()
            .flat_map(|(sha, values)| values.iter().map(move |value| (*sha, *value)))
            .collect();

        let mut found = HashSet::new();
        for chunk in pairs.chunks(LOOKUP_CHUNK) {
            let mut builder = QueryBuilder::<Sqlite>::new(format!(
                "SELECT DISTINCT sha256, {column} FROM file_record \
                 WHERE (sha256, {column}) IN (VALUES "
            ));
            let mut separated = builder.separated(", ");
            for (sha, value) in chunk {
                separated.push("(");
                separated.push_bind_unseparated(*sha);
                separated.push_unseparated(", ");
                separated.push_bind_unseparated(*value);
                separated.push_unseparated(")");
            }
            separated.push_unseparated(")");

            let rows: Vec<(String, String)> =
                builder.build_query_as().fetch_all(&self.pool).await?;
            found.extend(rows);
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain.txt"), "plain.txt");
    }
}
