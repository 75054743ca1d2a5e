//! Turso Embedded / libSQL storage layer for canonical documents.
//!
//! The [`Storage`] struct wraps a libSQL database holding canonical
//! documents, their extension payloads, query-tracking ids and the run log.
//! [`MemoryStore`] implements the same contracts in memory for tests and
//! dry runs.
//!
//! **Access rules:**
//! - Ingestion: read-write via [`Storage::open`]
//! - Reporting commands: read-only via [`Storage::open_readonly`]

mod memory;
mod migrations;
mod store;

pub use memory::MemoryStore;
pub use store::{DocumentStore, QueryTracker};

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database, params};
use policyharvest_shared::{
    CanonicalDocument, CanonicalDocumentDraft, DocumentDates, DocumentSource, Extension,
    PolicyHarvestError, QueryParams, Result, ReviewStatus,
};
use uuid::Uuid;

const DOCUMENT_COLUMNS: &str = "id, source, source_id, canonical_url, title, publisher_authority, \
     document_family, document_type, published_at, valid_from, valid_to, full_text, \
     content_fingerprint, language, artifact_refs_json, source_metadata, enrichment_json, \
     review_status, created_at, updated_at, schema_version";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// One persisted run-log line.
#[derive(Debug, Clone)]
pub struct StoredRunLog {
    pub run_id: String,
    pub level: String,
    pub message: String,
    pub meta: Option<serde_json::Value>,
    pub created_at: String,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PolicyHarvestError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    PolicyHarvestError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(PolicyHarvestError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Document lookups
    // -----------------------------------------------------------------------

    async fn find_one(&self, filter: &str, value: &str) -> Result<Option<CanonicalDocument>> {
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE {filter} = ?1 LIMIT 1");
        let mut rows = self
            .conn
            .query(&sql, params![value])
            .await
            .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(PolicyHarvestError::Storage(e.to_string())),
        };
        let mut doc = row_to_document(&row)?;
        doc.extensions = self.load_extensions(&doc.id).await?;
        Ok(Some(doc))
    }

    /// Resolve the id of an existing row for this draft, if any.
    async fn existing_id(&self, draft: &CanonicalDocumentDraft) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM documents WHERE source = ?1 AND source_id = ?2
                 UNION ALL
                 SELECT id FROM documents WHERE source = ?1 AND content_fingerprint = ?3
                 LIMIT 1",
                params![
                    draft.source.as_str(),
                    draft.source_id.as_str(),
                    draft.content_fingerprint.as_str()
                ],
            )
            .await
            .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row.get::<String>(0)
                    .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(PolicyHarvestError::Storage(e.to_string())),
        }
    }

    async fn load_extensions(&self, document_id: &str) -> Result<Vec<Extension>> {
        let mut rows = self
            .conn
            .query(
                "SELECT payload_json FROM document_extensions WHERE document_id = ?1 ORDER BY id",
                params![document_id],
            )
            .await
            .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;

        let mut extensions = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let payload: String = row
                .get(0)
                .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;
            match serde_json::from_str(&payload) {
                Ok(ext) => extensions.push(ext),
                Err(e) => tracing::warn!(document_id, error = %e, "skipping unreadable extension"),
            }
        }
        Ok(extensions)
    }

    async fn replace_extensions(&self, document_id: &str, extensions: &[Extension]) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM document_extensions WHERE document_id = ?1",
                params![document_id],
            )
            .await
            .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;

        for ext in extensions {
            let payload = serde_json::to_string(ext)
                .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;
            self.conn
                .execute(
                    "INSERT INTO document_extensions (document_id, kind, payload_json)
                     VALUES (?1, ?2, ?3)",
                    params![document_id, ext.kind(), payload],
                )
                .await
                .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run log
    // -----------------------------------------------------------------------

    /// Append one line to the run log.
    pub async fn append_run_log(
        &self,
        run_id: &str,
        level: &str,
        message: &str,
        meta: Option<&serde_json::Value>,
    ) -> Result<()> {
        self.check_writable()?;
        let meta_json = meta.map(|m| m.to_string());
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO run_logs (run_id, level, message, meta_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![run_id, level, message, meta_json, now.as_str()],
            )
            .await
            .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;
        Ok(())
    }

    /// All log lines for a run, oldest first.
    pub async fn run_logs(&self, run_id: &str) -> Result<Vec<StoredRunLog>> {
        let mut rows = self
            .conn
            .query(
                "SELECT run_id, level, message, meta_json, created_at
                 FROM run_logs WHERE run_id = ?1 ORDER BY id",
                params![run_id],
            )
            .await
            .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let meta_json: Option<String> = row.get(3).ok();
            results.push(StoredRunLog {
                run_id: row
                    .get(0)
                    .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?,
                level: row
                    .get(1)
                    .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?,
                message: row
                    .get(2)
                    .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?,
                meta: meta_json.and_then(|m| serde_json::from_str(&m).ok()),
                created_at: row
                    .get(4)
                    .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?,
            });
        }
        Ok(results)
    }
}

#[async_trait]
impl DocumentStore for Storage {
    async fn upsert(
        &self,
        draft: &CanonicalDocumentDraft,
        extensions: &[Extension],
    ) -> Result<String> {
        self.check_writable()?;

        let artifact_refs = serde_json::to_string(&draft.artifact_refs)
            .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;
        let source_metadata = serde_json::to_string(&draft.source_metadata)
            .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;
        let enrichment = serde_json::to_string(&draft.enrichment_metadata)
            .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;
        let now = Utc::now().to_rfc3339();
        let dates = draft.dates;

        let id = match self.existing_id(draft).await? {
            Some(id) => {
                self.conn
                    .execute(
                        "UPDATE documents SET
                           source_id = ?2, canonical_url = ?3, title = ?4,
                           publisher_authority = ?5, document_family = ?6, document_type = ?7,
                           published_at = ?8, valid_from = ?9, valid_to = ?10,
                           full_text = ?11, content_fingerprint = ?12, language = ?13,
                           artifact_refs_json = ?14, source_metadata = ?15,
                           enrichment_json = ?16, updated_at = ?17
                         WHERE id = ?1",
                        params![
                            id.as_str(),
                            draft.source_id.as_str(),
                            draft.canonical_url.as_str(),
                            draft.title.as_str(),
                            draft.publisher_authority.as_deref(),
                            draft.document_family.as_deref(),
                            draft.document_type.as_deref(),
                            date_str(dates.published_at),
                            date_str(dates.valid_from),
                            date_str(dates.valid_to),
                            draft.full_text.as_str(),
                            draft.content_fingerprint.as_str(),
                            draft.language.as_str(),
                            artifact_refs.as_str(),
                            source_metadata.as_str(),
                            enrichment.as_str(),
                            now.as_str(),
                        ],
                    )
                    .await
                    .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;
                id
            }
            None => {
                let new_id = Uuid::now_v7().to_string();
                self.conn
                    .execute(
                        "INSERT INTO documents (id, source, source_id, canonical_url, title,
                           publisher_authority, document_family, document_type,
                           published_at, valid_from, valid_to, full_text, content_fingerprint,
                           language, artifact_refs_json, source_metadata, enrichment_json,
                           review_status, created_at, updated_at, schema_version)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                                 ?15, ?16, ?17, 'pending', ?18, ?18, ?19)
                         ON CONFLICT(source, source_id) DO UPDATE SET
                           canonical_url = excluded.canonical_url,
                           title = excluded.title,
                           full_text = excluded.full_text,
                           content_fingerprint = excluded.content_fingerprint,
                           artifact_refs_json = excluded.artifact_refs_json,
                           source_metadata = excluded.source_metadata,
                           enrichment_json = excluded.enrichment_json,
                           updated_at = excluded.updated_at",
                        params![
                            new_id.as_str(),
                            draft.source.as_str(),
                            draft.source_id.as_str(),
                            draft.canonical_url.as_str(),
                            draft.title.as_str(),
                            draft.publisher_authority.as_deref(),
                            draft.document_family.as_deref(),
                            draft.document_type.as_deref(),
                            date_str(dates.published_at),
                            date_str(dates.valid_from),
                            date_str(dates.valid_to),
                            draft.full_text.as_str(),
                            draft.content_fingerprint.as_str(),
                            draft.language.as_str(),
                            artifact_refs.as_str(),
                            source_metadata.as_str(),
                            enrichment.as_str(),
                            now.as_str(),
                            i64::from(policyharvest_shared::CURRENT_SCHEMA_VERSION),
                        ],
                    )
                    .await
                    .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;
                // A concurrent writer may have won the insert; read back the surviving id.
                self.existing_id(draft).await?.ok_or_else(|| {
                    PolicyHarvestError::Storage(format!(
                        "document {} vanished after insert",
                        draft.source_id
                    ))
                })?
            }
        };

        self.replace_extensions(&id, extensions).await?;
        tracing::debug!(id = %id, source = %draft.source, source_id = %draft.source_id, "document upserted");
        Ok(id)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<CanonicalDocument>> {
        self.find_one("id", id).await
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<CanonicalDocument>> {
        self.find_one("content_fingerprint", fingerprint).await
    }

    async fn count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM documents", params![])
            .await
            .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row
                .get::<i64>(0)
                .map_err(|e| PolicyHarvestError::Storage(e.to_string()))? as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(PolicyHarvestError::Storage(e.to_string())),
        }
    }
}

#[async_trait]
impl QueryTracker for Storage {
    async fn create_query(&self, params: &QueryParams) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let params_json =
            serde_json::to_string(params).map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO queries (id, subject, params_json, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.as_str(), params.subject.as_str(), params_json, now.as_str()],
            )
            .await
            .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;
        Ok(id)
    }

    async fn query_exists(&self, id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM queries WHERE id = ?1", params![id])
            .await
            .map_err(|e| PolicyHarvestError::Storage(e.to_string()))?;
        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(PolicyHarvestError::Storage(e.to_string())),
        }
    }
}

fn date_str(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn parse_date(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|v| NaiveDate::parse_from_str(&v, "%Y-%m-%d").ok())
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PolicyHarvestError::Storage(format!("bad timestamp '{value}': {e}")))
}

/// Convert a `documents` row to a [`CanonicalDocument`] (extensions not loaded).
fn row_to_document(row: &libsql::Row) -> Result<CanonicalDocument> {
    let text = |idx: i32| -> Result<String> {
        row.get::<String>(idx)
            .map_err(|e| PolicyHarvestError::Storage(e.to_string()))
    };

    let source: DocumentSource = text(1)?
        .parse()
        .map_err(|e: PolicyHarvestError| PolicyHarvestError::Storage(e.to_string()))?;
    let artifact_refs = serde_json::from_str(&text(14)?)
        .map_err(|e| PolicyHarvestError::Storage(format!("bad artifact refs: {e}")))?;
    let source_metadata = row
        .get::<String>(15)
        .ok()
        .and_then(|m| serde_json::from_str(&m).ok())
        .unwrap_or(serde_json::Value::Null);
    let enrichment_metadata = row
        .get::<String>(16)
        .ok()
        .and_then(|m| serde_json::from_str(&m).ok())
        .unwrap_or_default();

    Ok(CanonicalDocument {
        id: text(0)?,
        source,
        source_id: text(2)?,
        canonical_url: text(3)?,
        title: text(4)?,
        publisher_authority: row.get::<String>(5).ok(),
        document_family: row.get::<String>(6).ok(),
        document_type: row.get::<String>(7).ok(),
        dates: DocumentDates {
            published_at: parse_date(row.get::<String>(8).ok()),
            valid_from: parse_date(row.get::<String>(9).ok()),
            valid_to: parse_date(row.get::<String>(10).ok()),
        },
        full_text: text(11)?,
        content_fingerprint: text(12)?,
        language: text(13)?,
        artifact_refs,
        source_metadata,
        enrichment_metadata,
        review_status: ReviewStatus::parse(&text(17)?),
        extensions: Vec::new(),
        created_at: parse_timestamp(&text(18)?)?,
        updated_at: parse_timestamp(&text(19)?)?,
        schema_version: row.get::<u32>(20).unwrap_or(1),
    })
}
