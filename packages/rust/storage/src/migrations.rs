//! SQL migration definitions for the PolicyHarvest database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: documents, document_extensions, queries",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Canonical documents, one row per (source, source_id)
CREATE TABLE IF NOT EXISTS documents (
    id                  TEXT PRIMARY KEY,
    source              TEXT NOT NULL,
    source_id           TEXT NOT NULL,
    canonical_url       TEXT NOT NULL,
    title               TEXT NOT NULL,
    publisher_authority TEXT,
    document_family     TEXT,
    document_type       TEXT,
    published_at        TEXT,
    valid_from          TEXT,
    valid_to            TEXT,
    full_text           TEXT NOT NULL,
    content_fingerprint TEXT NOT NULL,
    language            TEXT NOT NULL,
    artifact_refs_json  TEXT NOT NULL,
    source_metadata     TEXT,
    enrichment_json     TEXT,
    review_status       TEXT NOT NULL DEFAULT 'pending',
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    schema_version      INTEGER NOT NULL,
    UNIQUE(source, source_id)
);

CREATE INDEX IF NOT EXISTS idx_documents_fingerprint ON documents(content_fingerprint);

-- Typed extension payloads, replaced on every upsert
CREATE TABLE IF NOT EXISTS document_extensions (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id  TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    kind         TEXT NOT NULL,
    payload_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_extensions_doc ON document_extensions(document_id);

-- Query tracking ids shared by the steps of one wizard session
CREATE TABLE IF NOT EXISTS queries (
    id          TEXT PRIMARY KEY,
    subject     TEXT NOT NULL,
    params_json TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Append-only run log",
            sql: r#"
CREATE TABLE IF NOT EXISTS run_logs (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id     TEXT NOT NULL,
    level      TEXT NOT NULL,
    message    TEXT NOT NULL,
    meta_json  TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_run_logs_run ON run_logs(run_id);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
