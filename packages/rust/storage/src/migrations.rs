//! SQL migration definitions for the local jobrelay database.
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
    vec![Migration {
        version: 1,
        description: "Initial schema: rag_content, job_responses",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Context documents. Embeddings are stored as JSON arrays of floats.
CREATE TABLE IF NOT EXISTS rag_content (
    id            TEXT PRIMARY KEY,
    embedding     TEXT NOT NULL,
    context       TEXT NOT NULL,
    user_id       INTEGER NOT NULL,
    document_type TEXT NOT NULL,
    document_id   TEXT,
    username      TEXT
);

CREATE INDEX IF NOT EXISTS idx_rag_content_type ON rag_content(document_type);
CREATE INDEX IF NOT EXISTS idx_rag_content_document ON rag_content(document_type, document_id);

-- Append-only response records
CREATE TABLE IF NOT EXISTS job_responses (
    id          TEXT PRIMARY KEY,
    job_id      TEXT,
    user_query  TEXT NOT NULL,
    ai_response TEXT NOT NULL,
    metadata    TEXT NOT NULL DEFAULT '{}',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_job_responses_job_id ON job_responses(job_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
