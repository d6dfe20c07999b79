//! SQL migration definitions for the docindex database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

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
            description: "Initial schema: libraries, versions, pages, documents, FTS5, vector index",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- A documentation library (spec.md §3): a lowercase name owning many versions.
CREATE TABLE IF NOT EXISTS libraries (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

-- A single indexed version of a library. Empty version string = unversioned.
CREATE TABLE IF NOT EXISTS versions (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    library_id       INTEGER NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
    version          TEXT NOT NULL,
    status           TEXT NOT NULL DEFAULT 'not_indexed',
    pages_done       INTEGER NOT NULL DEFAULT 0,
    pages_max        INTEGER,
    last_error       TEXT,
    source_url       TEXT,
    scraper_options  TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    UNIQUE(library_id, version)
);

CREATE INDEX IF NOT EXISTS idx_versions_library ON versions(library_id);

-- A fetched document within a version. Unique on (version_id, url).
CREATE TABLE IF NOT EXISTS pages (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    version_id   INTEGER NOT NULL REFERENCES versions(id) ON DELETE CASCADE,
    url          TEXT NOT NULL,
    title        TEXT,
    content_type TEXT NOT NULL,
    etag         TEXT,
    last_modified TEXT,
    depth        INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL,
    UNIQUE(version_id, url)
);

CREATE INDEX IF NOT EXISTS idx_pages_version ON pages(version_id);

-- The indexable unit: a chunk of a page's content (spec.md §3).
CREATE TABLE IF NOT EXISTS documents (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    page_id       INTEGER NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
    content       TEXT NOT NULL,
    sort_order    INTEGER NOT NULL,
    section_level INTEGER NOT NULL DEFAULT 0,
    section_path  TEXT NOT NULL DEFAULT '[]',
    types         TEXT NOT NULL DEFAULT '["content"]',
    embedding     F32_BLOB(1536)
);

CREATE INDEX IF NOT EXISTS idx_documents_page ON documents(page_id, sort_order);
CREATE INDEX IF NOT EXISTS idx_documents_section_path ON documents(page_id, section_path);

-- ANN index over the vector column. Dimension is fixed at build time
-- (`vectorDimension`, default 1536 per spec.md §6); a differently-sized
-- embedding model is rejected at startup rather than re-migrated.
CREATE INDEX IF NOT EXISTS documents_embedding_idx ON documents(libsql_vector_idx(embedding));

-- Full-text index over documents, maintained explicitly (not via triggers):
-- `title`/`path` are denormalized from the owning page/chunk at write time
-- since FTS5 external-content tables require the source columns to live on
-- the content table itself, and they don't here (they're a join away).
CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5(
    title,
    path,
    body
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Job scheduler: durable job records",
            sql: r#"
CREATE TABLE IF NOT EXISTS jobs (
    id               TEXT PRIMARY KEY,
    kind             TEXT NOT NULL,
    library          TEXT NOT NULL,
    version          TEXT NOT NULL,
    source_url       TEXT NOT NULL DEFAULT '',
    options_snapshot TEXT,
    status           TEXT NOT NULL DEFAULT 'queued',
    progress_done    INTEGER NOT NULL DEFAULT 0,
    progress_max     INTEGER,
    error            TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_library_version ON jobs(library, version);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_dedup ON jobs(library, version, source_url, status);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
