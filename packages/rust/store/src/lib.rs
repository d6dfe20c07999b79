//! libSQL storage layer: libraries, versions, pages, chunked documents, and
//! hybrid (FTS5 + native vector) search.
//!
//! **Access rules:**
//! - The scheduler/core services: read-write (sole writer) via [`Storage::open`]
//! - Any read-only surface (a future HTTP/MCP layer): via [`Storage::open_readonly`]

mod assembly;
mod embeddings;
mod jobs;
mod migrations;
mod tokenizer;

pub use assembly::{AssemblyLimits, Neighborhood};
pub use embeddings::{EmbedError, EmbeddingProvider, NullProvider};
pub use jobs::JobFilter;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use docindex_shared::{
    AppConfig, Chunk, ChunkMetadata, ChunkTypes, DocIndexError, Library, Page, Result,
    SectionPath, Version, VersionStatus, validate_embedding_dimension,
};
use libsql::{Connection, Database, Row, params};

/// A single fetched document plus the chunks the splitter produced for it,
/// as handed to [`Storage::add_documents`] after a page is scraped.
pub struct PageDocuments {
    pub url: String,
    pub title: Option<String>,
    pub content_type: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub depth: u32,
    pub chunks: Vec<NewChunk>,
}

/// A chunk as produced by the splitter, before it has a database identity.
pub struct NewChunk {
    pub content: String,
    pub metadata: ChunkMetadata,
    pub embedding: Option<Vec<f32>>,
}

/// Outcome of [`Storage::remove_version`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalSummary {
    pub documents_deleted: u64,
    pub pages_deleted: u64,
    pub version_deleted: bool,
    pub library_deleted: bool,
}

/// A ranked hit from [`Storage::search`], already joined back to its page.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub page: Page,
    pub score: f64,
    pub neighborhood: Option<Neighborhood>,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    config: AppConfig,
}

impl Storage {
    /// Opens or creates a database at `path` in read-write mode, retrying
    /// migrations under contention (`db.migrationMaxRetries` /
    /// `db.migrationRetryDelayMs`) since the store may be opened by more
    /// than one process racing to apply the same schema.
    pub async fn open(path: &Path, config: AppConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| DocIndexError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        let conn = db.connect().map_err(|e| DocIndexError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
            embedder: None,
            config,
        };
        storage.run_migrations_with_retry().await?;
        Ok(storage)
    }

    /// Opens a database at `path` in read-only mode. No migrations run; a
    /// schema behind the crate's expectations surfaces as query errors from
    /// individual operations rather than a hard failure at open time, so a
    /// reader started against an older database can still serve the rows
    /// that exist.
    pub async fn open_readonly(path: &Path, config: AppConfig) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        let conn = db.connect().map_err(|e| DocIndexError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
            embedder: None,
            config,
        })
    }

    /// Registers an embedding provider for the vector half of [`search`](Self::search).
    /// Rejected if the provider's native dimension exceeds the configured
    /// `embeddings.vectorDimension` (the column is padded, never truncated).
    pub fn with_embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        validate_embedding_dimension(&self.config, provider.dimension())?;
        self.embedder = Some(provider);
        Ok(self)
    }

    async fn run_migrations_with_retry(&self) -> Result<()> {
        let max_retries = self.config.db.migration_max_retries.max(1);
        let delay = Duration::from_millis(self.config.db.migration_retry_delay_ms);

        let mut last_err = None;
        for attempt in 0..max_retries {
            match self.run_migrations().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "migration attempt failed, retrying");
                    last_err = Some(e);
                    if attempt + 1 < max_retries {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| DocIndexError::Storage("migrations failed".into())))
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
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| DocIndexError::Storage(format!("migration v{} failed: {e}", migration.version)))?;
            }
        }
        Ok(())
    }

    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(DocIndexError::Storage("database is opened in read-only mode".into()));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Libraries / versions
    // -----------------------------------------------------------------------

    /// Finds or creates `library`/`version`, returning the version's row id.
    /// A newly created version starts `not_indexed` (spec.md §3).
    pub async fn resolve_version_id(&self, library: &str, version: &str) -> Result<i64> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();

        self.conn
            .execute("INSERT INTO libraries (name) VALUES (?1) ON CONFLICT(name) DO NOTHING", params![library])
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;

        let library_id = self.library_id(library).await?.ok_or_else(|| {
            DocIndexError::Storage(format!("library {library:?} vanished after insert"))
        })?;

        self.conn
            .execute(
                "INSERT INTO versions (library_id, version, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(library_id, version) DO NOTHING",
                params![library_id, version, VersionStatus::NotIndexed.as_str(), now.as_str()],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;

        let mut rows = self
            .conn
            .query(
                "SELECT id FROM versions WHERE library_id = ?1 AND version = ?2",
                params![library_id, version],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => row.get::<i64>(0).map_err(|e| DocIndexError::Storage(e.to_string())),
            _ => Err(DocIndexError::Storage(format!("version {library}@{version} vanished after insert"))),
        }
    }

    async fn library_id(&self, library: &str) -> Result<Option<i64>> {
        let mut rows = self
            .conn
            .query("SELECT id FROM libraries WHERE name = ?1", params![library])
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get::<i64>(0).map_err(|e| DocIndexError::Storage(e.to_string()))?)),
            _ => Ok(None),
        }
    }

    /// Transitions a version's status, optionally carrying progress and an
    /// error message (spec.md §4.6 status machine).
    pub async fn set_version_status(
        &self,
        version_id: i64,
        status: VersionStatus,
        pages_done: Option<u64>,
        pages_max: Option<u64>,
        last_error: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE versions SET status = ?1,
                    pages_done = COALESCE(?2, pages_done),
                    pages_max = COALESCE(?3, pages_max),
                    last_error = ?4,
                    updated_at = ?5
                 WHERE id = ?6",
                params![
                    status.as_str(),
                    pages_done.map(|v| v as i64),
                    pages_max.map(|v| v as i64),
                    last_error,
                    now.as_str(),
                    version_id
                ],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Records the job's resolved input and a snapshot of the scraper
    /// options that produced it, so a later `refresh` can reuse them without
    /// the caller having to remember what `enqueue_scrape` was called with.
    pub async fn set_version_source(&self, version_id: i64, source_url: &str, scraper_options: &serde_json::Value) -> Result<()> {
        self.check_writable()?;
        let options_raw = serde_json::to_string(scraper_options).map_err(|e| DocIndexError::Storage(e.to_string()))?;
        self.conn
            .execute(
                "UPDATE versions SET source_url = ?1, scraper_options = ?2, updated_at = ?3 WHERE id = ?4",
                params![source_url, options_raw, Utc::now().to_rfc3339(), version_id],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Lists a library's versions, newest first. Semver-valid versions sort
    /// above non-semver ones by parsed precedence; the empty (unversioned)
    /// string always sorts first, as the "latest" alias (spec.md §3).
    pub async fn list_versions(&self, library: &str) -> Result<Vec<Version>> {
        let Some(library_id) = self.library_id(library).await? else {
            return Ok(Vec::new());
        };
        let mut rows = self
            .conn
            .query(
                "SELECT v.version, v.status, v.pages_done, v.pages_max, v.last_error,
                        v.source_url, v.scraper_options, v.created_at, v.updated_at
                 FROM versions v WHERE v.library_id = ?1",
                params![library_id],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;

        let mut versions = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            versions.push(row_to_version(library, &row)?);
        }

        versions.sort_by(|a, b| version_sort_key(b).cmp(&version_sort_key(a)));
        Ok(versions)
    }

    /// Lists every known library name, alphabetically.
    pub async fn list_libraries(&self) -> Result<Vec<Library>> {
        let mut rows = self
            .conn
            .query("SELECT name FROM libraries ORDER BY name", params![])
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;

        let mut libraries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            libraries.push(Library {
                name: row.get::<String>(0).map_err(|e| DocIndexError::Storage(e.to_string()))?,
            });
        }
        Ok(libraries)
    }

    // -----------------------------------------------------------------------
    // Pages / documents
    // -----------------------------------------------------------------------

    /// Upserts a fetched page and replaces its chunk set, all inside one
    /// transaction: the page row, every `documents` row (embedding included),
    /// and their `documents_fts` mirror rows either all land or none do.
    pub async fn add_documents(&self, version_id: i64, doc: &PageDocuments) -> Result<i64> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();

        self.conn.execute("BEGIN", params![]).await.map_err(|e| DocIndexError::Storage(e.to_string()))?;

        let result = self.add_documents_tx(version_id, doc, &now).await;

        match result {
            Ok(page_id) => {
                self.conn
                    .execute("COMMIT", params![])
                    .await
                    .map_err(|e| DocIndexError::Storage(e.to_string()))?;
                Ok(page_id)
            }
            Err(e) => {
                let _ = self.conn.execute("ROLLBACK", params![]).await;
                Err(e)
            }
        }
    }

    async fn add_documents_tx(&self, version_id: i64, doc: &PageDocuments, now: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO pages (version_id, url, title, content_type, etag, last_modified, depth, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(version_id, url) DO UPDATE SET
                    title = excluded.title,
                    content_type = excluded.content_type,
                    etag = excluded.etag,
                    last_modified = excluded.last_modified,
                    depth = excluded.depth",
                params![
                    version_id,
                    doc.url.as_str(),
                    doc.title.as_deref(),
                    doc.content_type.as_str(),
                    doc.etag.as_deref(),
                    doc.last_modified.as_deref(),
                    doc.depth as i64,
                    now
                ],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;

        let mut rows = self
            .conn
            .query("SELECT id FROM pages WHERE version_id = ?1 AND url = ?2", params![version_id, doc.url.as_str()])
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        let page_id: i64 = match rows.next().await {
            Ok(Some(row)) => row.get(0).map_err(|e| DocIndexError::Storage(e.to_string()))?,
            _ => return Err(DocIndexError::Storage(format!("page {} vanished after upsert", doc.url))),
        };

        self.delete_chunks_for_page(page_id).await?;

        for (i, chunk) in doc.chunks.iter().enumerate() {
            self.insert_chunk(page_id, doc, i as u32, chunk).await?;
        }

        Ok(page_id)
    }

    async fn insert_chunk(&self, page_id: i64, doc: &PageDocuments, sort_order: u32, chunk: &NewChunk) -> Result<()> {
        let types_json = serde_json::to_string(&chunk.metadata.types).map_err(|e| DocIndexError::Storage(e.to_string()))?;
        let path_json =
            serde_json::to_string(&chunk.metadata.section_path).map_err(|e| DocIndexError::Storage(e.to_string()))?;

        // `vector32(NULL)` evaluates to NULL, so a single statement form
        // covers both the embedded and not-yet-embedded case.
        let embedding_literal: Option<String> = chunk.embedding.as_ref().map(|v| vector_literal(v));

        self.conn
            .execute(
                "INSERT INTO documents (page_id, content, sort_order, section_level, section_path, types, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, vector32(?7))",
                params![
                    page_id,
                    chunk.content.as_str(),
                    sort_order as i64,
                    chunk.metadata.section_level as i64,
                    path_json.as_str(),
                    types_json.as_str(),
                    embedding_literal.as_deref(),
                ],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;

        let mut rows = self
            .conn
            .query("SELECT last_insert_rowid()", params![])
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        let document_id: i64 = match rows.next().await {
            Ok(Some(row)) => row.get(0).map_err(|e| DocIndexError::Storage(e.to_string()))?,
            _ => return Err(DocIndexError::Storage("last_insert_rowid() returned no row".into())),
        };

        if chunk.metadata.types.contains(ChunkTypes::CONTENT) {
            let path_display = chunk.metadata.section_path.0.join(" / ");
            self.conn
                .execute(
                    "INSERT INTO documents_fts (rowid, title, path, body) VALUES (?1, ?2, ?3, ?4)",
                    params![document_id, doc.title.as_deref().unwrap_or(""), path_display.as_str(), chunk.content.as_str()],
                )
                .await
                .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        }

        Ok(())
    }

    async fn delete_chunks_for_page(&self, page_id: i64) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM documents_fts WHERE rowid IN (SELECT id FROM documents WHERE page_id = ?1)",
                params![page_id],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        self.conn
            .execute("DELETE FROM documents WHERE page_id = ?1", params![page_id])
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Removes a page (and its chunks, via the FK cascade for `documents`,
    /// with its FTS mirror cleared first) — used when a refresh finds the
    /// page has disappeared upstream (spec.md §8 scenario 4).
    pub async fn delete_page(&self, page_id: i64) -> Result<()> {
        self.check_writable()?;
        self.delete_chunks_for_page(page_id).await?;
        self.conn
            .execute("DELETE FROM pages WHERE id = ?1", params![page_id])
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Lists every page of a version, for a refresh job to seed conditional-
    /// fetch validators (spec.md §4.4) and to detect pages no longer present
    /// upstream once the crawl completes.
    pub async fn list_pages(&self, version_id: i64) -> Result<Vec<Page>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, version_id, url, title, content_type, etag, last_modified, depth, created_at
                 FROM pages WHERE version_id = ?1",
                params![version_id],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;

        let mut pages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            pages.push(row_to_page(&row, 0)?);
        }
        Ok(pages)
    }

    /// Looks up a page's id by `(version_id, url)`, for callers doing their
    /// own refresh diffing before calling [`delete_page`](Self::delete_page).
    pub async fn find_page_id(&self, version_id: i64, url: &str) -> Result<Option<i64>> {
        let mut rows = self
            .conn
            .query("SELECT id FROM pages WHERE version_id = ?1 AND url = ?2", params![version_id, url])
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get(0).map_err(|e| DocIndexError::Storage(e.to_string()))?)),
            _ => Ok(None),
        }
    }

    /// Removes a version and everything under it (pages/documents cascade),
    /// and the owning library too if `remove_library_if_empty` is set and no
    /// other version remains.
    pub async fn remove_version(&self, library: &str, version: &str, remove_library_if_empty: bool) -> Result<RemovalSummary> {
        self.check_writable()?;
        let Some(library_id) = self.library_id(library).await? else {
            return Ok(RemovalSummary { documents_deleted: 0, pages_deleted: 0, version_deleted: false, library_deleted: false });
        };

        let mut rows = self
            .conn
            .query("SELECT id FROM versions WHERE library_id = ?1 AND version = ?2", params![library_id, version])
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        let Some(version_id) = (match rows.next().await {
            Ok(Some(row)) => Some(row.get::<i64>(0).map_err(|e| DocIndexError::Storage(e.to_string()))?),
            _ => None,
        }) else {
            return Ok(RemovalSummary { documents_deleted: 0, pages_deleted: 0, version_deleted: false, library_deleted: false });
        };

        let documents_deleted = self.count_documents_for_version(version_id).await?;
        let pages_deleted = self.count_pages_for_version(version_id).await?;

        self.conn
            .execute(
                "DELETE FROM documents_fts WHERE rowid IN
                    (SELECT d.id FROM documents d JOIN pages p ON p.id = d.page_id WHERE p.version_id = ?1)",
                params![version_id],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        self.conn
            .execute("DELETE FROM versions WHERE id = ?1", params![version_id])
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;

        let mut remaining = self
            .conn
            .query("SELECT COUNT(*) FROM versions WHERE library_id = ?1", params![library_id])
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        let remaining_count: i64 = match remaining.next().await {
            Ok(Some(row)) => row.get(0).unwrap_or(0),
            _ => 0,
        };

        let library_deleted = remove_library_if_empty && remaining_count == 0;
        if library_deleted {
            self.conn
                .execute("DELETE FROM libraries WHERE id = ?1", params![library_id])
                .await
                .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        }

        Ok(RemovalSummary { documents_deleted, pages_deleted, version_deleted: true, library_deleted })
    }

    async fn count_documents_for_version(&self, version_id: i64) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM documents d JOIN pages p ON p.id = d.page_id WHERE p.version_id = ?1",
                params![version_id],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        Ok(match rows.next().await {
            Ok(Some(row)) => row.get::<i64>(0).unwrap_or(0) as u64,
            _ => 0,
        })
    }

    async fn count_pages_for_version(&self, version_id: i64) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM pages WHERE version_id = ?1", params![version_id])
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        Ok(match rows.next().await {
            Ok(Some(row)) => row.get::<i64>(0).unwrap_or(0) as u64,
            _ => 0,
        })
    }

    /// Loads every chunk of a page, `sort_order`-ascending, for neighborhood
    /// assembly.
    async fn load_page_chunks(&self, page_id: i64) -> Result<Vec<Chunk>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, page_id, content, sort_order, section_level, section_path, types
                 FROM documents WHERE page_id = ?1 ORDER BY sort_order",
                params![page_id],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;

        let mut chunks = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            chunks.push(row_to_chunk(&row)?);
        }
        Ok(chunks)
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// Hybrid search (spec.md §4.5/§8): always runs the FTS5 half; runs the
    /// vector half too when an [`EmbeddingProvider`] is registered, fusing
    /// both rankings with Reciprocal Rank Fusion and breaking ties by
    /// ascending chunk id (scenario 2). [`ChunkTypes::STRUCTURAL`]-only
    /// chunks are never indexed into `documents_fts`, so they're already
    /// excluded from the FTS half; the vector half only ever sees embedded
    /// content chunks too.
    pub async fn search(&self, library: &str, version: &str, query: &str, limit: u32, with_neighborhoods: bool) -> Result<Vec<SearchHit>> {
        let Some(library_id) = self.library_id(library).await? else {
            return Ok(Vec::new());
        };
        let mut rows = self
            .conn
            .query("SELECT id FROM versions WHERE library_id = ?1 AND version = ?2", params![library_id, version])
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        let Some(version_id) = (match rows.next().await {
            Ok(Some(row)) => Some(row.get::<i64>(0).map_err(|e| DocIndexError::Storage(e.to_string()))?),
            _ => None,
        }) else {
            return Ok(Vec::new());
        };

        let overfetch = ((limit as f64) * self.config.search.overfetch_factor).ceil() as u32;
        let overfetch = overfetch.max(limit).max(1);

        let fts_ranks = self.fts_ranked_ids(version_id, query, overfetch).await?;

        let vector_ranks = if let Some(embedder) = &self.embedder {
            let vector_limit = (overfetch as f64 * self.config.search.vector_multiplier).ceil() as u32;
            self.vector_ranked_ids(version_id, query, vector_limit.max(1), embedder.as_ref()).await?
        } else {
            Vec::new()
        };

        let fused = fuse_rankings(&fts_ranks, &vector_ranks, self.config.search.weight_fts, self.config.search.weight_vec);

        let mut hits = Vec::new();
        for (document_id, score) in fused.into_iter().take(limit as usize) {
            if let Some((chunk, page)) = self.load_hit(document_id).await? {
                let neighborhood = if with_neighborhoods {
                    let all = self.load_page_chunks(chunk.page_id).await?;
                    Some(assembly::assemble(&all, chunk.id, &self.assembly_limits()))
                } else {
                    None
                };
                hits.push(SearchHit { chunk, page, score, neighborhood });
            }
        }
        Ok(hits)
    }

    fn assembly_limits(&self) -> AssemblyLimits {
        AssemblyLimits {
            max_chunk_distance: self.config.assembly.max_chunk_distance,
            max_parent_chain_depth: self.config.assembly.max_parent_chain_depth,
            child_limit: self.config.assembly.child_limit,
            preceding_siblings_limit: self.config.assembly.preceding_siblings_limit,
            subsequent_siblings_limit: self.config.assembly.subsequent_siblings_limit,
        }
    }

    async fn fts_ranked_ids(&self, version_id: i64, query: &str, limit: u32) -> Result<Vec<(i64, f64)>> {
        let Some(expr) = tokenizer::build_match_expression(query) else {
            return Ok(Vec::new());
        };

        let mut rows = self
            .conn
            .query(
                "SELECT d.id, fts.rank
                 FROM documents_fts fts
                 JOIN documents d ON d.id = fts.rowid
                 JOIN pages p ON p.id = d.page_id
                 WHERE documents_fts MATCH ?1 AND p.version_id = ?2
                 ORDER BY fts.rank
                 LIMIT ?3",
                params![expr.as_str(), version_id, limit as i64],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;

        let mut ranked = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id: i64 = row.get(0).map_err(|e| DocIndexError::Storage(e.to_string()))?;
            let rank: f64 = row.get(1).unwrap_or(0.0);
            ranked.push((id, rank));
        }
        Ok(ranked)
    }

    async fn vector_ranked_ids(&self, version_id: i64, query: &str, limit: u32, embedder: &dyn EmbeddingProvider) -> Result<Vec<(i64, f64)>> {
        let queries = vec![query.to_string()];
        let vectors = embeddings::embed_with_splitting(embedder, &queries, self.config.embeddings.vector_dimension).await?;
        let Some(query_vector) = vectors.into_iter().next() else {
            return Ok(Vec::new());
        };
        let literal = vector_literal(&query_vector);

        let mut rows = self
            .conn
            .query(
                "SELECT d.id, vector_distance_cos(d.embedding, vector32(?1)) AS dist
                 FROM vector_top_k('documents_embedding_idx', vector32(?1), ?2) v
                 JOIN documents d ON d.id = v.id
                 JOIN pages p ON p.id = d.page_id
                 WHERE p.version_id = ?3
                 ORDER BY dist",
                params![literal.as_str(), limit as i64, version_id],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;

        let mut ranked = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id: i64 = row.get(0).map_err(|e| DocIndexError::Storage(e.to_string()))?;
            let dist: f64 = row.get(1).unwrap_or(1.0);
            ranked.push((id, dist));
        }
        Ok(ranked)
    }

    async fn load_hit(&self, document_id: i64) -> Result<Option<(Chunk, Page)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT d.id, d.page_id, d.content, d.sort_order, d.section_level, d.section_path, d.types,
                        p.id, p.version_id, p.url, p.title, p.content_type, p.etag, p.last_modified, p.depth, p.created_at
                 FROM documents d JOIN pages p ON p.id = d.page_id
                 WHERE d.id = ?1",
                params![document_id],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let chunk = row_to_chunk(&row)?;
                let page = row_to_page(&row, 7)?;
                Ok(Some((chunk, page)))
            }
            _ => Ok(None),
        }
    }
}

/// Combines Reciprocal Rank Fusion scores from two rankings: `score = Σ
/// weight_i / (60 + rank_i)` over whichever ranking(s) contain each id.
/// Ties broken by ascending id (spec.md §8 scenario 2).
fn fuse_rankings(fts: &[(i64, f64)], vector: &[(i64, f64)], weight_fts: f64, weight_vec: f64) -> Vec<(i64, f64)> {
    use std::collections::HashMap;
    const K: f64 = 60.0;

    let mut scores: HashMap<i64, f64> = HashMap::new();
    for (rank, (id, _)) in fts.iter().enumerate() {
        *scores.entry(*id).or_insert(0.0) += weight_fts / (K + rank as f64 + 1.0);
    }
    for (rank, (id, _)) in vector.iter().enumerate() {
        *scores.entry(*id).or_insert(0.0) += weight_vec / (K + rank as f64 + 1.0);
    }

    let mut fused: Vec<(i64, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
    fused
}

fn vector_literal(v: &[f32]) -> String {
    let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
    format!("[{}]", parts.join(","))
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DocIndexError::Storage(format!("invalid timestamp {s:?}: {e}")))
}

fn row_to_version(library: &str, row: &Row) -> Result<Version> {
    let status: String = row.get(1).map_err(|e| DocIndexError::Storage(e.to_string()))?;
    let scraper_options_raw: Option<String> = row.get(6).ok();
    Ok(Version {
        library: library.to_string(),
        version: row.get::<String>(0).map_err(|e| DocIndexError::Storage(e.to_string()))?,
        status: status.parse().map_err(DocIndexError::Storage)?,
        pages_done: row.get::<i64>(2).unwrap_or(0) as u64,
        pages_max: row.get::<i64>(3).ok().map(|v| v as u64),
        last_error: row.get::<String>(4).ok(),
        source_url: row.get::<String>(5).ok(),
        scraper_options: scraper_options_raw
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(serde_json::Value::Null),
        created_at: parse_rfc3339(&row.get::<String>(7).map_err(|e| DocIndexError::Storage(e.to_string()))?)?,
        updated_at: parse_rfc3339(&row.get::<String>(8).map_err(|e| DocIndexError::Storage(e.to_string()))?)?,
    })
}

/// Sort key for `list_versions`: the empty string (unversioned/"latest")
/// sorts highest, then valid semver by precedence, then everything else
/// lexically — all compared as a single ordered tuple.
fn version_sort_key(v: &Version) -> (u8, semver::Version, String) {
    if v.version.is_empty() {
        return (2, semver::Version::new(0, 0, 0), String::new());
    }
    match semver::Version::parse(&v.version) {
        Ok(parsed) => (1, parsed, String::new()),
        Err(_) => (0, semver::Version::new(0, 0, 0), v.version.clone()),
    }
}

fn row_to_chunk(row: &Row) -> Result<Chunk> {
    let section_path_raw: String = row.get(5).map_err(|e| DocIndexError::Storage(e.to_string()))?;
    let types_raw: String = row.get(6).map_err(|e| DocIndexError::Storage(e.to_string()))?;
    let section_path: SectionPath = serde_json::from_str(&section_path_raw).map_err(|e| DocIndexError::Storage(e.to_string()))?;
    let types: ChunkTypes = serde_json::from_str(&types_raw).map_err(|e| DocIndexError::Storage(e.to_string()))?;

    Ok(Chunk {
        id: row.get(0).map_err(|e| DocIndexError::Storage(e.to_string()))?,
        page_id: row.get(1).map_err(|e| DocIndexError::Storage(e.to_string()))?,
        content: row.get(2).map_err(|e| DocIndexError::Storage(e.to_string()))?,
        sort_order: row.get::<i64>(3).map_err(|e| DocIndexError::Storage(e.to_string()))? as u32,
        metadata: ChunkMetadata {
            section_level: row.get::<i64>(4).map_err(|e| DocIndexError::Storage(e.to_string()))? as u8,
            section_path,
            types,
        },
        embedding: None,
    })
}

fn row_to_page(row: &Row, offset: i32) -> Result<Page> {
    Ok(Page {
        id: row.get(offset).map_err(|e| DocIndexError::Storage(e.to_string()))?,
        version_id: row.get(offset + 1).map_err(|e| DocIndexError::Storage(e.to_string()))?,
        url: row.get(offset + 2).map_err(|e| DocIndexError::Storage(e.to_string()))?,
        title: row.get::<String>(offset + 3).ok(),
        content_type: row.get(offset + 4).map_err(|e| DocIndexError::Storage(e.to_string()))?,
        etag: row.get::<String>(offset + 5).ok(),
        last_modified: row.get::<String>(offset + 6).ok(),
        depth: row.get::<i64>(offset + 7).map_err(|e| DocIndexError::Storage(e.to_string()))? as u32,
        created_at: parse_rfc3339(&row.get::<String>(offset + 8).map_err(|e| DocIndexError::Storage(e.to_string()))?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_config() -> AppConfig {
        AppConfig::default()
    }

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("docindex_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp, test_config()).await.expect("open test db")
    }

    fn content_chunk(text: &str, path: &[&str]) -> NewChunk {
        NewChunk {
            content: text.to_string(),
            metadata: ChunkMetadata {
                section_level: path.len() as u8,
                section_path: SectionPath(path.iter().map(|s| s.to_string()).collect()),
                types: ChunkTypes::CONTENT,
            },
            embedding: None,
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("docindex_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp, test_config()).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp, test_config()).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn resolve_version_id_is_idempotent() {
        let storage = test_storage().await;
        let a = storage.resolve_version_id("react", "18.2.0").await.unwrap();
        let b = storage.resolve_version_id("react", "18.2.0").await.unwrap();
        assert_eq!(a, b);

        let versions = storage.list_versions("react").await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].status, VersionStatus::NotIndexed);
    }

    #[tokio::test]
    async fn add_documents_then_search_finds_them() {
        let storage = test_storage().await;
        let version_id = storage.resolve_version_id("react", "18.2.0").await.unwrap();

        storage
            .add_documents(
                version_id,
                &PageDocuments {
                    url: "https://react.dev/learn".into(),
                    title: Some("Learn React".into()),
                    content_type: "text/html".into(),
                    etag: None,
                    last_modified: None,
                    depth: 0,
                    chunks: vec![
                        content_chunk("useState lets you add state to a component", &["Learn", "State"]),
                        content_chunk("useEffect synchronizes a component with an external system", &["Learn", "Effects"]),
                    ],
                },
            )
            .await
            .expect("add documents");

        let hits = storage.search("react", "18.2.0", "useState", 10, false).await.expect("search");
        assert_eq!(hits.len(), 1);
        assert!(hits[0].chunk.content.contains("useState"));
    }

    #[tokio::test]
    async fn replacing_a_page_drops_its_old_chunks() {
        let storage = test_storage().await;
        let version_id = storage.resolve_version_id("react", "18.2.0").await.unwrap();
        let doc = |text: &str| PageDocuments {
            url: "https://react.dev/learn".into(),
            title: Some("Learn React".into()),
            content_type: "text/html".into(),
            etag: None,
            last_modified: None,
            depth: 0,
            chunks: vec![content_chunk(text, &["Learn"])],
        };

        storage.add_documents(version_id, &doc("old content about hooks")).await.unwrap();
        storage.add_documents(version_id, &doc("new content about refs")).await.unwrap();

        let hits = storage.search("react", "18.2.0", "hooks", 10, false).await.unwrap();
        assert!(hits.is_empty());
        let hits = storage.search("react", "18.2.0", "refs", 10, false).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn delete_page_removes_its_chunks_from_search() {
        let storage = test_storage().await;
        let version_id = storage.resolve_version_id("react", "18.2.0").await.unwrap();
        storage
            .add_documents(
                version_id,
                &PageDocuments {
                    url: "https://react.dev/gone".into(),
                    title: Some("Gone".into()),
                    content_type: "text/html".into(),
                    etag: None,
                    last_modified: None,
                    depth: 0,
                    chunks: vec![content_chunk("vanishing page content", &["Gone"])],
                },
            )
            .await
            .unwrap();
        let page_id = storage.find_page_id(version_id, "https://react.dev/gone").await.unwrap().unwrap();

        storage.delete_page(page_id).await.unwrap();

        let hits = storage.search("react", "18.2.0", "vanishing", 10, false).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn remove_version_cascades_and_can_drop_empty_library() {
        let storage = test_storage().await;
        let version_id = storage.resolve_version_id("react", "18.2.0").await.unwrap();
        storage
            .add_documents(
                version_id,
                &PageDocuments {
                    url: "https://react.dev/learn".into(),
                    title: None,
                    content_type: "text/html".into(),
                    etag: None,
                    last_modified: None,
                    depth: 0,
                    chunks: vec![content_chunk("content", &["Learn"])],
                },
            )
            .await
            .unwrap();

        let summary = storage.remove_version("react", "18.2.0", true).await.unwrap();
        assert!(summary.version_deleted);
        assert!(summary.library_deleted);
        assert_eq!(summary.documents_deleted, 1);

        let versions = storage.list_versions("react").await.unwrap();
        assert!(versions.is_empty());
    }

    #[tokio::test]
    async fn structural_only_chunks_are_excluded_from_fts() {
        let storage = test_storage().await;
        let version_id = storage.resolve_version_id("react", "18.2.0").await.unwrap();
        let structural = NewChunk {
            content: "class Widget".into(),
            metadata: ChunkMetadata {
                section_level: 1,
                section_path: SectionPath(vec!["Widget".into()]),
                types: ChunkTypes::STRUCTURAL,
            },
            embedding: None,
        };

        storage
            .add_documents(
                version_id,
                &PageDocuments {
                    url: "https://react.dev/api".into(),
                    title: None,
                    content_type: "text/html".into(),
                    etag: None,
                    last_modified: None,
                    depth: 0,
                    chunks: vec![structural],
                },
            )
            .await
            .unwrap();

        let hits = storage.search("react", "18.2.0", "Widget", 10, false).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn search_with_neighborhoods_attaches_context() {
        let storage = test_storage().await;
        let version_id = storage.resolve_version_id("react", "18.2.0").await.unwrap();
        storage
            .add_documents(
                version_id,
                &PageDocuments {
                    url: "https://react.dev/learn".into(),
                    title: Some("Learn".into()),
                    content_type: "text/html".into(),
                    etag: None,
                    last_modified: None,
                    depth: 0,
                    chunks: vec![
                        content_chunk("Guide heading", &["Guide"]),
                        content_chunk("useState hook explanation", &["Guide", "State"]),
                        content_chunk("Guide trailer", &["Guide"]),
                    ],
                },
            )
            .await
            .unwrap();

        let hits = storage.search("react", "18.2.0", "useState", 10, true).await.unwrap();
        assert_eq!(hits.len(), 1);
        let neighborhood = hits[0].neighborhood.as_ref().unwrap();
        assert_eq!(neighborhood.parents.len(), 1);
    }

    #[tokio::test]
    async fn unknown_library_search_returns_empty() {
        let storage = test_storage().await;
        let hits = storage.search("nonexistent", "1.0.0", "anything", 10, false).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("docindex_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp, test_config()).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp, test_config()).await.unwrap();
        let result = ro.resolve_version_id("react", "18.2.0").await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn embedding_provider_above_configured_dimension_is_rejected() {
        let storage = test_storage().await;
        let oversized = Arc::new(NullProvider::new(storage.config.embeddings.vector_dimension + 1));
        let result = storage.with_embedding_provider(oversized);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn hybrid_search_with_null_provider_still_returns_fts_hits() {
        let storage = test_storage().await.with_embedding_provider(Arc::new(NullProvider::new(8))).unwrap();
        let version_id = storage.resolve_version_id("react", "18.2.0").await.unwrap();
        storage
            .add_documents(
                version_id,
                &PageDocuments {
                    url: "https://react.dev/learn".into(),
                    title: Some("Learn".into()),
                    content_type: "text/html".into(),
                    etag: None,
                    last_modified: None,
                    depth: 0,
                    chunks: vec![content_chunk("useState lets you add state", &["Learn"])],
                },
            )
            .await
            .unwrap();

        let hits = storage.search("react", "18.2.0", "useState", 10, false).await.unwrap();
        assert_eq!(hits.len(), 1);
    }
}
