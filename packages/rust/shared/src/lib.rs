//! Shared types, error model, and configuration for docindex.
//!
//! This crate is the foundation depended on by every other docindex crate.
//! It provides:
//! - [`DocIndexError`] — the unified error type
//! - Domain types ([`Library`], [`Version`], [`Page`], [`Chunk`], [`SectionPath`])
//! - Configuration ([`AppConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AppConfig, AppSection, AssemblySection, DbSection, DocumentSection, EmbeddingsSection,
    FetcherSection, ScraperSection, SchedulerSection, SearchSection, SplitterSection, config_dir,
    config_file_path, init_config, load_config, load_config_from, validate_embedding_dimension,
};
pub use error::{DocIndexError, Result};
pub use types::{
    Chunk, ChunkMetadata, ChunkTypes, CURRENT_SCHEMA_VERSION, DocId, JobKind, JobRecord,
    JobStatus, Library, Page, SectionPath, Version, VersionStatus,
};
