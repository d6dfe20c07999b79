//! Application configuration for docindex.
//!
//! User config lives at `~/.docindex/docindex.toml`. Precedence is
//! defaults ≪ file ≪ environment ≪ explicit overrides passed by the caller
//! (spec.md §6) — this crate implements the first three layers; callers
//! (an external CLI/service shell) apply the last.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DocIndexError, Result};

const CONFIG_FILE_NAME: &str = "docindex.toml";
const CONFIG_DIR_NAME: &str = ".docindex";
const ENV_PREFIX: &str = "DOCS_MCP_";

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub scraper: ScraperSection,
    #[serde(default)]
    pub splitter: SplitterSection,
    #[serde(default)]
    pub embeddings: EmbeddingsSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub assembly: AssemblySection,
    #[serde(default)]
    pub db: DbSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default)]
    pub telemetry_enabled: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            telemetry_enabled: false,
            read_only: false,
            embedding_model: default_embedding_model(),
        }
    }
}

fn default_store_path() -> String {
    "~/.docindex/docindex.db".into()
}
fn default_embedding_model() -> String {
    "none".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherSection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_cache_items")]
    pub max_cache_items: usize,
    #[serde(default = "default_max_cache_item_size_bytes")]
    pub max_cache_item_size_bytes: u64,
}

impl Default for FetcherSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_cache_items: default_max_cache_items(),
            max_cache_item_size_bytes: default_max_cache_item_size_bytes(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_cache_items() -> usize {
    500
}
fn default_max_cache_item_size_bytes() -> u64 {
    1_048_576
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSection {
    #[serde(default = "default_document_max_size")]
    pub max_size: u64,
}

impl Default for DocumentSection {
    fn default() -> Self {
        Self {
            max_size: default_document_max_size(),
        }
    }
}

fn default_document_max_size() -> u64 {
    33_554_432
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperSection {
    #[serde(default = "default_max_pages")]
    pub max_pages: u64,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    #[serde(default = "default_page_timeout_ms")]
    pub page_timeout_ms: u64,
    #[serde(default = "default_browser_timeout_ms")]
    pub browser_timeout_ms: u64,
    #[serde(default)]
    pub fetcher: FetcherSection,
    #[serde(default)]
    pub document: DocumentSection,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// If false (the default), the first fatal per-page error terminates the
    /// job rather than being logged and skipped (spec.md §7).
    #[serde(default)]
    pub ignore_errors: bool,
}

impl Default for ScraperSection {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            max_concurrency: default_max_concurrency(),
            page_timeout_ms: default_page_timeout_ms(),
            browser_timeout_ms: default_browser_timeout_ms(),
            fetcher: FetcherSection::default(),
            document: DocumentSection::default(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            ignore_errors: false,
        }
    }
}

fn default_max_pages() -> u64 {
    1000
}
fn default_max_depth() -> u32 {
    5
}
fn default_max_concurrency() -> u32 {
    4
}
fn default_page_timeout_ms() -> u64 {
    30_000
}
fn default_browser_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitterSection {
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default = "default_preferred_chunk_size")]
    pub preferred_chunk_size: usize,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
}

impl Default for SplitterSection {
    fn default() -> Self {
        Self {
            min_chunk_size: default_min_chunk_size(),
            preferred_chunk_size: default_preferred_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
        }
    }
}

fn default_min_chunk_size() -> usize {
    500
}
fn default_preferred_chunk_size() -> usize {
    1500
}
fn default_max_chunk_size() -> usize {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_chars")]
    pub batch_chars: usize,
    #[serde(default = "default_vector_dimension")]
    pub vector_dimension: usize,
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for EmbeddingsSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_chars: default_batch_chars(),
            vector_dimension: default_vector_dimension(),
            init_timeout_ms: default_init_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}
fn default_batch_chars() -> usize {
    300_000
}
fn default_vector_dimension() -> usize {
    1536
}
fn default_init_timeout_ms() -> u64 {
    10_000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_weight_vec")]
    pub weight_vec: f64,
    #[serde(default = "default_weight_fts")]
    pub weight_fts: f64,
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: f64,
    #[serde(default = "default_vector_multiplier")]
    pub vector_multiplier: f64,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            weight_vec: default_weight_vec(),
            weight_fts: default_weight_fts(),
            overfetch_factor: default_overfetch_factor(),
            vector_multiplier: default_vector_multiplier(),
        }
    }
}

fn default_weight_vec() -> f64 {
    1.0
}
fn default_weight_fts() -> f64 {
    1.0
}
fn default_overfetch_factor() -> f64 {
    3.0
}
fn default_vector_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblySection {
    #[serde(default = "default_max_chunk_distance")]
    pub max_chunk_distance: u32,
    #[serde(default = "default_max_parent_chain_depth")]
    pub max_parent_chain_depth: u32,
    #[serde(default = "default_child_limit")]
    pub child_limit: u32,
    #[serde(default = "default_preceding_siblings_limit")]
    pub preceding_siblings_limit: u32,
    #[serde(default = "default_subsequent_siblings_limit")]
    pub subsequent_siblings_limit: u32,
}

impl Default for AssemblySection {
    fn default() -> Self {
        Self {
            max_chunk_distance: default_max_chunk_distance(),
            max_parent_chain_depth: default_max_parent_chain_depth(),
            child_limit: default_child_limit(),
            preceding_siblings_limit: default_preceding_siblings_limit(),
            subsequent_siblings_limit: default_subsequent_siblings_limit(),
        }
    }
}

fn default_max_chunk_distance() -> u32 {
    5
}
fn default_max_parent_chain_depth() -> u32 {
    3
}
fn default_child_limit() -> u32 {
    5
}
fn default_preceding_siblings_limit() -> u32 {
    2
}
fn default_subsequent_siblings_limit() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbSection {
    #[serde(default = "default_migration_max_retries")]
    pub migration_max_retries: u32,
    #[serde(default = "default_migration_retry_delay_ms")]
    pub migration_retry_delay_ms: u64,
}

impl Default for DbSection {
    fn default() -> Self {
        Self {
            migration_max_retries: default_migration_max_retries(),
            migration_retry_delay_ms: default_migration_retry_delay_ms(),
        }
    }
}

fn default_migration_max_retries() -> u32 {
    5
}
fn default_migration_retry_delay_ms() -> u64 {
    200
}

/// `[scheduler]` section — resolves Open Question 1 (SPEC_FULL.md §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default)]
    pub resume_interrupted_scrapes: bool,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: u32,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            resume_interrupted_scrapes: false,
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

fn default_max_concurrent_jobs() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| DocIndexError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk, then apply the `DOCS_MCP_*`
/// environment overlay. Returns (env-overlaid) defaults if the file does not
/// exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    } else {
        load_config_from(&path)?
    };

    apply_env_overlay(&mut config);
    Ok(config)
}

/// Load the application config from a specific (read-only) file path. Env
/// overlay is still applied — only the default path is ever written back to.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocIndexError::io(path, e))?;

    let mut config: AppConfig = toml::from_str(&content)
        .map_err(|e| DocIndexError::config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overlay(&mut config);
    Ok(config)
}

/// Apply `DOCS_MCP_<SECTION>_<SETTING>` overrides on top of a parsed config.
/// Only the handful of scalar settings spec.md §6 names are recognized; any
/// other `DOCS_MCP_*` var is ignored rather than erroring, since new settings
/// may be added without updating every deployment's environment.
fn apply_env_overlay(config: &mut AppConfig) {
    macro_rules! overlay_string {
        ($section:expr, $setting:literal, $field:expr) => {
            if let Ok(val) = std::env::var(format!("{ENV_PREFIX}{}_{}", $section, $setting)) {
                $field = val;
            }
        };
    }
    macro_rules! overlay_parsed {
        ($section:expr, $setting:literal, $field:expr) => {
            if let Ok(val) = std::env::var(format!("{ENV_PREFIX}{}_{}", $section, $setting)) {
                if let Ok(parsed) = val.parse() {
                    $field = parsed;
                }
            }
        };
    }

    overlay_string!("APP", "STOREPATH", config.app.store_path);
    overlay_parsed!("APP", "TELEMETRYENABLED", config.app.telemetry_enabled);
    overlay_parsed!("APP", "READONLY", config.app.read_only);
    overlay_string!("APP", "EMBEDDINGMODEL", config.app.embedding_model);

    overlay_parsed!("SCRAPER", "MAXPAGES", config.scraper.max_pages);
    overlay_parsed!("SCRAPER", "MAXDEPTH", config.scraper.max_depth);
    overlay_parsed!("SCRAPER", "MAXCONCURRENCY", config.scraper.max_concurrency);
    overlay_parsed!("SCRAPER", "PAGETIMEOUTMS", config.scraper.page_timeout_ms);
    overlay_parsed!(
        "SCRAPER",
        "BROWSERTIMEOUTMS",
        config.scraper.browser_timeout_ms
    );
    overlay_parsed!(
        "SCRAPER",
        "FETCHERMAXRETRIES",
        config.scraper.fetcher.max_retries
    );
    overlay_parsed!(
        "SCRAPER",
        "FETCHERBASEDELAYMS",
        config.scraper.fetcher.base_delay_ms
    );
    overlay_parsed!(
        "SCRAPER",
        "FETCHERMAXCACHEITEMS",
        config.scraper.fetcher.max_cache_items
    );
    overlay_parsed!(
        "SCRAPER",
        "FETCHERMAXCACHEITEMSIZEBYTES",
        config.scraper.fetcher.max_cache_item_size_bytes
    );
    overlay_parsed!(
        "SCRAPER",
        "DOCUMENTMAXSIZE",
        config.scraper.document.max_size
    );

    overlay_parsed!("SPLITTER", "MINCHUNKSIZE", config.splitter.min_chunk_size);
    overlay_parsed!(
        "SPLITTER",
        "PREFERREDCHUNKSIZE",
        config.splitter.preferred_chunk_size
    );
    overlay_parsed!("SPLITTER", "MAXCHUNKSIZE", config.splitter.max_chunk_size);

    overlay_parsed!("EMBEDDINGS", "BATCHSIZE", config.embeddings.batch_size);
    overlay_parsed!("EMBEDDINGS", "BATCHCHARS", config.embeddings.batch_chars);
    overlay_parsed!(
        "EMBEDDINGS",
        "VECTORDIMENSION",
        config.embeddings.vector_dimension
    );

    overlay_parsed!("SEARCH", "WEIGHTVEC", config.search.weight_vec);
    overlay_parsed!("SEARCH", "WEIGHTFTS", config.search.weight_fts);
    overlay_parsed!("SEARCH", "OVERFETCHFACTOR", config.search.overfetch_factor);
    overlay_parsed!(
        "SEARCH",
        "VECTORMULTIPLIER",
        config.search.vector_multiplier
    );

    overlay_parsed!(
        "ASSEMBLY",
        "MAXCHUNKDISTANCE",
        config.assembly.max_chunk_distance
    );
    overlay_parsed!(
        "ASSEMBLY",
        "MAXPARENTCHAINDEPTH",
        config.assembly.max_parent_chain_depth
    );
    overlay_parsed!("ASSEMBLY", "CHILDLIMIT", config.assembly.child_limit);
    overlay_parsed!(
        "ASSEMBLY",
        "PRECEDINGSIBLINGSLIMIT",
        config.assembly.preceding_siblings_limit
    );
    overlay_parsed!(
        "ASSEMBLY",
        "SUBSEQUENTSIBLINGSLIMIT",
        config.assembly.subsequent_siblings_limit
    );

    overlay_parsed!(
        "DB",
        "MIGRATIONMAXRETRIES",
        config.db.migration_max_retries
    );
    overlay_parsed!(
        "DB",
        "MIGRATIONRETRYDELAYMS",
        config.db.migration_retry_delay_ms
    );
}

/// Create the config directory and write a default config file. Returns the
/// path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocIndexError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocIndexError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocIndexError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Validate that a vector dimension declared by an embedding provider does
/// not exceed the configured pad-to dimension (spec.md §3: "d>D rejected at
/// startup").
pub fn validate_embedding_dimension(config: &AppConfig, provider_dimension: usize) -> Result<()> {
    if provider_dimension > config.embeddings.vector_dimension {
        return Err(DocIndexError::config(format!(
            "embedding provider dimension {provider_dimension} exceeds configured vectorDimension {}",
            config.embeddings.vector_dimension
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("store_path"));
        assert!(toml_str.contains("vector_dimension"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.scraper.max_depth, 5);
        assert_eq!(parsed.splitter.preferred_chunk_size, 1500);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let toml_str = r#"
[scraper]
max_depth = 2

[splitter]
min_chunk_size = 100
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.scraper.max_depth, 2);
        assert_eq!(config.scraper.max_pages, 1000);
        assert_eq!(config.splitter.min_chunk_size, 100);
        assert_eq!(config.splitter.max_chunk_size, 5000);
    }

    #[test]
    fn env_overlay_applies_over_file_and_defaults() {
        let mut config = AppConfig::default();
        unsafe {
            std::env::set_var("DOCS_MCP_SCRAPER_MAXDEPTH", "9");
        }
        apply_env_overlay(&mut config);
        unsafe {
            std::env::remove_var("DOCS_MCP_SCRAPER_MAXDEPTH");
        }
        assert_eq!(config.scraper.max_depth, 9);
    }

    #[test]
    fn env_overlay_reaches_nested_and_assembly_sections() {
        let mut config = AppConfig::default();
        unsafe {
            std::env::set_var("DOCS_MCP_SCRAPER_FETCHERMAXRETRIES", "7");
            std::env::set_var("DOCS_MCP_SCRAPER_DOCUMENTMAXSIZE", "1024");
            std::env::set_var("DOCS_MCP_ASSEMBLY_CHILDLIMIT", "3");
        }
        apply_env_overlay(&mut config);
        unsafe {
            std::env::remove_var("DOCS_MCP_SCRAPER_FETCHERMAXRETRIES");
            std::env::remove_var("DOCS_MCP_SCRAPER_DOCUMENTMAXSIZE");
            std::env::remove_var("DOCS_MCP_ASSEMBLY_CHILDLIMIT");
        }
        assert_eq!(config.scraper.fetcher.max_retries, 7);
        assert_eq!(config.scraper.document.max_size, 1024);
        assert_eq!(config.assembly.child_limit, 3);
    }

    #[test]
    fn embedding_dimension_validation_rejects_oversize() {
        let config = AppConfig::default();
        assert!(validate_embedding_dimension(&config, 1536).is_ok());
        assert!(validate_embedding_dimension(&config, 4096).is_err());
    }
}
