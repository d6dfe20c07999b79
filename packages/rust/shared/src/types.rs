//! Core data-model types shared by every docindex crate.
//!
//! These mirror the store's schema directly (see `docindex_store::migrations`)
//! so that fetch/content/scraper crates can build values the store accepts
//! without round-tripping through SQL row types themselves.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Time-sortable opaque identifier used for job records and other rows that
/// have no natural key (library name and version string are natural keys and
/// use plain `String`s instead).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(pub Uuid);

impl DocId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for DocId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A documentation library: a lowercase name under which one or more
/// versions are indexed. Deleted once its last version is removed, if the
/// caller opted into that cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
}

/// Lifecycle status of a [`Version`]. `Updating` is a running refresh, kept
/// distinct from `Running` (an initial scrape) so progress UIs can tell them
/// apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    NotIndexed,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Updating,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotIndexed => "not_indexed",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Updating => "updating",
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VersionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "not_indexed" => Self::NotIndexed,
            "queued" => Self::Queued,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            "updating" => Self::Updating,
            other => return Err(format!("unknown version status: {other}")),
        })
    }
}

/// A single indexed version of a library. The empty string denotes the
/// unversioned collection (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub library: String,
    pub version: String,
    pub status: VersionStatus,
    pub pages_done: u64,
    pub pages_max: Option<u64>,
    pub last_error: Option<String>,
    pub source_url: Option<String>,
    /// Snapshot of the scraper options this version was (re)indexed with,
    /// and a home for llms.txt project metadata (title/summary) — see
    /// Open Question 2 in SPEC_FULL.md.
    pub scraper_options: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The kind of work a [`JobRecord`] performs (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Scrape,
    Refresh,
    RemoveVersion,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scrape => "scrape",
            Self::Refresh => "refresh",
            Self::RemoveVersion => "remove_version",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "scrape" => Self::Scrape,
            "refresh" => Self::Refresh,
            "remove_version" => Self::RemoveVersion,
            other => return Err(format!("unknown job kind: {other}")),
        })
    }
}

/// Lifecycle status of a [`JobRecord`] (spec.md §4.6): `queued → running →
/// {completed|failed|cancelled}`, with `updating` standing in for `running`
/// on a refresh job so progress UIs can tell the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Updating,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Updating => "updating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether `waitForJob` should resolve on this status (spec.md §4.6).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "queued" => Self::Queued,
            "running" => Self::Running,
            "updating" => Self::Updating,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            other => return Err(format!("unknown job status: {other}")),
        })
    }
}

/// A durable record of one scheduler job (spec.md §4.6). Persisted by
/// `docindex-store` in the `jobs` table; owned and mutated by
/// `docindex-scheduler`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: DocId,
    pub kind: JobKind,
    pub library: String,
    pub version: String,
    /// Empty for a `remove_version` job, which has no source to refetch.
    pub source_url: String,
    pub options_snapshot: serde_json::Value,
    pub status: JobStatus,
    pub progress_done: u64,
    pub progress_max: Option<u64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A fetched document within a version. Unique on `(version_id, url)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: i64,
    pub version_id: i64,
    pub url: String,
    pub title: Option<String>,
    pub content_type: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub depth: u32,
    pub created_at: DateTime<Utc>,
}

bitflags::bitflags! {
    /// A chunk's role set. Stored as a JSON array of names (spec.md §9
    /// redesign flag: bitflags in memory, string array on disk).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChunkTypes: u8 {
        /// Indexable prose/code content — searchable.
        const CONTENT = 0b01;
        /// Scaffolding between content (e.g. a class header with no body of
        /// its own) — excluded from search, kept for hierarchy/assembly.
        const STRUCTURAL = 0b10;
    }
}

impl ChunkTypes {
    pub fn to_names(self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.contains(Self::CONTENT) {
            names.push("content");
        }
        if self.contains(Self::STRUCTURAL) {
            names.push("structural");
        }
        names
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut flags = Self::empty();
        for name in names {
            match name.as_ref() {
                "content" => flags |= Self::CONTENT,
                "structural" => flags |= Self::STRUCTURAL,
                _ => {}
            }
        }
        flags
    }
}

impl Serialize for ChunkTypes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_names().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ChunkTypes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let names: Vec<String> = Deserialize::deserialize(deserializer)?;
        Ok(Self::from_names(names))
    }
}

/// Heading/property/symbol ancestry for a chunk, root-to-leaf.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionPath(pub Vec<String>);

impl SectionPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn is_sibling_of(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.parent() == other.parent()
    }

    /// Exact match, or one path is a prefix of the other (spec.md §3).
    pub fn same_section(&self, other: &Self) -> bool {
        let (shorter, longer) = if self.0.len() <= other.0.len() {
            (&self.0, &other.0)
        } else {
            (&other.0, &self.0)
        };
        longer.starts_with(shorter.as_slice())
    }

    pub fn is_prefix_of(&self, other: &Self) -> bool {
        other.0.starts_with(self.0.as_slice()) && self.0.len() < other.0.len()
    }
}

/// Metadata attached to a chunk (section hierarchy + type tags).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub section_level: u8,
    pub section_path: SectionPath,
    pub types: ChunkTypes,
}

/// A chunk of a page's content: the unit the splitter produces and the store
/// indexes. `content` is the text body only — embedding metadata (title/url
/// header) is prepended separately before embedding, never stored in this
/// field (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub page_id: i64,
    pub content: String,
    pub sort_order: u32,
    pub metadata: ChunkMetadata,
    pub embedding: Option<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doc_id_roundtrip() {
        let id = DocId::new();
        let s = id.to_string();
        let parsed: DocId = s.parse().expect("parse DocId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn section_path_same_section() {
        let a = SectionPath(vec!["Guide".into(), "Install".into()]);
        let b = SectionPath(vec!["Guide".into()]);
        assert!(a.same_section(&b));
        assert!(b.same_section(&a));

        let c = SectionPath(vec!["Api".into()]);
        assert!(!a.same_section(&c));
    }

    #[test]
    fn section_path_siblings() {
        let a = SectionPath(vec!["Guide".into(), "Install".into()]);
        let b = SectionPath(vec!["Guide".into(), "Usage".into()]);
        assert!(a.is_sibling_of(&b));
    }

    #[test]
    fn chunk_types_round_trip_names() {
        let flags = ChunkTypes::CONTENT | ChunkTypes::STRUCTURAL;
        let names = flags.to_names();
        assert_eq!(ChunkTypes::from_names(names), flags);
    }

    #[test]
    fn version_status_round_trips_through_str() {
        for status in [
            VersionStatus::NotIndexed,
            VersionStatus::Queued,
            VersionStatus::Running,
            VersionStatus::Completed,
            VersionStatus::Failed,
            VersionStatus::Cancelled,
            VersionStatus::Updating,
        ] {
            let s = status.to_string();
            assert_eq!(s.parse::<VersionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn job_kind_round_trips_through_str() {
        for kind in [JobKind::Scrape, JobKind::Refresh, JobKind::RemoveVersion] {
            assert_eq!(kind.to_string().parse::<JobKind>().unwrap(), kind);
        }
    }

    #[test]
    fn job_status_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Updating.is_terminal());
    }
}
