//! Durable job persistence (spec.md §4.6): the `jobs` table backing
//! `docindex-scheduler`. The scheduler owns the status machine and
//! dedup/recovery policy; this module is purely storage.

use chrono::Utc;
use docindex_shared::{DocId, DocIndexError, JobKind, JobRecord, JobStatus, Result};
use libsql::{Row, params};

use crate::{Storage, parse_rfc3339};

/// Filter for [`Storage::list_jobs`]. `None` on a field means "any".
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub library: Option<String>,
    pub status: Option<JobStatus>,
}

impl Storage {
    /// Inserts a new job record in `queued` status.
    pub async fn insert_job(&self, job: &JobRecord) -> Result<()> {
        self.check_writable()?;
        let options_json = serde_json::to_string(&job.options_snapshot).map_err(|e| DocIndexError::Storage(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO jobs (id, kind, library, version, source_url, options_snapshot, status,
                                    progress_done, progress_max, error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    job.id.to_string(),
                    job.kind.as_str(),
                    job.library.as_str(),
                    job.version.as_str(),
                    job.source_url.as_str(),
                    options_json.as_str(),
                    job.status.as_str(),
                    job.progress_done as i64,
                    job.progress_max.map(|v| v as i64),
                    job.error.as_deref(),
                    job.created_at.to_rfc3339().as_str(),
                ],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Finds a queued or running job matching `(library, version,
    /// source_url)`, for the scheduler's dedup check (spec.md §4.6).
    pub async fn find_active_job(&self, library: &str, version: &str, source_url: &str) -> Result<Option<JobRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, library, version, source_url, options_snapshot, status,
                        progress_done, progress_max, error, created_at, updated_at
                 FROM jobs
                 WHERE library = ?1 AND version = ?2 AND source_url = ?3
                   AND status IN ('queued', 'running', 'updating')
                 ORDER BY created_at DESC LIMIT 1",
                params![library, version, source_url],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            _ => Ok(None),
        }
    }

    pub async fn get_job(&self, id: DocId) -> Result<Option<JobRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, library, version, source_url, options_snapshot, status,
                        progress_done, progress_max, error, created_at, updated_at
                 FROM jobs WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            _ => Ok(None),
        }
    }

    /// Lists jobs matching `filter`, newest first.
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>> {
        let mut sql = String::from(
            "SELECT id, kind, library, version, source_url, options_snapshot, status,
                    progress_done, progress_max, error, created_at, updated_at
             FROM jobs WHERE 1 = 1",
        );
        if filter.library.is_some() {
            sql.push_str(" AND library = ?1");
        }
        if filter.status.is_some() {
            sql.push_str(if filter.library.is_some() { " AND status = ?2" } else { " AND status = ?1" });
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut rows = match (&filter.library, &filter.status) {
            (Some(lib), Some(status)) => {
                self.conn.query(&sql, params![lib.as_str(), status.as_str()]).await
            }
            (Some(lib), None) => self.conn.query(&sql, params![lib.as_str()]).await,
            (None, Some(status)) => self.conn.query(&sql, params![status.as_str()]).await,
            (None, None) => self.conn.query(&sql, params![]).await,
        }
        .map_err(|e| DocIndexError::Storage(e.to_string()))?;

        let mut jobs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    /// Lists every job currently in `running` or `updating` or `queued`
    /// status, for startup recovery (spec.md §4.6).
    pub async fn list_unterminated_jobs(&self) -> Result<Vec<JobRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, library, version, source_url, options_snapshot, status,
                        progress_done, progress_max, error, created_at, updated_at
                 FROM jobs WHERE status IN ('queued', 'running', 'updating')",
                params![],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        let mut jobs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    /// Transitions a job's status, optionally carrying a terminal error
    /// message. Progress is updated separately via
    /// [`set_job_progress`](Self::set_job_progress) so frequent progress
    /// ticks don't need to touch `status`/`error`.
    pub async fn set_job_status(&self, id: DocId, status: JobStatus, error: Option<&str>) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE jobs SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
                params![status.as_str(), error, now.as_str(), id.to_string()],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Updates a job's progress counters (spec.md §5: "progress events for a
    /// given job are delivered in non-decreasing `pages_done` order" — the
    /// caller is responsible for only ever increasing `done`).
    pub async fn set_job_progress(&self, id: DocId, done: u64, max: Option<u64>) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE jobs SET progress_done = ?1, progress_max = COALESCE(?2, progress_max), updated_at = ?3 WHERE id = ?4",
                params![done as i64, max.map(|v| v as i64), now.as_str(), id.to_string()],
            )
            .await
            .map_err(|e| DocIndexError::Storage(e.to_string()))?;
        Ok(())
    }
}

fn row_to_job(row: &Row) -> Result<JobRecord> {
    let id_raw: String = row.get(0).map_err(|e| DocIndexError::Storage(e.to_string()))?;
    let kind_raw: String = row.get(1).map_err(|e| DocIndexError::Storage(e.to_string()))?;
    let status_raw: String = row.get(6).map_err(|e| DocIndexError::Storage(e.to_string()))?;
    let options_raw: Option<String> = row.get(5).ok();

    Ok(JobRecord {
        id: id_raw.parse().map_err(|e: uuid::Error| DocIndexError::Storage(e.to_string()))?,
        kind: kind_raw.parse().map_err(DocIndexError::Storage)?,
        library: row.get(2).map_err(|e| DocIndexError::Storage(e.to_string()))?,
        version: row.get(3).map_err(|e| DocIndexError::Storage(e.to_string()))?,
        source_url: row.get(4).map_err(|e| DocIndexError::Storage(e.to_string()))?,
        options_snapshot: options_raw
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(serde_json::Value::Null),
        status: status_raw.parse().map_err(DocIndexError::Storage)?,
        progress_done: row.get::<i64>(7).unwrap_or(0) as u64,
        progress_max: row.get::<i64>(8).ok().map(|v| v as u64),
        error: row.get::<String>(9).ok(),
        created_at: parse_rfc3339(&row.get::<String>(10).map_err(|e| DocIndexError::Storage(e.to_string()))?)?,
        updated_at: parse_rfc3339(&row.get::<String>(11).map_err(|e| DocIndexError::Storage(e.to_string()))?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use docindex_shared::AppConfig;
    use uuid::Uuid;

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("docindex_jobs_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp, AppConfig::default()).await.expect("open test db")
    }

    fn new_job(library: &str, version: &str, source_url: &str) -> JobRecord {
        let now = Utc::now();
        JobRecord {
            id: DocId::new(),
            kind: JobKind::Scrape,
            library: library.into(),
            version: version.into(),
            source_url: source_url.into(),
            options_snapshot: serde_json::json!({"maxPages": 100}),
            status: JobStatus::Queued,
            progress_done: 0,
            progress_max: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn insert_and_get_round_trips() {
        let storage = test_storage().await;
        let job = new_job("react", "18.2.0", "https://react.dev");
        storage.insert_job(&job).await.unwrap();

        let fetched = storage.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.library, "react");
        assert_eq!(fetched.status, JobStatus::Queued);
        assert_eq!(fetched.options_snapshot, serde_json::json!({"maxPages": 100}));
    }

    #[tokio::test]
    async fn find_active_job_matches_dedup_key() {
        let storage = test_storage().await;
        let job = new_job("react", "18.2.0", "https://react.dev");
        storage.insert_job(&job).await.unwrap();

        let found = storage.find_active_job("react", "18.2.0", "https://react.dev").await.unwrap();
        assert_eq!(found.unwrap().id, job.id);

        let none = storage.find_active_job("react", "17.0.0", "https://react.dev").await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn completed_jobs_are_not_active() {
        let storage = test_storage().await;
        let job = new_job("react", "18.2.0", "https://react.dev");
        storage.insert_job(&job).await.unwrap();
        storage.set_job_status(job.id, JobStatus::Completed, None).await.unwrap();

        let found = storage.find_active_job("react", "18.2.0", "https://react.dev").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn set_job_status_carries_error() {
        let storage = test_storage().await;
        let job = new_job("react", "18.2.0", "https://react.dev");
        storage.insert_job(&job).await.unwrap();
        storage.set_job_status(job.id, JobStatus::Failed, Some("boom")).await.unwrap();

        let fetched = storage.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Failed);
        assert_eq!(fetched.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn set_job_progress_updates_counters() {
        let storage = test_storage().await;
        let job = new_job("react", "18.2.0", "https://react.dev");
        storage.insert_job(&job).await.unwrap();
        storage.set_job_progress(job.id, 5, Some(20)).await.unwrap();

        let fetched = storage.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.progress_done, 5);
        assert_eq!(fetched.progress_max, Some(20));
    }

    #[tokio::test]
    async fn list_jobs_filters_by_library_and_status() {
        let storage = test_storage().await;
        let a = new_job("react", "18.2.0", "https://react.dev");
        let b = new_job("vue", "3.0.0", "https://vuejs.org");
        storage.insert_job(&a).await.unwrap();
        storage.insert_job(&b).await.unwrap();
        storage.set_job_status(a.id, JobStatus::Running, None).await.unwrap();

        let react_jobs = storage.list_jobs(&JobFilter { library: Some("react".into()), status: None }).await.unwrap();
        assert_eq!(react_jobs.len(), 1);

        let running = storage.list_jobs(&JobFilter { library: None, status: Some(JobStatus::Running) }).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, a.id);
    }

    #[tokio::test]
    async fn list_unterminated_jobs_excludes_completed() {
        let storage = test_storage().await;
        let a = new_job("react", "18.2.0", "https://react.dev");
        let b = new_job("vue", "3.0.0", "https://vuejs.org");
        storage.insert_job(&a).await.unwrap();
        storage.insert_job(&b).await.unwrap();
        storage.set_job_status(a.id, JobStatus::Completed, None).await.unwrap();

        let pending = storage.list_unterminated_jobs().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);
    }
}
