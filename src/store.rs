//! Persistence boundary. The core talks to a `JobStore`; this module also
//! ships an in-memory implementation so the crate runs without a database.
use crate::config::PrinterDescriptor;
use crate::model::Issue;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

const CLEAR_SPACE_MAX_AGE_DAYS: i64 = 182;

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: i64,
    pub printer_id: Option<i64>,
    pub file_name_original: String,
    pub status: String,
    pub progress: f64,
    pub favorite: bool,
    pub comments: String,
    pub error_id: Option<i64>,
    pub td_id: Option<String>,
    pub filament: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct JobHistoryFilter {
    pub printer_id: Option<i64>,
    pub status: Option<String>,
    pub page: usize,
    pub per_page: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    JobNotFound(i64),
    #[error("printer {0} not found")]
    PrinterNotFound(i64),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn next_job_id(&self) -> i64;
    async fn insert_job(&self, record: JobRecord);
    async fn update_status(&self, job_id: i64, status: &str) -> Result<(), StoreError>;
    async fn delete_job(&self, job_id: i64) -> Option<JobRecord>;
    async fn get_job(&self, job_id: i64) -> Option<JobRecord>;
    async fn get_job_history(&self, filter: JobHistoryFilter) -> Vec<JobRecord>;
    async fn get_favorite_jobs(&self) -> Vec<JobRecord>;
    async fn set_issue(&self, job_id: i64, issue_id: i64) -> Result<(), StoreError>;
    async fn unset_issue(&self, job_id: i64) -> Result<(), StoreError>;
    async fn set_comment(&self, job_id: i64, comment: String) -> Result<(), StoreError>;
    /// Purges non-favorite jobs older than the retention window. Returns
    /// how many records were removed.
    async fn clear_space(&self) -> usize;

    async fn upsert_printer(&self, descriptor: PrinterDescriptor);
    async fn list_printers(&self) -> Vec<PrinterDescriptor>;
    async fn update_printer_device(&self, id: i64, device: String) -> Result<(), StoreError>;
    async fn delete_printer(&self, id: i64);

    async fn create_issue(&self, text: String) -> i64;
    async fn list_issues(&self) -> Vec<Issue>;
    async fn delete_issue(&self, id: i64);
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<i64, JobRecord>,
    next_job_id: i64,
    printers: HashMap<i64, PrinterDescriptor>,
    issues: HashMap<i64, Issue>,
    next_issue_id: i64,
}

pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn next_job_id(&self) -> i64 {
        let mut inner = self.inner.lock().await;
        inner.next_job_id += 1;
        inner.next_job_id
    }

    async fn insert_job(&self, record: JobRecord) {
        self.inner.lock().await.jobs.insert(record.id, record);
    }

    async fn update_status(&self, job_id: i64, status: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        job.status = status.to_string();
        Ok(())
    }

    async fn delete_job(&self, job_id: i64) -> Option<JobRecord> {
        self.inner.lock().await.jobs.remove(&job_id)
    }

    async fn get_job(&self, job_id: i64) -> Option<JobRecord> {
        self.inner.lock().await.jobs.get(&job_id).cloned()
    }

    async fn get_job_history(&self, filter: JobHistoryFilter) -> Vec<JobRecord> {
        let inner = self.inner.lock().await;
        let mut matched: Vec<JobRecord> = inner
            .jobs
            .values()
            .filter(|j| filter.printer_id.is_none_or(|pid| j.printer_id == Some(pid)))
            .filter(|j| filter.status.as_deref().is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        matched.sort_by_key(|j| std::cmp::Reverse(j.created_at));
        if filter.per_page == 0 {
            return matched;
        }
        let start = filter.page.saturating_mul(filter.per_page);
        matched.into_iter().skip(start).take(filter.per_page).collect()
    }

    async fn get_favorite_jobs(&self) -> Vec<JobRecord> {
        self.inner.lock().await.jobs.values().filter(|j| j.favorite).cloned().collect()
    }

    async fn set_issue(&self, job_id: i64, issue_id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        job.error_id = Some(issue_id);
        Ok(())
    }

    async fn unset_issue(&self, job_id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        job.error_id = None;
        Ok(())
    }

    async fn set_comment(&self, job_id: i64, comment: String) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound(job_id))?;
        job.comments = comment;
        Ok(())
    }

    async fn clear_space(&self) -> usize {
        let cutoff = Utc::now() - Duration::days(CLEAR_SPACE_MAX_AGE_DAYS);
        let mut inner = self.inner.lock().await;
        let to_remove: Vec<i64> = inner
            .jobs
            .values()
            .filter(|j| !j.favorite && j.created_at < cutoff)
            .map(|j| j.id)
            .collect();
        for id in &to_remove {
            inner.jobs.remove(id);
        }
        to_remove.len()
    }

    async fn upsert_printer(&self, descriptor: PrinterDescriptor) {
        self.inner.lock().await.printers.insert(descriptor.id, descriptor);
    }

    async fn list_printers(&self) -> Vec<PrinterDescriptor> {
        self.inner.lock().await.printers.values().cloned().collect()
    }

    async fn update_printer_device(&self, id: i64, device: String) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let p = inner.printers.get_mut(&id).ok_or(StoreError::PrinterNotFound(id))?;
        p.device = device;
        Ok(())
    }

    async fn delete_printer(&self, id: i64) {
        self.inner.lock().await.printers.remove(&id);
    }

    async fn create_issue(&self, text: String) -> i64 {
        let mut inner = self.inner.lock().await;
        inner.next_issue_id += 1;
        let id = inner.next_issue_id;
        inner.issues.insert(id, Issue { id, text });
        id
    }

    async fn list_issues(&self) -> Vec<Issue> {
        self.inner.lock().await.issues.values().cloned().collect()
    }

    async fn delete_issue(&self, id: i64) {
        self.inner.lock().await.issues.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, favorite: bool, age_days: i64) -> JobRecord {
        JobRecord {
            id,
            printer_id: Some(1),
            file_name_original: "a.gcode".into(),
            status: "complete".into(),
            progress: 100.0,
            favorite,
            comments: String::new(),
            error_id: None,
            td_id: None,
            filament: "PLA".into(),
            created_at: Utc::now() - Duration::days(age_days),
        }
    }

    #[tokio::test]
    async fn clear_space_purges_old_non_favorites_only() {
        let store = InMemoryStore::new();
        store.insert_job(record(1, false, 200)).await;
        store.insert_job(record(2, true, 200)).await;
        store.insert_job(record(3, false, 10)).await;

        let purged = store.clear_space().await;
        assert_eq!(purged, 1);
        assert!(store.get_job(1).await.is_none());
        assert!(store.get_job(2).await.is_some());
        assert!(store.get_job(3).await.is_some());
    }

    #[tokio::test]
    async fn job_history_filters_by_status_and_paginates() {
        let store = InMemoryStore::new();
        for i in 1..=5 {
            let mut r = record(i, false, 0);
            r.status = if i % 2 == 0 { "complete".into() } else { "cancelled".into() };
            store.insert_job(r).await;
        }
        let filter = JobHistoryFilter { status: Some("complete".into()), per_page: 0, ..Default::default() };
        let results = store.get_job_history(filter).await;
        assert_eq!(results.len(), 2);
    }
}
