//! The ordered, per-printer sequence of jobs awaiting or in print.
use crate::event::{Event, EventSink};
use crate::model::job::Job;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type SharedJob = Arc<Mutex<Job>>;

pub struct Queue {
    printer_id: i64,
    jobs: VecDeque<SharedJob>,
    sink: Arc<dyn EventSink>,
}

impl Queue {
    pub fn new(printer_id: i64, sink: Arc<dyn EventSink>) -> Self {
        Self { printer_id, jobs: VecDeque::new(), sink }
    }

    pub fn size(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub async fn job_exists(&self, id: i64) -> bool {
        for job in &self.jobs {
            if job.lock().await.id == id {
                return true;
            }
        }
        false
    }

    pub async fn get_job_by_id(&self, id: i64) -> Option<SharedJob> {
        for job in &self.jobs {
            if job.lock().await.id == id {
                return Some(job.clone());
            }
        }
        None
    }

    pub fn get_next(&self) -> Option<SharedJob> {
        self.jobs.front().cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedJob> {
        self.jobs.iter()
    }

    pub async fn add_to_back(&mut self, job: SharedJob) {
        if self.job_exists(job.lock().await.id).await {
            return;
        }
        self.jobs.push_back(job);
        self.emit_queue_update().await;
    }

    /// Inserts at the front, unless the current head is already printing --
    /// in which case it lands right behind it so an in-flight print is
    /// never displaced.
    pub async fn add_to_front(&mut self, job: SharedJob) {
        if self.job_exists(job.lock().await.id).await {
            return;
        }
        let head_is_printing = match self.jobs.front() {
            Some(head) => head.lock().await.status == crate::model::JobStatus::Printing,
            None => false,
        };
        let index = if head_is_printing { 1 } else { 0 };
        self.jobs.insert(index.min(self.jobs.len()), job);
        self.emit_queue_update().await;
    }

    pub async fn delete_job(&mut self, id: i64) -> Option<SharedJob> {
        let pos = self.position_of(id).await?;
        let removed = self.jobs.remove(pos);
        self.emit_queue_update().await;
        removed
    }

    pub async fn reorder(&mut self, ids: &[i64]) {
        let mut reordered = VecDeque::with_capacity(self.jobs.len());
        for id in ids {
            if let Some(pos) = self.position_of(*id).await {
                reordered.push_back(self.jobs[pos].clone());
            }
        }
        self.jobs = reordered;
        self.emit_queue_update().await;
    }

    /// Kept for symmetry with the system this was modeled on; not called
    /// from any dispatch path.
    pub async fn bump(&mut self, up: bool, id: i64) {
        let Some(pos) = self.position_of(id).await else { return };
        let new_pos = if up { pos.saturating_sub(1) } else { (pos + 1).min(self.jobs.len() - 1) };
        if new_pos != pos {
            let job = self.jobs.remove(pos).unwrap();
            self.jobs.insert(new_pos, job);
            self.emit_queue_update().await;
        }
    }

    pub async fn bump_extreme(&mut self, front: bool, id: i64) {
        let Some(pos) = self.position_of(id).await else { return };
        let job = self.jobs.remove(pos).unwrap();
        if front {
            self.jobs.push_front(job);
        } else {
            self.jobs.push_back(job);
        }
        self.emit_queue_update().await;
    }

    async fn position_of(&self, id: i64) -> Option<usize> {
        for (i, job) in self.jobs.iter().enumerate() {
            if job.lock().await.id == id {
                return Some(i);
            }
        }
        None
    }

    pub async fn to_json(&self) -> serde_json::Value {
        let mut entries = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            entries.push(job.lock().await.to_json());
        }
        serde_json::Value::Array(entries)
    }

    async fn emit_queue_update(&self) {
        let queue_json = self.to_json().await;
        self.sink
            .emit(Event::QueueUpdate { printer_id: self.printer_id, queue: queue_json })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::BroadcastEventSink;
    use crate::model::JobStatus;
    use tokio::sync::Mutex;

    fn sink() -> Arc<dyn EventSink> {
        Arc::new(BroadcastEventSink::new(16))
    }

    fn job(id: i64, sink: Arc<dyn EventSink>) -> SharedJob {
        Arc::new(Mutex::new(Job::new(id, vec![], "a.gcode".into(), "PLA".into(), None, false, sink)))
    }

    #[tokio::test]
    async fn rejects_duplicate_ids() {
        let sink = sink();
        let mut queue = Queue::new(1, sink.clone());
        queue.add_to_back(job(1, sink.clone())).await;
        queue.add_to_back(job(1, sink.clone())).await;
        assert_eq!(queue.size(), 1);
    }

    #[tokio::test]
    async fn add_to_front_inserts_behind_active_head() {
        let sink = sink();
        let mut queue = Queue::new(1, sink.clone());
        let printing = job(1, sink.clone());
        printing.lock().await.status = JobStatus::Printing;
        queue.add_to_back(printing).await;
        queue.add_to_back(job(2, sink.clone())).await;

        queue.add_to_front(job(3, sink.clone())).await;

        let ids: Vec<i64> = {
            let mut ids = Vec::new();
            for j in queue.iter() {
                ids.push(j.lock().await.id);
            }
            ids
        };
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[tokio::test]
    async fn add_to_front_inserts_at_head_when_idle() {
        let sink = sink();
        let mut queue = Queue::new(1, sink.clone());
        queue.add_to_back(job(1, sink.clone())).await;
        queue.add_to_front(job(2, sink.clone())).await;

        let head_id = queue.get_next().unwrap().lock().await.id;
        assert_eq!(head_id, 2);
    }

    #[tokio::test]
    async fn delete_job_returns_none_when_missing() {
        let sink = sink();
        let mut queue = Queue::new(1, sink.clone());
        assert!(queue.delete_job(99).await.is_none());
    }
}
