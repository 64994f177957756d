//! Holds every registered printer's worker, and implements the
//! fleet-level operations: create, delete, reorder, hard reset, snapshot,
//! and "which printer has the smallest queue" dispatch.
use crate::config::PrinterDescriptor;
use crate::event::EventSink;
use crate::gcode_streamer::PrinterHandle;
use crate::model::{Printer, Queue};
use crate::port_resolver::PortResolver;
use crate::serial_link::SerialLink;
use crate::store::JobStore;
use crate::worker::{PrinterWorker, WorkerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};

struct Entry {
    descriptor: PrinterDescriptor,
    printer: PrinterHandle,
    queue: Arc<Mutex<Queue>>,
    shutdown_tx: broadcast::Sender<()>,
    join_handle: tokio::task::JoinHandle<()>,
}

pub struct PrinterRegistry {
    entries: Mutex<Vec<Entry>>,
    event_sink: Arc<dyn EventSink>,
    store: Arc<dyn JobStore>,
    port_resolver: Arc<PortResolver>,
    link_factory: Arc<dyn Fn() -> Box<dyn SerialLink> + Send + Sync>,
    baud_rate: u32,
    read_timeout: Duration,
    uploads_dir: String,
}

impl PrinterRegistry {
    pub fn new(
        event_sink: Arc<dyn EventSink>,
        store: Arc<dyn JobStore>,
        port_resolver: Arc<PortResolver>,
        link_factory: Arc<dyn Fn() -> Box<dyn SerialLink> + Send + Sync>,
        baud_rate: u32,
        read_timeout: Duration,
        uploads_dir: String,
    ) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            event_sink,
            store,
            port_resolver,
            link_factory,
            baud_rate,
            read_timeout,
            uploads_dir,
        }
    }

    pub async fn create_from_descriptors(&self, descriptors: Vec<PrinterDescriptor>) {
        for descriptor in descriptors {
            self.register_one(descriptor).await;
        }
    }

    pub async fn register_one(&self, descriptor: PrinterDescriptor) {
        self.store.upsert_printer(descriptor.clone()).await;
        let queue = Arc::new(Mutex::new(Queue::new(descriptor.id, self.event_sink.clone())));
        let entry = self.spawn_entry(descriptor, queue);
        self.entries.lock().await.push(entry);
    }

    fn spawn_entry(&self, descriptor: PrinterDescriptor, queue: Arc<Mutex<Queue>>) -> Entry {
        let printer = Arc::new(RwLock::new(Printer::new(
            descriptor.id,
            descriptor.hwid.clone(),
            descriptor.device.clone(),
            descriptor.name.clone(),
            descriptor.description.clone(),
            self.event_sink.clone(),
        )));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let worker = PrinterWorker::new(
            printer.clone(),
            queue.clone(),
            self.link_factory.clone(),
            self.port_resolver.clone(),
            self.store.clone(),
            WorkerConfig {
                baud_rate: self.baud_rate,
                read_timeout: self.read_timeout,
                uploads_dir: self.uploads_dir.clone(),
            },
            shutdown_rx,
        );
        let join_handle = worker.spawn();
        Entry { descriptor, printer, queue, shutdown_tx, join_handle }
    }

    pub async fn find_by_id(&self, id: i64) -> Option<(PrinterHandle, Arc<Mutex<Queue>>)> {
        self.entries
            .lock()
            .await
            .iter()
            .find(|e| e.descriptor.id == id)
            .map(|e| (e.printer.clone(), e.queue.clone()))
    }

    pub async fn delete(&self, id: i64) {
        let mut entries = self.entries.lock().await;
        if let Some(pos) = entries.iter().position(|e| e.descriptor.id == id) {
            let entry = entries.remove(pos);
            entry.printer.write().await.terminated = true;
            let _ = entry.shutdown_tx.send(());
            entry.join_handle.abort();
        }
        drop(entries);
        self.store.delete_printer(id).await;
    }

    pub async fn edit_name(&self, id: i64, name: String) {
        if let Some((printer, _)) = self.find_by_id(id).await {
            printer.write().await.edit_name(name);
        }
    }

    pub async fn reorder(&self, ids: &[i64]) {
        let mut entries = self.entries.lock().await;
        let mut reordered = Vec::with_capacity(entries.len());
        for id in ids {
            if let Some(pos) = entries.iter().position(|e| e.descriptor.id == *id) {
                reordered.push(entries.remove(pos));
            }
        }
        reordered.extend(entries.drain(..));
        *entries = reordered;
    }

    /// Tears down the current worker and spawns a fresh one from the same
    /// descriptor. `preserve_queue` keeps the in-flight queue contents
    /// (`resetAndRestore`); otherwise a clean empty queue is used.
    pub async fn reset(&self, id: i64, preserve_queue: bool) {
        let mut entries = self.entries.lock().await;
        let Some(pos) = entries.iter().position(|e| e.descriptor.id == id) else { return };
        let old = entries.remove(pos);
        old.printer.write().await.terminated = true;
        let _ = old.shutdown_tx.send(());
        old.join_handle.abort();

        let queue = if preserve_queue {
            old.queue
        } else {
            Arc::new(Mutex::new(Queue::new(id, self.event_sink.clone())))
        };
        let new_entry = self.spawn_entry(old.descriptor, queue);
        entries.insert(pos, new_entry);
    }

    pub async fn smallest_queue(&self) -> Option<i64> {
        let entries = self.entries.lock().await;
        let mut best: Option<(i64, usize)> = None;
        for entry in entries.iter() {
            let size = entry.queue.lock().await.size();
            match best {
                Some((_, best_size)) if best_size <= size => {}
                _ => best = Some((entry.descriptor.id, size)),
            }
        }
        best.map(|(id, _)| id)
    }

    pub async fn snapshot(&self) -> serde_json::Value {
        let entries = self.entries.lock().await;
        let mut list = Vec::with_capacity(entries.len());
        for entry in entries.iter() {
            let mut info = entry.printer.read().await.to_json();
            info["queue"] = entry.queue.lock().await.to_json().await;
            list.push(info);
        }
        serde_json::Value::Array(list)
    }

    pub async fn all_printers(&self) -> Vec<PrinterHandle> {
        self.entries.lock().await.iter().map(|e| e.printer.clone()).collect()
    }

    pub async fn registered_hwids(&self) -> Vec<String> {
        let entries = self.entries.lock().await;
        let mut hwids = Vec::with_capacity(entries.len());
        for entry in entries.iter() {
            hwids.push(entry.printer.read().await.hwid.clone());
        }
        hwids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::BroadcastEventSink;
    use crate::port_resolver::PortEnumerator;
    use crate::serial_link::MockSerialLink;
    use crate::store::InMemoryStore;

    struct EmptyEnumerator;
    impl PortEnumerator for EmptyEnumerator {
        fn enumerate(&self) -> Vec<crate::port_resolver::PortInfo> {
            Vec::new()
        }
    }

    fn registry() -> PrinterRegistry {
        PrinterRegistry::new(
            Arc::new(BroadcastEventSink::new(64)),
            Arc::new(InMemoryStore::new()),
            Arc::new(PortResolver::new(Arc::new(EmptyEnumerator))),
            Arc::new(|| Box::new(MockSerialLink::new(vec![])) as Box<dyn SerialLink>),
            115200,
            Duration::from_millis(50),
            std::env::temp_dir().to_string_lossy().to_string(),
        )
    }

    fn descriptor(id: i64, name: &str) -> PrinterDescriptor {
        PrinterDescriptor { id, device: format!("/dev/tty{id}"), description: "Original Prusa".into(), hwid: format!("hw{id}"), name: name.into() }
    }

    #[tokio::test]
    async fn smallest_queue_breaks_ties_by_registry_order() {
        let registry = registry();
        registry.register_one(descriptor(1, "a")).await;
        registry.register_one(descriptor(2, "b")).await;

        // Both queues start empty -- tie should resolve to the first registered.
        assert_eq!(registry.smallest_queue().await, Some(1));
    }

    #[tokio::test]
    async fn reorder_changes_snapshot_order() {
        let registry = registry();
        registry.register_one(descriptor(1, "a")).await;
        registry.register_one(descriptor(2, "b")).await;
        registry.reorder(&[2, 1]).await;

        let snap = registry.snapshot().await;
        assert_eq!(snap[0]["id"], 2);
        assert_eq!(snap[1]["id"], 1);
    }

    #[tokio::test]
    async fn reset_preserves_queue_when_requested() {
        let registry = registry();
        registry.register_one(descriptor(1, "a")).await;
        let (_, queue) = registry.find_by_id(1).await.unwrap();
        let sink: Arc<dyn EventSink> = Arc::new(BroadcastEventSink::new(16));
        let job = Arc::new(tokio::sync::Mutex::new(crate::model::Job::new(
            99, vec![], "a.gcode".into(), "PLA".into(), None, false, sink,
        )));
        queue.lock().await.add_to_back(job).await;

        registry.reset(1, true).await;
        let (_, new_queue) = registry.find_by_id(1).await.unwrap();
        assert_eq!(new_queue.lock().await.size(), 1);
    }
}
