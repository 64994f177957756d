//! One long-lived task per registered printer: owns the printer's serial
//! link and queue, and drives the idle -> print -> terminal -> idle cycle.
use crate::gcode_streamer::{self, PrinterHandle, Verdict};
use crate::model::queue::SharedJob;
use crate::model::{JobStatus, PrinterStatus, Queue};
use crate::port_resolver::PortResolver;
use crate::serial_link::SerialLink;
use crate::store::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::sleep;

pub struct WorkerConfig {
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub uploads_dir: String,
}

pub struct PrinterWorker {
    pub printer: PrinterHandle,
    pub queue: Arc<Mutex<Queue>>,
    link_factory: Arc<dyn Fn() -> Box<dyn SerialLink> + Send + Sync>,
    port_resolver: Arc<PortResolver>,
    store: Arc<dyn JobStore>,
    config: WorkerConfig,
    shutdown_rx: broadcast::Receiver<()>,
}

impl PrinterWorker {
    pub fn new(
        printer: PrinterHandle,
        queue: Arc<Mutex<Queue>>,
        link_factory: Arc<dyn Fn() -> Box<dyn SerialLink> + Send + Sync>,
        port_resolver: Arc<PortResolver>,
        store: Arc<dyn JobStore>,
        config: WorkerConfig,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self { printer, queue, link_factory, port_resolver, store, config, shutdown_rx }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let printer_id = self.printer.read().await.id;
        loop {
            if self.printer.read().await.terminated {
                tracing::info!(printer_id, "worker observed terminated flag, exiting");
                return;
            }
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    tracing::info!(printer_id, "worker shutting down");
                    return;
                }
                _ = sleep(Duration::from_secs(2)) => {
                    self.tick().await;
                }
            }
        }
    }

    async fn tick(&mut self) {
        let status = self.printer.read().await.status;
        let queue_size = self.queue.lock().await.size();
        self.printer.write().await.response_count = 0;

        if status == PrinterStatus::Ready && queue_size > 0 {
            sleep(Duration::from_secs(2)).await;
            if self.printer.read().await.status != PrinterStatus::Offline {
                self.print_next_in_queue().await;
            }
        }
    }

    async fn print_next_in_queue(&mut self) {
        let Some(job) = self.queue.lock().await.get_next() else { return };
        let job_id = job.lock().await.id;

        self.printer.write().await.set_status(PrinterStatus::Printing).await;
        job.lock().await.set_status(JobStatus::Printing).await;
        let _ = self.store.update_status(job_id, "printing").await;

        let go = self.await_release(&job).await;
        if !go {
            job.lock().await.set_status(JobStatus::Cancelled).await;
            let _ = self.store.update_status(job_id, "cancelled").await;
            self.queue.lock().await.delete_job(job_id).await;
            return;
        }

        self.port_resolver.repair_one(&self.printer).await;

        let mut link = (self.link_factory)();
        let device = self.printer.read().await.device.clone();
        if let Err(e) = link.open(&device, self.config.baud_rate).await {
            self.printer.write().await.set_error(format!("failed to open {device}: {e}")).await;
            self.queue.lock().await.delete_job(job_id).await;
            job.lock().await.set_status(JobStatus::Error).await;
            let _ = self.store.update_status(job_id, "error").await;
            return;
        }
        self.printer.write().await.connected = true;
        let _ = link.write_line("M155 S5").await;

        let (file_bytes, file_name_pk) = {
            let j = job.lock().await;
            (j.file.clone(), j.file_name_pk.clone())
        };
        let path = match crate::file_manager::write_job_file(&self.config.uploads_dir, &file_name_pk, &file_bytes).await {
            Ok(p) => p,
            Err(e) => {
                self.printer.write().await.set_error(format!("failed to stage job file: {e}")).await;
                let _ = link.close().await;
                self.printer.write().await.connected = false;
                self.queue.lock().await.delete_job(job_id).await;
                job.lock().await.set_status(JobStatus::Error).await;
                let _ = self.store.update_status(job_id, "error").await;
                return;
            }
        };
        let file_text = tokio::fs::read_to_string(&path).await.unwrap_or_default();

        gcode_streamer::prescan(&file_text, &job).await;
        let verdict = gcode_streamer::stream(&file_text, &self.printer, &job, link.as_mut(), self.config.read_timeout).await;

        match verdict {
            None => {
                // Hard reset mid-print: emit nothing, leave cleanup to the registry.
            }
            Some(Verdict::Complete) => {
                let _ = link.close().await;
                self.printer.write().await.connected = false;
                self.printer.write().await.set_status(PrinterStatus::Complete).await;
                job.lock().await.set_status(JobStatus::Complete).await;
                let _ = self.store.update_status(job_id, "complete").await;
            }
            Some(Verdict::Error) => {
                let _ = link.close().await;
                self.printer.write().await.connected = false;
                self.queue.lock().await.delete_job(job_id).await;
                job.lock().await.set_status(JobStatus::Error).await;
                let _ = self.store.update_status(job_id, "error").await;
            }
            Some(Verdict::Cancelled) => {
                let _ = gcode_streamer::ending_sequence(&self.printer, &job, link.as_mut(), self.config.read_timeout).await;
                let _ = link.close().await;
                self.printer.write().await.connected = false;
                job.lock().await.set_status(JobStatus::Cancelled).await;
                let _ = self.store.update_status(job_id, "cancelled").await;
            }
        }

        let _ = crate::file_manager::remove_job_file(&self.config.uploads_dir, &file_name_pk).await;
    }

    /// Polls once a second until the job is released, the user cancels
    /// (printer set to `Complete` while still waiting), or a hard reset
    /// interrupts the wait.
    async fn await_release(&self, job: &SharedJob) -> bool {
        loop {
            if job.lock().await.released == 1 {
                return true;
            }
            if self.printer.read().await.status == PrinterStatus::Complete {
                return false;
            }
            if self.printer.read().await.terminated {
                return false;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}
