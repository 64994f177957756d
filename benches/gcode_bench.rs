// Benchmark for G-code streaming throughput.
// Run with: cargo bench
use criterion::{criterion_group, criterion_main, Criterion};
use krust_coordinator::event::BroadcastEventSink;
use krust_coordinator::gcode_streamer;
use krust_coordinator::model::job::Job;
use krust_coordinator::model::printer::Printer;
use krust_coordinator::serial_link::{MockSerialLink, SerialLink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

fn synthetic_gcode(lines: usize) -> String {
    let mut gcode = String::from(";FLAVOR:Marlin\n;TIME:3600\n");
    for i in 0..lines {
        gcode.push_str(&format!("G1 X{i} Y{i} F1500\n"));
    }
    gcode
}

fn bench_prescan(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let gcode = synthetic_gcode(10_000);

    c.bench_function("prescan 10k lines", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let sink: Arc<dyn krust_coordinator::event::EventSink> = Arc::new(BroadcastEventSink::new(16));
                let job = Arc::new(Mutex::new(Job::new(1, vec![], "a.gcode".into(), "PLA".into(), None, false, sink)));
                gcode_streamer::prescan(&gcode, &job).await;
            })
        })
    });
}

fn bench_stream(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let gcode = synthetic_gcode(5_000);
    let replies: Vec<&str> = std::iter::repeat("ok").take(5_000).collect();

    c.bench_function("stream 5k lines", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let sink: Arc<dyn krust_coordinator::event::EventSink> = Arc::new(BroadcastEventSink::new(16));
                let printer = Arc::new(RwLock::new(Printer::new(
                    1,
                    "hwid".into(),
                    "/dev/ttyUSB0".into(),
                    "mk3".into(),
                    "Original Prusa".into(),
                    sink.clone(),
                )));
                printer.write().await.status = krust_coordinator::model::PrinterStatus::Printing;
                let job = Arc::new(Mutex::new(Job::new(1, vec![], "a.gcode".into(), "PLA".into(), None, false, sink)));
                job.lock().await.status = krust_coordinator::model::JobStatus::Printing;

                let mut link = MockSerialLink::new(replies.clone());
                link.open("/dev/null", 115200).await.unwrap();
                gcode_streamer::stream(&gcode, &printer, &job, &mut link, Duration::from_millis(50)).await;
            })
        })
    });
}

criterion_group!(benches, bench_prescan, bench_stream);
criterion_main!(benches);
