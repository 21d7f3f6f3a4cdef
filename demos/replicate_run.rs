//! Record a run, derive a processed run from it, and export both.
//!
//! Run with `RUST_LOG=databroker=debug cargo run --example replicate_run`.

use std::collections::BTreeMap;
use std::sync::Arc;

use databroker::document::{DataKey, Document, Event, EventDescriptor, ExitStatus, RunStart, RunStop};
use databroker::store::MemoryFileSystem;
use databroker::stream::{EventMap, FrameWriter};
use databroker::{Broker, ExportOptions, Result};
use rand::Rng;
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

const FRAME_LEN: usize = 8;

fn simulated_scan(scan_id: i64, points: usize) -> Vec<Result<Document>> {
    let mut rng = rand::thread_rng();
    let start = RunStart::builder()
        .scan_id(scan_id)
        .field("plan_name", json!("count"))
        .build();
    let desc = EventDescriptor::builder(start.uid())
        .data_key("det", DataKey::new().with("shape", json!([FRAME_LEN])))
        .data_key("motor", DataKey::new().with("units", json!("mm")))
        .build();

    let mut docs: Vec<Result<Document>> = vec![Ok(start.clone().into()), Ok(desc.clone().into())];
    for i in 0..points {
        let frame: Vec<f64> = (0..FRAME_LEN).map(|_| rng.gen_range(0.0..100.0)).collect();
        let event = Event::builder(desc.uid())
            .seq_num(i as u64 + 1)
            .datum("det", json!(frame))
            .datum("motor", json!(i))
            .build();
        docs.push(Ok(event.into()));
    }
    docs.push(Ok(RunStop::new(start.uid(), ExitStatus::Success).into()));
    docs
}

// Scalars such as motor positions pass through unchanged.
fn frame_mean(value: &Value) -> anyhow::Result<Value> {
    let Some(frame) = value.as_array() else {
        anyhow::ensure!(value.is_number(), "expected a frame or a number, got {value}");
        return Ok(value.clone());
    };
    let values: Vec<f64> = frame.iter().filter_map(Value::as_f64).collect();
    anyhow::ensure!(!values.is_empty(), "empty frame");
    #[allow(clippy::cast_precision_loss)]
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Ok(json!(mean))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("databroker=info")),
        )
        .init();

    let files = Arc::new(MemoryFileSystem::new());
    let raw = Broker::in_memory_shared("/beamline/raw", Arc::clone(&files));
    let processed = Broker::in_memory_shared("/beamline/processed", Arc::clone(&files));
    let archive = Broker::in_memory_shared("/archive", Arc::clone(&files));

    // Record.
    let recorder = raw.interceptor().writer("det", FrameWriter::boxed);
    for doc in recorder.intercept(simulated_scan(1, 5)) {
        doc?;
    }
    let header = raw.resolve(1)?.into_vec().remove(0);
    println!("recorded run {} ({} resources)", header.uid(), raw.resource_uids(&header)?.len());

    // Derive.
    let mut keys = BTreeMap::new();
    let mut fragment = Map::new();
    fragment.insert("shape".to_string(), json!([]));
    keys.insert("det".to_string(), fragment);
    let op = EventMap::new(
        "primary",
        keys,
        json!({"operation": "frame_mean"}),
        frame_mean,
    );
    let sink = processed.interceptor().writer("det", FrameWriter::boxed);
    let derived = raw.drive_and_resolve(&header, &processed, |stream| {
        sink.intercept(op.apply(stream))
    })?;
    for run in &derived {
        let means: Vec<Value> = processed
            .restream(run, true)
            .filter_map(|doc| match doc {
                Ok(Document::Event(e)) => e.data().get("det").cloned(),
                _ => None,
            })
            .collect();
        println!("derived run {} from {:?}: {means:?}", run.uid(), run.start().parents());
    }

    // Export.
    let pairs = raw.export(&[header], &archive, &ExportOptions::with_root("/archive"))?;
    for (old, new) in &pairs {
        println!("copied {old} -> {new}");
    }
    println!("{} files in the shared namespace", files.len());
    Ok(())
}
