//! # Span Uploader Demo
//!
//! Builds an HTTP exporter from the environment, wires an explicit
//! `BatchSpanProcessor` handle and submits a small trace:
//!
//! - a root request span
//! - a child span with an oversized input (moved to object storage when
//!   `SPAN_UPLOADER_ULTRA_LARGE_REPORT=true`)
//! - a model span whose output carries an inline base64 image
//!
//! It then force-flushes and shuts down with a deadline, or does so early on
//! Ctrl-C.
//!
//! ## Running
//!
//! ```bash
//! SPAN_UPLOADER_API_TOKEN=... SPAN_UPLOADER_WORKSPACE_ID=... \
//!     cargo run -p span_uploader --bin demo
//!
//! # more detail
//! RUST_LOG=debug cargo run -p span_uploader --bin demo
//! ```

use span_uploader::{
    BatchSpanProcessor, ExporterBoxed, FinishEventInfo, HttpExporter, HttpExporterConfig,
    ModelChoice, ModelInput, ModelMessage, ModelMessagePart, ModelOutput, ProcessorConfig, Span,
};
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

// 1x1 transparent PNG
const TINY_PNG_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,span_uploader=debug")),
        )
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "demo failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let workspace_id = env::var("SPAN_UPLOADER_WORKSPACE_ID").unwrap_or_default();
    let ultra_large_report = env::var("SPAN_UPLOADER_ULTRA_LARGE_REPORT")
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false);

    let http_config = HttpExporterConfig::from_env();
    info!(
        base_url = %http_config.base_url,
        workspace_id = %workspace_id,
        ultra_large_report,
        "starting span uploader demo"
    );
    let exporter: Arc<dyn ExporterBoxed> = Arc::new(HttpExporter::new(http_config)?);

    let failed_events = Arc::new(AtomicU64::new(0));
    let failed = Arc::clone(&failed_events);
    let config = ProcessorConfig::default()
        .with_ultra_large_report(ultra_large_report)
        .with_finish_event_processor(Arc::new(move |info: &FinishEventInfo| {
            if info.is_event_fail {
                failed.fetch_add(1, Ordering::Relaxed);
            }
        }));
    let processor = BatchSpanProcessor::new(exporter, config);

    tokio::select! {
        res = submit_trace(&processor, &workspace_id) => res?,
        _ = tokio::signal::ctrl_c() => info!("interrupted, flushing what was submitted"),
    }

    let deadline = CancellationToken::new();
    let timer = deadline.clone();
    tokio::spawn(async move {
        tokio::time::sleep(SHUTDOWN_DEADLINE).await;
        timer.cancel();
    });

    if let Err(e) = processor.force_flush(&deadline).await {
        error!(error = %e, "flush did not complete");
    }
    processor.shutdown(&deadline).await?;

    for (name, metrics) in processor.queue_metrics() {
        info!(
            queue = name,
            enqueued = metrics.enqueued(),
            dropped = metrics.dropped(),
            batches = metrics.exported_batches(),
            items = metrics.exported_items(),
            "queue stats"
        );
    }
    info!(failed_events = failed_events.load(Ordering::Relaxed), "demo finished");
    Ok(())
}

async fn submit_trace(
    processor: &BatchSpanProcessor,
    workspace_id: &str,
) -> Result<(), serde_json::Error> {
    let mut root = Span::root("handle_request", "custom")
        .with_workspace_id(workspace_id)
        .with_service_name("span-uploader-demo");
    root.set_input("What is in this picture?");
    root.set_tag("user_id", "demo-user");

    let mut retrieval = root.child("load_context", "retriever");
    retrieval.set_input("context ".repeat(200_000));
    retrieval.set_tag("documents", 42i64);
    tokio::time::sleep(Duration::from_millis(20)).await;
    retrieval.finish(0);
    processor.on_span_end(retrieval);

    let mut model = root.child("describe_image", "model");
    let mut input = ModelInput::default();
    input.messages.push(ModelMessage {
        role: "user".into(),
        parts: vec![ModelMessagePart::text("What is in this picture?")],
        ..ModelMessage::default()
    });
    model.set_model_input(&input)?;
    model.set_model_output(&ModelOutput {
        choices: vec![ModelChoice {
            finish_reason: "stop".into(),
            index: 0,
            message: Some(ModelMessage {
                role: "assistant".into(),
                parts: vec![
                    ModelMessagePart::text("A single transparent pixel. Here it is back:"),
                    ModelMessagePart::image("pixel.png", TINY_PNG_BASE64),
                ],
                ..ModelMessage::default()
            }),
        }],
    })?;
    model.set_tag("temperature", 0.2);
    model.set_tag("stream", false);
    model.set_system_tag("runtime", "rust");
    tokio::time::sleep(Duration::from_millis(50)).await;
    model.finish(0);
    processor.on_span_end(model);

    root.set_output("done");
    root.finish(0);
    processor.on_span_end(root);
    Ok(())
}
