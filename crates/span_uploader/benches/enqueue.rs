use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use span_uploader::{
    BatchSpanProcessor, ExporterBoxed, NullExporter, ProcessorConfig, QueueConf, Span,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const SPANS_PER_ITER: u64 = 1_000;

fn span_with_tags(tags: usize) -> Span {
    let mut span = Span::root("bench", "custom");
    span.set_input("what is the weather like today?");
    for i in 0..tags {
        span.set_tag(format!("tag_{i}"), i as i64);
    }
    span
}

fn bench_on_span_end(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("on_span_end");
    group.throughput(Throughput::Elements(SPANS_PER_ITER));

    for tags in [0usize, 16] {
        group.bench_with_input(BenchmarkId::new("tags", tags), &tags, |b, &tags| {
            let guard = rt.enter();
            let exporter: Arc<dyn ExporterBoxed> = Arc::new(NullExporter);
            let processor = BatchSpanProcessor::new(
                exporter,
                ProcessorConfig::default().with_queue_conf(QueueConf {
                    span_queue_length: Some(64 * 1024),
                    span_max_export_batch_length: Some(512),
                }),
            );
            let template = Arc::new(span_with_tags(tags));

            b.iter(|| {
                for _ in 0..SPANS_PER_ITER {
                    processor.on_span_end(black_box(Arc::clone(&template)));
                }
            });

            drop(guard);
            rt.block_on(processor.shutdown(&CancellationToken::new()))
                .unwrap();
        });
    }

    group.finish();
}

criterion_group!(benches, bench_on_span_end);
criterion_main!(benches);
