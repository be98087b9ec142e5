//! Performance benchmarks for a3s-agentbus
//!
//! Run with: cargo bench

use a3s_agentbus::{
    handler_fn, parse_provider_response, Envelope, ExecutionMethod, Message, MessageBus,
    TaskRequest, TransactionManager,
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;

fn task_envelope(i: usize) -> Envelope {
    Envelope::new(
        "orchestrator",
        Message::ExecuteTask(
            TaskRequest::new(format!("task-{}", i), "send 0.01 ETH to vitalik.eth")
                .with_wallet("0xabc0000000000000000000000000000000000001")
                .with_chain(8453),
        ),
    )
}

fn bench_envelope_creation(c: &mut Criterion) {
    c.bench_function("Envelope::new", |b| {
        b.iter(|| task_envelope(1));
    });
}

fn bench_envelope_serialization(c: &mut Criterion) {
    let envelope = task_envelope(1);

    c.bench_function("Envelope serialize", |b| {
        b.iter(|| serde_json::to_vec(&envelope).unwrap());
    });

    let bytes = serde_json::to_vec(&envelope).unwrap();
    c.bench_function("Envelope deserialize", |b| {
        b.iter(|| serde_json::from_slice::<Envelope>(&bytes).unwrap());
    });
}

fn bench_provider_parsing(c: &mut Criterion) {
    let body = serde_json::json!({
        "session_id": "s1",
        "request_id": "r1",
        "actions": [{
            "type": "sign_transaction",
            "data": "{\"chainId\":8453,\"to\":\"0x1111111111111111111111111111111111111111\",\"value\":\"0x2386f26fc10000\",\"data\":\"0x\"}"
        }]
    });

    c.bench_function("parse_provider_response (actions)", |b| {
        b.iter(|| parse_provider_response(&body));
    });
}

fn bench_publish_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("publish_throughput");
    for subscribers in [1, 10] {
        let bus = rt.block_on(async {
            let bus = Arc::new(MessageBus::new());
            for _ in 0..subscribers {
                bus.subscribe("execute_task", handler_fn(|_env: Envelope| async { Ok(()) }))
                    .unwrap();
            }
            bus
        });

        group.bench_function(format!("100 envelopes, {} subscribers", subscribers), |b| {
            b.to_async(&rt).iter(|| async {
                for i in 0..100 {
                    bus.publish(task_envelope(i));
                }
            });
        });
    }
    group.finish();
}

fn bench_record_transitions(c: &mut Criterion) {
    c.bench_function("TransactionManager create+submit+confirm", |b| {
        let manager = TransactionManager::new();
        b.iter(|| {
            let record = manager.create("task", None, ExecutionMethod::Execute);
            manager.mark_submitted(&record.id, None, None).unwrap();
            manager.confirm_transaction(&record.id, "0xabc").unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_envelope_creation,
    bench_envelope_serialization,
    bench_provider_parsing,
    bench_publish_throughput,
    bench_record_transitions,
);
criterion_main!(benches);
