use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use bifrost::context::{QueryContext, RequestMeta, Transport};
use bifrost::dns::{Message, RecordType};
use bifrost::plugin::Registry;
use bifrost::plugins;
use bifrost::sequence::{RuleConfig, Sequence};

fn meta() -> RequestMeta {
    RequestMeta::new("127.0.0.1:40000".parse().unwrap(), Transport::Udp, "bench")
}

fn bench_message_codec(c: &mut Criterion) {
    let mut query = Message::new_query("www.example.com", RecordType::A);
    query.header.id = 0x1234;
    query.ensure_edns(1200);
    let wire = query.to_wire().unwrap();

    c.bench_function("message_parse", |b| {
        b.iter(|| Message::parse(black_box(&wire)).unwrap())
    });
    c.bench_function("message_pack", |b| {
        b.iter(|| black_box(&query).to_wire().unwrap())
    });
}

fn bench_sequence_walk(c: &mut Criterion) {
    let mut registry = Registry::new();
    plugins::register_builtins(&mut registry);

    let rules = vec![
        RuleConfig {
            exec: "mark 1".into(),
            ..RuleConfig::default()
        },
        RuleConfig {
            matches: vec!["qtype A AAAA".into(), "has_mark 1".into()],
            exec: "hosts router.lan 192.168.1.1".into(),
            ..RuleConfig::default()
        },
        RuleConfig {
            matches: vec!["has_resp".into()],
            exec: "return".into(),
            ..RuleConfig::default()
        },
        RuleConfig {
            exec: "reject REFUSED".into(),
            ..RuleConfig::default()
        },
    ];
    let sequence = Arc::new(Sequence::build(&rules, &registry, 128).unwrap());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    c.bench_function("sequence_walk_hosts_hit", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let mut qctx =
                    QueryContext::new(Message::new_query("router.lan", RecordType::A), meta());
                sequence.execute(&mut qctx).await.unwrap();
                black_box(qctx.take_response())
            })
        })
    });
}

criterion_group!(benches, bench_message_codec, bench_sequence_walk);
criterion_main!(benches);
