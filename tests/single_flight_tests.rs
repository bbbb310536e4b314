mod common;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bifrost::plugin::{Plugin, Registry};
use bifrost::plugins::{self, Forward};
use bifrost::sequence::{RuleConfig, Sequence};
use bifrost::upstream::Upstream;

use common::{MockUpstream, a_query, first_a, qctx_for};

fn coalescing_sequence(upstream: Arc<MockUpstream>) -> Arc<Sequence> {
    let mut registry = Registry::new();
    plugins::register_builtins(&mut registry);
    registry
        .insert_instance(
            "up",
            Plugin::Executable(Arc::new(Forward::from_upstreams(vec![
                upstream as Arc<dyn Upstream>,
            ]))),
        )
        .unwrap();

    let rules = vec![
        RuleConfig {
            exec: "single_flight".into(),
            ..RuleConfig::default()
        },
        RuleConfig {
            exec: "$up".into(),
            ..RuleConfig::default()
        },
    ];
    Arc::new(Sequence::build(&rules, &registry, 128).unwrap())
}

#[tokio::test(start_paused = true)]
async fn hundred_identical_queries_share_one_exchange() {
    // S5: one upstream exchange, every caller keeps its own ID.
    let upstream = Arc::new(
        MockUpstream::answering("u1", "x.test", Ipv4Addr::new(192, 0, 2, 5), 120)
            .delay(Duration::from_millis(50)),
    );
    let sequence = coalescing_sequence(upstream.clone());

    let mut tasks = Vec::new();
    for id in 1..=100u16 {
        let sequence = sequence.clone();
        tasks.push(tokio::spawn(async move {
            let mut query = a_query("x.test");
            query.header.id = id;
            let mut qctx = qctx_for(query);
            sequence.execute(&mut qctx).await.unwrap();
            let response = qctx.take_response().unwrap();
            (id, response)
        }));
    }

    for task in tasks {
        let (id, response) = task.await.unwrap();
        assert_eq!(response.header.id, id);
        assert_eq!(first_a(&response), Some(Ipv4Addr::new(192, 0, 2, 5)));
    }

    assert_eq!(upstream.hit_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn different_fingerprints_do_not_coalesce() {
    let upstream = Arc::new(
        MockUpstream::answering("u1", "ignored.test", Ipv4Addr::new(192, 0, 2, 5), 120)
            .delay(Duration::from_millis(20)),
    );
    let sequence = coalescing_sequence(upstream.clone());

    let mut tasks = Vec::new();
    for name in ["a.test", "b.test"] {
        let sequence = sequence.clone();
        tasks.push(tokio::spawn(async move {
            let mut qctx = qctx_for(a_query(name));
            sequence.execute(&mut qctx).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(upstream.hit_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn leader_error_is_shared_by_every_waiter() {
    let upstream = Arc::new(MockUpstream::failing("u1").delay(Duration::from_millis(30)));
    let sequence = coalescing_sequence(upstream.clone());

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let sequence = sequence.clone();
        tasks.push(tokio::spawn(async move {
            let mut qctx = qctx_for(a_query("x.test"));
            sequence.execute(&mut qctx).await
        }));
    }

    for task in tasks {
        assert!(task.await.unwrap().is_err());
    }
    assert_eq!(upstream.hit_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn sequential_queries_are_not_coalesced() {
    let upstream = Arc::new(MockUpstream::answering(
        "u1",
        "x.test",
        Ipv4Addr::new(192, 0, 2, 5),
        120,
    ));
    let sequence = coalescing_sequence(upstream.clone());

    for _ in 0..3 {
        let mut qctx = qctx_for(a_query("x.test"));
        sequence.execute(&mut qctx).await.unwrap();
        assert!(qctx.response().is_some());
    }

    assert_eq!(upstream.hit_count(), 3);
}
