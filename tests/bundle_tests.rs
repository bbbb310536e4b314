mod common;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bifrost::bundle::UpstreamBundle;
use bifrost::dns::Rcode;
use bifrost::error::BifrostError;
use bifrost::upstream::Upstream;

use common::{MockUpstream, a_query, first_a};

fn bundle(upstreams: Vec<Arc<MockUpstream>>) -> UpstreamBundle {
    UpstreamBundle::new(
        upstreams
            .into_iter()
            .map(|upstream| upstream as Arc<dyn Upstream>)
            .collect(),
    )
}

#[tokio::test]
async fn single_upstream_result_is_verbatim() {
    let upstream = Arc::new(
        MockUpstream::answering("u1", "example.com", Ipv4Addr::new(93, 184, 216, 34), 300)
            .trusted(true),
    );
    let response = bundle(vec![upstream.clone()])
        .exchange(&a_query("example.com"))
        .await
        .unwrap();

    assert_eq!(response.rcode(), Rcode::NoError);
    assert_eq!(first_a(&response), Some(Ipv4Addr::new(93, 184, 216, 34)));
    assert_eq!(upstream.hit_count(), 1);
}

#[tokio::test]
async fn single_upstream_error_is_verbatim() {
    let upstream = Arc::new(MockUpstream::failing("u1"));
    let err = bundle(vec![upstream])
        .exchange(&a_query("example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, BifrostError::UpstreamExchange(..)));
}

#[tokio::test(start_paused = true)]
async fn success_beats_earlier_untrusted_refusal() {
    // S2: untrusted NXDOMAIN arrives first, trusted NOERROR wins.
    let u1 = Arc::new(
        MockUpstream::with_rcode("u1", Rcode::NxDomain).delay(Duration::from_millis(10)),
    );
    let u2 = Arc::new(
        MockUpstream::answering("u2", "example.com", Ipv4Addr::new(192, 0, 2, 7), 60)
            .trusted(true)
            .delay(Duration::from_millis(40)),
    );

    let response = bundle(vec![u1, u2])
        .exchange(&a_query("example.com"))
        .await
        .unwrap();
    assert_eq!(response.rcode(), Rcode::NoError);
    assert_eq!(first_a(&response), Some(Ipv4Addr::new(192, 0, 2, 7)));
}

#[tokio::test(start_paused = true)]
async fn first_untrusted_refusal_is_the_candidate() {
    // S3: no acceptable result ever arrives; the earliest untrusted
    // non-SUCCESS answer is returned.
    let u1 = Arc::new(
        MockUpstream::with_rcode("u1", Rcode::NxDomain).delay(Duration::from_millis(10)),
    );
    let u2 = Arc::new(
        MockUpstream::with_rcode("u2", Rcode::ServFail).delay(Duration::from_millis(30)),
    );

    let response = bundle(vec![u1, u2])
        .exchange(&a_query("example.com"))
        .await
        .unwrap();
    assert_eq!(response.rcode(), Rcode::NxDomain);
}

#[tokio::test(start_paused = true)]
async fn trusted_refusal_is_accepted_immediately() {
    let u1 = Arc::new(
        MockUpstream::with_rcode("u1", Rcode::NxDomain)
            .trusted(true)
            .delay(Duration::from_millis(10)),
    );
    let u2 = Arc::new(
        MockUpstream::answering("u2", "example.com", Ipv4Addr::new(192, 0, 2, 7), 60)
            .delay(Duration::from_millis(500)),
    );

    let started = tokio::time::Instant::now();
    let response = bundle(vec![u1, u2])
        .exchange(&a_query("example.com"))
        .await
        .unwrap();
    assert_eq!(response.rcode(), Rcode::NxDomain);
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn transport_errors_are_discarded() {
    let u1 = Arc::new(MockUpstream::failing("u1").delay(Duration::from_millis(5)));
    let u2 = Arc::new(
        MockUpstream::answering("u2", "example.com", Ipv4Addr::new(192, 0, 2, 9), 60)
            .delay(Duration::from_millis(20)),
    );

    let response = bundle(vec![u1, u2])
        .exchange(&a_query("example.com"))
        .await
        .unwrap();
    assert_eq!(first_a(&response), Some(Ipv4Addr::new(192, 0, 2, 9)));
}

#[tokio::test(start_paused = true)]
async fn all_failures_yield_no_response() {
    let u1 = Arc::new(MockUpstream::failing("u1"));
    let u2 = Arc::new(MockUpstream::failing("u2").delay(Duration::from_millis(10)));

    let err = bundle(vec![u1, u2])
        .exchange(&a_query("example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, BifrostError::NoUpstreamResponse));
}
