//! Address discovery against a mock node API

mod common;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use etherna_launch::runtime::{AddressDiscovery, DiscoveryConfig, DiscoveryError};
use std::sync::atomic::Ordering;

fn discovery(max_attempts: Option<u32>) -> AddressDiscovery {
    AddressDiscovery::new(&DiscoveryConfig {
        interval_ms: 10,
        max_attempts,
        base_url: None,
    })
    .unwrap()
}

#[tokio::test]
async fn test_retries_until_address_published() {
    let (url, hits) = common::addresses_api(
        2,
        vec![
            "/ip4/127.0.0.1/tcp/1634/p2p/QmEdge",
            "/ip4/10.0.0.5/tcp/1634/p2p/QmEdge",
        ],
    )
    .await;

    let address = discovery(Some(10)).poll_underlay_address(&url).await.unwrap();

    assert_eq!(address, "/ip4/10.0.0.5/tcp/1634/p2p/QmEdge");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_only_loopback_addresses() {
    let (url, _) = common::addresses_api(
        0,
        vec!["/ip4/127.0.0.1/tcp/1634/p2p/QmEdge", "/ip6/::1/tcp/1634/p2p/QmEdge"],
    )
    .await;

    let result = discovery(Some(10)).poll_underlay_address(&url).await;

    assert!(matches!(result, Err(DiscoveryError::NoRoutableAddress { .. })));
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let (url, hits) = common::addresses_api(usize::MAX, vec![]).await;

    let result = discovery(Some(3)).poll_underlay_address(&url).await;

    assert!(matches!(result, Err(DiscoveryError::Exhausted { attempts: 3, .. })));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_error_status_is_not_retried() {
    let router = Router::new().route(
        "/addresses",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "node not ready") }),
    );
    let url = common::serve(router).await;

    let result = discovery(Some(10)).poll_underlay_address(&url).await;

    assert!(matches!(result, Err(DiscoveryError::Status { status: 500, .. })));
}
