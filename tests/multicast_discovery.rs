use std::time::Duration;

use journal_replicator::discovery::{discover, DiscoveryCodes, MulticastResponder};

mod support;
use support::test_config;

/// Exercises the full discovery round-trip on loopback: a responder bound
/// to the default multicast group answers a client's request with its
/// TCP endpoint and SSL mode.
#[tokio::test]
async fn discover_finds_the_responder_on_loopback() {
    let mut config = test_config(19543);
    config.multicast_enabled = true;

    let codes = DiscoveryCodes {
        request_code: 230,
        response_code: 235,
    };

    let responder = MulticastResponder::start(&config, codes, 19543)
        .await
        .expect("bind responder")
        .expect("multicast enabled, responder present");

    let result = discover(&config, codes, Duration::from_millis(300), 5).await;

    let mut responder = responder;
    responder.halt().await;

    let node = result.expect("discovery response");
    assert_eq!(node.port, 19543);
    assert!(!node.ssl_enabled);
}
