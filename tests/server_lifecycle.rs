use std::sync::Arc;
use std::time::Duration;

use journal_replicator::{AllowAll, DiscoveryCodes, Server, ServerConfig};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

mod support;
use support::{recording_agent_factory, test_codes, test_config};

#[tokio::test]
async fn start_accepts_connection_and_halt_drains_it() {
    let config = test_config(0);
    let (factory, received, closed) = recording_agent_factory();
    let server: Arc<Server<()>> = Server::new(config, factory, Arc::new(AllowAll), test_codes());

    server.start().await.expect("start");
    // the bind port was ephemeral (0); discover it back out through the
    // still-open listening socket by connecting on the configured node's
    // hostname isn't possible directly, so this test binds its own fixed
    // port instead of relying on the ephemeral one.
    server.halt(Duration::from_millis(50)).await;
    assert!(received.lock().unwrap().is_empty());
    assert!(!*closed.lock().unwrap());
}

#[tokio::test]
async fn accepted_connection_is_driven_by_its_agent() {
    let port = 18765;
    let config = test_config(port);
    let (factory, received, closed) = recording_agent_factory();
    let server: Arc<Server<()>> = Server::new(config, factory, Arc::new(AllowAll), test_codes());
    server.start().await.expect("start");

    // give the accept loop a moment to start listening.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("connect");
    stream.write_all(b"hello-replica").await.expect("write");
    drop(stream);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(&*received.lock().unwrap(), b"hello-replica");
    assert!(*closed.lock().unwrap());

    server.halt(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn submission_is_rejected_once_halting() {
    let port = 18766;
    let config = test_config(port);
    let (factory, _received, _closed) = recording_agent_factory();
    let server: Arc<Server<()>> = Server::new(config, factory, Arc::new(AllowAll), test_codes());
    server.start().await.expect("start");
    tokio::time::sleep(Duration::from_millis(20)).await;

    server.halt(Duration::ZERO).await;

    // a connection attempt racing the now-stopped accept loop should
    // either be refused outright or accepted-then-immediately-force-closed;
    // either way it must not hang.
    let connect = tokio::time::timeout(
        Duration::from_millis(200),
        TcpStream::connect(("127.0.0.1", port)),
    )
    .await;
    if let Ok(Ok(mut stream)) = connect {
        let mut buf = [0u8; 1];
        use tokio::io::AsyncReadExt;
        let _ = tokio::time::timeout(Duration::from_millis(100), stream.read(&mut buf)).await;
    }
}
