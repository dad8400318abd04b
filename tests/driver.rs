//! Failure handling, close semantics and shutdown over real sockets.

mod harness;

use std::time::{Duration, Instant};

use harness::{SilentServer, TestServer, client_driver};
use wsbench::{BenchConfig, CloseCode, ConnectionState, Error, Frame, Outcome, Pattern};

#[tokio::test]
async fn test_silent_peer_records_one_timeout() {
    let server = SilentServer::spawn().await;
    let (pool, driver) = client_driver(Duration::from_millis(100));

    let config = BenchConfig::new()
        .with_connections(1)
        .with_message_count(10)
        .with_receive_timeout(Duration::from_millis(200));
    let report = driver.run(&server.connector(), &config).await;

    assert_eq!(report.count, 1);
    assert_eq!(report.errors, 1);
    assert_eq!(report.timeouts, 1);
    assert!(report.latency.is_none());

    let samples = driver.metrics().samples();
    assert_eq!(samples[0].outcome, Outcome::Timeout);
    assert!(pool.is_empty());
    assert_eq!(pool.for_each(|_| async {}).await, 0);
}

#[tokio::test]
async fn test_failing_connection_does_not_stop_others() {
    let echo = TestServer::spawn().await;
    let silent = SilentServer::spawn().await;
    let (pool, driver) = client_driver(Duration::from_millis(100));

    let silent_id = pool.acquire(&silent.connector()).await.unwrap();
    let config = BenchConfig::new()
        .with_connections(3)
        .with_message_count(20)
        .with_receive_timeout(Duration::from_millis(200));
    // The driver only works the connections it opens itself.
    let report = driver.run(&echo.connector(), &config).await;
    assert_eq!(report.count, 60);
    assert_eq!(report.errors, 0);

    let report = driver
        .run(&silent.connector(), &config.clone().with_connections(2))
        .await;
    assert_eq!(report.count, 62);
    assert_eq!(report.timeouts, 2);
    assert_eq!(pool.len(), 4);
    assert!(pool.ids().contains(&silent_id));

    pool.shutdown().await;
    echo.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_target_counts_failed_connections() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (_pool, driver) = client_driver(Duration::from_millis(100));
    let connector = wsbench::TcpConnector::from_url(&format!("ws://{addr}/")).unwrap();
    let report = driver
        .run(&connector, &BenchConfig::new().with_connections(3))
        .await;

    assert_eq!(report.count, 0);
    assert_eq!(report.failed_connections, 3);
}

#[tokio::test]
async fn test_close_twice_is_noop() {
    let server = TestServer::spawn().await;
    let (pool, _) = client_driver(Duration::from_millis(500));
    let id = pool.acquire(&server.connector()).await.unwrap();

    let mut conn = pool.lock(id).await.unwrap();
    conn.close(CloseCode::Normal, "done").await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(conn.peer_close().map(|c| c.code), Some(CloseCode::Normal));

    conn.close(CloseCode::GoingAway, "again").await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(conn.peer_close().map(|c| c.code), Some(CloseCode::Normal));
    assert!(matches!(
        conn.send(Frame::text("late")).await,
        Err(Error::ConnectionClosed(_))
    ));
    drop(conn);

    server.shutdown().await;
}

#[tokio::test]
async fn test_report_twice_is_identical() {
    let server = TestServer::spawn().await;
    let (pool, driver) = client_driver(Duration::from_millis(500));

    let config = BenchConfig::new().with_connections(4).with_message_count(10);
    let first = driver.run(&server.connector(), &config).await;
    let second = driver.metrics().report();
    assert_eq!(first, second);
    assert_eq!(driver.metrics().report(), second);

    pool.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_deadline_ends_unbounded_run() {
    let server = TestServer::spawn().await;
    let (pool, driver) = client_driver(Duration::from_millis(500));

    let config = BenchConfig::new()
        .with_connections(4)
        .unbounded()
        .with_duration(Duration::from_millis(300));
    let started = Instant::now();
    let report = driver.run(&server.connector(), &config).await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(report.count > 0);
    assert_eq!(report.errors, 0);

    pool.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_fixed_rate_paces_messages() {
    let server = TestServer::spawn().await;
    let (pool, driver) = client_driver(Duration::from_millis(500));

    let config = BenchConfig::new()
        .with_connections(2)
        .with_message_count(5)
        .with_pattern(Pattern::FixedRate { per_second: 20.0 });
    let report = driver.run(&server.connector(), &config).await;

    assert_eq!(report.count, 10);
    // Five ticks at 50ms spacing, the first one immediate.
    assert!(report.span >= Duration::from_millis(190));

    pool.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_cancels_pending_receive_and_is_idempotent() {
    let server = SilentServer::spawn().await;
    let (pool, _) = client_driver(Duration::from_millis(100));
    let id = pool.acquire(&server.connector()).await.unwrap();

    let mut conn = pool.lock(id).await.unwrap();
    let reader = tokio::spawn(async move { conn.receive().await });
    tokio::task::yield_now().await;

    let started = Instant::now();
    pool.shutdown().await;
    pool.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(reader.await.unwrap(), Err(Error::Cancelled)));

    assert!(pool.is_empty());
    assert!(pool.is_shut_down());
    assert!(matches!(
        pool.acquire(&server.connector()).await,
        Err(Error::Cancelled)
    ));
}

#[tokio::test]
async fn test_server_for_each_does_not_wait_on_idle_clients() {
    let server = TestServer::spawn().await;
    let (pool, _driver) = client_driver(Duration::from_millis(100));
    pool.acquire(&server.connector()).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while server.server().pool().is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.server().pool().len(), 1);

    let visited = tokio::time::timeout(
        Duration::from_secs(2),
        server.server().pool().for_each(|_| async {}),
    )
    .await
    .expect("for_each blocked on a connection waiting for input");
    assert!(visited <= 1);

    pool.shutdown().await;
    server.shutdown().await;
}
