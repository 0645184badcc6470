//! Registry behavior under concurrent use and over time.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use mcpdrive::config::McpConfig;
use mcpdrive::mcp::{ClientRegistry, ConnectionState, MemoryConnector};

const ENDPOINT: &str = "http://browser.test:8931/sse";

fn registry(connector: &MemoryConnector) -> ClientRegistry {
    ClientRegistry::with_connector(McpConfig::default(), Arc::new(connector.clone()))
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_first_use_connects_once() {
    let connector = MemoryConnector::new()
        .with_text_tool("browser_snapshot", "page")
        .with_open_delay(Duration::from_millis(500));
    let registry = registry(&connector);

    let clients = join_all((0..8).map(|_| {
        let registry = registry.clone();
        async move { registry.get(ENDPOINT).await }
    }))
    .await;

    let clients: Vec<_> = clients.into_iter().map(Result::unwrap).collect();
    assert_eq!(connector.open_count(), 1);
    assert!(clients.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(registry.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_first_use_shares_failure() {
    let connector = MemoryConnector::new().with_text_tool("browser_snapshot", "page");
    connector.fail_next_opens(3).await;
    let registry = registry(&connector);

    let results = join_all((0..4).map(|_| {
        let registry = registry.clone();
        async move { registry.get(ENDPOINT).await }
    }))
    .await;

    assert!(results.iter().all(Result::is_err));
    // One retry sequence, not one per caller
    assert_eq!(connector.open_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_evicts_idle_clients() {
    let connector = MemoryConnector::new().with_text_tool("browser_snapshot", "page");
    let registry = registry(&connector);

    // No explicit start: the first get launches the sweep
    let client = registry.get(ENDPOINT).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10 * 60)).await;
    assert!(client.is_connected().await, "keepalive must not count as idle eviction");

    tokio::time::sleep(Duration::from_secs(21 * 60)).await;
    assert_eq!(client.state().await, ConnectionState::Disconnected);
    assert!(registry.is_empty().await);

    // Next use dials again
    let fresh = tokio_test::assert_ok!(registry.get(ENDPOINT).await);
    assert!(fresh.is_connected().await);
    assert_eq!(connector.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_server_drop() {
    let connector = MemoryConnector::new().with_text_tool("browser_snapshot", "page");
    let registry = registry(&connector);
    let client = registry.get(ENDPOINT).await.unwrap();

    connector.drop_connections().await;
    tokio::time::sleep(Duration::from_secs(15)).await;

    assert!(client.is_connected().await);
    assert_eq!(connector.open_count(), 2);
    let same = registry.get(ENDPOINT).await.unwrap();
    assert!(Arc::ptr_eq(&client, &same));
}
