//! Upstream Feed Integration Tests
//!
//! Runs the real feed connector against a local WebSocket server speaking
//! the exchange's public ticker protocol and checks what the subscriber sees.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use market_relay::application::services::DEFAULT_WRITE_TIMEOUT;
use market_relay::infrastructure::config::parse_instruments;
use market_relay::infrastructure::okx::ReconnectConfig;
use market_relay::{
    CacheWriter, ChangeSubscriber, FeedConnector, FeedConnectorConfig, FlashDirection,
    InMemoryStore, IngestionStatus, IngestionSupervisor, ProducerKind, SubscriberConfig,
    SyntheticConfig,
};

const PUSHES: [&str; 2] = [
    r#"{"arg":{"channel":"tickers","instId":"BTC-USDT-SWAP"},"data":[{"instType":"SWAP","instId":"BTC-USDT-SWAP","last":"61000","open24h":"60000","ts":"1700000000000"}]}"#,
    r#"{"arg":{"channel":"tickers","instId":"BTC-USDT-SWAP"},"data":[{"instType":"SWAP","instId":"BTC-USDT-SWAP","last":"61100","open24h":"60000","ts":"1700000001000"}]}"#,
];

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

struct Pipeline {
    status: Arc<IngestionStatus>,
    subscriber: Arc<ChangeSubscriber>,
    cancel: CancellationToken,
}

async fn start_pipeline(url: String, synthetic: Option<SyntheticConfig>) -> Pipeline {
    let instruments = parse_instruments("BTC-USDT=60000,BTC-USDT-SWAP=60000").unwrap();
    let store = Arc::new(InMemoryStore::default());
    let cancel = CancellationToken::new();

    let subscriber = Arc::new(ChangeSubscriber::new(
        store.clone(),
        SubscriberConfig {
            flash_clear: Duration::from_secs(60),
            ..SubscriberConfig::default()
        },
        cancel.clone(),
    ));
    subscriber.initialize_realtime().await.unwrap();

    let mut config = FeedConnectorConfig::new(
        instruments.iter().map(|i| i.inst_id.clone()).collect(),
    )
    .with_url(url);
    config.connect_timeout = Duration::from_secs(2);
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(50),
        ..ReconnectConfig::default()
    };

    let status = Arc::new(IngestionStatus::new());
    let (event_tx, event_rx) = mpsc::channel(64);
    let supervisor = IngestionSupervisor::new(
        CacheWriter::new(store, DEFAULT_WRITE_TIMEOUT),
        instruments,
        synthetic,
        Arc::clone(&status),
        cancel.clone(),
    );
    tokio::spawn(supervisor.run(event_rx));
    tokio::spawn(FeedConnector::new(config, event_tx, cancel.clone()).run());

    Pipeline {
        status,
        subscriber,
        cancel,
    }
}

#[tokio::test]
async fn exchange_tickers_flow_to_subscriber() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(socket).await.unwrap();

        let Some(Ok(Message::Text(subscribe))) = ws.next().await else {
            panic!("expected subscribe frame");
        };
        assert!(subscribe.contains(r#""op":"subscribe""#));

        for push in PUSHES {
            ws.send(Message::Text(push.into())).await.unwrap();
        }
        while let Some(Ok(_)) = ws.next().await {}
    });

    let pipeline = start_pipeline(format!("ws://127.0.0.1:{port}"), None).await;

    eventually("upstream price", || {
        pipeline
            .subscriber
            .get("swap:BTC-USDT.P")
            .is_some_and(|e| e.record.last_price == Decimal::new(61_100, 0))
    })
    .await;

    let entry = pipeline.subscriber.get("swap:BTC-USDT.P").unwrap();
    assert_eq!(entry.flash, FlashDirection::Up);
    assert_eq!(entry.record.updated_at.timestamp_millis(), 1_700_000_001_000);
    assert_eq!(pipeline.status.producer(), ProducerKind::Upstream);

    pipeline.cancel.cancel();
}

#[tokio::test]
async fn unreachable_exchange_serves_synthetic_prices() {
    // Bind then drop so the port refuses connections.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let pipeline = start_pipeline(
        format!("ws://127.0.0.1:{port}"),
        Some(SyntheticConfig {
            cadence: Duration::from_millis(50),
            ..SyntheticConfig::default()
        }),
    )
    .await;

    eventually("synthetic records", || pipeline.subscriber.len() == 2).await;
    assert_eq!(pipeline.status.producer(), ProducerKind::Synthetic);

    let entry = pipeline.subscriber.get("spot:BTC-USDT").unwrap();
    let band = Decimal::new(60_000, 0) * Decimal::new(1, 1);
    assert!((entry.record.last_price - Decimal::new(60_000, 0)).abs() <= band);

    pipeline.cancel.cancel();
}
