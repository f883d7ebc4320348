//! Relay Pipeline Integration Tests
//!
//! Drives the supervisor with feed events and observes the results through a
//! change subscriber attached to the same store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use market_relay::application::services::DEFAULT_WRITE_TIMEOUT;
use market_relay::{
    AssetClass, CacheWriter, ChangeSubscriber, FeedEvent, FlashDirection, InMemoryStore,
    IngestionStatus, IngestionSupervisor, MarketStore, ProducerKind, ProviderTicker,
    SubscriberConfig, SyntheticConfig, TrackedInstrument, default_instruments,
};

struct Relay {
    store: Arc<InMemoryStore>,
    status: Arc<IngestionStatus>,
    subscriber: Arc<ChangeSubscriber>,
    events: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
}

async fn start_relay(
    instruments: Vec<TrackedInstrument>,
    synthetic: Option<SyntheticConfig>,
) -> Relay {
    let store = Arc::new(InMemoryStore::default());
    let cancel = CancellationToken::new();

    let subscriber = Arc::new(ChangeSubscriber::new(
        store.clone(),
        SubscriberConfig::default(),
        cancel.clone(),
    ));
    subscriber.initialize_realtime().await.unwrap();

    let status = Arc::new(IngestionStatus::new());
    let supervisor = IngestionSupervisor::new(
        CacheWriter::new(store.clone(), DEFAULT_WRITE_TIMEOUT),
        instruments,
        synthetic,
        Arc::clone(&status),
        cancel.clone(),
    );
    let (events, rx) = mpsc::channel(64);
    let supervisor = tokio::spawn(supervisor.run(rx));

    Relay {
        store,
        status,
        subscriber,
        events,
        cancel,
        supervisor,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

fn ticker(inst_id: &str, last: &str) -> FeedEvent {
    FeedEvent::Ticker(ProviderTicker::new(inst_id, last, "60000"))
}

#[tokio::test(start_paused = true)]
async fn swap_ticker_reaches_subscriber_with_flash() {
    let relay = start_relay(default_instruments(), None).await;
    relay
        .events
        .send(FeedEvent::Subscribed { instruments: 12 })
        .await
        .unwrap();

    relay.events.send(ticker("BTC-USDT-SWAP", "61000")).await.unwrap();
    settle().await;

    let entry = relay.subscriber.get("swap:BTC-USDT.P").unwrap();
    assert_eq!(entry.record.asset_class, AssetClass::Swap);
    assert_eq!(entry.record.symbol, "BTC/USDT.P");
    assert_eq!(entry.record.last_price, Decimal::new(61_000, 0));
    assert_eq!(entry.flash, FlashDirection::None);

    relay.events.send(ticker("BTC-USDT-SWAP", "61010.5")).await.unwrap();
    settle().await;
    assert_eq!(
        relay.subscriber.get("swap:BTC-USDT.P").unwrap().flash,
        FlashDirection::Up
    );

    tokio::time::sleep(Duration::from_millis(600)).await;
    let entry = relay.subscriber.get("swap:BTC-USDT.P").unwrap();
    assert_eq!(entry.flash, FlashDirection::None);
    assert_eq!(entry.record.last_price, Decimal::new(610_105, 1));
}

#[tokio::test(start_paused = true)]
async fn outage_falls_back_to_synthetic_until_upstream_returns() {
    let instruments = default_instruments();
    let relay = start_relay(instruments.clone(), Some(SyntheticConfig::default())).await;

    relay
        .events
        .send(FeedEvent::Unreachable {
            reason: "connection refused".to_string(),
        })
        .await
        .unwrap();
    settle().await;

    assert_eq!(relay.status.producer(), ProducerKind::Synthetic);
    assert_eq!(relay.subscriber.len(), instruments.len());
    for class in AssetClass::all() {
        assert!(
            relay
                .subscriber
                .markets_by_symbol()
                .iter()
                .any(|e| e.record.asset_class == *class),
            "no synthetic {class} record"
        );
    }

    // Subsequent synthetic batches move prices and flash.
    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;
    assert!(relay.status.snapshot().records_written >= 2 * instruments.len() as u64);

    relay
        .events
        .send(FeedEvent::Subscribed { instruments: 12 })
        .await
        .unwrap();
    relay.events.send(ticker("BTC-USDT", "1234.5")).await.unwrap();
    settle().await;
    assert_eq!(relay.status.producer(), ProducerKind::Upstream);

    // No synthetic write overrides the live price afterwards.
    let written = relay.status.snapshot().records_written;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(relay.status.snapshot().records_written, written);
    assert_eq!(
        relay.subscriber.get("spot:BTC-USDT").unwrap().record.last_price,
        Decimal::new(12_345, 1)
    );
}

#[tokio::test(start_paused = true)]
async fn late_subscriber_hydrates_without_flash() {
    let relay = start_relay(default_instruments(), None).await;
    relay
        .events
        .send(FeedEvent::Subscribed { instruments: 12 })
        .await
        .unwrap();
    relay.events.send(ticker("ETH-USDT", "3000")).await.unwrap();
    relay.events.send(ticker("ETH-USDT", "2990")).await.unwrap();
    settle().await;

    let late = ChangeSubscriber::new(
        relay.store.clone(),
        SubscriberConfig::default(),
        relay.cancel.clone(),
    );
    late.initialize_realtime().await.unwrap();

    let entry = late.get("spot:ETH-USDT").unwrap();
    assert_eq!(entry.flash, FlashDirection::None);
    assert_eq!(entry.record.last_price, Decimal::new(2990, 0));

    relay.events.send(ticker("ETH-USDT", "2980")).await.unwrap();
    settle().await;
    assert_eq!(late.get("spot:ETH-USDT").unwrap().flash, FlashDirection::Down);
    assert_eq!(
        relay.subscriber.get("spot:ETH-USDT").unwrap().flash,
        FlashDirection::Down
    );
}

#[tokio::test(start_paused = true)]
async fn invalid_tickers_never_reach_the_store() {
    let relay = start_relay(default_instruments(), None).await;
    relay
        .events
        .send(FeedEvent::Subscribed { instruments: 12 })
        .await
        .unwrap();

    relay.events.send(ticker("BTC-USDT", "not-a-price")).await.unwrap();
    relay.events.send(ticker("", "100")).await.unwrap();
    relay.events.send(ticker("ETH-USDT", "0")).await.unwrap();
    settle().await;

    assert!(relay.store.snapshot().await.unwrap().is_empty());
    assert!(relay.subscriber.is_empty());
    assert_eq!(relay.status.snapshot().tickers_dropped, 3);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_supervisor_and_subscriber() {
    let relay = start_relay(default_instruments(), Some(SyntheticConfig::default())).await;
    relay
        .events
        .send(FeedEvent::Unreachable {
            reason: "timed out".to_string(),
        })
        .await
        .unwrap();
    settle().await;

    relay.cancel.cancel();
    relay.supervisor.await.unwrap();
    settle().await;

    assert_eq!(relay.status.producer(), ProducerKind::Idle);
    assert!(!relay.subscriber.is_active());
}
