//! Relay Pipeline Integration Tests
//!
//! Runs the broadcast loop, downstream server and session bootstrapper
//! against an in-process feed session, with feed callbacks fired from a
//! plain OS thread.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use neo_quote_relay::application::ports::{
    CredentialError, CredentialSource, FeedCallbacks, FeedSession, SessionError, SessionFactory,
};
use neo_quote_relay::{
    BootstrapOutcome, BroadcastLoop, BroadcastSettings, DownstreamServer, IngestAdapter,
    RelayContext, SessionBootstrapper, SessionCredentials, SessionState, UpstreamRef,
    distribution_queue,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Fakes
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct Call {
    subscribe: bool,
    aggregate: bool,
    scrips: Vec<String>,
}

#[derive(Default)]
struct RecordingSession {
    calls: Mutex<Vec<Call>>,
}

impl RecordingSession {
    fn record(&self, subscribe: bool, instruments: &[UpstreamRef], aggregate: bool) {
        self.calls.lock().push(Call {
            subscribe,
            aggregate,
            scrips: instruments.iter().map(UpstreamRef::scrip).collect(),
        });
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

impl FeedSession for RecordingSession {
    fn subscribe(&self, instruments: &[UpstreamRef], aggregate: bool) -> Result<(), SessionError> {
        self.record(true, instruments, aggregate);
        Ok(())
    }

    fn unsubscribe(
        &self,
        instruments: &[UpstreamRef],
        aggregate: bool,
    ) -> Result<(), SessionError> {
        self.record(false, instruments, aggregate);
        Ok(())
    }
}

struct StaticCredentials;

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn fetch(&self) -> Result<Option<SessionCredentials>, CredentialError> {
        Ok(Some(SessionCredentials {
            token: "token".to_string(),
            sid: "sid".to_string(),
            user_id: "user".to_string(),
            base_url: "https://mis.kotaksecurities.com".to_string(),
            consumer_key: String::new(),
            server_id: String::new(),
        }))
    }
}

/// Hands out the recording session and keeps the callbacks it was given.
#[derive(Default)]
struct CapturingFactory {
    session: Arc<RecordingSession>,
    callbacks: Mutex<Option<Arc<dyn FeedCallbacks>>>,
}

impl SessionFactory for CapturingFactory {
    fn connect(
        &self,
        _credentials: &SessionCredentials,
        callbacks: Arc<dyn FeedCallbacks>,
    ) -> Result<Arc<dyn FeedSession>, SessionError> {
        *self.callbacks.lock() = Some(callbacks);
        Ok(Arc::clone(&self.session) as Arc<dyn FeedSession>)
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Relay {
    addr: SocketAddr,
    context: Arc<RelayContext>,
    factory: Arc<CapturingFactory>,
    cancel: CancellationToken,
}

impl Relay {
    async fn start() -> Self {
        let context = RelayContext::shared();
        let cancel = CancellationToken::new();
        let (producer, consumer) = distribution_queue();

        let server = DownstreamServer::bind("127.0.0.1:0", Arc::clone(&context))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run(cancel.clone()));

        let broadcast = BroadcastLoop::new(
            Arc::clone(&context),
            consumer,
            BroadcastSettings {
                error_pause: Duration::from_millis(1),
            },
        );
        tokio::spawn(broadcast.run(cancel.clone()));

        let factory = Arc::new(CapturingFactory::default());
        let bootstrapper = SessionBootstrapper::new(
            Arc::clone(&context),
            Arc::new(StaticCredentials),
            Arc::clone(&factory) as Arc<dyn SessionFactory>,
            Arc::new(IngestAdapter::new(producer)),
        )
        .with_poll_interval(Duration::from_millis(10));

        let outcome = timeout(Duration::from_secs(2), bootstrapper.run(cancel.clone()))
            .await
            .unwrap();
        assert_eq!(outcome, BootstrapOutcome::Connected { polls: 1 });

        Self {
            addr,
            context,
            factory,
            cancel,
        }
    }

    async fn connect(&self, expected_subscribers: usize) -> Client {
        let (client, _) = connect_async(format!("ws://{}", self.addr)).await.unwrap();
        wait_until(|| self.context.subscribers.len() == expected_subscribers).await;
        client
    }

    fn callbacks(&self) -> Arc<dyn FeedCallbacks> {
        self.factory.callbacks.lock().clone().unwrap()
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("no frame in time")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn subscribe_splits_regular_and_aggregate_groups() {
    let relay = Relay::start().await;
    let mut client = relay.connect(1).await;

    send_json(
        &mut client,
        json!({"action": "subscribe", "symbols": ["NSE|11536", "BOGUS", "NSE|26000", "XYZ|1", "BSE|500325"]}),
    )
    .await;

    wait_until(|| relay.factory.session.calls().len() == 2).await;
    assert_eq!(
        relay.factory.session.calls(),
        vec![
            Call {
                subscribe: true,
                aggregate: false,
                scrips: vec!["nse_cm|11536".to_string(), "bse_cm|500325".to_string()],
            },
            Call {
                subscribe: true,
                aggregate: true,
                scrips: vec!["nse_cm|Nifty 50".to_string()],
            },
        ]
    );
    assert_eq!(relay.context.session.state(), SessionState::Connected);
}

#[tokio::test]
async fn unsubscribe_never_releases_aggregates() {
    let relay = Relay::start().await;
    let mut client = relay.connect(1).await;

    send_json(
        &mut client,
        json!({"action": "unsubscribe", "symbols": ["NSE|26009", "NFO|43210"]}),
    )
    .await;

    wait_until(|| !relay.factory.session.calls().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        relay.factory.session.calls(),
        vec![Call {
            subscribe: false,
            aggregate: false,
            scrips: vec!["nse_fo|43210".to_string()],
        }]
    );
}

#[tokio::test]
async fn feed_thread_messages_reach_every_subscriber() {
    let relay = Relay::start().await;
    let mut first = relay.connect(1).await;
    let mut second = relay.connect(2).await;

    send_json(
        &mut first,
        json!({"action": "subscribe", "symbols": ["NSE|26000"]}),
    )
    .await;
    wait_until(|| relay.context.tokens.is_mapped("Nifty 50")).await;

    let callbacks = relay.callbacks();
    std::thread::spawn(move || {
        callbacks.on_open("test");
        callbacks.on_message(json!("Subscribed"));
        callbacks.on_message(json!({
            "type": "stock_feed",
            "data": [
                {"tk": "11536", "v": "10"},
                {"tk": "11536", "ltp": 3450.1, "op": "3400", "v": 1200},
                {"tk": "NIFTY 50", "iv": "24500.55"}
            ]
        }));
    })
    .join()
    .unwrap();

    for client in [&mut first, &mut second] {
        let quote = next_json(client).await;
        assert_eq!(
            quote,
            json!({"tk": "11536", "lp": "3450.1", "o": "3400", "h": "0", "l": "0", "c": "0", "v": "1200"})
        );
        let index = next_json(client).await;
        assert_eq!(index["tk"], "26000");
        assert_eq!(index["lp"], "24500.55");
    }

    wait_until(|| relay.context.stats.snapshot().quotes_broadcast == 2).await;
    let stats = relay.context.stats.snapshot();
    assert_eq!(stats.records_received, 4);
    assert_eq!(stats.records_discarded, 2);
}

#[tokio::test]
async fn disconnected_subscriber_does_not_stop_delivery() {
    let relay = Relay::start().await;
    let mut staying = relay.connect(1).await;
    let mut leaving = relay.connect(2).await;

    leaving.close(None).await.unwrap();
    wait_until(|| relay.context.subscribers.len() == 1).await;

    relay
        .callbacks()
        .on_message(json!({"tk": "2885", "ltp": "1290.5"}));

    let quote = next_json(&mut staying).await;
    assert_eq!(quote["tk"], "2885");
}

#[tokio::test]
async fn requests_before_session_are_dropped() {
    let context = RelayContext::shared();
    let cancel = CancellationToken::new();
    let server = DownstreamServer::bind("127.0.0.1:0", Arc::clone(&context))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run(cancel.clone()));

    let (mut client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
    send_json(
        &mut client,
        json!({"action": "subscribe", "symbols": ["NSE|11536"]}),
    )
    .await;

    wait_until(|| context.stats.snapshot().requests_dropped == 1).await;
    assert_eq!(context.session.state(), SessionState::AwaitingCredentials);
    assert_eq!(context.stats.snapshot().upstream_calls, 0);

    cancel.cancel();
}
