mod support;

use std::time::Duration;

use futures_util::future::join_all;
use serde_json::{Value, json};
use support::MockTransport;
use tether_engine::{ArgValue, ClientConfig, IncreasingNonceFactory, LockKey, RestClient, RestClientBuilder};
use tether_types::{ApiDescriptor, MethodDescriptor, MethodId, WireKind, content_type};

fn trading_api() -> ApiDescriptor {
    ApiDescriptor::new("Trading")
        .with_method(
            MethodDescriptor::post("trade", "/trade")
                .with_param(WireKind::Form, "nonce")
                .with_param(WireKind::Form, "amount")
                .consumes(content_type::FORM_URLENCODED),
        )
        .with_method(MethodDescriptor::get("time", "/time"))
}

fn client_with(transport: MockTransport, pool_size: usize) -> RestClient<MockTransport> {
    RestClientBuilder::new(trading_api(), "http://h")
        .config(ClientConfig::default().receive_pool_size(pool_size))
        .build(transport)
        .unwrap()
}

async fn run_all(client: &RestClient<MockTransport>, calls: Vec<(&'static str, Vec<ArgValue>)>) {
    let handles = calls.into_iter().map(|(method, args)| {
        let client = client.clone();
        tokio::spawn(async move { client.invoke::<Value>(&MethodId::new(method), args).await })
    });
    for result in join_all(handles).await {
        result.unwrap().unwrap();
    }
}

fn nonce_of(body: &str) -> u64 {
    body.split('&')
        .find_map(|pair| pair.strip_prefix("nonce="))
        .and_then(|value| value.parse().ok())
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_key_serializes_dispatch_and_orders_nonces() {
    let transport = MockTransport::json(200, json!({})).with_send_delay(Duration::from_millis(15));
    let client = client_with(transport, 8);
    let key = LockKey::with_factory(IncreasingNonceFactory::new());

    let calls = (0..8i64)
        .map(|amount| ("trade", vec![ArgValue::from(key.clone()), ArgValue::from(amount)]))
        .collect();
    run_all(&client, calls).await;

    let transport = client.transport();
    assert_eq!(transport.peak_sending(), 1);
    let nonces: Vec<u64> = transport.requests().iter().map(|request| nonce_of(&request.body)).collect();
    assert_eq!(nonces.len(), 8);
    assert!(nonces.windows(2).all(|pair| pair[0] < pair[1]), "nonces out of order: {nonces:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_keys_dispatch_concurrently() {
    let transport = MockTransport::json(200, json!({})).with_send_delay(Duration::from_millis(50));
    let client = client_with(transport, 8);

    let calls = (0..4i64)
        .map(|amount| {
            let key = LockKey::with_factory(IncreasingNonceFactory::new());
            ("trade", vec![ArgValue::from(key), ArgValue::from(amount)])
        })
        .collect();
    run_all(&client, calls).await;

    assert!(client.transport().peak_sending() > 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn surplus_lock_key_argument_still_serializes() {
    let transport = MockTransport::json(200, json!({})).with_send_delay(Duration::from_millis(15));
    let client = client_with(transport, 8);
    let key = LockKey::new();

    let calls = (0..4).map(|_| ("time", vec![ArgValue::from(key.clone())])).collect();
    run_all(&client, calls).await;

    let transport = client.transport();
    assert_eq!(transport.peak_sending(), 1);
    assert!(transport.requests().iter().all(|request| request.url == "http://h/time"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn receive_runs_outside_the_lock() {
    let transport = MockTransport::json(200, json!({})).with_receive_delay(Duration::from_millis(60));
    let client = client_with(transport, 4);
    let key = LockKey::with_factory(IncreasingNonceFactory::new());

    let calls = (0..4i64)
        .map(|amount| ("trade", vec![ArgValue::from(key.clone()), ArgValue::from(amount)]))
        .collect();
    run_all(&client, calls).await;

    assert!(client.transport().peak_receiving() > 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn receive_concurrency_is_bounded_by_the_pool() {
    let transport = MockTransport::json(200, json!({})).with_receive_delay(Duration::from_millis(40));
    let client = client_with(transport, 2);

    let calls = (0..6).map(|_| ("time", Vec::new())).collect();
    run_all(&client, calls).await;

    assert_eq!(client.transport().peak_receiving(), 2);
    assert_eq!(client.coordinator().pool_size(), 2);
    assert_eq!(client.coordinator().active_receives(), 0);
    assert_eq!(client.transport().requests().len(), 6);
}
